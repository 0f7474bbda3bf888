use serde::{Deserialize, Serialize};

pub mod compact;
pub mod config;
pub mod control;
pub mod framing;

pub const MAX_HOST_NAME_LEN: usize = 256;
pub const MAX_IP_LEN: usize = 64;
pub const MAX_PLATFORM_LEN: usize = 128;
pub const MAX_COMMENT_LEN: usize = 4096;
pub const MAX_COMMAND_TEXT_LEN: usize = 4096;

/// Run duration reported for a command that has been accepted but not finished yet.
pub const IN_FLIGHT_DURATION_SECS: i64 = -1;

/// One app command sent to the gateway over the TCP command transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayRequest {
    pub content: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayResponse {
    pub output: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppCommandRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppCommandResponse {
    #[serde(default)]
    pub command: String,
    /// Unix seconds at which the command arrived; zero when there is no response.
    #[serde(default)]
    pub received_at: u64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub run_duration_secs: i64,
}

impl AppCommandResponse {
    pub fn in_flight(command: impl Into<String>, received_at: u64) -> Self {
        Self {
            command: command.into(),
            received_at,
            result: String::new(),
            run_duration_secs: IN_FLIGHT_DURATION_SECS,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.run_duration_secs == IN_FLIGHT_DURATION_SECS
    }
}

/// Status report a subject sends on every check-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectReportRequest {
    #[serde(default)]
    pub subject_ip: String,
    #[serde(default)]
    pub subject_host_name: String,
    #[serde(default)]
    pub subject_platform: String,
    #[serde(default)]
    pub subject_comment: String,
    #[serde(default)]
    pub command_request: AppCommandRequest,
    #[serde(default)]
    pub command_response: AppCommandResponse,
}

impl SubjectReportRequest {
    /// Trims every text field and caps it to the length the store accepts.
    pub fn lint(&mut self) {
        lint_field(&mut self.subject_ip, MAX_IP_LEN);
        lint_field(&mut self.subject_host_name, MAX_HOST_NAME_LEN);
        lint_field(&mut self.subject_platform, MAX_PLATFORM_LEN);
        lint_field(&mut self.subject_comment, MAX_COMMENT_LEN);
        lint_field(&mut self.command_request.command, MAX_COMMAND_TEXT_LEN);
        lint_field(&mut self.command_response.command, MAX_COMMAND_TEXT_LEN);
        truncate_chars(&mut self.command_response.result, MAX_COMMENT_LEN);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectReportResponse {
    #[serde(default)]
    pub command_request: AppCommandRequest,
    #[serde(default)]
    pub command_response: AppCommandResponse,
}

fn lint_field(value: &mut String, max_chars: usize) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
    truncate_chars(value, max_chars);
}

pub fn truncate_chars(value: &mut String, max_chars: usize) {
    if let Some((index, _)) = value.char_indices().nth(max_chars) {
        value.truncate(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_request_json_roundtrip() {
        let request = SubjectReportRequest {
            subject_ip: "10.0.0.5".to_string(),
            subject_host_name: "edge-01".to_string(),
            subject_platform: "linux".to_string(),
            subject_comment: "disk 42%".to_string(),
            command_request: AppCommandRequest {
                command: "secretpass .s uptime".to_string(),
            },
            command_response: AppCommandResponse::default(),
        };
        let json = serde_json::to_string(&request).expect("serialize");
        let decoded: SubjectReportRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(request, decoded);
    }

    #[test]
    fn report_request_accepts_sparse_json() {
        let decoded: SubjectReportRequest =
            serde_json::from_str(r#"{"subject_host_name":"edge-02"}"#).expect("deserialize");
        assert_eq!(decoded.subject_host_name, "edge-02");
        assert!(decoded.command_request.command.is_empty());
    }

    #[test]
    fn lint_trims_and_caps_fields() {
        let mut request = SubjectReportRequest {
            subject_host_name: format!("  {}  ", "h".repeat(MAX_HOST_NAME_LEN + 10)),
            subject_ip: " 10.0.0.1\n".to_string(),
            ..Default::default()
        };
        request.lint();
        assert_eq!(request.subject_host_name.len(), MAX_HOST_NAME_LEN);
        assert_eq!(request.subject_ip, "10.0.0.1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut value = "héllo".to_string();
        truncate_chars(&mut value, 2);
        assert_eq!(value, "hé");
    }

    #[test]
    fn in_flight_response_is_marked() {
        let response = AppCommandResponse::in_flight("pass .s sleep 3", 10);
        assert!(response.is_in_flight());
        assert!(response.result.is_empty());
    }
}
