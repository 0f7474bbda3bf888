use crate::error::ProcessError;

/// Separates the error text from the output in `CommandResult::combined_output`.
pub const COMBINED_TEXT_SEPARATOR: &str = "|";

/// One unit of input handed over by a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub client_id: String,
    pub daemon_name: String,
    /// Zero means the processor default.
    pub timeout_secs: u64,
    pub content: String,
}

impl Command {
    pub fn new(
        client_id: impl Into<String>,
        daemon_name: impl Into<String>,
        timeout_secs: u64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            daemon_name: daemon_name.into(),
            timeout_secs,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub command: Command,
    pub error: Option<ProcessError>,
    pub output: String,
    pub combined_output: String,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn from_error(error: ProcessError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// A feature-level failure, optionally with whatever output was produced.
    pub fn failed(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            error: Some(ProcessError::Feature(message.into())),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn reset_combined_output(&mut self) {
        self.combined_output = match &self.error {
            None => self.output.clone(),
            Some(err) if self.output.is_empty() => err.to_string(),
            Some(err) => format!("{err}{COMBINED_TEXT_SEPARATOR}{}", self.output),
        };
    }
}
