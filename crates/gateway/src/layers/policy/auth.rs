use crate::context::ServiceContext;
use crate::error::ProcessError;
use crate::layers::execution::command::Command;
use crate::layers::policy::totp::{acceptable_codes, TOTP_INPUT_LEN};
use protocol::config::AuthConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Admits a command only when one of its lines starts with a password, a
/// TOTP credential derived from a password, or is exactly a shortcut.
#[derive(Debug, Clone)]
pub struct PinAndShortcuts {
    passwords: Vec<String>,
    shortcuts: HashMap<String, String>,
    context: Arc<ServiceContext>,
}

impl PinAndShortcuts {
    pub fn new(config: &AuthConfig, context: Arc<ServiceContext>) -> Self {
        Self {
            passwords: config.passwords.clone(),
            shortcuts: config
                .shortcuts
                .iter()
                .map(|(name, expansion)| (name.trim().to_string(), expansion.clone()))
                .collect(),
            context,
        }
    }

    pub fn transform(&self, command: Command) -> Result<Command, ProcessError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        self.transform_at(command, now)
    }

    pub(crate) fn transform_at(
        &self,
        mut command: Command,
        unix_secs: u64,
    ) -> Result<Command, ProcessError> {
        let mut stripped = None;
        for line in command.content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(expansion) = self.shortcuts.get(line) {
                stripped = Some(expansion.clone());
                break;
            }
            if let Some(rest) = self.strip_password(line) {
                stripped = Some(rest.to_string());
                break;
            }
            if let Some(rest) = self.strip_totp(line, unix_secs)? {
                stripped = Some(rest.to_string());
                break;
            }
        }
        match stripped {
            Some(content) => {
                command.content = content;
                Ok(command)
            }
            None => Err(ProcessError::AuthenticationFailed),
        }
    }

    fn strip_password<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.passwords.iter().find_map(|password| {
            let len = password.len();
            if line.len() < len || !line.is_char_boundary(len) {
                return None;
            }
            if constant_time_eq(&line.as_bytes()[..len], password.as_bytes()) {
                Some(&line[len..])
            } else {
                None
            }
        })
    }

    fn strip_totp<'a>(
        &self,
        line: &'a str,
        unix_secs: u64,
    ) -> Result<Option<&'a str>, ProcessError> {
        if line.len() < TOTP_INPUT_LEN || !line.is_char_boundary(TOTP_INPUT_LEN) {
            return Ok(None);
        }
        let (candidate, rest) = line.split_at(TOTP_INPUT_LEN);
        if !candidate.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        for password in &self.passwords {
            let codes = match acceptable_codes(password, unix_secs) {
                Ok(codes) => codes,
                Err(err) => {
                    tracing::warn!(event = "auth.totp_failed", error = %err);
                    continue;
                }
            };
            let matched = codes
                .iter()
                .any(|code| constant_time_eq(code.as_bytes(), candidate.as_bytes()));
            if !matched {
                continue;
            }
            if !self
                .context
                .totp_replay()
                .admit(password, candidate, rest.trim())
            {
                return Err(ProcessError::TotpReplayRejected);
            }
            return Ok(Some(rest));
        }
        Ok(None)
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const NOW: u64 = 1_700_000_000;

    fn filter(passwords: &[&str], shortcuts: &[(&str, &str)]) -> PinAndShortcuts {
        let config = AuthConfig {
            passwords: passwords.iter().map(|p| p.to_string()).collect(),
            shortcuts: shortcuts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        };
        PinAndShortcuts::new(&config, ServiceContext::new())
    }

    fn command(content: &str) -> Command {
        Command::new("test-client", "test", 10, content)
    }

    #[test]
    fn strips_exactly_the_password() {
        let filter = filter(&["mypin"], &[]);
        let out = filter.transform(command("mypineapple")).expect("match");
        assert_eq!(out.content, "eapple");
    }

    #[test]
    fn matches_password_on_later_line() {
        let filter = filter(&["mypin12"], &[]);
        let out = filter
            .transform(command("hello there\n  mypin12 .s date\nbye"))
            .expect("match");
        assert_eq!(out.content, " .s date");
    }

    #[test]
    fn shortcut_replaces_whole_content() {
        let filter = filter(&["mypin12"], &[("uptime please", ".s uptime")]);
        let out = filter
            .transform(command("  uptime please  "))
            .expect("shortcut");
        assert_eq!(out.content, ".s uptime");
    }

    #[test]
    fn shortcut_must_match_the_whole_line() {
        let filter = filter(&["mypin12"], &[("uptime please", ".s uptime")]);
        let err = filter
            .transform(command("uptime please now"))
            .expect_err("no match");
        assert_eq!(err, ProcessError::AuthenticationFailed);
    }

    #[test]
    fn rejects_unknown_credentials() {
        let filter = filter(&["mypin12"], &[]);
        assert_eq!(
            filter.transform(command("wrongpin .s date")).expect_err("no match"),
            ProcessError::AuthenticationFailed
        );
        assert_eq!(
            filter.transform(command("")).expect_err("no match"),
            ProcessError::AuthenticationFailed
        );
    }

    #[test]
    fn accepts_totp_credential() {
        let filter = filter(&["pineapple"], &[]);
        let codes = acceptable_codes("pineapple", NOW).expect("codes");
        let out = filter
            .transform_at(command(&format!("{} .s date", codes[4])), NOW)
            .expect("totp");
        assert_eq!(out.content, " .s date");
    }

    #[test]
    fn totp_credential_cannot_authorise_other_content() {
        let filter = filter(&["pineapple"], &[]);
        let code = acceptable_codes("pineapple", NOW).expect("codes")[0].clone();
        filter
            .transform_at(command(&format!("{code} .s date")), NOW)
            .expect("first use");
        let err = filter
            .transform_at(command(&format!("{code} .s reboot")), NOW)
            .expect_err("replay");
        assert_eq!(err, ProcessError::TotpReplayRejected);
        filter
            .transform_at(command(&format!("{code} .s date")), NOW)
            .expect("same content again");
    }

    #[test]
    fn expired_totp_credential_is_rejected() {
        let filter = filter(&["pineapple"], &[]);
        let code = acceptable_codes("pineapple", NOW).expect("codes")[4].clone();
        let err = filter
            .transform_at(command(&format!("{code} .s date")), NOW + 600)
            .expect_err("expired");
        assert_eq!(err, ProcessError::AuthenticationFailed);
    }

    #[test]
    fn compares_in_constant_time_shape() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
