use super::STORE_AND_FORWARD_TRIGGER;
use crate::error::ProcessError;
use crate::layers::execution::plt::PLT_PREFIX;
use protocol::AppCommandResponse;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use super::reports::unix_secs;

/// The command a subject asked for most recently, and how far it got.
#[derive(Debug, Clone)]
struct OutstandingCommand {
    ticket: u64,
    response: AppCommandResponse,
    completed_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandDecision {
    /// Nothing new to run; answer with what is known.
    Reply(AppCommandResponse),
    /// Run `command` in the background and answer with the in-flight placeholder.
    Start {
        ticket: u64,
        command: String,
        reply: AppCommandResponse,
    },
}

/// At most one tracked command per subject host.
#[derive(Debug)]
pub(crate) struct OutstandingCommands {
    retention: Duration,
    entries: HashMap<String, OutstandingCommand>,
    next_ticket: u64,
}

/// Whether `content` would dispatch straight back into the store-and-forward feature.
pub(crate) fn is_recursive(content: &str) -> bool {
    content.lines().any(|line| {
        line.match_indices(STORE_AND_FORWARD_TRIGGER)
            .any(|(index, _)| is_dispatch_prefix(&line[..index]))
    })
}

/// Whether `prefix` holds nothing but a credential and an optional PLT override.
fn is_dispatch_prefix(prefix: &str) -> bool {
    let prefix = prefix.trim();
    let credential = match prefix.find(PLT_PREFIX) {
        Some(index) if is_plt_arguments(&prefix[index + PLT_PREFIX.len()..]) => &prefix[..index],
        _ => prefix,
    };
    !credential.trim().contains(char::is_whitespace)
}

fn is_plt_arguments(text: &str) -> bool {
    let compact: String = text.chars().filter(|ch| !ch.is_whitespace()).collect();
    let parts: Vec<&str> = compact.split(',').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
}

impl OutstandingCommands {
    pub(crate) fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: HashMap::new(),
            next_ticket: 0,
        }
    }

    pub(crate) fn decide(&mut self, host: &str, requested: &str, now: SystemTime) -> CommandDecision {
        let tracked = self
            .entries
            .get(host)
            .map(|entry| entry.response.command.as_str());
        if requested.is_empty() || tracked == Some(requested) {
            return CommandDecision::Reply(self.reply_for(host, now));
        }

        if is_recursive(requested) {
            let err = ProcessError::RecursiveStoreAndForwardRejected;
            tracing::warn!(event = "store_forward.recursive_rejected", host = %host);
            return CommandDecision::Reply(AppCommandResponse {
                command: requested.to_string(),
                received_at: unix_secs(now),
                result: err.to_string(),
                run_duration_secs: 0,
            });
        }

        self.next_ticket += 1;
        let reply = AppCommandResponse::in_flight(requested, unix_secs(now));
        self.entries.insert(
            host.to_string(),
            OutstandingCommand {
                ticket: self.next_ticket,
                response: reply.clone(),
                completed_at: None,
            },
        );
        CommandDecision::Start {
            ticket: self.next_ticket,
            command: requested.to_string(),
            reply,
        }
    }

    /// Returns the tracked response; a completed one past retention is
    /// handed out this last time and then forgotten.
    fn reply_for(&mut self, host: &str, now: SystemTime) -> AppCommandResponse {
        let Some(entry) = self.entries.get(host) else {
            return AppCommandResponse::default();
        };
        let reply = entry.response.clone();
        let expired = entry.completed_at.is_some_and(|completed_at| {
            now.duration_since(completed_at)
                .is_ok_and(|age| age >= self.retention)
        });
        if expired {
            self.entries.remove(host);
        }
        reply
    }

    /// Records the outcome of `ticket`. A superseded ticket is ignored.
    pub(crate) fn complete(
        &mut self,
        host: &str,
        ticket: u64,
        result: String,
        run_duration_secs: i64,
        now: SystemTime,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(host) else {
            return false;
        };
        if entry.ticket != ticket {
            return false;
        }
        entry.response.result = result;
        entry.response.run_duration_secs = run_duration_secs.max(0);
        entry.completed_at = Some(now);
        true
    }

    pub(crate) fn remove(&mut self, host: &str) {
        self.entries.remove(host);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn start() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    fn ticket_of(decision: &CommandDecision) -> u64 {
        match decision {
            CommandDecision::Start { ticket, .. } => *ticket,
            CommandDecision::Reply(reply) => panic!("expected a start, got {reply:?}"),
        }
    }

    #[test]
    fn detects_recursive_payloads() {
        assert!(is_recursive(r#"pass .0m {"subject_host_name":"x"}"#));
        assert!(is_recursive("pass .0m host\u{1f}cmd"));
        assert!(is_recursive("pass.0m host"));
        assert!(is_recursive("pass .plt 0, 40, 5 .0m host"));
        assert!(is_recursive("first line\npass .0m host"));
        assert!(!is_recursive("pass .s echo .0m"));
        assert!(!is_recursive("pass .s echo {}"));
        assert!(!is_recursive("pw .s echo .0m {}"));
        assert!(!is_recursive("pass .plt 0,40 .s echo .0m {}"));
    }

    #[test]
    fn new_command_starts_once() {
        let mut tracker = OutstandingCommands::new(Duration::from_secs(60));
        let decision = tracker.decide("edge", "pass .s date", start());
        let CommandDecision::Start { reply, .. } = &decision else {
            panic!("expected a start");
        };
        assert!(reply.is_in_flight());
        assert_eq!(reply.received_at, 1_000_000);

        let again = tracker.decide("edge", "pass .s date", start());
        let CommandDecision::Reply(reply) = again else {
            panic!("expected a reply");
        };
        assert!(reply.is_in_flight());
        assert!(reply.result.is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn completed_result_is_purged_after_retention() {
        let mut tracker = OutstandingCommands::new(Duration::from_secs(60));
        let ticket = ticket_of(&tracker.decide("edge", "pass .s date", start()));
        assert!(tracker.complete("edge", ticket, "Mon".to_string(), 3, start()));

        let reply = tracker.decide("edge", "", start() + Duration::from_secs(10));
        assert_eq!(reply, tracker.decide("edge", "pass .s date", start() + Duration::from_secs(20)));
        let CommandDecision::Reply(reply) = reply else {
            panic!("expected a reply");
        };
        assert_eq!(reply.result, "Mon");
        assert_eq!(reply.run_duration_secs, 3);

        let late = start() + Duration::from_secs(61);
        let CommandDecision::Reply(reply) = tracker.decide("edge", "", late) else {
            panic!("expected a reply");
        };
        assert_eq!(reply.result, "Mon");
        assert_eq!(tracker.len(), 0);
        assert_eq!(
            tracker.decide("edge", "", late),
            CommandDecision::Reply(AppCommandResponse::default())
        );
    }

    #[test]
    fn superseded_ticket_is_ignored() {
        let mut tracker = OutstandingCommands::new(Duration::from_secs(60));
        let first = ticket_of(&tracker.decide("edge", "pass .s one", start()));
        let second = ticket_of(&tracker.decide("edge", "pass .s two", start()));
        assert!(!tracker.complete("edge", first, "one".to_string(), 1, start()));
        assert!(tracker.complete("edge", second, "two".to_string(), 1, start()));
    }

    #[test]
    fn recursive_command_is_not_tracked() {
        let mut tracker = OutstandingCommands::new(Duration::from_secs(60));
        let decision = tracker.decide("edge", r#"pass .0m {"subject_host_name":"x"}"#, start());
        let CommandDecision::Reply(reply) = decision else {
            panic!("expected a reply");
        };
        assert!(reply.result.contains("recursive"));
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn trigger_text_inside_arguments_still_runs() {
        let mut tracker = OutstandingCommands::new(Duration::from_secs(60));
        let decision = tracker.decide("edge", "pw .s echo .0m {}", start());
        assert!(matches!(decision, CommandDecision::Start { .. }));
        assert_eq!(tracker.len(), 1);
    }
}
