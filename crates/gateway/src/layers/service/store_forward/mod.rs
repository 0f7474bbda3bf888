//! Store-and-forward exchange with unattended subjects: each report is kept
//! in a bounded per-host history, the command it asks for runs in the
//! background, and the reply carries whatever the operator queued for it.

mod outstanding;
mod reports;

use crate::error::ProcessError;
use crate::layers::execution::command::{Command, CommandResult};
use crate::layers::execution::feature::Feature;
use crate::layers::execution::processor::CommandProcessor;
use async_trait::async_trait;
use protocol::compact::looks_compact;
use protocol::config::StoreAndForwardConfig;
use protocol::{AppCommandRequest, SubjectReportRequest, SubjectReportResponse};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tokio_util::task::TaskTracker;

use self::outstanding::{CommandDecision, OutstandingCommands};
use self::reports::{normalize_host, SubjectReportStore};

pub use self::reports::SubjectReport;

pub const STORE_AND_FORWARD_TRIGGER: &str = ".0m";

pub struct MessageProcessor {
    state: Mutex<State>,
    processor: Arc<CommandProcessor>,
    tasks: TaskTracker,
}

#[derive(Debug)]
struct State {
    reports: SubjectReportStore,
    outstanding: OutstandingCommands,
    outgoing: HashMap<String, String>,
}

impl MessageProcessor {
    /// `processor` runs subject-requested commands and must not carry the
    /// store-and-forward feature itself.
    pub fn new(processor: Arc<CommandProcessor>, config: &StoreAndForwardConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                reports: SubjectReportStore::new(config.max_reports_per_host, config.report_expiry),
                outstanding: OutstandingCommands::new(config.response_retention),
                outgoing: HashMap::new(),
            }),
            processor,
            tasks: TaskTracker::new(),
        })
    }

    /// Stores `request` and answers with the command exchange for its subject.
    pub fn store_report(
        self: &Arc<Self>,
        request: SubjectReportRequest,
        client_id: &str,
        daemon_name: &str,
    ) -> Result<SubjectReportResponse, ProcessError> {
        self.store_report_at(request, client_id, daemon_name, SystemTime::now())
    }

    fn store_report_at(
        self: &Arc<Self>,
        mut request: SubjectReportRequest,
        client_id: &str,
        daemon_name: &str,
        now: SystemTime,
    ) -> Result<SubjectReportResponse, ProcessError> {
        request.lint();
        let host = normalize_host(&request.subject_host_name);
        if host.is_empty() {
            return Err(ProcessError::Feature(
                "subject host name is missing".to_string(),
            ));
        }
        let requested = request.command_request.command.clone();
        tracing::info!(
            event = "store_forward.report",
            host = %host,
            client = %client_id,
            daemon = %daemon_name,
            has_command = !requested.is_empty()
        );

        let (decision, outgoing) = {
            let mut state = self.state.lock().expect("store-and-forward lock");
            let purged = state.reports.append(
                SubjectReport {
                    host_name: host.clone(),
                    original_request: request,
                    subject_client_id: client_id.to_string(),
                    daemon_name: daemon_name.to_string(),
                    server_time: now,
                },
                now,
            );
            for gone in &purged {
                state.outstanding.remove(gone);
                state.outgoing.remove(gone);
                tracing::info!(event = "store_forward.subject_expired", host = %gone);
            }
            let decision = state.outstanding.decide(&host, &requested, now);
            let outgoing = state.outgoing.get(&host).cloned().unwrap_or_default();
            (decision, outgoing)
        };

        let command_response = match decision {
            CommandDecision::Reply(reply) => reply,
            CommandDecision::Start {
                ticket,
                command,
                reply,
            } => {
                self.spawn_command(host, ticket, Command::new(client_id, daemon_name, 0, command));
                reply
            }
        };
        Ok(SubjectReportResponse {
            command_request: AppCommandRequest { command: outgoing },
            command_response,
        })
    }

    fn spawn_command(self: &Arc<Self>, host: String, ticket: u64, command: Command) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let started_at = Instant::now();
            let result = this.processor.process(command, false).await;
            let duration = i64::try_from(started_at.elapsed().as_secs()).unwrap_or(i64::MAX);
            let mut state = this.state.lock().expect("store-and-forward lock");
            if state.outstanding.complete(
                &host,
                ticket,
                result.combined_output,
                duration,
                SystemTime::now(),
            ) {
                tracing::info!(event = "store_forward.command_done", host = %host, duration_secs = duration);
            } else {
                tracing::info!(event = "store_forward.command_superseded", host = %host);
            }
        });
    }

    pub fn set_outgoing_command(&self, host_name: &str, command: &str) {
        let host = normalize_host(host_name);
        let mut state = self.state.lock().expect("store-and-forward lock");
        tracing::info!(event = "store_forward.outgoing_set", host = %host);
        state.outgoing.insert(host, command.trim().to_string());
    }

    pub fn clear_outgoing_command(&self, host_name: &str) -> bool {
        let host = normalize_host(host_name);
        let mut state = self.state.lock().expect("store-and-forward lock");
        state.outgoing.remove(&host).is_some()
    }

    pub fn outgoing_commands(&self) -> BTreeMap<String, String> {
        let state = self.state.lock().expect("store-and-forward lock");
        state
            .outgoing
            .iter()
            .map(|(host, command)| (host.clone(), command.clone()))
            .collect()
    }

    pub fn latest_reports(&self, limit: usize) -> Vec<SubjectReport> {
        self.state
            .lock()
            .expect("store-and-forward lock")
            .reports
            .latest(limit)
    }

    pub fn latest_reports_from_subject(&self, host_name: &str, limit: usize) -> Vec<SubjectReport> {
        self.state
            .lock()
            .expect("store-and-forward lock")
            .reports
            .latest_from(host_name, limit)
    }

    pub fn subject_count(&self) -> usize {
        self.state
            .lock()
            .expect("store-and-forward lock")
            .reports
            .subject_count()
    }

    pub fn outstanding_count(&self) -> usize {
        self.state
            .lock()
            .expect("store-and-forward lock")
            .outstanding
            .len()
    }

    /// Stops accepting background commands and waits for running ones.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Exposes the message processor through the command language.
pub struct MessageProcessorFeature {
    messages: Arc<MessageProcessor>,
}

impl MessageProcessorFeature {
    pub fn new(messages: Arc<MessageProcessor>) -> Self {
        Self { messages }
    }

    fn handle_compact(&self, command: &Command) -> CommandResult {
        let request = match SubjectReportRequest::from_compact(&command.content) {
            Ok(request) => request,
            Err(truncated) => {
                tracing::warn!(
                    event = "store_forward.truncated_report",
                    client = %command.client_id,
                    fields = truncated.fields_decoded
                );
                *truncated.partial
            }
        };
        match self
            .messages
            .store_report(request, &command.client_id, &command.daemon_name)
        {
            Ok(response) => CommandResult::ok(response.to_compact()),
            Err(err) => CommandResult::from_error(err),
        }
    }

    fn handle_json(&self, command: &Command) -> CommandResult {
        let request: SubjectReportRequest = match serde_json::from_str(&command.content) {
            Ok(request) => request,
            Err(err) => return CommandResult::failed(format!("invalid report: {err}"), ""),
        };
        let response =
            match self
                .messages
                .store_report(request, &command.client_id, &command.daemon_name)
            {
                Ok(response) => response,
                Err(err) => return CommandResult::from_error(err),
            };
        match serde_json::to_string(&response) {
            Ok(json) => CommandResult::ok(json),
            Err(err) => CommandResult::failed(format!("encode response: {err}"), ""),
        }
    }
}

#[async_trait]
impl Feature for MessageProcessorFeature {
    fn is_configured(&self) -> bool {
        true
    }

    async fn self_test(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn initialise(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn trigger(&self) -> &'static str {
        STORE_AND_FORWARD_TRIGGER
    }

    async fn execute(&self, command: Command) -> CommandResult {
        if looks_compact(&command.content) {
            self.handle_compact(&command)
        } else {
            self.handle_json(&command)
        }
    }
}
