use crate::SubjectReportRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectReportSnapshot {
    pub host_name: String,
    pub client_id: String,
    pub daemon_name: String,
    pub server_time_secs: u64,
    pub server_time: String,
    pub request: SubjectReportRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayStatus {
    pub subjects: usize,
    pub outstanding_commands: usize,
    pub locked_down: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    LatestReports { limit: usize },
    SubjectReports { host_name: String, limit: usize },
    OutgoingCommands,
    SetOutgoingCommand { host_name: String, command: String },
    ClearOutgoingCommand { host_name: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Status { status: GatewayStatus },
    Reports { reports: Vec<SubjectReportSnapshot> },
    OutgoingCommands { commands: BTreeMap<String, String> },
    Ack { message: String },
    Error { message: String },
}
