//! Single-line encoding of subject reports for transports that clip or
//! mangle payloads (DNS labels, SMS). Fields are ordered from the most to the
//! least useful so that a clipped payload still carries the host name and the
//! command exchange.

use crate::{AppCommandRequest, AppCommandResponse, SubjectReportRequest, SubjectReportResponse};
use thiserror::Error;

/// ASCII unit separator, placed between fields.
pub const FIELD_SEPARATOR: char = '\u{1f}';
/// ASCII record separator, stands in for a newline inside a field.
pub const NEWLINE_SEPARATOR: char = '\u{1e}';

pub const REQUEST_FIELD_COUNT: usize = 9;
pub const RESPONSE_FIELD_COUNT: usize = 5;

#[derive(Debug, Error)]
#[error("subject report truncated: decoded {fields_decoded} of 9 fields")]
pub struct ReportTruncated {
    pub partial: Box<SubjectReportRequest>,
    pub fields_decoded: usize,
}

#[derive(Debug, Error)]
#[error("subject report response truncated: decoded {fields_decoded} of 5 fields")]
pub struct ResponseTruncated {
    pub partial: Box<SubjectReportResponse>,
    pub fields_decoded: usize,
}

impl SubjectReportRequest {
    pub fn to_compact(&self) -> String {
        join_fields(&[
            escape(&self.subject_host_name),
            escape(&self.command_request.command),
            escape(&self.command_response.command),
            escape(&self.command_response.result),
            escape(&self.subject_platform),
            escape(&self.subject_comment),
            escape(&self.subject_ip),
            self.command_response.received_at.to_string(),
            self.command_response.run_duration_secs.to_string(),
        ])
    }

    /// Decodes as many leading fields as the input carries. A short input
    /// yields `ReportTruncated` holding the fields that did decode.
    pub fn from_compact(input: &str) -> Result<Self, ReportTruncated> {
        let fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
        let mut request = SubjectReportRequest::default();
        for (index, field) in fields.iter().take(REQUEST_FIELD_COUNT).enumerate() {
            match index {
                0 => request.subject_host_name = unescape(field),
                1 => request.command_request.command = unescape(field),
                2 => request.command_response.command = unescape(field),
                3 => request.command_response.result = unescape(field),
                4 => request.subject_platform = unescape(field),
                5 => request.subject_comment = unescape(field),
                6 => request.subject_ip = unescape(field),
                7 => request.command_response.received_at = field.trim().parse().unwrap_or(0),
                _ => request.command_response.run_duration_secs = field.trim().parse().unwrap_or(0),
            }
        }
        if fields.len() < REQUEST_FIELD_COUNT {
            return Err(ReportTruncated {
                partial: Box::new(request),
                fields_decoded: fields.len(),
            });
        }
        Ok(request)
    }
}

impl SubjectReportResponse {
    pub fn to_compact(&self) -> String {
        join_fields(&[
            escape(&self.command_request.command),
            escape(&self.command_response.command),
            escape(&self.command_response.result),
            self.command_response.received_at.to_string(),
            self.command_response.run_duration_secs.to_string(),
        ])
    }

    pub fn from_compact(input: &str) -> Result<Self, ResponseTruncated> {
        let fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
        let mut command_request = AppCommandRequest::default();
        let mut command_response = AppCommandResponse::default();
        for (index, field) in fields.iter().take(RESPONSE_FIELD_COUNT).enumerate() {
            match index {
                0 => command_request.command = unescape(field),
                1 => command_response.command = unescape(field),
                2 => command_response.result = unescape(field),
                3 => command_response.received_at = field.trim().parse().unwrap_or(0),
                _ => command_response.run_duration_secs = field.trim().parse().unwrap_or(0),
            }
        }
        let response = SubjectReportResponse {
            command_request,
            command_response,
        };
        if fields.len() < RESPONSE_FIELD_COUNT {
            return Err(ResponseTruncated {
                partial: Box::new(response),
                fields_decoded: fields.len(),
            });
        }
        Ok(response)
    }
}

/// Whether a payload should be decoded as compact rather than JSON.
/// A clipped compact payload may carry no separator at all, so only a
/// leading `{` marks JSON.
pub fn looks_compact(input: &str) -> bool {
    !input.trim_start().starts_with('{')
}

fn join_fields(fields: &[String]) -> String {
    let mut out = String::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.push_str(field);
    }
    out
}

fn escape(field: &str) -> String {
    field
        .chars()
        .map(|ch| match ch {
            '\n' => NEWLINE_SEPARATOR,
            FIELD_SEPARATOR => ' ',
            other => other,
        })
        .collect()
}

fn unescape(field: &str) -> String {
    field.replace(NEWLINE_SEPARATOR, "\n")
}
