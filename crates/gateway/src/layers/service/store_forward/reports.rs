use protocol::control::SubjectReportSnapshot;
use protocol::SubjectReportRequest;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A report as it was received, plus where and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectReport {
    pub host_name: String,
    pub original_request: SubjectReportRequest,
    pub subject_client_id: String,
    pub daemon_name: String,
    pub server_time: SystemTime,
}

impl SubjectReport {
    pub fn snapshot(&self) -> SubjectReportSnapshot {
        SubjectReportSnapshot {
            host_name: self.host_name.clone(),
            client_id: self.subject_client_id.clone(),
            daemon_name: self.daemon_name.clone(),
            server_time_secs: unix_secs(self.server_time),
            server_time: humantime::format_rfc3339_seconds(self.server_time).to_string(),
            request: self.original_request.clone(),
        }
    }
}

pub(crate) fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Host names are matched case-insensitively.
pub(crate) fn normalize_host(host_name: &str) -> String {
    host_name.trim().to_lowercase()
}

/// Bounded per-host history, oldest first within each host.
#[derive(Debug)]
pub(crate) struct SubjectReportStore {
    max_per_host: usize,
    expiry: Duration,
    reports: BTreeMap<String, VecDeque<SubjectReport>>,
    stores_since_sweep: usize,
}

impl SubjectReportStore {
    pub(crate) fn new(max_per_host: usize, expiry: Duration) -> Self {
        Self {
            max_per_host: max_per_host.max(1),
            expiry,
            reports: BTreeMap::new(),
            stores_since_sweep: 0,
        }
    }

    /// Appends `report` under its host. Returns the hosts dropped by the
    /// expiry sweep that runs once every `max_per_host` stores.
    pub(crate) fn append(&mut self, report: SubjectReport, now: SystemTime) -> Vec<String> {
        let history = self.reports.entry(report.host_name.clone()).or_default();
        while history.len() >= self.max_per_host {
            history.pop_front();
        }
        history.push_back(report);

        self.stores_since_sweep += 1;
        if self.stores_since_sweep < self.max_per_host {
            return Vec::new();
        }
        self.stores_since_sweep = 0;
        self.purge_expired(now)
    }

    /// Removes every host whose newest report is older than the expiry window.
    pub(crate) fn purge_expired(&mut self, now: SystemTime) -> Vec<String> {
        let expiry = self.expiry;
        let expired: Vec<String> = self
            .reports
            .iter()
            .filter(|(_, history)| {
                history.back().map_or(true, |newest| {
                    now.duration_since(newest.server_time)
                        .map_or(false, |age| age >= expiry)
                })
            })
            .map(|(host, _)| host.clone())
            .collect();
        for host in &expired {
            self.reports.remove(host);
        }
        expired
    }

    /// Up to `limit` reports of one host, newest first.
    pub(crate) fn latest_from(&self, host_name: &str, limit: usize) -> Vec<SubjectReport> {
        self.reports
            .get(&normalize_host(host_name))
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `limit` reports across all hosts, newest first. Collects one
    /// report per host per round so the sort only sees `limit` entries.
    pub(crate) fn latest(&self, limit: usize) -> Vec<SubjectReport> {
        let mut cursors: Vec<_> = self
            .reports
            .values()
            .map(|history| history.iter().rev())
            .collect();
        let mut picked = Vec::with_capacity(limit.min(1024));
        while picked.len() < limit && !cursors.is_empty() {
            cursors.retain_mut(|cursor| {
                if picked.len() >= limit {
                    return true;
                }
                match cursor.next() {
                    Some(report) => {
                        picked.push(report.clone());
                        true
                    }
                    None => false,
                }
            });
        }
        picked.sort_by(|a, b| b.server_time.cmp(&a.server_time));
        picked
    }

    pub(crate) fn subject_count(&self) -> usize {
        self.reports.len()
    }
}
