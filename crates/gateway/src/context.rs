use crate::layers::policy::totp::TotpReplayGuard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide state shared by every processor and feature of one gateway.
#[derive(Debug)]
pub struct ServiceContext {
    lockdown: AtomicBool,
    totp_replay: TotpReplayGuard,
    started_at: Instant,
}

impl ServiceContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lockdown: AtomicBool::new(false),
            totp_replay: TotpReplayGuard::default(),
            started_at: Instant::now(),
        })
    }

    pub fn engage_lockdown(&self) {
        if !self.lockdown.swap(true, Ordering::Relaxed) {
            tracing::warn!(event = "lockdown.engaged", "emergency lockdown engaged");
        }
    }

    pub fn is_locked_down(&self) -> bool {
        self.lockdown.load(Ordering::Relaxed)
    }

    pub fn totp_replay(&self) -> &TotpReplayGuard {
        &self.totp_replay
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
