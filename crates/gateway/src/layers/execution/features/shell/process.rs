use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Starts the child in its own session so the whole tree can be signalled.
#[cfg(unix)]
pub(super) fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(super) fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(child: &Child, signal: i32) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _signal: i32) {}

/// SIGTERM to the group, then SIGKILL if it lingers past the grace period.
pub(super) async fn terminate_group(child: &mut Child) -> Option<ExitStatus> {
    signal_group(child, libc::SIGTERM);
    if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        return status.ok();
    }
    signal_group(child, libc::SIGKILL);
    let _ = child.kill().await;
    tokio::time::timeout(TERMINATE_GRACE, child.wait())
        .await
        .ok()
        .and_then(Result::ok)
}
