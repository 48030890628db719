//! Runtime session lifecycle control.
//!
//! Stop must fully quiesce the container before the caller touches the
//! data or overlay directories; a lingering process holding them is the
//! most damaging failure mode there is. Stop therefore re-checks
//! readiness a small fixed number of times with backoff before giving
//! up. Start is best-effort and never retried here.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::SessionError;

/// Narrow interface to the privileged runtime session.
pub trait Session {
    fn stop(&self) -> Result<(), SessionError>;
    fn start(&self) -> Result<(), SessionError>;
}

/// Controls the waydroid session and container via the `waydroid` tool.
/// Stop escalates per call with sudo; start runs as the invoking user.
#[derive(Debug, Clone)]
pub struct WaydroidSession {
    stop_checks: u32,
    start_checks: u32,
    poll_interval: Duration,
}

impl Default for WaydroidSession {
    fn default() -> Self {
        Self {
            stop_checks: 5,
            start_checks: 10,
            poll_interval: Duration::from_millis(400),
        }
    }
}

impl Session for WaydroidSession {
    fn stop(&self) -> Result<(), SessionError> {
        // A session that was never started makes these fail; that is fine
        // as long as the status check below settles on STOPPED.
        let _ = run_tool("sudo", &["waydroid", "session", "stop"]);
        let _ = run_tool("sudo", &["waydroid", "container", "stop"]);

        let mut last_reason = String::new();
        for attempt in 1..=self.stop_checks {
            match run_tool("waydroid", &["status"]) {
                Ok(out) if session_stopped(&out) => return Ok(()),
                Ok(out) => last_reason = format!("status reports: {}", out.trim()),
                Err(reason) => last_reason = reason,
            }
            thread::sleep(self.poll_interval * attempt);
        }

        Err(SessionError::StopTimeout {
            attempts: self.stop_checks,
            reason: last_reason,
        })
    }

    fn start(&self) -> Result<(), SessionError> {
        let mut cmd = Command::new("waydroid");
        cmd.args(["session", "start"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // The session talks to the user bus; restore the address when the
        // environment lost it (matches the runtime's own expectation).
        if std::env::var("DBUS_SESSION_BUS_ADDRESS").is_err() {
            if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
                let bus = PathBuf::from(xdg).join("bus");
                cmd.env(
                    "DBUS_SESSION_BUS_ADDRESS",
                    format!("unix:path={}", bus.display()),
                );
            }
        }

        let mut child = cmd.spawn().map_err(|e| SessionError::StartFailed {
            reason: format!("failed to run waydroid: {}", e),
        })?;

        let mut last_reason = String::new();
        for attempt in 1..=self.start_checks {
            // `waydroid session start` stays in the foreground for the
            // session's lifetime; an early exit means it failed.
            if let Ok(Some(status)) = child.try_wait() {
                if !status.success() {
                    let out = child.wait_with_output().ok();
                    let stderr = out
                        .map(|o| String::from_utf8_lossy(&o.stderr).trim().to_string())
                        .unwrap_or_default();
                    return Err(SessionError::StartFailed {
                        reason: if stderr.is_empty() {
                            format!("waydroid exited with {}", status)
                        } else {
                            stderr
                        },
                    });
                }
            }

            match run_tool("waydroid", &["status"]) {
                Ok(out) if session_running(&out) => return Ok(()),
                Ok(out) => last_reason = format!("status reports: {}", out.trim()),
                Err(reason) => last_reason = reason,
            }
            thread::sleep(self.poll_interval * attempt);
        }

        Err(SessionError::StartFailed {
            reason: format!(
                "session not up after {} checks ({})",
                self.start_checks, last_reason
            ),
        })
    }
}

/// Run a tool to completion, returning stdout on success and the most
/// useful of stderr/stdout as the failure reason otherwise.
fn run_tool(cmd: &str, args: &[&str]) -> Result<String, String> {
    let out = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|e| format!("failed to run {} {}: {}", cmd, args.join(" "), e))?;

    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if out.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    let msg = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "command failed".to_string()
    };
    Err(format!("{} {}: {}", cmd, args.join(" "), msg))
}

fn session_line(status_output: &str) -> Option<&str> {
    status_output
        .lines()
        .find(|l| l.trim_start().starts_with("Session:"))
}

fn session_stopped(status_output: &str) -> bool {
    match session_line(status_output) {
        Some(line) => line.contains("STOPPED"),
        // No session line at all means no session, which is quiesced.
        None => true,
    }
}

fn session_running(status_output: &str) -> bool {
    session_line(status_output).is_some_and(|l| l.contains("RUNNING"))
}
