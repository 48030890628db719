//! Error types for the profile switch engine.

use std::path::PathBuf;

/// Errors from scanning the profile root.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Profile root missing or unreadable. Callers treat this as an
    /// empty profile set with a warning rather than a hard failure.
    #[error("cannot read profile root {root}")]
    Io {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from reading or rewriting waydroid.cfg.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file does not exist. An unconfigured runtime is a
    /// distinct state from a misconfigured one, so this is never
    /// silently defaulted.
    #[error("runtime config not found: {0} (has the runtime been initialized?)")]
    Missing(PathBuf),

    /// The file exists but carries no `images_path` key.
    #[error("images_path not set in {0}")]
    KeyMissing(PathBuf),

    /// Neither direct write nor escalation succeeded. No partial write
    /// has happened.
    #[error("permission denied writing {path}: {reason}")]
    PermissionDenied { path: PathBuf, reason: String },

    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the runtime session lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session did not quiesce within the bounded readiness polls.
    /// Proceeding to relink while the service still holds the data
    /// directories would corrupt them, so this aborts the switch.
    #[error("session did not stop after {attempts} checks: {reason}")]
    StopTimeout { attempts: u32, reason: String },

    /// The session failed to come back up. Reported as a post-commit
    /// warning, never retried automatically.
    #[error("session failed to start: {reason}")]
    StartFailed { reason: String },
}

/// Errors from relinking a live directory to a backing store.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// Backing store lives on a different filesystem than the live
    /// path. A copy fallback would break the single-live-copy
    /// invariant, so this is surfaced instead.
    #[error("{live} and {backing} are on different filesystems (cannot relink atomically)")]
    CrossDevice { live: PathBuf, backing: PathBuf },

    #[error("permission denied relinking {live}")]
    PermissionDenied { live: PathBuf },

    /// The live path is still a real directory but its migration
    /// target already holds data. Resolving this needs manual
    /// inspection.
    #[error("{live} is an unmanaged directory but {backing} already contains data")]
    MigrationConflict { live: PathBuf, backing: PathBuf },

    #[error("failed to relink {live}")]
    Io {
        live: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal failures of a switch transaction.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("profile '{0}' not found")]
    UnknownProfile(String),

    /// The advisory lock under the profile root is held by another
    /// invocation.
    #[error("another switch is already in progress (lock file held)")]
    Locked,

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stop failed before any resource was touched; no unwind needed.
    #[error("aborted while stopping the session")]
    Stop(#[source] SessionError),

    /// A mutation step failed and already-applied steps were replayed
    /// in reverse. `rollback_errors` lists unwind steps that themselves
    /// failed; these are reported once and never retried.
    #[error("switch failed during {step}, changes rolled back")]
    Unwound {
        step: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        rollback_errors: Vec<String>,
    },

    #[error("failed to acquire switch lock at {path}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SwitchError {
    /// Steps that were rolled back but could not be fully restored.
    pub fn rollback_errors(&self) -> &[String] {
        match self {
            Self::Unwound {
                rollback_errors, ..
            } => rollback_errors,
            _ => &[],
        }
    }
}
