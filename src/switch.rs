//! The profile switch transaction.
//!
//! A switch touches four resources that must move together: the runtime
//! session, the live data/overlay links, and the config's images path.
//! This module sequences them as an all-or-nothing transaction with an
//! in-memory step log that is replayed in reverse on failure. The log is
//! never persisted; a crash mid-switch leaves recovery to manual
//! inspection, which `doctor` supports.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;

use crate::config::Store;
use crate::error::SwitchError;
use crate::isolate::{self, Relink, Target};
use crate::paths::Paths;
use crate::probe::{Profile, ProfileSet};
use crate::session::Session;
use crate::state::State;

/// Observable states of one switch invocation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stopping,
    Relinking,
    ConfigUpdating,
    Starting,
    Committed,
    Unwinding,
}

impl Step {
    pub fn describe(&self) -> &'static str {
        match self {
            Step::Stopping => "stopping the session",
            Step::Relinking => "relinking data directories",
            Step::ConfigUpdating => "updating the runtime config",
            Step::Starting => "starting the session",
            Step::Committed => "committed",
            Step::Unwinding => "rolling back",
        }
    }
}

/// Result of a committed switch.
#[derive(Debug)]
pub struct Outcome {
    pub profile: String,
    /// The target was already active; nothing was stopped or moved.
    pub already_active: bool,
    /// The switch is durable but the session did not come back up.
    pub start_warning: Option<String>,
}

/// Drives one switch end to end. Generic over the session and config
/// seams so failure policy is testable without a live runtime.
pub struct Switcher<'a, S: Session, C: Store> {
    paths: &'a Paths,
    session: S,
    store: C,
}

impl<'a, S: Session, C: Store> Switcher<'a, S, C> {
    pub fn new(paths: &'a Paths, session: S, store: C) -> Self {
        Self {
            paths,
            session,
            store,
        }
    }

    /// Switch the runtime to `target_id`.
    ///
    /// The config is re-read fresh here; switching to the already-active
    /// profile commits immediately without touching the session. Any
    /// failure after the first mutation unwinds the applied steps in
    /// reverse before returning. A successful config write makes the
    /// switch durable: a start failure downgrades to a warning on the
    /// committed outcome rather than reverting a quiesced, consistent
    /// system.
    pub fn switch(
        &self,
        set: &ProfileSet,
        target_id: &str,
        mut on_step: impl FnMut(Step),
    ) -> Result<Outcome, SwitchError> {
        let target = set
            .get(target_id)
            .ok_or_else(|| SwitchError::UnknownProfile(target_id.to_string()))?;

        let config = self.store.read()?;
        let source = set.active(&config);

        if source.is_some_and(|p| p.id == target.id) {
            on_step(Step::Committed);
            return Ok(Outcome {
                profile: target.id.clone(),
                already_active: true,
                start_warning: None,
            });
        }

        // Held for the rest of the transaction; dropped on any return.
        let _lock = self.acquire_lock()?;

        on_step(Step::Stopping);
        self.session.stop().map_err(SwitchError::Stop)?;

        on_step(Step::Relinking);
        let mut log: Vec<Relink> = Vec::new();
        // Data found unmanaged at a live path belonged to whichever
        // profile was active until now; without one, it files under the
        // root profile id.
        let source_id = source.map(|p| p.id.as_str()).unwrap_or("default");

        for link in Target::all() {
            let live = link.live_path(self.paths);
            let backing = link.backing_path(self.paths, &target.id);
            let migrate_to = link.backing_path(self.paths, source_id);

            match isolate::relink(&live, &backing, &migrate_to) {
                Ok(change) => log.push(change),
                Err(e) => {
                    on_step(Step::Unwinding);
                    return Err(SwitchError::Unwound {
                        step: Step::Relinking.describe(),
                        source: Box::new(e),
                        rollback_errors: unwind(&log),
                    });
                }
            }
        }

        on_step(Step::ConfigUpdating);
        if let Err(e) = self.store.write(&target.dir) {
            on_step(Step::Unwinding);
            return Err(SwitchError::Unwound {
                step: Step::ConfigUpdating.describe(),
                source: Box::new(e),
                rollback_errors: unwind(&log),
            });
        }

        on_step(Step::Starting);
        let start_warning = self.session.start().err().map(|e| e.to_string());

        // Informational only; a failure here must not fail the switch.
        let _ = State::record_switch(&target.id, start_warning.clone())
            .write(&self.paths.state_file);

        on_step(Step::Committed);
        Ok(Outcome {
            profile: target.id.clone(),
            already_active: false,
            start_warning,
        })
    }

    /// Advisory single-instance lock under the profile root. Concurrent
    /// switches against the same root fail fast instead of interleaving.
    fn acquire_lock(&self) -> Result<File, SwitchError> {
        let path = &self.paths.lock_file;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SwitchError::LockIo {
                path: path.clone(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| SwitchError::LockIo {
                path: path.clone(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(SwitchError::Locked),
            Err(e) => Err(SwitchError::LockIo {
                path: path.clone(),
                source: e,
            }),
        }
    }
}

/// Replay applied relinks in reverse. Failures are collected and
/// reported once; they are never retried.
fn unwind(log: &[Relink]) -> Vec<String> {
    let mut errors = Vec::new();
    for change in log.iter().rev() {
        if let Err(e) = isolate::undo(change) {
            errors.push(format!("could not undo {:?}: {}", change, e));
        }
    }
    errors
}

/// Lookup used by `status`: the profile the config currently points at.
pub fn active_profile<'s>(set: &'s ProfileSet, store: &impl Store) -> Option<&'s Profile> {
    store.read().ok().and_then(|config| set.active(&config))
}
