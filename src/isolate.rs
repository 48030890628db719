//! Per-profile data isolation.
//!
//! The runtime reads user data and overlay state from fixed live paths.
//! Each of those is kept as a symlink into exactly one profile's backing
//! store; switching re-targets the link, it never duplicates or deletes
//! data. A first run finds real directories at the live paths and
//! migrates them, once, into the backing store of the profile that was
//! implicitly active.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::error::IsolationError;
use crate::paths::Paths;

/// Live directories the runtime holds open while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Data,
    OverlayRw,
    OverlayWork,
}

impl Target {
    pub fn all() -> [Target; 3] {
        [Target::Data, Target::OverlayRw, Target::OverlayWork]
    }

    pub fn live_path(&self, paths: &Paths) -> PathBuf {
        match self {
            Target::Data => paths.live_data.clone(),
            Target::OverlayRw => paths.live_overlay_rw.clone(),
            Target::OverlayWork => paths.live_overlay_work.clone(),
        }
    }

    /// Backing directory under `profiles/<id>/` for this target.
    pub fn backing_path(&self, paths: &Paths, profile_id: &str) -> PathBuf {
        paths.profile_store(profile_id).join(self.dir_name())
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            Target::Data => "data",
            Target::OverlayRw => "overlay_rw",
            Target::OverlayWork => "overlay_work",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Target::Data => "user data",
            Target::OverlayRw => "overlay (read-write)",
            Target::OverlayWork => "overlay (work)",
        }
    }
}

/// What a live path currently is, checked without following the link.
#[derive(Debug)]
pub enum LiveStatus {
    Missing,
    Directory,
    RegularFile,
    Symlink { target: PathBuf },
    BrokenSymlink { target: PathBuf },
}

impl LiveStatus {
    pub fn detect(path: &Path) -> Self {
        if let Ok(target) = fs::read_link(path) {
            if path.exists() {
                Self::Symlink { target }
            } else {
                Self::BrokenSymlink { target }
            }
        } else if path.is_dir() {
            Self::Directory
        } else if path.exists() {
            Self::RegularFile
        } else {
            Self::Missing
        }
    }
}

/// Record of one applied relink, sufficient to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relink {
    /// Live path already pointed at the requested backing dir.
    NoOp,
    /// Live path did not exist; a fresh link was installed.
    Linked { live: PathBuf },
    /// An existing managed link was swapped to a new backing dir.
    Retargeted { live: PathBuf, previous: PathBuf },
    /// An unmanaged real directory was moved into `moved_to` before the
    /// link was installed. Happens at most once per live path.
    Migrated { live: PathBuf, moved_to: PathBuf },
}

/// Point `live` at `backing`, creating `backing` on first use.
///
/// An unmanaged real directory at `live` is renamed verbatim into
/// `migrate_to` (the previously-implicit profile's backing dir) first.
/// All repointing is a single rename, so a crash leaves either the old
/// or the new link, never neither. Cross-device errors are surfaced, not
/// downgraded to a copy.
pub fn relink(live: &Path, backing: &Path, migrate_to: &Path) -> Result<Relink, IsolationError> {
    fs::create_dir_all(backing).map_err(|e| classify(backing, e))?;

    match LiveStatus::detect(live) {
        LiveStatus::Symlink { target } | LiveStatus::BrokenSymlink { target } => {
            if same_target(&target, backing) {
                return Ok(Relink::NoOp);
            }
            swap_link(live, backing)?;
            Ok(Relink::Retargeted {
                live: live.to_path_buf(),
                previous: target,
            })
        }
        LiveStatus::Directory => {
            if dir_has_entries(migrate_to).map_err(|e| classify(migrate_to, e))? {
                return Err(IsolationError::MigrationConflict {
                    live: live.to_path_buf(),
                    backing: migrate_to.to_path_buf(),
                });
            }
            if let Some(parent) = migrate_to.parent() {
                fs::create_dir_all(parent).map_err(|e| classify(migrate_to, e))?;
            }
            // An empty leftover dir would make rename fail; clear it.
            if migrate_to.exists() {
                fs::remove_dir(migrate_to).map_err(|e| classify(migrate_to, e))?;
            }
            fs::rename(live, migrate_to).map_err(|e| rename_error(live, migrate_to, e))?;
            symlink(backing, live).map_err(|e| classify(live, e))?;
            Ok(Relink::Migrated {
                live: live.to_path_buf(),
                moved_to: migrate_to.to_path_buf(),
            })
        }
        LiveStatus::Missing => {
            if let Some(parent) = live.parent() {
                fs::create_dir_all(parent).map_err(|e| classify(live, e))?;
            }
            symlink(backing, live).map_err(|e| classify(live, e))?;
            Ok(Relink::Linked {
                live: live.to_path_buf(),
            })
        }
        LiveStatus::RegularFile => Err(IsolationError::Io {
            live: live.to_path_buf(),
            source: std::io::Error::other("live path is a regular file, refusing to touch it"),
        }),
    }
}

/// Reverse one applied relink.
pub fn undo(change: &Relink) -> Result<(), IsolationError> {
    match change {
        Relink::NoOp => Ok(()),
        Relink::Linked { live } => fs::remove_file(live).map_err(|e| classify(live, e)),
        Relink::Retargeted { live, previous } => {
            swap_link(live, previous)?;
            Ok(())
        }
        Relink::Migrated { live, moved_to } => {
            fs::remove_file(live).map_err(|e| classify(live, e))?;
            fs::rename(moved_to, live).map_err(|e| rename_error(moved_to, live, e))
        }
    }
}

/// Swap a symlink in one rename: build the new link beside the old one,
/// then rename it over the live path.
fn swap_link(live: &Path, new_target: &Path) -> Result<(), IsolationError> {
    let tmp = link_swap_path(live);
    if fs::symlink_metadata(&tmp).is_ok() {
        fs::remove_file(&tmp).map_err(|e| classify(live, e))?;
    }
    symlink(new_target, &tmp).map_err(|e| classify(live, e))?;
    fs::rename(&tmp, live).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        rename_error(live, new_target, e)
    })
}

fn link_swap_path(live: &Path) -> PathBuf {
    let name = live
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "live".to_string());
    live.with_file_name(format!(".{}.wayprof-swap", name))
}

fn same_target(current: &Path, wanted: &Path) -> bool {
    if current == wanted {
        return true;
    }
    matches!(
        (fs::canonicalize(current), fs::canonicalize(wanted)),
        (Ok(a), Ok(b)) if a == b
    )
}

fn dir_has_entries(path: &Path) -> std::io::Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn classify(live: &Path, e: std::io::Error) -> IsolationError {
    match e.kind() {
        ErrorKind::PermissionDenied => IsolationError::PermissionDenied {
            live: live.to_path_buf(),
        },
        _ => IsolationError::Io {
            live: live.to_path_buf(),
            source: e,
        },
    }
}

fn rename_error(from: &Path, to: &Path, e: std::io::Error) -> IsolationError {
    match e.kind() {
        ErrorKind::CrossesDevices => IsolationError::CrossDevice {
            live: from.to_path_buf(),
            backing: to.to_path_buf(),
        },
        _ => classify(from, e),
    }
}
