//! Diagnostics for the `wayprof doctor` command.
//!
//! Read-only pass over everything the switch engine depends on: the
//! profile root, the runtime config, the live path links, the backing
//! store, and the external tools. Nothing here escalates privileges or
//! mutates state, so it is safe to run while the session is up — and it
//! is the tool for inspecting the aftermath of a crash mid-switch.

use anstyle::AnsiColor;
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::process::Command;

use crate::config::{ConfigStore, Store};
use crate::error::ConfigError;
use crate::fs_utils::{dir_size, format_bytes};
use crate::isolate::{LiveStatus, Target};
use crate::paths::Paths;
use crate::probe;
use crate::ui::Ui;

pub fn run_doctor(paths: &Paths, ui: &Ui) {
    ui.section("wayprof Doctor");
    ui.newline();

    check_step(ui, "Profile root", || check_profiles(paths, ui));
    check_step(ui, "Runtime config", || check_config(paths, ui));
    check_step(ui, "Live paths", || check_live_paths(paths, ui));
    check_step(ui, "Backing store", || check_store(paths, ui));
    check_step(ui, "Switch lock", || check_lock(paths, ui));
    check_step(ui, "Tools", || check_tools(ui));
}

fn check_profiles(paths: &Paths, ui: &Ui) -> bool {
    let set = match probe::scan(&paths.profile_root) {
        Ok(set) => set,
        Err(e) => {
            ui.println(format!(
                "  {} Cannot scan {}: {}",
                ui.icon_err(),
                paths.profile_root.display(),
                e
            ));
            return false;
        }
    };

    if set.is_empty() {
        ui.println(format!(
            "  {} No profiles under {} (need directories with system.img and vendor.img)",
            ui.icon_warn(),
            paths.profile_root.display()
        ));
    } else {
        ui.println(format!("  Found {} profile(s):", set.len()));
        for profile in set.iter() {
            ui.println(format!("    {} {}", ui.icon_ok(), profile.id));
        }
    }

    let mut ok = true;
    for id in set.conflicts() {
        ui.println(format!(
            "  {} Ambiguous profile id '{}' (several directories map to it)",
            ui.icon_err(),
            id
        ));
        ok = false;
    }
    ok
}

fn check_config(paths: &Paths, ui: &Ui) -> bool {
    let store = ConfigStore::new(&paths.config_file);
    match store.read() {
        Ok(config) => {
            ui.println(format!(
                "  {} images_path = {}",
                ui.icon_ok(),
                config.images_path.display()
            ));
            let known = probe::scan(&paths.profile_root)
                .map(|set| set.active(&config).is_some())
                .unwrap_or(false);
            if known {
                ui.println(format!("  {} Points at a known profile", ui.icon_ok()));
            } else {
                ui.println(format!(
                    "  {} Points outside the profile root (unmanaged images?)",
                    ui.icon_warn()
                ));
            }
            true
        }
        Err(ConfigError::Missing(path)) => {
            ui.println(format!(
                "  {} Config not found at {} (runtime not initialized?)",
                ui.icon_warn(),
                path.display()
            ));
            true
        }
        Err(e) => {
            ui.println(format!("  {} {}", ui.icon_err(), e));
            false
        }
    }
}

fn check_live_paths(paths: &Paths, ui: &Ui) -> bool {
    let mut ok = true;
    for link in Target::all() {
        let live = link.live_path(paths);
        match LiveStatus::detect(&live) {
            LiveStatus::Missing => {
                ui.println(format!(
                    "  {} {} missing (created on first switch)",
                    ui.icon_info(),
                    live.display()
                ));
            }
            LiveStatus::Directory => {
                ui.println(format!(
                    "  {} {} is an unmanaged directory; the first switch migrates it",
                    ui.icon_info(),
                    live.display()
                ));
            }
            LiveStatus::RegularFile => {
                ui.println(format!(
                    "  {} {} is a regular file; the engine will refuse to touch it",
                    ui.icon_err(),
                    live.display()
                ));
                ok = false;
            }
            LiveStatus::Symlink { target } => {
                if paths.is_in_store(&target) {
                    ui.println(format!(
                        "  {} {} -> {}",
                        ui.icon_ok(),
                        live.display(),
                        target.display()
                    ));
                } else {
                    ui.println(format!(
                        "  {} {} links outside the store: {}",
                        ui.icon_warn(),
                        live.display(),
                        target.display()
                    ));
                }
            }
            LiveStatus::BrokenSymlink { target } => {
                ui.println(format!(
                    "  {} {} is a BROKEN link to {} (crash mid-switch?)",
                    ui.icon_err(),
                    live.display(),
                    target.display()
                ));
                ok = false;
            }
        }
    }
    ok
}

fn check_store(paths: &Paths, ui: &Ui) -> bool {
    if !paths.store_dir.exists() {
        ui.println(format!(
            "  {} Store not created yet: {}",
            ui.icon_info(),
            paths.store_dir.display()
        ));
        return true;
    }

    match std::fs::read_dir(&paths.store_dir) {
        Ok(entries) => {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let size = dir_size(&path).map(format_bytes).unwrap_or_else(|_| "?".into());
                ui.println(format!(
                    "  {} {} ({})",
                    ui.icon_ok(),
                    entry.file_name().to_string_lossy(),
                    size
                ));
            }
            true
        }
        Err(e) => {
            ui.println(format!(
                "  {} Cannot read {}: {}",
                ui.icon_err(),
                paths.store_dir.display(),
                e
            ));
            false
        }
    }
}

fn check_lock(paths: &Paths, ui: &Ui) -> bool {
    if !paths.lock_file.exists() {
        ui.println(format!("  {} No lock file (no switch has run)", ui.icon_info()));
        return true;
    }

    match OpenOptions::new().write(true).open(&paths.lock_file) {
        Ok(file) => match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs2::FileExt::unlock(&file);
                ui.println(format!("  {} Lock file present, not held", ui.icon_ok()));
                true
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                ui.println(format!(
                    "  {} Lock is held; a switch is running right now",
                    ui.icon_warn()
                ));
                true
            }
            Err(e) => {
                ui.println(format!("  {} Cannot probe lock: {}", ui.icon_err(), e));
                false
            }
        },
        Err(e) => {
            ui.println(format!("  {} Cannot open lock file: {}", ui.icon_err(), e));
            false
        }
    }
}

fn check_tools(ui: &Ui) -> bool {
    let mut ok = true;
    for tool in ["waydroid", "sudo"] {
        match Command::new(tool).arg("--version").output() {
            Ok(_) => ui.println(format!("  {} {} available", ui.icon_ok(), tool)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ui.println(format!("  {} {} not found in PATH", ui.icon_err(), tool));
                ok = false;
            }
            Err(e) => {
                ui.println(format!("  {} {} not runnable: {}", ui.icon_warn(), tool, e));
            }
        }
    }
    ok
}

fn check_step<F>(ui: &Ui, name: &str, check_fn: F)
where
    F: FnOnce() -> bool,
{
    ui.println(ui.bold(format!("Checking {}...", name)));
    if !check_fn() {
        ui.println(ui.colored("  Issues detected!", AnsiColor::Red));
    }
    ui.newline();
}
