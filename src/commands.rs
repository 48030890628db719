//! CLI command handlers.
//!
//! Coordination layer between the CLI surface and the engine modules:
//! `probe` for discovery, `switch` for the transaction, `config` for the
//! runtime config, `ui` for output. Scanning and status never escalate
//! privileges; only a switch does, inside its privileged steps.

use anstyle::AnsiColor;
use anyhow::{Context, Result, bail};
use inquire::{InquireError, Select};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::config::{ConfigStore, Store};
use crate::doctor::run_doctor;
use crate::error::{ConfigError, SwitchError};
use crate::fs_utils::{file_size, format_bytes};
use crate::isolate::{LiveStatus, Target};
use crate::paths::Paths;
use crate::probe::{self, ProfileSet};
use crate::session::WaydroidSession;
use crate::state::State;
use crate::switch::{Step, Switcher};
use crate::ui::Ui;

/// How an interactive command ended, for the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Done,
    Cancelled,
}

/// Scan the profile root, degrading a missing/unreadable root to an
/// empty set with a warning.
fn scan_or_warn(paths: &Paths, ui: &Ui) -> ProfileSet {
    match probe::scan(&paths.profile_root) {
        Ok(set) => {
            for id in set.conflicts() {
                ui.warn(format!(
                    "Profile id '{}' is ambiguous (multiple directories map to it); all of them were skipped.",
                    id
                ));
            }
            set
        }
        Err(e) => {
            ui.warn(format!("{:#}", anyhow::Error::new(e)));
            ProfileSet::default()
        }
    }
}

/// List all discovered profiles
pub fn list(paths: &Paths, ui: &Ui) -> Result<()> {
    let set = scan_or_warn(paths, ui);

    if set.is_empty() {
        ui.warn(format!(
            "No image profiles found under {}",
            paths.profile_root.display()
        ));
        ui.newline();
        ui.println("A profile is a directory holding both system.img and vendor.img.");
        return Ok(());
    }

    let store = ConfigStore::new(&paths.config_file);
    let active_id = store
        .read()
        .ok()
        .and_then(|config| set.active(&config).map(|p| p.id.clone()));

    let mut table = ui.simple_table();
    table.set_header(vec![
        ui.header_cell(""),
        ui.header_cell("Profile"),
        ui.header_cell("Images"),
        ui.header_cell("Size"),
        ui.header_cell("Status"),
    ]);

    for profile in set.iter() {
        let is_active = active_id.as_deref() == Some(profile.id.as_str());
        let icon = if is_active { ui.icon_ok() } else { " " };
        let status_cell = if is_active {
            ui.colored_cell("active", AnsiColor::Green)
        } else {
            ui.cell("-")
        };

        let size = file_size(&profile.system_img)
            .and_then(|s| file_size(&profile.vendor_img).map(|v| s + v))
            .map(format_bytes)
            .unwrap_or_else(|_| "?".to_string());

        table.add_row(vec![
            ui.cell(icon),
            ui.cell(&profile.id),
            ui.cell(profile.dir.display().to_string()),
            ui.cell(size),
            status_cell,
        ]);
    }

    ui.section("Profiles");
    ui.println(table.to_string());
    Ok(())
}

/// Show the active profile and the state of the managed paths
pub fn status(paths: &Paths, ui: &Ui) -> Result<()> {
    let set = scan_or_warn(paths, ui);
    let store = ConfigStore::new(&paths.config_file);

    ui.section("Runtime Status");
    ui.newline();

    let mut table = ui.simple_table();
    table.add_row(vec![
        ui.cell("Config file:"),
        ui.cell(paths.config_file.display().to_string()),
    ]);

    match store.read() {
        Ok(config) => {
            table.add_row(vec![
                ui.cell("Images path:"),
                ui.cell(config.images_path.display().to_string()),
            ]);
            match set.active(&config) {
                Some(profile) => table.add_row(vec![
                    ui.cell("Active profile:"),
                    ui.colored_cell(&profile.id, AnsiColor::Green),
                ]),
                None => table.add_row(vec![
                    ui.cell("Active profile:"),
                    ui.colored_cell("unmanaged (path matches no known profile)", AnsiColor::Yellow),
                ]),
            };
        }
        Err(ConfigError::Missing(_)) => {
            table.add_row(vec![
                ui.cell("Active profile:"),
                ui.colored_cell("unconfigured (config file not found)", AnsiColor::Yellow),
            ]);
        }
        Err(e) => {
            table.add_row(vec![
                ui.cell("Active profile:"),
                ui.colored_cell(format!("unreadable ({})", e), AnsiColor::Red),
            ]);
        }
    }

    for link in Target::all() {
        let live = link.live_path(paths);
        let cell = match LiveStatus::detect(&live) {
            LiveStatus::Missing => ui.cell("missing"),
            LiveStatus::Directory => {
                ui.colored_cell("unmanaged directory (migrates on first switch)", AnsiColor::Yellow)
            }
            LiveStatus::RegularFile => ui.colored_cell("regular file (!)", AnsiColor::Red),
            LiveStatus::Symlink { target } => match linked_profile(paths, &target) {
                Some(id) => ui.cell(format!("→ profile '{}'", id)),
                None => ui.colored_cell(
                    format!("symlink outside the store → {}", target.display()),
                    AnsiColor::Yellow,
                ),
            },
            LiveStatus::BrokenSymlink { target } => ui.colored_cell(
                format!("broken symlink → {}", target.display()),
                AnsiColor::Red,
            ),
        };
        table.add_row(vec![ui.cell(format!("Live {}:", link.display_name())), cell]);
    }

    let state = State::read(&paths.state_file).unwrap_or_default();
    if let (Some(profile), Some(at)) = (&state.last_profile, &state.switched_at) {
        table.add_row(vec![
            ui.cell("Last switch:"),
            ui.cell(format!("{} at {}", profile, at.format("%Y-%m-%d %H:%M:%S UTC"))),
        ]);
    }

    ui.println(table.to_string());

    if let Some(warning) = &state.start_warning {
        ui.warn(format!("Last switch committed but the session did not start: {}", warning));
    }
    Ok(())
}

/// The profile id a managed live symlink belongs to, derived from its
/// position under `profiles/<id>/<target dir>`.
fn linked_profile(paths: &Paths, target: &Path) -> Option<String> {
    let rel = target.strip_prefix(&paths.store_dir).ok()?;
    let id = rel.parent()?;
    if id.as_os_str().is_empty() {
        return None;
    }
    Some(id.to_string_lossy().into_owned())
}

/// Switch to a profile by id
pub fn use_profile(paths: &Paths, id: &str, ui: &Ui) -> Result<()> {
    paths.ensure_dirs()?;
    let set = probe::scan(&paths.profile_root)
        .with_context(|| format!("Failed to scan {}", paths.profile_root.display()))?;

    let switcher = Switcher::new(
        paths,
        WaydroidSession::default(),
        ConfigStore::new(&paths.config_file),
    );

    let spinner = ui.spinner(format!("Switching to '{}'...", id));
    let result = switcher.switch(&set, id, |step| {
        spinner.set_message(format!("Switching to '{}': {}...", id, step.describe()));
    });

    match result {
        Ok(outcome) => {
            if outcome.already_active {
                ui.spinner_finish_ok(&spinner, format!("'{}' is already the active profile", id));
                return Ok(());
            }
            ui.spinner_finish_ok(&spinner, format!("Switched to '{}'", outcome.profile));
            if let Some(warning) = outcome.start_warning {
                ui.warn(format!(
                    "The switch is committed but the session did not start: {}",
                    warning
                ));
                ui.println("Start it manually with: waydroid session start");
            }
            Ok(())
        }
        Err(e) => {
            let failing = match &e {
                SwitchError::Stop(_) => Step::Stopping.describe(),
                SwitchError::Unwound { step, .. } => *step,
                _ => "preparing the switch",
            };
            ui.spinner_finish_err(&spinner, format!("Switch failed while {}", failing));

            match &e {
                SwitchError::Stop(_) => {
                    ui.info("No changes were made; the previous profile is still intact.");
                }
                SwitchError::Unwound {
                    rollback_errors, ..
                } => {
                    if rollback_errors.is_empty() {
                        ui.info("All changes were rolled back; the previous profile is still active.");
                    } else {
                        ui.warn("Rollback was incomplete; inspect these before starting the runtime:");
                        for line in rollback_errors {
                            ui.println(format!("  {} {}", ui.icon_err(), line));
                        }
                    }
                }
                _ => {}
            }
            Err(e.into())
        }
    }
}

/// Register a profile by linking existing image files into a new
/// directory under the root. The images stay where they are; the scanner
/// accepts symlinked images as long as they resolve.
pub fn add(paths: &Paths, name: &str, system: &Path, vendor: &Path, ui: &Ui) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Profile name must not be empty");
    }
    // Separators in the name would nest the directory and shift the id.
    let safe_name = name.replace(['/', '\\'], "-");

    if !system.is_file() {
        bail!("System image not found: {}", system.display());
    }
    if !vendor.is_file() {
        bail!("Vendor image not found: {}", vendor.display());
    }

    let dir = paths.profile_root.join(&safe_name);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create profile directory: {}", dir.display()))?;

    let system_abs = fs::canonicalize(system)
        .with_context(|| format!("Failed to resolve {}", system.display()))?;
    let vendor_abs = fs::canonicalize(vendor)
        .with_context(|| format!("Failed to resolve {}", vendor.display()))?;

    for (src, link_name) in [
        (&system_abs, probe::SYSTEM_IMAGE),
        (&vendor_abs, probe::VENDOR_IMAGE),
    ] {
        let dst = dir.join(link_name);
        // Re-adding a profile replaces its links.
        if fs::symlink_metadata(&dst).is_ok() {
            fs::remove_file(&dst)
                .with_context(|| format!("Failed to replace {}", dst.display()))?;
        }
        symlink(src, &dst)
            .with_context(|| format!("Failed to create symlink {}", dst.display()))?;
    }

    // Confirm the new directory actually scans as a profile.
    let set = probe::scan(&paths.profile_root)
        .with_context(|| format!("Failed to scan {}", paths.profile_root.display()))?;
    let profile = set
        .get(&safe_name)
        .with_context(|| format!("Profile '{}' did not validate after linking", safe_name))?;

    ui.ok(format!(
        "Added profile '{}' ({})",
        profile.id,
        profile.dir.display()
    ));
    Ok(())
}

/// Interactive profile selector (the default command)
pub fn select(paths: &Paths, ui: &Ui) -> Result<Flow> {
    let set = scan_or_warn(paths, ui);
    if set.is_empty() {
        ui.warn(format!(
            "No image profiles found under {}",
            paths.profile_root.display()
        ));
        return Ok(Flow::Done);
    }

    let store = ConfigStore::new(&paths.config_file);
    let active_id = store
        .read()
        .ok()
        .and_then(|config| set.active(&config).map(|p| p.id.clone()));

    let ids: Vec<String> = set.iter().map(|p| p.id.clone()).collect();
    let options: Vec<String> = set
        .iter()
        .map(|p| {
            let marker = if active_id.as_deref() == Some(p.id.as_str()) {
                "[active] "
            } else {
                ""
            };
            format!("{}{}  {}", marker, p.id, ui.dim(p.dir.display().to_string()))
        })
        .collect();

    let choice = Select::new("Switch to which profile?", options.clone())
        .with_help_message("Enter to switch, Esc to cancel")
        .prompt();

    let selected = match choice {
        Ok(s) => s,
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
            ui.warn("Cancelled.");
            return Ok(Flow::Cancelled);
        }
        Err(e) => return Err(e).context("Profile selection failed"),
    };

    let id = options
        .iter()
        .position(|opt| *opt == selected)
        .map(|idx| ids[idx].clone())
        .context("Selected profile disappeared")?;

    use_profile(paths, &id, ui)?;
    Ok(Flow::Done)
}

/// Run diagnostics
pub fn doctor(paths: &Paths, ui: &Ui) -> Result<()> {
    run_doctor(paths, ui);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_paths;
    use crate::ui::ColorMode;
    use std::fs;
    use tempfile::TempDir;

    fn test_ui() -> Ui {
        Ui::new(ColorMode::Never, true)
    }

    fn make_profile(root: &Path, rel: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(probe::SYSTEM_IMAGE), b"sys").unwrap();
        fs::write(dir.join(probe::VENDOR_IMAGE), b"vnd").unwrap();
    }

    #[test]
    fn test_list_without_root() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        // profile root never created; degrades to empty with a warning
        assert!(list(&paths, &test_ui()).is_ok());
    }

    #[test]
    fn test_list_with_profiles() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        make_profile(&paths.profile_root, "tv");
        assert!(list(&paths, &test_ui()).is_ok());
    }

    #[test]
    fn test_status_unconfigured() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        make_profile(&paths.profile_root, "tv");
        // no config file at all
        assert!(status(&paths, &test_ui()).is_ok());
    }

    #[test]
    fn test_use_unknown_profile() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        make_profile(&paths.profile_root, "tv");
        fs::write(
            &paths.config_file,
            format!(
                "[waydroid]\nimages_path = {}\n",
                paths.profile_root.join("tv").display()
            ),
        )
        .unwrap();

        let err = use_profile(&paths, "nope", &test_ui()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_add_links_images_into_new_profile() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        let downloads = temp.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("lineage-system.img"), b"sys").unwrap();
        fs::write(downloads.join("lineage-vendor.img"), b"vnd").unwrap();

        add(
            &paths,
            "lineage",
            &downloads.join("lineage-system.img"),
            &downloads.join("lineage-vendor.img"),
            &test_ui(),
        )
        .unwrap();

        let dir = paths.profile_root.join("lineage");
        assert_eq!(
            fs::read_link(dir.join(probe::SYSTEM_IMAGE)).unwrap(),
            fs::canonicalize(downloads.join("lineage-system.img")).unwrap()
        );
        let set = probe::scan(&paths.profile_root).unwrap();
        assert!(set.get("lineage").is_some());
    }

    #[test]
    fn test_add_sanitizes_separators_in_name() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        fs::write(temp.path().join("s.img"), b"sys").unwrap();
        fs::write(temp.path().join("v.img"), b"vnd").unwrap();

        add(
            &paths,
            "android/13",
            &temp.path().join("s.img"),
            &temp.path().join("v.img"),
            &test_ui(),
        )
        .unwrap();

        assert!(paths.profile_root.join("android-13").is_dir());
        assert!(!paths.profile_root.join("android").exists());
    }

    #[test]
    fn test_add_missing_image_fails() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        fs::write(temp.path().join("s.img"), b"sys").unwrap();

        let err = add(
            &paths,
            "tv",
            &temp.path().join("s.img"),
            &temp.path().join("gone.img"),
            &test_ui(),
        )
        .unwrap_err();

        assert!(err.to_string().contains("Vendor image not found"));
        assert!(!paths.profile_root.join("tv").exists());
    }

    #[test]
    fn test_add_replaces_existing_links() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);
        fs::write(temp.path().join("old-s.img"), b"sys1").unwrap();
        fs::write(temp.path().join("old-v.img"), b"vnd1").unwrap();
        fs::write(temp.path().join("new-s.img"), b"sys2").unwrap();
        fs::write(temp.path().join("new-v.img"), b"vnd2").unwrap();

        let ui = test_ui();
        add(
            &paths,
            "tv",
            &temp.path().join("old-s.img"),
            &temp.path().join("old-v.img"),
            &ui,
        )
        .unwrap();
        add(
            &paths,
            "tv",
            &temp.path().join("new-s.img"),
            &temp.path().join("new-v.img"),
            &ui,
        )
        .unwrap();

        let linked = fs::read_link(paths.profile_root.join("tv").join(probe::SYSTEM_IMAGE)).unwrap();
        assert_eq!(linked, fs::canonicalize(temp.path().join("new-s.img")).unwrap());
    }

    #[test]
    fn test_linked_profile_nested_id() {
        let temp = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp);

        let target = paths.store_dir.join("android/a13").join("data");
        assert_eq!(
            linked_profile(&paths, &target).as_deref(),
            Some("android/a13")
        );
        assert!(linked_profile(&paths, Path::new("/elsewhere/data")).is_none());
        assert!(linked_profile(&paths, &paths.store_dir).is_none());
    }
}
