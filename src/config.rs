//! Access to the runtime's waydroid.cfg.
//!
//! This crate is the writer-of-record for the `images_path` key but the
//! file is owned by the runtime and may be edited externally between
//! runs, so it is re-read before every decision and never cached.

use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ConfigError;

const IMAGES_PATH_KEY: &str = "images_path";

/// The persisted `images_path` value, read fresh from waydroid.cfg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConfig {
    pub images_path: PathBuf,
}

/// Narrow interface to the runtime config, the seam the orchestrator is
/// tested through.
pub trait Store {
    fn read(&self) -> Result<ActiveConfig, ConfigError>;
    fn write(&self, images_path: &Path) -> Result<(), ConfigError>;
}

/// Store backed by the real config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_content(&self) -> Result<String, ConfigError> {
        fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigError::Missing(self.path.clone()),
            _ => ConfigError::Io {
                path: self.path.clone(),
                source: e,
            },
        })
    }

    /// Rewrite in place: exclusive flock on the config file, then read,
    /// rewrite, temp file in the same directory, rename over the
    /// original. The read happens under the lock, so a concurrent
    /// writer's edit is either fully before or fully after this one,
    /// and readers never see a half-written file.
    fn write_direct(&self, images_path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.lock_exclusive()?;

        let result = (|| {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            let rewritten = rewrite_images_path(&content, images_path);

            let temp_path = self.path.with_extension("cfg.tmp");
            let res =
                fs::write(&temp_path, &rewritten).and_then(|_| fs::rename(&temp_path, &self.path));
            if res.is_err() {
                let _ = fs::remove_file(&temp_path);
            }
            res
        })();
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    /// One non-interactive escalation. The shell side is the same
    /// temp-then-rename sequence, so the write stays atomic even when it
    /// happens as root.
    fn write_escalated(&self, content: &str) -> Result<(), ConfigError> {
        let denied = |reason: String| ConfigError::PermissionDenied {
            path: self.path.clone(),
            reason,
        };

        let mut child = Command::new("sudo")
            .args(["-n", "sh", "-c", r#"cat > "$0.tmp" && mv "$0.tmp" "$0""#])
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| denied(format!("failed to run sudo: {}", e)))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(content.as_bytes())
                .map_err(|e| denied(format!("failed to feed sudo: {}", e)))?;
        }

        let out = child
            .wait_with_output()
            .map_err(|e| denied(format!("failed to wait for sudo: {}", e)))?;
        if out.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        Err(denied(if stderr.is_empty() {
            "sudo exited with failure".to_string()
        } else {
            stderr
        }))
    }
}

impl Store for ConfigStore {
    fn read(&self) -> Result<ActiveConfig, ConfigError> {
        let content = self.read_content()?;
        parse_images_path(&content)
            .map(|images_path| ActiveConfig { images_path })
            .ok_or_else(|| ConfigError::KeyMissing(self.path.clone()))
    }

    fn write(&self, images_path: &Path) -> Result<(), ConfigError> {
        match self.write_direct(images_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConfigError::Missing(self.path.clone())),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                // Escalation cannot hold the flock, so the content it
                // ships is read as late as possible.
                let content = self.read_content()?;
                self.write_escalated(&rewrite_images_path(&content, images_path))
            }
            Err(e) => Err(ConfigError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

fn parse_images_path(content: &str) -> Option<PathBuf> {
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(IMAGES_PATH_KEY) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix('=') {
                return Some(PathBuf::from(value.trim()));
            }
        }
    }
    None
}

/// Replace the `images_path` line, keeping every other line untouched.
/// If the key is absent it is inserted right after the `[waydroid]`
/// section header, or appended when there is no such section.
fn rewrite_images_path(content: &str, images_path: &Path) -> String {
    let new_line = format!("{} = {}", IMAGES_PATH_KEY, images_path.display());
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        let is_key = trimmed
            .strip_prefix(IMAGES_PATH_KEY)
            .map(|rest| rest.trim_start().starts_with('='))
            .unwrap_or(false);
        if is_key && !replaced {
            lines.push(new_line.clone());
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }

    if !replaced {
        if let Some(pos) = lines.iter().position(|l| l.trim() == "[waydroid]") {
            lines.insert(pos + 1, new_line);
        } else {
            lines.push(new_line);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
