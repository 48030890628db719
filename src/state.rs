use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Informational record of the last committed switch, stored in
/// state.json. The runtime config stays the source of truth for which
/// profile is active; this only enriches `status` output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct State {
    /// Profile id of the last committed switch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_profile: Option<String>,

    /// When that switch committed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switched_at: Option<DateTime<Utc>>,

    /// Start warning attached to that switch, if the session did not
    /// come back up afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_warning: Option<String>,
}

impl State {
    /// Read state from file, returning default if the file doesn't exist
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {:?}", path))
    }

    /// Write state to file atomically: temp file, then rename, so the
    /// file is never observed half-written.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("Failed to write temp state file: {:?}", temp_path))?;

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename state file: {:?} -> {:?}", temp_path, path))
    }

    pub fn record_switch(profile: &str, start_warning: Option<String>) -> Self {
        Self {
            last_profile: Some(profile.to_string()),
            switched_at: Some(Utc::now()),
            start_warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.json");
        let state = State::read(&path).unwrap();
        assert!(state.last_profile.is_none());
    }

    #[test]
    fn test_state_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        let state = State::record_switch("a13", None);
        state.write(&path).unwrap();

        let read_state = State::read(&path).unwrap();
        assert_eq!(read_state.last_profile, Some("a13".to_string()));
        assert!(read_state.switched_at.is_some());
        assert!(read_state.start_warning.is_none());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_state_keeps_start_warning() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        let state = State::record_switch("tv", Some("session failed to start".into()));
        state.write(&path).unwrap();

        let read_state = State::read(&path).unwrap();
        assert_eq!(
            read_state.start_warning.as_deref(),
            Some("session failed to start")
        );
    }
}
