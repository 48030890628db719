use anyhow::{Context, Result};
use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// Default location of the runtime config file.
pub const DEFAULT_CONFIG_FILE: &str = "/var/lib/waydroid/waydroid.cfg";

/// All computed paths used by wayprof
#[derive(Debug, Clone)]
pub struct Paths {
    /// ~/waydroid-images (one directory per image profile)
    pub profile_root: PathBuf,
    /// /var/lib/waydroid/waydroid.cfg
    pub config_file: PathBuf,
    /// ~/.local/share/waydroid/data (live user data)
    pub live_data: PathBuf,
    /// /var/lib/waydroid/overlay_rw (live overlay upper dir)
    pub live_overlay_rw: PathBuf,
    /// /var/lib/waydroid/overlay_work (live overlay scratch dir)
    pub live_overlay_work: PathBuf,
    /// <data home>/wayprof/profiles (per-profile backing stores)
    pub store_dir: PathBuf,
    /// <data home>/wayprof/state.json
    pub state_file: PathBuf,
    /// <profile_root>/.wayprof.lock (advisory single-instance lock)
    pub lock_file: PathBuf,
}

impl Paths {
    pub fn new(root_override: Option<&Path>, config_override: Option<&Path>) -> Result<Self> {
        let base_dirs = BaseDirs::new().context("Failed to determine home directory")?;
        let home = base_dirs.home_dir();
        let data_home = base_dirs.data_dir();

        let profile_root = root_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join("waydroid-images"));
        let config_file = config_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let base_dir = data_home.join("wayprof");
        let lock_file = profile_root.join(".wayprof.lock");

        Ok(Self {
            lock_file,
            config_file,
            live_data: data_home.join("waydroid").join("data"),
            live_overlay_rw: PathBuf::from("/var/lib/waydroid/overlay_rw"),
            live_overlay_work: PathBuf::from("/var/lib/waydroid/overlay_work"),
            store_dir: base_dir.join("profiles"),
            state_file: base_dir.join("state.json"),
            profile_root,
        })
    }

    /// Backing store root for a profile id, e.g. `profiles/tv`
    pub fn profile_store(&self, id: &str) -> PathBuf {
        self.store_dir.join(id)
    }

    /// Check if a path is within the backing store directory
    pub fn is_in_store(&self, path: &Path) -> bool {
        path.starts_with(&self.store_dir)
    }

    /// Ensure the store directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store_dir)
            .with_context(|| format!("Failed to create store directory: {:?}", self.store_dir))?;
        Ok(())
    }
}
