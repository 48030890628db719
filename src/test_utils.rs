//! Test utilities shared across test modules

use crate::paths::Paths;
use tempfile::TempDir;

/// A `Paths` layout rooted entirely inside a temp directory, mirroring
/// the real profile root / runtime config / live path / store split.
/// Only the profile root is created up front; everything else appears
/// the way it would on a real system.
pub fn setup_test_paths(temp_dir: &TempDir) -> Paths {
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("waydroid-images")).unwrap();

    Paths {
        profile_root: root.join("waydroid-images"),
        config_file: root.join("waydroid.cfg"),
        live_data: root.join("live").join("data"),
        live_overlay_rw: root.join("live").join("overlay_rw"),
        live_overlay_work: root.join("live").join("overlay_work"),
        store_dir: root.join("wayprof").join("profiles"),
        state_file: root.join("wayprof").join("state.json"),
        lock_file: root.join("waydroid-images").join(".wayprof.lock"),
    }
}
