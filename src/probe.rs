//! Image profile discovery.
//!
//! Scans the profile root (`~/waydroid-images` by default) for directories
//! holding a complete Android image pair. Discovery is recomputed on every
//! invocation; nothing here is cached across runs.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::config::ActiveConfig;
use crate::error::ProbeError;

pub const SYSTEM_IMAGE: &str = "system.img";
pub const VENDOR_IMAGE: &str = "vendor.img";

/// Nesting bound for the recursive scan.
const MAX_SCAN_DEPTH: usize = 4;

/// One switchable image set: a directory with both image files present.
///
/// Image files may be symlinks; they are accepted as long as they resolve
/// to a readable regular file. The profile's identity is its directory
/// path as given, not any symlink target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Root-relative identifier (`default` for the root itself).
    pub id: String,
    pub dir: PathBuf,
    pub system_img: PathBuf,
    pub vendor_img: PathBuf,
}

impl Profile {
    /// Resolved-path comparison against the configured images path.
    fn matches(&self, images_path: &Path) -> bool {
        match (fs::canonicalize(&self.dir), fs::canonicalize(images_path)) {
            (Ok(a), Ok(b)) => a == b,
            _ => normalize(&self.dir) == normalize(images_path),
        }
    }
}

/// Lexical cleanup for paths that cannot be resolved on disk: drops `.`
/// components, repeated separators, and trailing slashes. Hand-edited
/// configs often carry these.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

/// Profiles discovered under one root, in traversal order, plus any
/// identifiers that collided and were excluded from the set.
#[derive(Debug, Default)]
pub struct ProfileSet {
    profiles: Vec<Profile>,
    conflicts: Vec<String>,
}

impl ProfileSet {
    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Identifiers excluded because two directories mapped to the same id.
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// The profile the runtime currently points at, if any. Returns
    /// `None` when the configured path matches no known profile (deleted
    /// profile, or images managed outside the root).
    pub fn active(&self, config: &ActiveConfig) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.matches(&config.images_path))
    }
}

/// Scan `root` for valid profiles.
///
/// A missing or unreadable root is an error; callers degrade it to an
/// empty set with a warning. Identifier collisions exclude every
/// colliding entry and are reported via [`ProfileSet::conflicts`].
pub fn scan(root: &Path) -> Result<ProfileSet, ProbeError> {
    let mut found: Vec<Profile> = Vec::new();
    scan_dir(root, root, 0, &mut found).map_err(|source| ProbeError::Io {
        root: root.to_path_buf(),
        source,
    })?;

    let mut set = ProfileSet::default();
    for profile in found {
        if set.conflicts.contains(&profile.id) {
            continue;
        }
        if let Some(pos) = set.profiles.iter().position(|p| p.id == profile.id) {
            set.profiles.remove(pos);
            set.conflicts.push(profile.id);
            continue;
        }
        set.profiles.push(profile);
    }
    Ok(set)
}

fn scan_dir(dir: &Path, root: &Path, depth: usize, out: &mut Vec<Profile>) -> std::io::Result<()> {
    let system = dir.join(SYSTEM_IMAGE);
    let vendor = dir.join(VENDOR_IMAGE);

    if is_readable_image(&system) && is_readable_image(&vendor) {
        let id = if dir == root {
            "default".to_string()
        } else {
            dir.strip_prefix(root)
                .unwrap_or(dir)
                .to_string_lossy()
                .into_owned()
        };
        out.push(Profile {
            id,
            dir: dir.to_path_buf(),
            system_img: system,
            vendor_img: vendor,
        });
    }

    if depth >= MAX_SCAN_DEPTH {
        return Ok(());
    }

    // Sort entries so traversal order is stable across runs.
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            entries.push(entry.path());
        }
    }
    entries.sort();

    for path in entries {
        scan_dir(&path, root, depth + 1, out)?;
    }
    Ok(())
}

/// Regular file or symlink resolving to one, and openable for read.
fn is_readable_image(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) && File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_profile(root: &Path, rel: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SYSTEM_IMAGE), b"sys").unwrap();
        fs::write(dir.join(VENDOR_IMAGE), b"vnd").unwrap();
    }

    #[test]
    fn test_scan_finds_nested_profiles() {
        let temp = tempfile::TempDir::new().unwrap();
        make_profile(temp.path(), "tv");
        make_profile(temp.path(), "android/a13");
        fs::create_dir_all(temp.path().join("empty")).unwrap();

        let set = scan(temp.path()).unwrap();
        let ids: Vec<&str> = set.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["android/a13", "tv"]);
        assert!(set.conflicts().is_empty());
    }

    #[test]
    fn test_scan_excludes_incomplete_profile() {
        let temp = tempfile::TempDir::new().unwrap();
        make_profile(temp.path(), "tv");
        let broken = temp.path().join("a13");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(SYSTEM_IMAGE), b"sys").unwrap();
        // vendor.img deliberately missing

        let set = scan(temp.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("a13").is_none());
        assert!(set.get("tv").is_some());
    }

    #[test]
    fn test_scan_root_itself_is_default() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join(SYSTEM_IMAGE), b"sys").unwrap();
        fs::write(temp.path().join(VENDOR_IMAGE), b"vnd").unwrap();

        let set = scan(temp.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().id, "default");
    }

    #[test]
    fn test_scan_accepts_symlinked_images() {
        let temp = tempfile::TempDir::new().unwrap();
        let real = temp.path().join("downloads");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("sys.img"), b"sys").unwrap();
        fs::write(real.join("vnd.img"), b"vnd").unwrap();

        let dir = temp.path().join("linked");
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(real.join("sys.img"), dir.join(SYSTEM_IMAGE)).unwrap();
        std::os::unix::fs::symlink(real.join("vnd.img"), dir.join(VENDOR_IMAGE)).unwrap();

        let set = scan(temp.path()).unwrap();
        assert!(set.get("linked").is_some());
    }

    #[test]
    fn test_scan_rejects_broken_symlink() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("broken");
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), dir.join(SYSTEM_IMAGE)).unwrap();
        fs::write(dir.join(VENDOR_IMAGE), b"vnd").unwrap();

        let set = scan(temp.path()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_scan_missing_root_is_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert!(matches!(scan(&missing), Err(ProbeError::Io { .. })));
    }

    #[test]
    fn test_id_collision_excludes_both() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempfile::TempDir::new().unwrap();
        // Two directory names that are distinct byte sequences but both
        // lossy-decode to "a\u{fffd}", colliding as identifiers.
        for bytes in [&b"a\xff"[..], &b"a\xfe"[..]] {
            let dir = temp.path().join(OsStr::from_bytes(bytes));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(SYSTEM_IMAGE), b"sys").unwrap();
            fs::write(dir.join(VENDOR_IMAGE), b"vnd").unwrap();
        }

        let set = scan(temp.path()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.conflicts().len(), 1);
    }

    #[test]
    fn test_matches_unresolvable_paths_lexically() {
        // Neither side exists, so canonicalize fails for both and the
        // comparison is lexical.
        let profile = Profile {
            id: "tv".into(),
            dir: PathBuf::from("/img/tv"),
            system_img: PathBuf::from("/img/tv/system.img"),
            vendor_img: PathBuf::from("/img/tv/vendor.img"),
        };

        assert!(profile.matches(Path::new("/img/tv/")));
        assert!(profile.matches(Path::new("/img//tv")));
        assert!(profile.matches(Path::new("/img/./tv")));
        assert!(!profile.matches(Path::new("/img/tv2")));
        assert!(!profile.matches(Path::new("/img/tv/data")));
    }

    #[test]
    fn test_active_matches_by_resolved_path() {
        let temp = tempfile::TempDir::new().unwrap();
        make_profile(temp.path(), "tv");
        let set = scan(temp.path()).unwrap();

        let config = ActiveConfig {
            images_path: temp.path().join("tv"),
        };
        assert_eq!(set.active(&config).unwrap().id, "tv");

        let external = ActiveConfig {
            images_path: PathBuf::from("/opt/elsewhere"),
        };
        assert!(set.active(&external).is_none());
    }
}
