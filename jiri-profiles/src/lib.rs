//! Profile database: named software suites with installation targets.
//!
//! A profile holds a set of targets, each identified by a tag unique within
//! the profile. The database is an explicit value passed to callers, with a
//! coarse internal mutex; persistence is an XML manifest written through the
//! rotating safe-write protocol so the previous version survives as `.prev`.

mod codec;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use jiri_core::fsutil::rotate_write_file;

/// Errors from profile database operations.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed profiles XML: {0}")]
    Xml(String),

    #[error("failed to parse profiles at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("tag {tag:?} is already used in profile {profile:?}")]
    DuplicateTag { tag: String, profile: String },

    #[error(transparent)]
    Core(#[from] jiri_core::CoreError),
}

/// An installation variant of a profile, keyed by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub tag: String,
    pub arch: String,
    pub os: String,
    pub installation_dir: PathBuf,
    pub version: String,
    /// Last install or update time; RFC3339 on disk.
    pub update_time: DateTime<Utc>,
    /// Environment variables as `NAME=value` entries; sorted on write.
    pub env: Vec<String>,
}

impl Target {
    pub fn new(tag: impl Into<String>) -> Self {
        Target {
            tag: tag.into(),
            arch: String::new(),
            os: String::new(),
            installation_dir: PathBuf::new(),
            version: String::new(),
            update_time: Utc::now(),
            env: Vec::new(),
        }
    }
}

/// A named software suite and its installed targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub root: String,
    pub targets: Vec<Target>,
}

/// The in-memory profile database. All public operations take the internal
/// mutex for their duration; correctness over granularity.
#[derive(Debug, Default)]
pub struct ProfileDb {
    inner: Mutex<BTreeMap<String, Profile>>,
}

impl ProfileDb {
    pub fn new() -> Self {
        ProfileDb::default()
    }

    /// Profile names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.locked().keys().cloned().collect()
    }

    /// The profile with the given name, if installed.
    pub fn lookup(&self, name: &str) -> Option<Profile> {
        self.locked().get(name).cloned()
    }

    /// The target with the given tag in the named profile.
    pub fn lookup_target(&self, name: &str, tag: &str) -> Option<Target> {
        self.locked()
            .get(name)?
            .targets
            .iter()
            .find(|t| t.tag == tag)
            .cloned()
    }

    /// Whether the named profile has a target with the given tag.
    pub fn has_target(&self, name: &str, tag: &str) -> bool {
        self.lookup_target(name, tag).is_some()
    }

    /// Install a new profile. A profile that already exists is left alone.
    pub fn install(&self, name: &str, root: &str) {
        self.locked().entry(name.to_owned()).or_insert_with(|| Profile {
            name: name.to_owned(),
            root: root.to_owned(),
            targets: Vec::new(),
        });
    }

    /// Add a target to the named profile, creating the profile if needed.
    /// A tag already present in the profile is rejected without mutating
    /// anything.
    pub fn add_target(&self, name: &str, mut target: Target) -> Result<(), ProfileError> {
        let mut db = self.locked();
        target.update_time = Utc::now();
        if let Some(profile) = db.get_mut(name) {
            if profile.targets.iter().any(|t| t.tag == target.tag) {
                return Err(ProfileError::DuplicateTag {
                    tag: target.tag,
                    profile: name.to_owned(),
                });
            }
            profile.targets.push(target);
            return Ok(());
        }
        db.insert(
            name.to_owned(),
            Profile {
                name: name.to_owned(),
                root: String::new(),
                targets: vec![target],
            },
        );
        Ok(())
    }

    /// Refresh the version and update time of an existing target. A missing
    /// profile or tag is a no-op.
    pub fn update_target(&self, name: &str, tag: &str, version: &str) {
        let mut db = self.locked();
        let Some(profile) = db.get_mut(name) else {
            return;
        };
        if let Some(target) = profile.targets.iter_mut().find(|t| t.tag == tag) {
            target.version = version.to_owned();
            target.update_time = Utc::now();
        }
    }

    /// Remove the target with the given tag. Returns true when the profile
    /// no longer exists afterwards (it lost its last target, or never
    /// existed).
    pub fn remove_target(&self, name: &str, tag: &str) -> bool {
        let mut db = self.locked();
        let Some(profile) = db.get_mut(name) else {
            return true;
        };
        profile.targets.retain(|t| t.tag != tag);
        if profile.targets.is_empty() {
            db.remove(name);
            return true;
        }
        false
    }

    /// Load installed profiles from `path`. A missing file leaves the
    /// database unchanged.
    pub fn read(&self, path: &Path) -> Result<(), ProfileError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(ProfileError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let profiles = codec::parse(&data).map_err(|e| ProfileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut db = self.locked();
        for profile in profiles {
            db.insert(profile.name.clone(), profile);
        }
        Ok(())
    }

    /// Write installed profiles to `path`, preserving the previous version
    /// as `.prev`. Target env vars are sorted for stable output.
    pub fn write(&self, path: &Path) -> Result<(), ProfileError> {
        let mut profiles: Vec<Profile> = self.locked().values().cloned().collect();
        for profile in &mut profiles {
            for target in &mut profile.targets {
                target.env.sort();
            }
        }
        let data = codec::serialize(&profiles)?;
        rotate_write_file(path, &data)?;
        Ok(())
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Profile>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(tag: &str, version: &str) -> Target {
        Target {
            arch: "amd64".to_owned(),
            os: "linux".to_owned(),
            installation_dir: PathBuf::from(format!("/opt/{tag}")),
            version: version.to_owned(),
            env: vec!["GOARCH=amd64".to_owned()],
            ..Target::new(tag)
        }
    }

    #[test]
    fn install_is_idempotent() {
        let db = ProfileDb::new();
        db.install("go", "/opt/go");
        db.install("go", "/elsewhere");
        assert_eq!(db.lookup("go").unwrap().root, "/opt/go");
    }

    #[test]
    fn names_are_lexicographic() {
        let db = ProfileDb::new();
        db.install("zlib", "");
        db.install("answers", "");
        db.install("go", "");
        assert_eq!(db.names(), vec!["answers", "go", "zlib"]);
    }

    #[test]
    fn duplicate_tag_rejected_without_mutation() {
        let db = ProfileDb::new();
        db.add_target("go", target("t1", "1.0")).unwrap();
        let err = db.add_target("go", target("t1", "2.0")).unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateTag { .. }));
        let profile = db.lookup("go").unwrap();
        assert_eq!(profile.targets.len(), 1);
        assert_eq!(profile.targets[0].version, "1.0");
    }

    #[test]
    fn add_target_creates_missing_profile() {
        let db = ProfileDb::new();
        db.add_target("rust", target("t1", "1.0")).unwrap();
        assert!(db.has_target("rust", "t1"));
    }

    #[test]
    fn update_target_refreshes_version_and_time() {
        let db = ProfileDb::new();
        db.add_target("go", target("t1", "1.0")).unwrap();
        let before = db.lookup_target("go", "t1").unwrap();
        db.update_target("go", "t1", "2.0");
        let after = db.lookup_target("go", "t1").unwrap();
        assert_eq!(after.version, "2.0");
        assert!(after.update_time >= before.update_time);
    }

    #[test]
    fn removing_last_target_drops_profile() {
        let db = ProfileDb::new();
        db.add_target("go", target("t1", "1.0")).unwrap();
        db.add_target("go", target("t2", "1.0")).unwrap();
        assert!(!db.remove_target("go", "t1"));
        assert!(db.remove_target("go", "t2"));
        assert!(db.lookup("go").is_none());
        assert!(db.remove_target("go", "t3"), "missing profile counts as gone");
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("profiles.xml");

        let db = ProfileDb::new();
        db.install("go", "/opt/go");
        db.add_target("go", target("t1", "1.9")).unwrap();
        db.add_target("rust", target("stable", "1.31")).unwrap();
        db.write(&file).unwrap();

        let back = ProfileDb::new();
        back.read(&file).unwrap();
        assert_eq!(back.names(), vec!["go", "rust"]);
        let t = back.lookup_target("go", "t1").unwrap();
        assert_eq!(t.version, "1.9");
        assert_eq!(t.arch, "amd64");
        assert_eq!(t.env, vec!["GOARCH=amd64".to_owned()]);
    }

    #[test]
    fn read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = ProfileDb::new();
        db.read(&dir.path().join("absent.xml")).unwrap();
        assert!(db.names().is_empty());
    }

    #[test]
    fn write_preserves_previous_version() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("profiles.xml");

        let db = ProfileDb::new();
        db.add_target("go", target("t1", "1.0")).unwrap();
        db.write(&file).unwrap();
        db.update_target("go", "t1", "2.0");
        db.write(&file).unwrap();

        let prev = ProfileDb::new();
        prev.read(&file.with_extension("xml.prev")).unwrap();
        assert_eq!(prev.lookup_target("go", "t1").unwrap().version, "1.0");

        let current = ProfileDb::new();
        current.read(&file).unwrap();
        assert_eq!(current.lookup_target("go", "t1").unwrap().version, "2.0");
    }
}
