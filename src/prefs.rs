//! Key/value preference store
//!
//! Only the geofence radius is persisted today, but the store is a plain
//! string map so the file stays readable and forward compatible.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Persistent string preferences
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Preferences kept in a JSON file
pub struct FilePreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePreferences {
    /// Open the store at `path`. A missing or corrupt file yields an empty store.
    pub fn open(path: &Path) -> Self {
        let values = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(?e, path = %path.display(), "ignoring unreadable preferences");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(?e, path = %path.display(), "failed to read preferences");
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_owned(),
            values,
        }
    }

    fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.values)?;
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).context("failed to write preferences")?;
        std::fs::rename(&tmp, &self.path).context("failed to replace preferences")?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if self.values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        let previous = self.values.insert(key.to_owned(), value.to_owned());
        if let Err(e) = self.save() {
            // Keep memory in step with disk so a retry writes again
            match previous {
                Some(old) => self.values.insert(key.to_owned(), old),
                None => self.values.remove(key),
            };
            return Err(e);
        }
        debug!(key, value, "preference saved");
        Ok(())
    }
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

#[cfg(test)]
impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_preferences_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let mut prefs = FilePreferences::open(&path);
        assert_eq!(prefs.get("radius"), None);
        prefs.set("radius", "750").unwrap();

        let reopened = FilePreferences::open(&path);
        assert_eq!(reopened.get("radius").as_deref(), Some("750"));
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, b"{not json").unwrap();

        let mut prefs = FilePreferences::open(&path);
        assert_eq!(prefs.get("radius"), None);
        prefs.set("radius", "50").unwrap();
        assert_eq!(FilePreferences::open(&path).get("radius").as_deref(), Some("50"));
    }

    #[test]
    fn test_failed_save_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("preferences.json");

        let mut prefs = FilePreferences::open(&path);
        assert!(prefs.set("radius", "750").is_err());
        assert_eq!(prefs.get("radius"), None);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        prefs.set("radius", "750").unwrap();
        assert_eq!(FilePreferences::open(&path).get("radius").as_deref(), Some("750"));
    }

    #[test]
    fn test_memory_preferences() {
        let mut prefs = MemoryPreferences::default();
        prefs.set("radius", "5000").unwrap();
        assert_eq!(prefs.get("radius").as_deref(), Some("5000"));
    }
}
