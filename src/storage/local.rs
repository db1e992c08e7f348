use super::KeyValueStore;
use crate::error::AppResult;
use std::fs;
use std::path::{Path, PathBuf};

/// One JSON file per key under the app data directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    app_data_path: PathBuf,
}

impl LocalStore {
    pub fn new(app_data_path: &Path) -> AppResult<Self> {
        fs::create_dir_all(app_data_path)?;
        Ok(Self {
            app_data_path: app_data_path.to_path_buf(),
        })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.app_data_path.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ScheduleStore;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        assert!(store.get("reminder_schedules_SO-1").unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = LocalStore::new(temp_dir.path()).unwrap();
        store.set("reminders_SO-1", r#"{"amox":true}"#).unwrap();

        let reopened = LocalStore::new(temp_dir.path()).unwrap();
        assert_eq!(
            reopened.get("reminders_SO-1").unwrap().as_deref(),
            Some(r#"{"amox":true}"#)
        );
        assert!(temp_dir.path().join("reminders_SO-1.json").exists());
    }

    #[test]
    fn test_key_is_sanitized_into_file_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        let path = store.path_for("reminders_SO/../1");
        assert_eq!(path.parent(), Some(temp_dir.path()));
    }

    #[test]
    fn test_corrupt_file_loads_as_empty_schedules() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("reminder_schedules_SO-1.json"), "not json").unwrap();
        let store = ScheduleStore::new(LocalStore::new(temp_dir.path()).unwrap());
        assert!(store.load("SO-1").is_empty());
    }
}
