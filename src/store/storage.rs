//! Raw string-keyed tables that timer records are kept in

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt::Debug,
    fs::read_to_string,
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;

/// A shared, global, string-keyed table
///
/// Other programs may keep their own entries in the same table, so callers
/// must not assume every key belongs to them.
pub trait Storage: Debug {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// An in-memory table
///
/// Clones are handles to the same table.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

/// A table kept in a single JSON file
///
/// The file holds one object mapping keys to string values. It is read on
/// every access and rewritten on every change, so separate `FileStorage`
/// values pointed at the same path see each other's writes.
///
/// Entries with non-string values belong to other programs. They are hidden
/// from [`Storage::get`] and [`Storage::keys`] and written back unchanged.
#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in the file, including ones other programs stored as non-string JSON
    fn load(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.try_exists()? {
            return Ok(BTreeMap::new());
        }

        let table_str = read_to_string(&self.path)
            .with_context(|| format!("Failed to read store file {}", self.path.display()))?;

        if table_str.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&table_str)
            .with_context(|| format!("Failed to parse store file {}", self.path.display()))
    }

    fn save(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        std::fs::create_dir_all(
            self.path
                .parent()
                .with_context(|| "Store file path does not have a parent directory")?,
        )?;

        let json = serde_json::to_string_pretty(entries)
            .with_context(|| "Unable to format store as JSON")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("Unable to write store to path {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Unable to replace store file {}", self.path.display()))?;

        debug!("Saved {} entries to {}", entries.len(), self.path.display());

        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.load()?.remove(key) {
            Some(Value::String(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.load()?;

        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }

        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|(_, value)| value.is_string())
            .map(|(key, _)| key)
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::{FileStorage, MemoryStorage, Storage};

    #[test]
    fn memory_clones_share_entries() {
        let a = MemoryStorage::new();
        let b = a.clone();

        a.set("k", "v").unwrap();

        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
        b.remove("k").unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("timers.json");

        let storage = FileStorage::new(&path);
        assert_eq!(storage.path(), path.as_path());
        assert!(storage.keys().unwrap().is_empty());

        storage.set("b", "2").unwrap();
        storage.set("a", "1").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("1"));

        reopened.remove("a").unwrap();
        reopened.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.json");
        std::fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(&path);

        assert!(storage.keys().is_err());
        assert!(storage.set("a", "1").is_err());
    }

    #[test]
    fn non_string_entries_are_kept_but_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.json");
        std::fs::write(&path, r#"{"theme": 1, "layout": {"wide": true}, "a": "1"}"#).unwrap();

        let storage = FileStorage::new(&path);

        assert_eq!(storage.keys().unwrap(), vec!["a".to_string()]);
        assert_eq!(storage.get("theme").unwrap(), None);

        storage.set("b", "2").unwrap();
        storage.remove("a").unwrap();

        let table: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(table["theme"], 1);
        assert_eq!(table["layout"]["wide"], true);
        assert_eq!(table["b"], "2");
        assert!(table.get("a").is_none());
    }
}
