//! Persistence seam beneath the classifier
//!
//! The classifier only needs "load table", "commit table", "remove table".
//! `FileBackend` keeps one file per table in the configured directory;
//! `MemoryBackend` keeps bytes in memory and can be told to fail commits.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::PrefixStore;
use crate::{Error, Result};

/// File extension of a serialized table
pub const STORE_EXTENSION: &str = "sbstore";

pub trait StoreBackend: Send {
    /// Load a table, `None` if it has never been committed
    fn load(&self, table: &str) -> Result<Option<PrefixStore>>;

    /// Durably replace the stored state of `store.table_name()`
    fn commit(&mut self, store: &PrefixStore) -> Result<()>;

    fn remove(&mut self, table: &str) -> Result<()>;

    /// Names of every committed table
    fn tables(&self) -> Result<Vec<String>>;
}

/// Table names end up in file names, so keep them to a safe alphabet
pub fn validate_table_name(table: &str) -> Result<()> {
    let ok = !table.is_empty()
        && !table.starts_with('.')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidTableName(table.to_string()))
    }
}

/// One `<table>.sbstore` file per table
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) the store directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::StoreOpen {
            table: "*".to_string(),
            reason: format!("{}: {}", dir.display(), e),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", table, STORE_EXTENSION))
    }
}

impl StoreBackend for FileBackend {
    fn load(&self, table: &str) -> Result<Option<PrefixStore>> {
        validate_table_name(table)?;
        let path = self.path_for(table);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        PrefixStore::from_bytes(table, &data).map(Some)
    }

    fn commit(&mut self, store: &PrefixStore) -> Result<()> {
        let table = store.table_name();
        validate_table_name(table)?;
        let bytes = store.to_bytes()?;

        let path = self.path_for(table);
        let tmp = path.with_extension(format!("{}.tmp", STORE_EXTENSION));
        let written = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::StoreCommit {
                table: table.to_string(),
                reason: e.to_string(),
            });
        }

        tracing::debug!(
            table,
            path = %path.display(),
            bytes = bytes.len(),
            "Committed prefix store"
        );
        Ok(())
    }

    fn remove(&mut self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        let path = self.path_for(table);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn tables(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    failing_removes: HashSet<String>,
}

/// In-memory backend; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later commit of `table` fail
    pub fn fail_commits_for(&self, table: &str) {
        self.inner.lock().failing.insert(table.to_string());
    }

    /// Make every later removal of `table` fail
    pub fn fail_removes_for(&self, table: &str) {
        self.inner.lock().failing_removes.insert(table.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.failing.clear();
        inner.failing_removes.clear();
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self, table: &str) -> Result<Option<PrefixStore>> {
        let inner = self.inner.lock();
        match inner.tables.get(table) {
            Some(bytes) => PrefixStore::from_bytes(table, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn commit(&mut self, store: &PrefixStore) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.failing.contains(store.table_name()) {
            return Err(Error::StoreCommit {
                table: store.table_name().to_string(),
                reason: "injected failure".to_string(),
            });
        }
        inner
            .tables
            .insert(store.table_name().to_string(), store.to_bytes()?);
        Ok(())
    }

    fn remove(&mut self, table: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.failing_removes.contains(table) {
            return Err(Error::StoreRemove {
                table: table.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        inner.tables.remove(table);
        Ok(())
    }

    fn tables(&self) -> Result<Vec<String>> {
        let mut out: Vec<String> = self.inner.lock().tables.keys().cloned().collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Prefix, TableUpdate};

    fn sample_store(table: &str) -> PrefixStore {
        let mut update = TableUpdate::new(table);
        update.new_add_prefix(1, Prefix([1, 2, 3, 4]));
        let mut store = PrefixStore::new(table);
        store.apply(&update);
        store
    }

    #[test]
    fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.load("test-phish-simple").unwrap().is_none());

        let store = sample_store("test-phish-simple");
        backend.commit(&store).unwrap();
        assert_eq!(backend.tables().unwrap(), vec!["test-phish-simple".to_string()]);
        assert_eq!(backend.load("test-phish-simple").unwrap(), Some(store));

        backend.remove("test-phish-simple").unwrap();
        assert!(backend.tables().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_table_names() {
        assert!(validate_table_name("../etc").is_err());
        assert!(validate_table_name("a/b").is_err());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("goog-malware-shavar").is_ok());
    }

    #[test]
    fn test_memory_backend_injected_failure() {
        let mut backend = MemoryBackend::new();
        backend.fail_commits_for("t");
        assert!(backend.commit(&sample_store("t")).is_err());
        assert!(backend.load("t").unwrap().is_none());

        backend.clear_failures();
        backend.commit(&sample_store("t")).unwrap();
        assert!(backend.clone().load("t").unwrap().is_some());

        backend.fail_removes_for("t");
        assert!(matches!(backend.remove("t"), Err(Error::StoreRemove { .. })));
        assert!(backend.load("t").unwrap().is_some());
    }
}
