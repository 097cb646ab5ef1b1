//! Durable storage for name records.
//!
//! A ledger only ever adds slugs. Releasing a name updates its record but the
//! slug stays in the uniqueness set forever.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{ForgeError, ForgeResult};

/// Persisted identity mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// The unique slug.
    pub slug: String,
    /// The topic it was reserved for.
    pub topic: String,
    /// Stable key of the normalized topic.
    pub topic_key: String,
    /// Reservation time.
    pub created_at: DateTime<Utc>,
    /// Set once the project was deleted; the slug is still never reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl NameRecord {
    /// Returns true if the project behind the name was deleted.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}

/// Backing store for name records.
pub trait NameLedger: Send + Sync {
    /// Adds a record if its slug has never been seen.
    ///
    /// Returns `false` without writing when the slug already exists. The
    /// existence check and the write must be a single atomic step.
    fn insert_new(&self, record: &NameRecord) -> ForgeResult<bool>;

    /// Looks up a record by slug.
    fn get(&self, slug: &str) -> ForgeResult<Option<NameRecord>>;

    /// Overwrites an existing record.
    fn update(&self, record: &NameRecord) -> ForgeResult<()>;

    /// Returns every record ever inserted.
    fn records(&self) -> ForgeResult<Vec<NameRecord>>;
}

/// In-memory ledger, mainly for tests.
#[derive(Debug, Default)]
pub struct InMemoryNameLedger {
    records: Mutex<BTreeMap<String, NameRecord>>,
}

impl InMemoryNameLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameLedger for InMemoryNameLedger {
    fn insert_new(&self, record: &NameRecord) -> ForgeResult<bool> {
        let mut records = self.records.lock();
        if records.contains_key(&record.slug) {
            return Ok(false);
        }
        records.insert(record.slug.clone(), record.clone());
        Ok(true)
    }

    fn get(&self, slug: &str) -> ForgeResult<Option<NameRecord>> {
        Ok(self.records.lock().get(slug).cloned())
    }

    fn update(&self, record: &NameRecord) -> ForgeResult<()> {
        self.records.lock().insert(record.slug.clone(), record.clone());
        Ok(())
    }

    fn records(&self) -> ForgeResult<Vec<NameRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }
}

/// One JSON file per slug under a directory.
///
/// New records are written to a temporary file and then hard-linked into
/// place; the link fails if the slug file exists, which makes the uniqueness
/// check and the write one atomic filesystem operation, across processes too.
#[derive(Debug, Clone)]
pub struct FileNameLedger {
    dir: PathBuf,
}

impl FileNameLedger {
    /// Opens (creating if needed) a ledger directory.
    pub fn open(dir: impl Into<PathBuf>) -> ForgeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| ForgeError::persistence(&dir, e))?;
        Ok(Self { dir })
    }

    /// The ledger directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{slug}.json"))
    }

    fn write_temp(&self, record: &NameRecord) -> ForgeResult<PathBuf> {
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", record.slug, uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(record)?;
        let mut file = fs::File::create(&tmp).map_err(|e| ForgeError::persistence(&tmp, e))?;
        file.write_all(&json).map_err(|e| ForgeError::persistence(&tmp, e))?;
        file.sync_all().map_err(|e| ForgeError::persistence(&tmp, e))?;
        Ok(tmp)
    }

    fn read(path: &Path) -> ForgeResult<NameRecord> {
        let bytes = fs::read(path).map_err(|e| ForgeError::persistence(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ForgeError::persistence(path, e))
    }
}

impl NameLedger for FileNameLedger {
    fn insert_new(&self, record: &NameRecord) -> ForgeResult<bool> {
        let path = self.record_path(&record.slug);
        let tmp = self.write_temp(record)?;
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(ForgeError::persistence(&path, e)),
        }
    }

    fn get(&self, slug: &str) -> ForgeResult<Option<NameRecord>> {
        let path = self.record_path(slug);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn update(&self, record: &NameRecord) -> ForgeResult<()> {
        let path = self.record_path(&record.slug);
        let tmp = self.write_temp(record)?;
        fs::rename(&tmp, &path).map_err(|e| ForgeError::persistence(&path, e))
    }

    fn records(&self) -> ForgeResult<Vec<NameRecord>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| ForgeError::persistence(&self.dir, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ForgeError::persistence(&self.dir, e))?.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_record {
                records.push(Self::read(&path)?);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.slug.cmp(&b.slug)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(slug: &str) -> NameRecord {
        NameRecord {
            slug: slug.to_string(),
            topic: "quantum noise".to_string(),
            topic_key: "k".to_string(),
            created_at: Utc::now(),
            released_at: None,
        }
    }

    #[test]
    fn test_memory_insert_once() {
        let ledger = InMemoryNameLedger::new();
        assert!(ledger.insert_new(&record("a")).unwrap());
        assert!(!ledger.insert_new(&record("a")).unwrap());
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_file_insert_once() {
        let tmp = TempDir::new().unwrap();
        let ledger = FileNameLedger::open(tmp.path().join("names")).unwrap();

        assert!(ledger.insert_new(&record("quantum-noise-240101")).unwrap());
        assert!(!ledger.insert_new(&record("quantum-noise-240101")).unwrap());

        let got = ledger.get("quantum-noise-240101").unwrap().unwrap();
        assert_eq!(got.topic, "quantum noise");
        assert!(ledger.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_file_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let ledger = FileNameLedger::open(tmp.path()).unwrap();
        ledger.insert_new(&record("a")).unwrap();
        ledger.insert_new(&record("a")).unwrap();

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.json".to_string()]);
    }

    #[test]
    fn test_file_update_and_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let ledger = FileNameLedger::open(tmp.path()).unwrap();
            let mut rec = record("a");
            ledger.insert_new(&rec).unwrap();
            rec.released_at = Some(Utc::now());
            ledger.update(&rec).unwrap();
        }

        let reopened = FileNameLedger::open(tmp.path()).unwrap();
        let records = reopened.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_released());
        assert!(!reopened.insert_new(&record("a")).unwrap());
    }
}
