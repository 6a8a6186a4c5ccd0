use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tinylink_core::repository::{
    Closer, Deleter, Pinger, Retriever, Saver, Stats, StatsRetriever, UrlRecord,
};
use tinylink_core::{Result, ShortCode, StorageError};
use tracing::trace;

/// Volatile repository backed by a sharded `DashMap`.
///
/// Records are keyed by short code. Deletion sets the tombstone in place so a
/// deleted code keeps resolving to `Gone`. Data is lost when the repository is
/// dropped.
///
/// `save_many` is best-effort per item: each record is inserted on its own and
/// existing codes are skipped.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    storage: DashMap<String, UrlRecord>,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }

    /// Number of stored records, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Returns `true` if a record with this short code is stored.
    pub fn contains(&self, code: &ShortCode) -> bool {
        self.storage.contains_key(code.as_str())
    }

    /// Inserts `record` unless its short code is taken. Returns whether the
    /// record was inserted.
    pub(crate) fn insert_if_absent(&self, record: &UrlRecord) -> bool {
        match self.storage.entry(record.short_code.as_str().to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                true
            }
        }
    }

    /// Stores `record` unconditionally, replacing any record with the same code.
    ///
    /// Only used when replaying a journal, where a later line reflects newer
    /// state for the same code.
    pub(crate) fn restore(&self, record: UrlRecord) {
        self.storage
            .insert(record.short_code.as_str().to_owned(), record);
    }

    /// Returns the live records among `codes` owned by `owner_id`, each once,
    /// without changing them.
    pub(crate) fn deletable(&self, owner_id: &str, codes: &[ShortCode]) -> Vec<ShortCode> {
        let mut seen = HashSet::new();
        codes
            .iter()
            .filter(|code| {
                self.storage
                    .get(code.as_str())
                    .is_some_and(|record| record.owner_id == owner_id && !record.deleted)
            })
            .filter(|code| seen.insert(code.as_str().to_owned()))
            .cloned()
            .collect()
    }

    /// Tombstones the live records among `codes` owned by `owner_id` and
    /// returns how many changed.
    pub(crate) fn tombstone(&self, owner_id: &str, codes: &[ShortCode]) -> usize {
        let mut changed = 0;
        for code in codes {
            if let Some(mut record) = self.storage.get_mut(code.as_str()) {
                if record.owner_id == owner_id && !record.deleted {
                    record.deleted = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Copies every stored record, tombstones included.
    pub(crate) fn snapshot(&self) -> Vec<UrlRecord> {
        self.storage
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl Saver for InMemoryRepository {
    async fn save(&self, record: &UrlRecord) -> Result<()> {
        if self.insert_if_absent(record) {
            Ok(())
        } else {
            Err(StorageError::AlreadyExists(record.short_code.to_string()))
        }
    }

    async fn save_many(&self, records: &[UrlRecord]) -> Result<()> {
        for record in records {
            if !self.insert_if_absent(record) {
                trace!(code = %record.short_code, "skipping existing short code");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Retriever for InMemoryRepository {
    async fn get(&self, code: &ShortCode) -> Result<String> {
        let Some(record) = self.storage.get(code.as_str()) else {
            return Err(StorageError::NotFound(code.to_string()));
        };

        if record.deleted {
            return Err(StorageError::Gone(code.to_string()));
        }

        Ok(record.original_url.clone())
    }

    async fn get_all(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        Ok(self
            .storage
            .iter()
            .filter(|entry| entry.owner_id == owner_id && !entry.deleted)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl Deleter for InMemoryRepository {
    async fn delete_many(&self, owner_id: &str, codes: &[ShortCode]) -> Result<()> {
        let changed = self.tombstone(owner_id, codes);
        trace!(owner = %owner_id, requested = codes.len(), changed, "tombstoned records");
        Ok(())
    }
}

#[async_trait]
impl Pinger for InMemoryRepository {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StatsRetriever for InMemoryRepository {
    async fn stats(&self) -> Result<Stats> {
        let mut owners = HashSet::new();
        let mut url_count = 0u64;
        for entry in self.storage.iter() {
            url_count += 1;
            owners.insert(entry.owner_id.clone());
        }

        Ok(Stats {
            url_count,
            owner_count: owners.len() as u64,
        })
    }
}

#[async_trait]
impl Closer for InMemoryRepository {
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
