use crate::error::Result;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored URL record in the repository.
///
/// The serialized field names are the on-disk journal format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Content-addressed identifier of the original URL.
    pub id: Uuid,
    /// Identity that first created the record.
    #[serde(rename = "user_id")]
    pub owner_id: String,
    /// Short code derived from `id`.
    #[serde(rename = "short_url")]
    pub short_code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// Tombstone flag. Never reverts to `false` once set.
    #[serde(rename = "is_deleted", default)]
    pub deleted: bool,
}

/// Aggregate counters over a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Number of stored records, tombstoned ones included.
    pub url_count: u64,
    /// Number of distinct owners across stored records.
    pub owner_count: u64,
}

#[async_trait]
pub trait Saver: Send + Sync + 'static {
    /// Inserts a new record.
    ///
    /// Returns `Err(AlreadyExists)` if the short code is already stored; the
    /// existing record is left untouched.
    async fn save(&self, record: &UrlRecord) -> Result<()>;

    /// Inserts a batch of records, skipping short codes that already exist.
    ///
    /// Whether a failure can leave part of the batch stored is backend
    /// specific and documented on each implementation.
    async fn save_many(&self, records: &[UrlRecord]) -> Result<()>;
}

#[async_trait]
pub trait Retriever: Send + Sync + 'static {
    /// Resolves a short code to its original URL.
    ///
    /// Returns `Err(NotFound)` if the code was never stored and `Err(Gone)`
    /// if it has been deleted.
    async fn get(&self, code: &ShortCode) -> Result<String>;

    /// Returns the live records created by `owner_id`.
    async fn get_all(&self, owner_id: &str) -> Result<Vec<UrlRecord>>;
}

#[async_trait]
pub trait Deleter: Send + Sync + 'static {
    /// Tombstones the records among `codes` that belong to `owner_id`.
    ///
    /// Codes that do not exist or belong to someone else are ignored.
    async fn delete_many(&self, owner_id: &str, codes: &[ShortCode]) -> Result<()>;
}

#[async_trait]
pub trait Pinger: Send + Sync + 'static {
    /// Checks that the backend is reachable. Has no side effects.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait StatsRetriever: Send + Sync + 'static {
    async fn stats(&self) -> Result<Stats>;
}

#[async_trait]
pub trait Closer: Send + Sync + 'static {
    /// Releases backend resources. Calling it more than once is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Every capability a full storage backend provides.
pub trait Repository: Saver + Retriever + Deleter + Pinger + StatsRetriever + Closer {}

impl<T> Repository for T where T: Saver + Retriever + Deleter + Pinger + StatsRetriever + Closer {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::KeyDeriver;

    #[test]
    fn journal_field_names() {
        let record = KeyDeriver::derive("u1", "https://example.com");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["id"], "4fd35a71-71ef-5a55-a9d9-aa75c889a6d0");
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["short_url"], "T9NacXHv");
        assert_eq!(json["original_url"], "https://example.com");
        assert_eq!(json["is_deleted"], false);
    }

    #[test]
    fn missing_tombstone_defaults_to_live() {
        let line = r#"{"id":"4fd35a71-71ef-5a55-a9d9-aa75c889a6d0","user_id":"u1","short_url":"T9NacXHv","original_url":"https://example.com"}"#;
        let record: UrlRecord = serde_json::from_str(line).unwrap();

        assert!(!record.deleted);
        assert_eq!(record, KeyDeriver::derive("u1", "https://example.com"));
    }
}
