use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tinylink_core::Stats;
use uuid::Uuid;

/// Outcome of shortening a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortened {
    pub short_url: String,
    /// `true` when the URL had been shortened before, by any owner.
    pub already_existed: bool,
}

/// One entry of a batch shortening request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub correlation_id: String,
    pub short_url: String,
}

/// A stored record as returned by [`Shortener::get_all`], with the short code
/// rendered as a full short URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedUrl {
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub short_url: String,
    pub original_url: String,
    #[serde(rename = "is_deleted")]
    pub deleted: bool,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `url` on behalf of `owner_id` and returns the full short URL.
    async fn shorten_url(&self, owner_id: &str, url: &str) -> Result<Shortened>;

    /// Shortens every item in one storage call. Results follow input order.
    async fn shorten_batch(&self, owner_id: &str, items: Vec<BatchItem>)
        -> Result<Vec<BatchResult>>;

    /// Resolves a short code to its original URL. A code that could never
    /// have been issued is `NotFound`.
    async fn expand_url(&self, code: &str) -> Result<String>;

    /// Lists the live mappings owned by `owner_id`.
    async fn get_all(&self, owner_id: &str) -> Result<Vec<ListedUrl>>;

    /// Tombstones the codes owned by `owner_id`; other codes are ignored.
    async fn delete_many(&self, owner_id: &str, codes: &[String]) -> Result<()>;

    async fn ping_storage(&self) -> Result<()>;

    async fn stats(&self) -> Result<Stats>;
}
