use crate::config::ShortenerConfig;
use crate::error::{Result, ShortenerError};
use crate::shortener::{BatchItem, BatchResult, ListedUrl, Shortened, Shortener};
use async_trait::async_trait;
use std::sync::Arc;
use tinylink_core::{KeyDeriver, Repository, ShortCode, Stats, StorageError};
use tracing::{debug, trace};

/// A concrete implementation of the `Shortener` trait.
///
/// Codes are content-addressed: the same URL always yields the same code, so
/// a repeated shorten request finds the existing record instead of creating a
/// second one. The first owner to shorten a URL keeps it.
#[derive(Debug)]
pub struct ShortenerService<R> {
    repository: Arc<R>,
    config: Arc<ShortenerConfig>,
}

impl<R> Clone for ShortenerService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            config: Arc::clone(&self.config),
        }
    }
}

impl<R: Repository> ShortenerService<R> {
    pub fn new(repository: R, config: ShortenerConfig) -> Self {
        Self::with_shared(Arc::new(repository), config)
    }

    /// Creates a service over a repository the caller keeps a handle to,
    /// typically so it can be closed on shutdown.
    pub fn with_shared(repository: Arc<R>, config: ShortenerConfig) -> Self {
        Self {
            repository,
            config: Arc::new(config),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn config(&self) -> &ShortenerConfig {
        &self.config
    }

    fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.config.base_url)
    }

    fn require_owner(owner_id: &str) -> Result<()> {
        if owner_id.is_empty() {
            return Err(ShortenerError::MissingOwner);
        }
        Ok(())
    }

    fn require_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Repository> Shortener for ShortenerService<R> {
    async fn shorten_url(&self, owner_id: &str, url: &str) -> Result<Shortened> {
        Self::require_owner(owner_id)?;
        Self::require_url(url)?;

        let record = KeyDeriver::derive(owner_id, url);
        let already_existed = match self.repository.save(&record).await {
            Ok(()) => false,
            Err(StorageError::AlreadyExists(_)) => true,
            Err(e) => return Err(e.into()),
        };

        debug!(
            owner = %owner_id,
            code = %record.short_code,
            already_existed,
            "shortened url"
        );

        Ok(Shortened {
            short_url: self.short_url(&record.short_code),
            already_existed,
        })
    }

    async fn shorten_batch(
        &self,
        owner_id: &str,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchResult>> {
        Self::require_owner(owner_id)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for item in &items {
            Self::require_url(&item.original_url)?;
        }

        let records: Vec<_> = items
            .iter()
            .map(|item| KeyDeriver::derive(owner_id, &item.original_url))
            .collect();

        self.repository.save_many(&records).await?;
        debug!(owner = %owner_id, count = records.len(), "shortened batch");

        Ok(items
            .into_iter()
            .zip(&records)
            .map(|(item, record)| BatchResult {
                correlation_id: item.correlation_id,
                short_url: self.short_url(&record.short_code),
            })
            .collect())
    }

    async fn expand_url(&self, code: &str) -> Result<String> {
        let code =
            ShortCode::parse(code).map_err(|_| ShortenerError::NotFound(code.to_string()))?;
        let url = self.repository.get(&code).await?;
        trace!(code = %code, "expanded short code");
        Ok(url)
    }

    async fn get_all(&self, owner_id: &str) -> Result<Vec<ListedUrl>> {
        Self::require_owner(owner_id)?;

        let records = self.repository.get_all(owner_id).await?;
        Ok(records
            .into_iter()
            .map(|record| ListedUrl {
                short_url: self.short_url(&record.short_code),
                id: record.id,
                owner_id: record.owner_id,
                original_url: record.original_url,
                deleted: record.deleted,
            })
            .collect())
    }

    async fn delete_many(&self, owner_id: &str, codes: &[String]) -> Result<()> {
        Self::require_owner(owner_id)?;

        // A malformed code was never issued, so it cannot belong to the owner.
        let codes: Vec<ShortCode> = codes
            .iter()
            .filter_map(|code| ShortCode::parse(code.as_str()).ok())
            .collect();
        if codes.is_empty() {
            return Ok(());
        }

        self.repository.delete_many(owner_id, &codes).await?;
        debug!(owner = %owner_id, count = codes.len(), "deleted short codes");
        Ok(())
    }

    async fn ping_storage(&self) -> Result<()> {
        self.repository.ping().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(self.repository.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinylink_core::{Closer, Deleter, Pinger, Retriever, Saver, StatsRetriever, UrlRecord};
    use tinylink_storage::{FileRepository, InMemoryRepository};

    const BASE_URL: &str = "http://localhost:8080";

    fn test_service() -> ShortenerService<InMemoryRepository> {
        ShortenerService::new(
            InMemoryRepository::new(),
            ShortenerConfig::builder().base_url(BASE_URL).build(),
        )
    }

    fn item(correlation_id: &str, original_url: &str) -> BatchItem {
        BatchItem {
            correlation_id: correlation_id.to_string(),
            original_url: original_url.to_string(),
        }
    }

    /// Memory repository whose batch inserts always fail.
    #[derive(Default)]
    struct FailingBatchRepository {
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl Saver for FailingBatchRepository {
        async fn save(&self, record: &UrlRecord) -> tinylink_core::Result<()> {
            self.inner.save(record).await
        }

        async fn save_many(&self, _records: &[UrlRecord]) -> tinylink_core::Result<()> {
            Err(StorageError::Unavailable("connection reset".to_string()))
        }
    }

    #[async_trait]
    impl Retriever for FailingBatchRepository {
        async fn get(&self, code: &ShortCode) -> tinylink_core::Result<String> {
            self.inner.get(code).await
        }

        async fn get_all(&self, owner_id: &str) -> tinylink_core::Result<Vec<UrlRecord>> {
            self.inner.get_all(owner_id).await
        }
    }

    #[async_trait]
    impl Deleter for FailingBatchRepository {
        async fn delete_many(
            &self,
            owner_id: &str,
            codes: &[ShortCode],
        ) -> tinylink_core::Result<()> {
            self.inner.delete_many(owner_id, codes).await
        }
    }

    #[async_trait]
    impl Pinger for FailingBatchRepository {
        async fn ping(&self) -> tinylink_core::Result<()> {
            self.inner.ping().await
        }
    }

    #[async_trait]
    impl StatsRetriever for FailingBatchRepository {
        async fn stats(&self) -> tinylink_core::Result<Stats> {
            self.inner.stats().await
        }
    }

    #[async_trait]
    impl Closer for FailingBatchRepository {
        async fn close(&self) -> tinylink_core::Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn shorten_returns_derived_short_url() {
        let service = test_service();

        let shortened = service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();

        assert_eq!(shortened.short_url, "http://localhost:8080/T9NacXHv");
        assert!(!shortened.already_existed);
    }

    #[tokio::test]
    async fn shorten_same_url_twice_reports_existing() {
        let service = test_service();

        let first = service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();
        let second = service
            .shorten_url("u2", "https://example.com")
            .await
            .unwrap();

        assert_eq!(first.short_url, second.short_url);
        assert!(second.already_existed);

        // the first owner keeps the record
        assert_eq!(service.get_all("u1").await.unwrap().len(), 1);
        assert!(service.get_all("u2").await.unwrap().is_empty());
        assert_eq!(service.stats().await.unwrap().url_count, 1);
    }

    #[tokio::test]
    async fn shorten_trims_trailing_slash_of_base_url() {
        let service = ShortenerService::new(
            InMemoryRepository::new(),
            ShortenerConfig::builder()
                .base_url("https://tiny.example/")
                .build(),
        );

        let shortened = service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();
        assert_eq!(shortened.short_url, "https://tiny.example/T9NacXHv");
    }

    #[tokio::test]
    async fn shorten_without_owner_fails() {
        let service = test_service();

        let err = service
            .shorten_url("", "https://example.com")
            .await
            .unwrap_err();
        assert_eq!(err, ShortenerError::MissingOwner);
    }

    #[tokio::test]
    async fn shorten_empty_url_fails() {
        let service = test_service();

        let err = service.shorten_url("u1", "").await.unwrap_err();
        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn expand_existing_url() {
        let service = test_service();
        service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();

        let url = service.expand_url("T9NacXHv").await.unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[tokio::test]
    async fn expand_unknown_code_is_not_found() {
        let service = test_service();

        let err = service.expand_url("AAAAAAAA").await.unwrap_err();
        assert!(matches!(err, ShortenerError::NotFound(_)));
    }

    #[tokio::test]
    async fn expand_malformed_code_is_not_found() {
        let service = test_service();

        let err = service.expand_url("abc").await.unwrap_err();
        assert_eq!(err, ShortenerError::NotFound("abc".to_string()));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let service = test_service();
        service
            .shorten_url("u1", "https://a.example/")
            .await
            .unwrap();

        let results = service
            .shorten_batch(
                "u1",
                vec![
                    item("2", "http://example.com/1"),
                    item("1", "https://a.example/"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            results,
            vec![
                BatchResult {
                    correlation_id: "2".to_string(),
                    short_url: "http://localhost:8080/QK_Dw4M9".to_string(),
                },
                BatchResult {
                    correlation_id: "1".to_string(),
                    short_url: "http://localhost:8080/RMyC63y5".to_string(),
                },
            ]
        );
        assert_eq!(service.stats().await.unwrap().url_count, 2);
    }

    #[tokio::test]
    async fn empty_batch_returns_nothing() {
        let service = test_service();

        let results = service.shorten_batch("u1", Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn batch_with_empty_url_stores_nothing() {
        let service = test_service();

        let err = service
            .shorten_batch("u1", vec![item("1", "https://a.example/"), item("2", "")])
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
        assert_eq!(service.stats().await.unwrap().url_count, 0);
    }

    #[tokio::test]
    async fn failed_batch_returns_no_results() {
        let service = ShortenerService::new(
            FailingBatchRepository::default(),
            ShortenerConfig::default(),
        );

        let err = service
            .shorten_batch("u1", vec![item("1", "https://a.example/")])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ShortenerError::Storage(StorageError::Unavailable("connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn get_all_lists_live_urls_of_owner() {
        let service = test_service();
        service
            .shorten_url("u1", "https://a.example/")
            .await
            .unwrap();
        service
            .shorten_url("u2", "http://example.com/1")
            .await
            .unwrap();

        let listed = service.get_all("u1").await.unwrap();
        assert_eq!(
            listed,
            vec![ListedUrl {
                id: KeyDeriver::id("https://a.example/"),
                owner_id: "u1".to_string(),
                short_url: "http://localhost:8080/RMyC63y5".to_string(),
                original_url: "https://a.example/".to_string(),
                deleted: false,
            }]
        );
    }

    #[tokio::test]
    async fn deleted_url_is_gone() {
        let service = test_service();
        service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();

        service
            .delete_many("u1", &["T9NacXHv".to_string()])
            .await
            .unwrap();

        let err = service.expand_url("T9NacXHv").await.unwrap_err();
        assert!(matches!(err, ShortenerError::Gone(_)));
        assert!(service.get_all("u1").await.unwrap().is_empty());

        // re-shortening does not resurrect the record
        let again = service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();
        assert!(again.already_existed);
        let err = service.expand_url("T9NacXHv").await.unwrap_err();
        assert!(matches!(err, ShortenerError::Gone(_)));
    }

    #[tokio::test]
    async fn delete_ignores_foreign_and_malformed_codes() {
        let service = test_service();
        service
            .shorten_url("u1", "https://example.com")
            .await
            .unwrap();

        service
            .delete_many("u2", &["T9NacXHv".to_string(), "bogus".to_string()])
            .await
            .unwrap();

        let url = service.expand_url("T9NacXHv").await.unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[tokio::test]
    async fn delete_without_owner_fails() {
        let service = test_service();

        let err = service
            .delete_many("", &["T9NacXHv".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err, ShortenerError::MissingOwner);
    }

    #[tokio::test]
    async fn ping_and_stats_pass_through() {
        let service = test_service();
        service.ping_storage().await.unwrap();

        service
            .shorten_batch(
                "u1",
                vec![item("1", "https://a.example/"), item("2", "http://example.com/1")],
            )
            .await
            .unwrap();
        service
            .shorten_url("u2", "https://example.com")
            .await
            .unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats, Stats { url_count: 3, owner_count: 2 });
    }

    #[tokio::test]
    async fn file_backed_service_keeps_tombstones_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");

        {
            let repository = Arc::new(FileRepository::open(&path).await.unwrap());
            let service =
                ShortenerService::with_shared(Arc::clone(&repository), ShortenerConfig::default());
            service
                .shorten_url("u1", "https://example.com")
                .await
                .unwrap();
            service
                .delete_many("u1", &["T9NacXHv".to_string()])
                .await
                .unwrap();
            repository.close().await.unwrap();
        }

        let service = ShortenerService::new(
            FileRepository::open(&path).await.unwrap(),
            ShortenerConfig::default(),
        );
        let err = service.expand_url("T9NacXHv").await.unwrap_err();
        assert!(matches!(err, ShortenerError::Gone(_)));
    }
}
