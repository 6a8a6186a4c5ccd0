//! Storage backends for the tinylink URL shortener.
//!
//! Three implementations of the capability traits from `tinylink_core`:
//!
//! - [`InMemoryRepository`]: volatile, DashMap backed.
//! - [`FileRepository`]: newline-delimited JSON journal replayed into memory.
//! - [`PostgresRepository`]: `short_urls` table accessed through sqlx.
//!
//! [`open`] builds the backend selected by a [`StorageConfig`].

pub mod file;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use tinylink_core::repository::{
    Closer, Deleter, Pinger, Repository, Retriever, Saver, Stats, StatsRetriever, UrlRecord,
};
pub use tinylink_core::{Result, ShortCode, StorageError};

/// Default size of the PostgreSQL connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Selects and configures a storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    File {
        path: PathBuf,
    },
    Postgres {
        dsn: String,
        max_connections: u32,
    },
}

/// Opens the backend described by `config`.
///
/// The PostgreSQL backend applies its schema before returning.
pub async fn open(config: &StorageConfig) -> Result<AnyRepository> {
    let repository = match config {
        StorageConfig::Memory => AnyRepository::Memory(InMemoryRepository::new()),
        StorageConfig::File { path } => AnyRepository::File(FileRepository::open(path).await?),
        StorageConfig::Postgres {
            dsn,
            max_connections,
        } => {
            let repository = PostgresRepository::connect(dsn, *max_connections).await?;
            repository.migrate().await?;
            AnyRepository::Postgres(repository)
        }
    };

    info!(backend = repository.kind(), "opened storage");
    Ok(repository)
}

/// A repository whose backend is chosen at runtime.
#[derive(Debug)]
pub enum AnyRepository {
    Memory(InMemoryRepository),
    File(FileRepository),
    Postgres(PostgresRepository),
}

impl AnyRepository {
    /// Short name of the active backend.
    pub fn kind(&self) -> &'static str {
        match self {
            AnyRepository::Memory(_) => "memory",
            AnyRepository::File(_) => "file",
            AnyRepository::Postgres(_) => "postgres",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $repo:ident => $call:expr) => {
        match $self {
            AnyRepository::Memory($repo) => $call,
            AnyRepository::File($repo) => $call,
            AnyRepository::Postgres($repo) => $call,
        }
    };
}

#[async_trait]
impl Saver for AnyRepository {
    async fn save(&self, record: &UrlRecord) -> Result<()> {
        dispatch!(self, repo => repo.save(record).await)
    }

    async fn save_many(&self, records: &[UrlRecord]) -> Result<()> {
        dispatch!(self, repo => repo.save_many(records).await)
    }
}

#[async_trait]
impl Retriever for AnyRepository {
    async fn get(&self, code: &ShortCode) -> Result<String> {
        dispatch!(self, repo => repo.get(code).await)
    }

    async fn get_all(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        dispatch!(self, repo => repo.get_all(owner_id).await)
    }
}

#[async_trait]
impl Deleter for AnyRepository {
    async fn delete_many(&self, owner_id: &str, codes: &[ShortCode]) -> Result<()> {
        dispatch!(self, repo => repo.delete_many(owner_id, codes).await)
    }
}

#[async_trait]
impl Pinger for AnyRepository {
    async fn ping(&self) -> Result<()> {
        dispatch!(self, repo => repo.ping().await)
    }
}

#[async_trait]
impl StatsRetriever for AnyRepository {
    async fn stats(&self) -> Result<Stats> {
        dispatch!(self, repo => repo.stats().await)
    }
}

#[async_trait]
impl Closer for AnyRepository {
    async fn close(&self) -> Result<()> {
        dispatch!(self, repo => repo.close().await)
    }
}
