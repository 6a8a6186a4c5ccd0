use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tinylink_core::repository::{
    Closer, Deleter, Pinger, Retriever, Saver, Stats, StatsRetriever, UrlRecord,
};
use tinylink_core::{Result, ShortCode, StorageError};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Schema applied by [`PostgresRepository::migrate`].
pub const SCHEMA: &str = include_str!("../ddl/postgres/short_urls.sql");

const INSERT_ONE: &str = r#"
    INSERT INTO short_urls (id, owner_id, short_url, original_url)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT DO NOTHING
"#;

const INSERT_MANY_PREFIX: &str = "INSERT INTO short_urls (id, owner_id, short_url, original_url) ";

const SELECT_BY_CODE: &str = r#"
    SELECT original_url, is_deleted
    FROM short_urls
    WHERE short_url = $1
    LIMIT 1
"#;

const SELECT_BY_OWNER: &str = r#"
    SELECT id, owner_id, short_url, original_url, is_deleted
    FROM short_urls
    WHERE owner_id = $1
      AND is_deleted = FALSE
    ORDER BY short_url
"#;

const TOMBSTONE_MANY: &str = r#"
    UPDATE short_urls
    SET is_deleted = TRUE
    WHERE owner_id = $1
      AND short_url = ANY($2)
      AND is_deleted = FALSE
"#;

const SELECT_STATS: &str = r#"
    SELECT COUNT(*) AS url_count, COUNT(DISTINCT owner_id) AS owner_count
    FROM short_urls
"#;

/// Postgres caps a statement at 65535 bind parameters; each row binds four.
const MAX_ROWS_PER_INSERT: usize = 65535 / 4;

/// PostgreSQL implementation of the repository contract.
///
/// Deletion is a tombstone on `is_deleted`; rows are never removed, so a
/// deleted code resolves to `Gone` and can never be inserted again.
///
/// Statement text is fixed, so sqlx prepares each statement once per pooled
/// connection and reuses it from the connection's statement cache until the
/// pool is closed.
///
/// `save_many` is all-or-nothing: the whole batch is inserted inside one
/// transaction.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UrlRow {
    id: Uuid,
    owner_id: String,
    short_url: String,
    original_url: String,
    is_deleted: bool,
}

impl TryFrom<UrlRow> for UrlRecord {
    type Error = StorageError;

    fn try_from(row: UrlRow) -> Result<Self> {
        let short_code = ShortCode::parse(row.short_url)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        Ok(UrlRecord {
            id: row.id,
            owner_id: row.owner_id,
            short_code,
            original_url: row.original_url,
            deleted: row.is_deleted,
        })
    }
}

impl PostgresRepository {
    /// Creates a repository from an existing PostgreSQL connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new PostgreSQL connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        info!(max_connections, "connected to postgres");
        Ok(Self::new(pool))
    }

    /// Creates the `short_urls` table and its indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("applied short_urls schema");
        Ok(())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn count(row: &sqlx::postgres::PgRow, column: &str) -> Result<u64> {
    let value: i64 = row.try_get(column).map_err(map_sqlx_error)?;
    u64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("negative {column}: {value}")))
}

#[async_trait]
impl Saver for PostgresRepository {
    async fn save(&self, record: &UrlRecord) -> Result<()> {
        let result = sqlx::query(INSERT_ONE)
            .bind(record.id)
            .bind(&record.owner_id)
            .bind(record.short_code.as_str())
            .bind(&record.original_url)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlreadyExists(record.short_code.to_string()));
        }

        trace!(code = %record.short_code, "inserted record");
        Ok(())
    }

    async fn save_many(&self, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut inserted = 0;

        for chunk in records.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder = QueryBuilder::<Postgres>::new(INSERT_MANY_PREFIX);
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id)
                    .push_bind(record.owner_id.clone())
                    .push_bind(record.short_code.as_str().to_owned())
                    .push_bind(record.original_url.clone());
            });
            builder.push(" ON CONFLICT DO NOTHING");

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(requested = records.len(), inserted, "inserted batch");
        Ok(())
    }
}

#[async_trait]
impl Retriever for PostgresRepository {
    async fn get(&self, code: &ShortCode) -> Result<String> {
        let row = sqlx::query(SELECT_BY_CODE)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(code.to_string()));
        };

        let deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Err(StorageError::Gone(code.to_string()));
        }

        row.try_get("original_url").map_err(map_sqlx_error)
    }

    async fn get_all(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let rows: Vec<UrlRow> = sqlx::query_as(SELECT_BY_OWNER)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(UrlRecord::try_from).collect()
    }
}

#[async_trait]
impl Deleter for PostgresRepository {
    async fn delete_many(&self, owner_id: &str, codes: &[ShortCode]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        let codes: Vec<String> = codes.iter().map(|c| c.as_str().to_owned()).collect();
        let result = sqlx::query(TOMBSTONE_MANY)
            .bind(owner_id)
            .bind(&codes)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(
            owner = %owner_id,
            requested = codes.len(),
            changed = result.rows_affected(),
            "tombstoned records"
        );
        Ok(())
    }
}

#[async_trait]
impl Pinger for PostgresRepository {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl StatsRetriever for PostgresRepository {
    async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(SELECT_STATS)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Stats {
            url_count: count(&row, "url_count")?,
            owner_count: count(&row, "owner_count")?,
        })
    }
}

#[async_trait]
impl Closer for PostgresRepository {
    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("closed postgres pool");
        }
        Ok(())
    }
}
