use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tinylink_core::KeyDeriver;
use tinylink_storage::{
    Closer, Deleter, Pinger, PostgresRepository, Retriever, Saver, ShortCode, StatsRetriever,
    StorageError, UrlRecord,
};
use tinylink_test_infra::postgres::{PostgresConfig, PostgresServer};

struct Fixture {
    _postgres: PostgresServer,
    url: String,
    repo: PostgresRepository,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");
        let pool = connect_with_retry(&url).await;

        let repo = PostgresRepository::new(pool);
        repo.migrate().await.expect("create schema");

        Self {
            _postgres: postgres,
            url,
            repo,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::PgPool {
    let mut last_error = None;

    for _ in 0..20 {
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

fn record(owner: &str, url: &str) -> UrlRecord {
    KeyDeriver::derive(owner, url)
}

#[tokio::test]
async fn save_and_get_record() {
    let fixture = Fixture::start().await;
    let r = record("u1", "https://example.com");

    fixture.repo.save(&r).await.unwrap();

    let got = fixture.repo.get(&r.short_code).await.unwrap();
    assert_eq!(got, "https://example.com");
}

#[tokio::test]
async fn get_unknown_code_is_not_found() {
    let fixture = Fixture::start().await;

    let err = fixture
        .repo
        .get(&ShortCode::new_unchecked("missing1"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn save_reports_already_exists_and_keeps_owner() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .save(&record("u1", "https://example.com"))
        .await
        .unwrap();

    let err = fixture
        .repo
        .save(&record("u2", "https://example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::AlreadyExists(_)));
    assert_eq!(fixture.repo.get_all("u1").await.unwrap().len(), 1);
    assert!(fixture.repo.get_all("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn save_many_inserts_batch_and_skips_existing() {
    let fixture = Fixture::start().await;
    let existing = record("u1", "https://one.example");
    fixture.repo.save(&existing).await.unwrap();

    fixture
        .repo
        .save_many(&[
            record("u2", "https://one.example"),
            record("u2", "https://two.example"),
            record("u2", "https://three.example"),
        ])
        .await
        .unwrap();

    let listed = fixture.repo.get_all("u2").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(fixture.repo.stats().await.unwrap().url_count, 3);
}

#[tokio::test]
async fn save_many_rolls_back_whole_batch_on_failure() {
    let fixture = Fixture::start().await;
    let valid = record("u1", "https://valid.example");
    // postgres text columns reject NUL bytes
    let invalid = record("u1", "https://invalid.example/\0");

    let err = fixture
        .repo
        .save_many(&[valid.clone(), invalid])
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Query(_)), "{err:?}");
    let err = fixture.repo.get(&valid.short_code).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    assert_eq!(fixture.repo.stats().await.unwrap().url_count, 0);
}

#[tokio::test]
async fn delete_many_tombstones_only_owned_records() {
    let fixture = Fixture::start().await;
    let mine = record("u1", "https://mine.example");
    let theirs = record("u2", "https://theirs.example");
    fixture
        .repo
        .save_many(&[mine.clone(), theirs.clone()])
        .await
        .unwrap();

    fixture
        .repo
        .delete_many(
            "u1",
            &[mine.short_code.clone(), theirs.short_code.clone()],
        )
        .await
        .unwrap();

    let err = fixture.repo.get(&mine.short_code).await.unwrap_err();
    assert!(matches!(err, StorageError::Gone(_)));
    assert_eq!(
        fixture.repo.get(&theirs.short_code).await.unwrap(),
        "https://theirs.example"
    );
    assert!(fixture.repo.get_all("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn tombstone_survives_reconnect_and_resave() {
    let fixture = Fixture::start().await;
    let r = record("u1", "https://example.com");
    fixture.repo.save(&r).await.unwrap();
    fixture
        .repo
        .delete_many("u1", &[r.short_code.clone()])
        .await
        .unwrap();
    fixture.repo.close().await.unwrap();

    let repo = PostgresRepository::new(connect_with_retry(&fixture.url).await);
    let err = repo.save(&r).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));
    let err = repo.get(&r.short_code).await.unwrap_err();
    assert!(matches!(err, StorageError::Gone(_)));
}

#[tokio::test]
async fn get_all_returns_full_records() {
    let fixture = Fixture::start().await;
    let r = record("u1", "https://example.com");
    fixture.repo.save(&r).await.unwrap();

    let listed = fixture.repo.get_all("u1").await.unwrap();

    assert_eq!(listed, vec![r]);
}

#[tokio::test]
async fn stats_counts_all_records_and_distinct_owners() {
    let fixture = Fixture::start().await;
    fixture
        .repo
        .save_many(&[
            record("u1", "https://one.example"),
            record("u1", "https://two.example"),
            record("u2", "https://three.example"),
        ])
        .await
        .unwrap();
    fixture
        .repo
        .delete_many("u2", &[KeyDeriver::short_code("https://three.example")])
        .await
        .unwrap();

    let stats = fixture.repo.stats().await.unwrap();
    assert_eq!(stats.url_count, 3);
    assert_eq!(stats.owner_count, 2);
}

#[tokio::test]
async fn migrate_is_idempotent_and_ping_reports_closed_pool() {
    let fixture = Fixture::start().await;
    fixture.repo.migrate().await.unwrap();
    fixture.repo.ping().await.unwrap();

    fixture.repo.close().await.unwrap();
    fixture.repo.close().await.unwrap();

    let err = fixture.repo.ping().await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
}
