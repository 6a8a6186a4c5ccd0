use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use tinylink_shortener::config::DEFAULT_BASE_URL;
use tinylink_shortener::ShortenerConfig;
use tinylink_storage::{StorageConfig, DEFAULT_MAX_CONNECTIONS};

pub const BASE_URL_ENV: &str = "TINYLINK_BASE_URL";
pub const STORAGE_BACKEND_ENV: &str = "TINYLINK_STORAGE_BACKEND";
pub const FILE_PATH_ENV: &str = "TINYLINK_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "TINYLINK_DATABASE_DSN";
pub const MAX_CONNECTIONS_ENV: &str = "TINYLINK_DATABASE_MAX_CONNECTIONS";
pub const OWNER_ENV: &str = "TINYLINK_OWNER";
pub const LOG_FORMAT_ENV: &str = "TINYLINK_LOG_FORMAT";

pub const DEFAULT_FILE_PATH: &str = "tinylink.json";
pub const DEFAULT_OWNER: &str = "cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Memory => write!(f, "memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one or more URLs
    Shorten {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the original URL behind a short code
    Expand { code: String },
    /// List the URLs shortened by the owner
    List,
    /// Delete short codes owned by the owner
    Delete {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Print storage counters
    Stats,
    /// Check that the storage backend is reachable
    Ping,
}

#[derive(Debug, Parser)]
#[command(name = "tinylink", version, about = "Content-addressed URL shortener")]
pub struct CLI {
    #[arg(long, global = true, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        global = true,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub storage: StorageBackendArg,

    #[arg(long, global = true, env = FILE_PATH_ENV, default_value = DEFAULT_FILE_PATH)]
    pub file_path: PathBuf,

    #[arg(
        long,
        global = true,
        env = DATABASE_DSN_ENV,
        required_if_eq("storage", "postgres")
    )]
    pub database_dsn: Option<String>,

    #[arg(
        long,
        global = true,
        env = MAX_CONNECTIONS_ENV,
        default_value_t = DEFAULT_MAX_CONNECTIONS
    )]
    pub max_connections: u32,

    #[arg(long, global = true, env = OWNER_ENV, default_value = DEFAULT_OWNER)]
    pub owner: String,

    #[arg(
        long,
        global = true,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl CLI {
    pub fn storage_config(&self) -> anyhow::Result<StorageConfig> {
        Ok(match self.storage {
            StorageBackendArg::Memory => StorageConfig::Memory,
            StorageBackendArg::File => StorageConfig::File {
                path: self.file_path.clone(),
            },
            StorageBackendArg::Postgres => StorageConfig::Postgres {
                dsn: self.database_dsn.clone().ok_or_else(|| {
                    anyhow::anyhow!("database dsn is required when storage backend is postgres")
                })?,
                max_connections: self.max_connections,
            },
        })
    }

    pub fn shortener_config(&self) -> ShortenerConfig {
        ShortenerConfig::builder().base_url(self.base_url.clone()).build()
    }
}
