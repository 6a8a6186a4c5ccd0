//! URL shortening service built on the `tinylink` storage backends.
//!
//! [`ShortenerService`] derives codes with [`tinylink_core::KeyDeriver`] and
//! delegates persistence to any [`tinylink_core::Repository`].
//! [`DeletionDispatcher`] runs bulk deletions in the background.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod service;
pub mod shortener;

pub use config::ShortenerConfig;
pub use dispatcher::{DeletionDispatcher, DispatcherConfig};
pub use error::{Result, ShortenerError};
pub use service::ShortenerService;
pub use shortener::{BatchItem, BatchResult, ListedUrl, Shortened, Shortener};
