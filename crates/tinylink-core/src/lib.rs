//! Core types and traits for the tinylink URL shortener.
//!
//! This crate provides the record model, content-addressed key derivation
//! and the storage capability traits shared by every backend and by the
//! shortener service.

pub mod derive;
pub mod error;
pub mod repository;
pub mod shortcode;

pub use derive::KeyDeriver;
pub use error::{CoreError, Result, StorageError};
pub use repository::{
    Closer, Deleter, Pinger, Repository, Retriever, Saver, Stats, StatsRetriever, UrlRecord,
};
pub use shortcode::ShortCode;
