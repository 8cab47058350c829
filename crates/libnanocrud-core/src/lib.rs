//! Core types for nanocrud
//!
//! This crate provides everything that does not touch version control:
//! - Collection name sanitization
//! - Documents, ids and timestamps
//! - Query matching and update modifiers
//! - The append-only datafile store backing each collection
//! - Server configuration

pub mod types;
pub mod query;
pub mod store;
pub mod config;
pub mod error;

pub use error::NanocrudError;
pub use types::name::CollectionName;
pub use types::document::{Document, generate_id};
pub use store::{DocumentStore, StoreStats, UpdateOptions, UpdateResult};
pub use config::{Author, ServerConfig, SnapshotConfig, WatchConfig, load_config};
