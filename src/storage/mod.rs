//! Persistence for indexed file records
//!
//! Storage failures only affect the scan that hit them; they never touch
//! lease handling.

pub mod repository;

pub use repository::{FileRecord, MemorySession, SqliteSession, StorageSession};
