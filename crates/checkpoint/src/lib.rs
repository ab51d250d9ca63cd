//! Cursor management for backup-sync
//!
//! Provides storage-agnostic persistence of per-table sync cursors.
//!
//! # Architecture
//!
//! - `Cursor` is the watermark of one table: nothing yet, a primary key, a
//!   timestamp, or both
//! - `CursorKey` addresses a table as (host, database, table)
//! - `CursorStore` abstracts the storage backend
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - one JSON file per table
//! - `MemoryStore` - in-process map
//!
//! The engine writes a cursor after every page it applies, so a store write
//! must be complete before it returns.

mod cursor;
mod filesystem;
mod memory;
pub mod store;


pub use cursor::{
    timestamp_sentinel, Cursor, PRIMARY_KEY_SENTINEL, TIMESTAMP_FORMAT, TIMESTAMP_SENTINEL,
};
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use store::{CursorKey, CursorStore, StoredCursor};
