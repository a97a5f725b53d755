//! SQLite backend for the Folio lending store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every transition commits inside one
//! `rusqlite` transaction, with its status guard re-checked against the live
//! row.

mod encode;
mod error;
mod schema;
mod store;

pub use store::SqliteStore;

#[cfg(test)]
mod tests;
