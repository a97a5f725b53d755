//! Error plumbing between the SQLite layer and the core taxonomy.
//!
//! The store trait speaks [`folio_core::Error`] directly, so guard failures
//! raised inside a [`tokio_rusqlite`] closure have to cross the channel
//! boundary intact. They ride out as `tokio_rusqlite::Error::Other` and are
//! recovered by downcast on the way back; anything else collapses into
//! `Error::Storage`.

use folio_core::Error;

/// Wrap a domain error so a `conn.call` closure can return it.
pub fn domain(err: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(err))
}

/// Recover the domain error a closure returned, if there is one.
pub fn recover(err: tokio_rusqlite::Error) -> Error {
  match err {
    tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
      Ok(domain) => *domain,
      Err(other) => Error::Storage(other.to_string()),
    },
    other => Error::Storage(other.to_string()),
  }
}

/// A decode failure for a value that should never have been stored.
pub fn corrupt(what: &str, value: impl std::fmt::Display) -> Error {
  Error::Storage(format!("unreadable {what} in database: {value}"))
}
