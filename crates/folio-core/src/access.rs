//! Library access records — what lets a user open a book.
//!
//! Access records are shared with the purchase/upload subsystem: buying a
//! book and accepting a loan both land in the same table. The engine removes
//! only records it created itself (`created_access_on_accept` on the loan).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loan::Loan;

/// How a user came to hold access to a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessSource {
  Purchase,
  Upload,
  Loan,
}

impl AccessSource {
  /// The discriminant string stored in the `source` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Purchase => "purchase",
      Self::Upload => "upload",
      Self::Loan => "loan",
    }
  }
}

/// One user's standing access to one book. Soft-deleted records sit in the
/// trash: not openable, but recoverable, and still "owned" for the purposes
/// of the accept-time duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryAccessRecord {
  pub user_id:    Uuid,
  pub book_id:    Uuid,
  pub source:     AccessSource,
  pub created_at: DateTime<Utc>,
  pub deleted_at: Option<DateTime<Utc>>,
}

impl LibraryAccessRecord {
  pub fn in_trash(&self) -> bool { self.deleted_at.is_some() }
}

/// The resolved answer to "where does this user stand with this book".
/// Returned by the entitlement resolver after lazy expiration has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
  pub library_access:     Option<LibraryAccessRecord>,
  /// The most recently accepted active loan under which the user borrows
  /// this book, if any.
  pub active_borrow_loan: Option<Loan>,
}

impl Entitlement {
  /// May the user open the book right now.
  pub fn can_open(&self) -> bool {
    self.library_access.as_ref().is_some_and(|rec| !rec.in_trash())
  }

  /// The book is in the user's trash and could be restored.
  pub fn recoverable_from_trash(&self) -> bool {
    self.library_access.as_ref().is_some_and(|rec| rec.in_trash())
  }
}
