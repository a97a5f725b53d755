//! Error types for `folio-core`.
//!
//! Every operation in the engine fails with one of the six classes below.
//! `Storage` is the only class that carries unclassified backend detail;
//! everything a caller can act on is a dedicated variant.

use thiserror::Error;
use uuid::Uuid;

use crate::annotation::Capability;

/// The entity class an identifier failed to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
  Loan,
  Renewal,
  Annotation,
  AccessRecord,
}

impl Resource {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Loan => "loan",
      Self::Renewal => "renewal",
      Self::Annotation => "annotation",
      Self::AccessRecord => "access record",
    }
  }
}

impl std::fmt::Display for Resource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Why an actor was refused an operation they addressed correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
  #[error("only the borrower may perform this action")]
  NotBorrower,

  #[error("only the lender may perform this action")]
  NotLender,

  #[error("only the requester may cancel a renewal request")]
  NotRequester,

  #[error("annotations can only be changed by their author")]
  NotAuthor,

  #[error("a book cannot be lent to its own library")]
  SelfLoan,

  #[error("lending to this user is not permitted")]
  LendingNotPermitted,

  #[error("borrowing from this user is not permitted")]
  BorrowingNotPermitted,

  #[error("capability {} is not granted on this loan", .0.as_str())]
  MissingCapability(Capability),

  #[error("no library access for this book")]
  NoLibraryAccess,

  #[error("the annotation export window for this loan has closed")]
  ExportWindowClosed,
}

/// A uniqueness or concurrency violation. The loser of a race gets one of
/// these and is expected to re-read before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Conflict {
  #[error("an active loan already exists for this book and borrower")]
  ActiveLoanExists,

  #[error("the loan offer changed since it was read")]
  OfferChanged,

  #[error("a pending renewal request already exists for this loan")]
  PendingRenewalExists,

  #[error("stale revision; the current revision is {current_revision}")]
  RevisionMismatch { current_revision: i64 },
}

#[derive(Debug, Error)]
pub enum Error {
  /// The target loan or renewal is not in a status this operation accepts.
  #[error("{entity}: expected {expected}, got {actual}")]
  InvalidState {
    entity:   &'static str,
    expected: &'static str,
    actual:   String,
  },

  #[error("forbidden: {0}")]
  Forbidden(Denial),

  #[error("conflict: {0}")]
  Conflict(Conflict),

  /// The borrower already has this book. Recoverable: retry the operation
  /// with `borrow_anyway` once the user confirms.
  #[error("user {user_id} already has book {book_id} in their library (in trash: {in_trash})")]
  AlreadyOwned {
    user_id:  Uuid,
    book_id:  Uuid,
    in_trash: bool,
  },

  #[error("{0} not found: {1}")]
  NotFound(Resource, Uuid),

  #[error("storage error: {0}")]
  Storage(String),
}

impl Error {
  /// Stable machine-readable code for callers that branch on error class.
  pub fn code(&self) -> &'static str {
    match self {
      Self::InvalidState { .. } => "invalid_state",
      Self::Forbidden(_) => "forbidden",
      Self::Conflict(_) => "conflict",
      Self::AlreadyOwned { .. } => "already_owned",
      Self::NotFound(..) => "not_found",
      Self::Storage(_) => "storage",
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self { Self::Storage(err.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
