//! Seams to the surrounding application.
//!
//! The social graph, notification delivery, and catalogue metadata belong to
//! other subsystems. The engine consumes them behind narrow traits and never
//! lets their failures leak into a transition: notification is fire-and-
//! forget, and directory lookups degrade to bare ids.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::loan::LendingPolicy;

// ─── Social graph ────────────────────────────────────────────────────────────

/// Who may lend to whom, and on what standing terms.
pub trait SocialGraph: Send + Sync {
  /// May `lender_id` offer a loan to `borrower_id`?
  fn may_lend_to(&self, lender_id: Uuid, borrower_id: Uuid) -> bool;

  /// May `borrower_id` pull a book directly from `lender_id`'s library?
  fn may_borrow_from(&self, borrower_id: Uuid, lender_id: Uuid) -> bool;

  /// The lender's standing terms, used whenever a request carries no
  /// explicit overrides.
  fn lending_defaults(&self, lender_id: Uuid) -> LendingPolicy;
}

/// Permits every pairing and hands out the default policy. For deployments
/// that do their friendship/blocking checks upstream of the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSocialGraph;

impl SocialGraph for OpenSocialGraph {
  fn may_lend_to(&self, _lender_id: Uuid, _borrower_id: Uuid) -> bool {
    true
  }

  fn may_borrow_from(&self, _borrower_id: Uuid, _lender_id: Uuid) -> bool {
    true
  }

  fn lending_defaults(&self, _lender_id: Uuid) -> LendingPolicy {
    LendingPolicy::default()
  }
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
  LoanRequested,
  LoanAccepted,
  LoanRejected,
  LoanCancelled,
  LoanRevoked,
  LoanReturned,
  LoanExpired,
  RenewalRequested,
  RenewalApproved,
  RenewalDenied,
  RenewalCancelled,
  DueSoon,
  Overdue,
}

impl NotificationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::LoanRequested => "loan_requested",
      Self::LoanAccepted => "loan_accepted",
      Self::LoanRejected => "loan_rejected",
      Self::LoanCancelled => "loan_cancelled",
      Self::LoanRevoked => "loan_revoked",
      Self::LoanReturned => "loan_returned",
      Self::LoanExpired => "loan_expired",
      Self::RenewalRequested => "renewal_requested",
      Self::RenewalApproved => "renewal_approved",
      Self::RenewalDenied => "renewal_denied",
      Self::RenewalCancelled => "renewal_cancelled",
      Self::DueSoon => "due_soon",
      Self::Overdue => "overdue",
    }
  }
}

/// One message for one user. `event_key` is deterministic per (loan, action,
/// timestamp), so a sink that sees the same key twice for a user can drop
/// the duplicate. `meta` carries machine-readable detail (due dates, window
/// ends) for sinks that format their own copy.
#[derive(Debug, Clone)]
pub struct Notification {
  pub user_id:   Uuid,
  pub event_key: String,
  pub kind:      NotificationKind,
  pub title:     String,
  pub body:      String,
  pub loan_id:   Option<Uuid>,
  pub meta:      Option<serde_json::Value>,
}

/// Builds the deduplication key for a loan event at a point in time.
pub fn event_key(loan_id: Uuid, action: &str, at: DateTime<Utc>) -> String {
  format!("loan/{loan_id}/{action}/{}", at.timestamp())
}

/// Fire-and-forget notification sink. Implementations must not block and
/// must not fail the calling operation; a lost notification is acceptable,
/// a lost state change is not.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
  fn notify(&self, _notification: Notification) {}
}

/// Captures notifications in memory. The assertion side of engine tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Self { Self::default() }

  /// Everything sent so far, oldest first.
  pub fn sent(&self) -> Vec<Notification> {
    self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Take everything sent so far, leaving the sink empty.
  pub fn drain(&self) -> Vec<Notification> {
    std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) {
    self
      .sent
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(notification);
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Catalogue and identity labels for notification and export enrichment.
/// Lookups are best-effort; a missing entry falls back to the raw id.
pub trait Directory: Send + Sync {
  fn book_title(&self, book_id: Uuid) -> Option<String>;
  fn book_author(&self, book_id: Uuid) -> Option<String>;
  fn user_name(&self, user_id: Uuid) -> Option<String>;
}

/// A directory that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyDirectory;

impl Directory for EmptyDirectory {
  fn book_title(&self, _book_id: Uuid) -> Option<String> { None }
  fn book_author(&self, _book_id: Uuid) -> Option<String> { None }
  fn user_name(&self, _user_id: Uuid) -> Option<String> { None }
}
