//! Loan types — one lending relationship for one book copy.
//!
//! A loan moves through a closed state machine. The only mutable thing about
//! a loan is its status and the timestamps that status changes stamp; the
//! parties, the book, and the terms are fixed when the offer is made.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days a borrower may still export their annotations after a loan ends.
pub const EXPORT_WINDOW_DAYS: i64 = 14;

// ─── Status ──────────────────────────────────────────────────────────────────

/// Where a loan stands in its lifecycle. Every status except `Pending` and
/// `Active` is terminal; no transition ever leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
  /// Offered by the lender, not yet answered by the borrower.
  Pending,
  /// Accepted and running; the borrower holds library access.
  Active,
  /// Ended by the borrower giving the book back.
  Returned,
  /// Ended early by the lender.
  Revoked,
  /// Ended by the deadline passing (lazily or via the sweep).
  Expired,
  /// The borrower declined the offer.
  Rejected,
  /// The lender withdrew the offer before it was answered.
  Cancelled,
}

impl LoanStatus {
  /// The discriminant string stored in the `status` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Active => "active",
      Self::Returned => "returned",
      Self::Revoked => "revoked",
      Self::Expired => "expired",
      Self::Rejected => "rejected",
      Self::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Pending | Self::Active)
  }
}

// ─── Terms ───────────────────────────────────────────────────────────────────

/// Per-loan annotation permissions granted by the lender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
  pub can_add_highlights:  bool,
  pub can_edit_highlights: bool,
  pub can_add_notes:       bool,
  pub can_edit_notes:      bool,
}

impl Capabilities {
  pub fn all() -> Self {
    Self {
      can_add_highlights:  true,
      can_edit_highlights: true,
      can_add_notes:       true,
      can_edit_notes:      true,
    }
  }

  pub fn none() -> Self {
    Self {
      can_add_highlights:  false,
      can_edit_highlights: false,
      can_add_notes:       false,
      can_edit_notes:      false,
    }
  }
}

impl Default for Capabilities {
  /// Friend-to-friend lending trusts by default; lenders opt out per loan.
  fn default() -> Self { Self::all() }
}

/// Whether the borrower's annotations are visible to the lender while the
/// loan runs.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationVisibility {
  #[default]
  Private,
  SharedWithLender,
}

impl AnnotationVisibility {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Private => "private",
      Self::SharedWithLender => "shared_with_lender",
    }
  }
}

/// The terms a loan runs under. A lender keeps a standing copy of these as
/// their defaults; a request may override them; the accepted loan freezes
/// them for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingPolicy {
  pub duration_days: u32,
  /// Days past `due_at` before the loan is considered expired.
  pub grace_days:    u32,
  pub capabilities:  Capabilities,
  pub annotation_visibility: AnnotationVisibility,
  /// Whether the lender's own annotations are shown to the borrower.
  pub share_lender_annotations: bool,
}

impl Default for LendingPolicy {
  fn default() -> Self {
    Self {
      duration_days: 14,
      grace_days: 0,
      capabilities: Capabilities::default(),
      annotation_visibility: AnnotationVisibility::default(),
      share_lender_annotations: false,
    }
  }
}

// ─── Loan ────────────────────────────────────────────────────────────────────

/// One lending relationship for one book copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
  pub loan_id:     Uuid,
  pub book_id:     Uuid,
  pub lender_id:   Uuid,
  pub borrower_id: Uuid,
  pub status:      LoanStatus,
  /// Free-text note from the offering party, shown to the other side.
  pub message:     Option<String>,
  pub terms:       LendingPolicy,
  /// Set when acceptance created the borrower's access record. Termination
  /// removes only records the engine created.
  pub created_access_on_accept: bool,
  pub requested_at: DateTime<Utc>,
  pub accepted_at:  Option<DateTime<Utc>>,
  /// Set on acceptance: `accepted_at + duration_days`. Renewals move it.
  pub due_at:       Option<DateTime<Utc>>,
  pub returned_at:  Option<DateTime<Utc>>,
  pub revoked_at:   Option<DateTime<Utc>>,
  pub expired_at:   Option<DateTime<Utc>>,
  /// End of the borrower's post-loan annotation export window.
  pub export_available_until: Option<DateTime<Utc>>,
  /// Reminder markers; an approved renewal clears them so the new deadline
  /// gets its own reminders.
  pub due_soon_notified_at: Option<DateTime<Utc>>,
  pub overdue_notified_at:  Option<DateTime<Utc>>,
}

impl Loan {
  /// The instant the loan stops being honoured: `due_at` plus the grace
  /// period. `None` until the loan has been accepted.
  pub fn effective_end(&self) -> Option<DateTime<Utc>> {
    self
      .due_at
      .map(|due| due + Duration::days(self.terms.grace_days as i64))
  }

  /// The expiration predicate: an active loan whose effective end has
  /// passed. Pure; committing the resulting transition is a separate,
  /// guarded step.
  pub fn is_past_effective_end(&self, now: DateTime<Utc>) -> bool {
    self.status == LoanStatus::Active
      && self.effective_end().is_some_and(|end| end < now)
  }

  /// When the loan ended, whichever way it ended.
  pub fn ended_at(&self) -> Option<DateTime<Utc>> {
    match self.status {
      LoanStatus::Returned => self.returned_at,
      LoanStatus::Revoked => self.revoked_at,
      LoanStatus::Expired => self.expired_at,
      _ => None,
    }
  }

  /// Whether the borrower may export their annotations right now: any time
  /// while the loan runs, and until `export_available_until` once it has
  /// ended. Offers that never became active have no window.
  pub fn export_window_open(&self, now: DateTime<Utc>) -> bool {
    match self.status {
      LoanStatus::Active => true,
      LoanStatus::Returned | LoanStatus::Revoked | LoanStatus::Expired => {
        self.export_available_until.is_some_and(|until| now <= until)
      }
      _ => false,
    }
  }
}

// ─── Requests and listings ───────────────────────────────────────────────────

/// Input to [`crate::store::LendingStore::upsert_pending_loan`] and the
/// direct borrow path. Party and book ids are resolved by the caller; the
/// store assigns everything else.
#[derive(Debug, Clone)]
pub struct LoanRequest {
  pub book_id:     Uuid,
  pub lender_id:   Uuid,
  pub borrower_id: Uuid,
  pub message:     Option<String>,
  pub terms:       LendingPolicy,
}

/// Which side of a loan a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanRole {
  Lender,
  Borrower,
}

/// Coarse status filter for loan listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanBucket {
  Pending,
  Active,
  Ended,
}

impl LoanBucket {
  pub fn statuses(self) -> &'static [LoanStatus] {
    match self {
      Self::Pending => &[LoanStatus::Pending],
      Self::Active => &[LoanStatus::Active],
      Self::Ended => &[
        LoanStatus::Returned,
        LoanStatus::Revoked,
        LoanStatus::Expired,
        LoanStatus::Rejected,
        LoanStatus::Cancelled,
      ],
    }
  }
}

/// The two reminder markers the sweep can claim for an active loan. Each is
/// claimed at most once per deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderMarker {
  DueSoon,
  Overdue,
}
