//! Pure loan state transitions.
//!
//! Each builder validates the actor and current status against a loan
//! snapshot and returns a value describing the complete effect of the
//! transition: the new status, the timestamps it stamps, what happens to the
//! borrower's access record, and the audit record written with it. The store
//! commits one such value per transaction, re-checking the status guard
//! against the live row, so a stale snapshot can never clobber a concurrent
//! transition.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
  Result,
  audit::{AuditAction, AuditRecord},
  error::{Denial, Error},
  loan::{EXPORT_WINDOW_DAYS, Loan, LoanStatus},
};

// ─── Transition values ───────────────────────────────────────────────────────

/// The effect of accepting a pending offer. Committing it makes the loan
/// active, stamps the due date, and ensures the borrower holds an access
/// record for the book.
#[derive(Debug, Clone)]
pub struct Acceptance {
  pub loan_id: Uuid,
  /// The `requested_at` of the offer the acceptor read. The commit guards
  /// on it, so an offer re-issued under different terms cannot be accepted
  /// under the old ones.
  pub offer_requested_at: DateTime<Utc>,
  pub at:     DateTime<Utc>,
  /// `at + duration_days`, from the terms the acceptor read.
  pub due_at: DateTime<Utc>,
  pub audit:  AuditRecord,
}

/// What happens to the borrower's access record when a loan settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDisposition {
  /// Pending offers never granted access; nothing to undo.
  Keep,
  /// Remove the access record, but only if this loan created it.
  RemoveIfLoanCreated,
}

/// The effect of moving a loan into a terminal status.
#[derive(Debug, Clone)]
pub struct Settlement {
  pub loan_id: Uuid,
  /// Guard: commit only while the live row still has this status.
  pub from:    LoanStatus,
  pub to:      LoanStatus,
  pub at:      DateTime<Utc>,
  /// Set when the loan was active: the borrower's export window.
  pub export_available_until: Option<DateTime<Utc>>,
  pub access: AccessDisposition,
  /// Force any still-pending renewal request on this loan to expired, in
  /// the same transaction.
  pub expire_pending_renewal: bool,
  pub audit:  AuditRecord,
}

// ─── Builders ────────────────────────────────────────────────────────────────

fn require_status(loan: &Loan, expected: LoanStatus) -> Result<()> {
  if loan.status == expected {
    Ok(())
  } else {
    Err(Error::InvalidState {
      entity:   "loan",
      expected: expected.as_str(),
      actual:   loan.status.as_str().to_owned(),
    })
  }
}

/// Borrower accepts a pending offer.
pub fn accept(
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<Acceptance> {
  if actor != loan.borrower_id {
    return Err(Error::Forbidden(Denial::NotBorrower));
  }
  require_status(loan, LoanStatus::Pending)?;
  let due_at = now + Duration::days(loan.terms.duration_days as i64);
  Ok(Acceptance {
    loan_id: loan.loan_id,
    offer_requested_at: loan.requested_at,
    at: now,
    due_at,
    audit: AuditRecord {
      actor_user_id:  Some(actor),
      target_user_id: Some(loan.lender_id),
      action:         AuditAction::Accepted,
      details:        json!({
        "due_at":        due_at,
        "duration_days": loan.terms.duration_days,
      }),
    },
  })
}

/// Borrower declines a pending offer.
pub fn reject(
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<Settlement> {
  if actor != loan.borrower_id {
    return Err(Error::Forbidden(Denial::NotBorrower));
  }
  require_status(loan, LoanStatus::Pending)?;
  Ok(settle_pending(loan, LoanStatus::Rejected, now, AuditRecord {
    actor_user_id:  Some(actor),
    target_user_id: Some(loan.lender_id),
    action:         AuditAction::Rejected,
    details:        json!({}),
  }))
}

/// Lender withdraws a pending offer they made.
pub fn cancel(
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<Settlement> {
  if actor != loan.lender_id {
    return Err(Error::Forbidden(Denial::NotLender));
  }
  require_status(loan, LoanStatus::Pending)?;
  Ok(settle_pending(loan, LoanStatus::Cancelled, now, AuditRecord {
    actor_user_id:  Some(actor),
    target_user_id: Some(loan.borrower_id),
    action:         AuditAction::Cancelled,
    details:        json!({}),
  }))
}

/// Lender ends an active loan early.
pub fn revoke(
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<Settlement> {
  if actor != loan.lender_id {
    return Err(Error::Forbidden(Denial::NotLender));
  }
  require_status(loan, LoanStatus::Active)?;
  Ok(settle_active(loan, LoanStatus::Revoked, now, AuditRecord {
    actor_user_id:  Some(actor),
    target_user_id: Some(loan.borrower_id),
    action:         AuditAction::Revoked,
    details:        json!({}),
  }))
}

/// Borrower gives the book back.
pub fn return_to_lender(
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<Settlement> {
  if actor != loan.borrower_id {
    return Err(Error::Forbidden(Denial::NotBorrower));
  }
  require_status(loan, LoanStatus::Active)?;
  Ok(settle_active(loan, LoanStatus::Returned, now, AuditRecord {
    actor_user_id:  Some(actor),
    target_user_id: Some(loan.lender_id),
    action:         AuditAction::Returned,
    details:        json!({}),
  }))
}

/// The engine ends an active loan whose effective end has passed. No actor;
/// both the lazy read path and the sweep funnel through here.
pub fn expire(loan: &Loan, now: DateTime<Utc>) -> Result<Settlement> {
  require_status(loan, LoanStatus::Active)?;
  if !loan.is_past_effective_end(now) {
    return Err(Error::InvalidState {
      entity:   "loan",
      expected: "past its effective end",
      actual:   "still running".to_owned(),
    });
  }
  Ok(settle_active(loan, LoanStatus::Expired, now, AuditRecord {
    actor_user_id:  None,
    target_user_id: Some(loan.borrower_id),
    action:         AuditAction::Expired,
    details:        json!({
      "due_at":     loan.due_at,
      "grace_days": loan.terms.grace_days,
    }),
  }))
}

fn settle_pending(
  loan: &Loan,
  to: LoanStatus,
  at: DateTime<Utc>,
  audit: AuditRecord,
) -> Settlement {
  Settlement {
    loan_id: loan.loan_id,
    from: LoanStatus::Pending,
    to,
    at,
    export_available_until: None,
    access: AccessDisposition::Keep,
    expire_pending_renewal: false,
    audit,
  }
}

fn settle_active(
  loan: &Loan,
  to: LoanStatus,
  at: DateTime<Utc>,
  audit: AuditRecord,
) -> Settlement {
  Settlement {
    loan_id: loan.loan_id,
    from: LoanStatus::Active,
    to,
    at,
    export_available_until: Some(at + Duration::days(EXPORT_WINDOW_DAYS)),
    access: AccessDisposition::RemoveIfLoanCreated,
    expire_pending_renewal: true,
    audit,
  }
}
