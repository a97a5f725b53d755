//! Renewal negotiation — a borrower asking for more time.
//!
//! A renewal request has its own small state machine, nested inside the
//! loan's: it only means anything while the loan is active, and a loan
//! leaving `Active` force-expires whatever negotiation was still open.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
  Result,
  audit::{AuditAction, AuditRecord},
  error::{Denial, Error},
  loan::{Loan, LoanStatus},
};

pub const MIN_EXTRA_DAYS: u32 = 1;
pub const MAX_EXTRA_DAYS: u32 = 60;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalStatus {
  Pending,
  Approved,
  Denied,
  /// Withdrawn by the requester before a decision.
  Cancelled,
  /// Force-closed because the loan left `Active` first.
  Expired,
}

impl RenewalStatus {
  /// The discriminant string stored in the `status` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Approved => "approved",
      Self::Denied => "denied",
      Self::Cancelled => "cancelled",
      Self::Expired => "expired",
    }
  }
}

/// One round of due-date negotiation on a loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalRequest {
  pub renewal_id:           Uuid,
  pub loan_id:              Uuid,
  pub status:               RenewalStatus,
  pub requested_extra_days: u32,
  /// The loan's due date when the request was made.
  pub previous_due_at:      DateTime<Utc>,
  /// `previous_due_at + requested_extra_days`; becomes the loan's due date
  /// if approved.
  pub proposed_due_at:      DateTime<Utc>,
  pub requester_user_id:    Uuid,
  pub reviewer_user_id:     Option<Uuid>,
  pub requested_at:         DateTime<Utc>,
  pub decided_at:           Option<DateTime<Utc>>,
}

/// Input to [`crate::store::LendingStore::create_renewal`], composed by
/// [`propose`].
#[derive(Debug, Clone)]
pub struct NewRenewal {
  pub loan_id:           Uuid,
  pub requester_user_id: Uuid,
  pub extra_days:        u32,
  pub previous_due_at:   DateTime<Utc>,
  pub proposed_due_at:   DateTime<Utc>,
  pub at:                DateTime<Utc>,
  pub audit:             AuditRecord,
}

/// The effect of closing a pending renewal, committed in one transaction.
/// Approval additionally moves the loan's due date and resets its reminder
/// markers.
#[derive(Debug, Clone)]
pub struct RenewalDecision {
  pub renewal_id: Uuid,
  pub loan_id:    Uuid,
  pub to:         RenewalStatus,
  pub reviewer:   Option<Uuid>,
  pub at:         DateTime<Utc>,
  /// Set on approval: the loan's new due date.
  pub new_due_at: Option<DateTime<Utc>>,
  /// Set on approval: days added to the loan's recorded duration.
  pub extends_by_days: Option<u32>,
  pub audit:      AuditRecord,
}

// ─── Builders ────────────────────────────────────────────────────────────────

fn require_loan_active(loan: &Loan) -> Result<()> {
  if loan.status == LoanStatus::Active {
    Ok(())
  } else {
    Err(Error::InvalidState {
      entity:   "loan",
      expected: LoanStatus::Active.as_str(),
      actual:   loan.status.as_str().to_owned(),
    })
  }
}

fn require_renewal_pending(renewal: &RenewalRequest) -> Result<()> {
  if renewal.status == RenewalStatus::Pending {
    Ok(())
  } else {
    Err(Error::InvalidState {
      entity:   "renewal",
      expected: RenewalStatus::Pending.as_str(),
      actual:   renewal.status.as_str().to_owned(),
    })
  }
}

/// Borrower asks for `extra_days` more on an active loan.
pub fn propose(
  loan: &Loan,
  actor: Uuid,
  extra_days: u32,
  now: DateTime<Utc>,
) -> Result<NewRenewal> {
  if actor != loan.borrower_id {
    return Err(Error::Forbidden(Denial::NotBorrower));
  }
  require_loan_active(loan)?;
  if !(MIN_EXTRA_DAYS..=MAX_EXTRA_DAYS).contains(&extra_days) {
    return Err(Error::InvalidState {
      entity:   "renewal",
      expected: "extra days within 1..=60",
      actual:   extra_days.to_string(),
    });
  }
  let previous_due_at = loan.due_at.ok_or_else(|| {
    Error::Storage(format!("active loan {} has no due date", loan.loan_id))
  })?;
  let proposed_due_at = previous_due_at + Duration::days(extra_days as i64);
  Ok(NewRenewal {
    loan_id: loan.loan_id,
    requester_user_id: actor,
    extra_days,
    previous_due_at,
    proposed_due_at,
    at: now,
    audit: AuditRecord {
      actor_user_id:  Some(actor),
      target_user_id: Some(loan.lender_id),
      action:         AuditAction::RenewalRequested,
      details:        json!({
        "extra_days":      extra_days,
        "proposed_due_at": proposed_due_at,
      }),
    },
  })
}

/// Lender grants the extension. Requires the loan to still be active; a
/// renewal on a loan that expired in the meantime can only be denied or
/// left to the force-expire cascade.
pub fn approve(
  renewal: &RenewalRequest,
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<RenewalDecision> {
  if actor != loan.lender_id {
    return Err(Error::Forbidden(Denial::NotLender));
  }
  require_renewal_pending(renewal)?;
  require_loan_active(loan)?;
  Ok(RenewalDecision {
    renewal_id: renewal.renewal_id,
    loan_id: renewal.loan_id,
    to: RenewalStatus::Approved,
    reviewer: Some(actor),
    at: now,
    new_due_at: Some(renewal.proposed_due_at),
    extends_by_days: Some(renewal.requested_extra_days),
    audit: AuditRecord {
      actor_user_id:  Some(actor),
      target_user_id: Some(renewal.requester_user_id),
      action:         AuditAction::RenewalApproved,
      details:        json!({
        "extra_days": renewal.requested_extra_days,
        "new_due_at": renewal.proposed_due_at,
      }),
    },
  })
}

/// Lender turns the request down. The loan is untouched.
pub fn deny(
  renewal: &RenewalRequest,
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<RenewalDecision> {
  if actor != loan.lender_id {
    return Err(Error::Forbidden(Denial::NotLender));
  }
  require_renewal_pending(renewal)?;
  Ok(RenewalDecision {
    renewal_id: renewal.renewal_id,
    loan_id: renewal.loan_id,
    to: RenewalStatus::Denied,
    reviewer: Some(actor),
    at: now,
    new_due_at: None,
    extends_by_days: None,
    audit: AuditRecord {
      actor_user_id:  Some(actor),
      target_user_id: Some(renewal.requester_user_id),
      action:         AuditAction::RenewalDenied,
      details:        json!({}),
    },
  })
}

/// Requester withdraws their own request before a decision.
pub fn cancel(
  renewal: &RenewalRequest,
  loan: &Loan,
  actor: Uuid,
  now: DateTime<Utc>,
) -> Result<RenewalDecision> {
  if actor != renewal.requester_user_id {
    return Err(Error::Forbidden(Denial::NotRequester));
  }
  require_renewal_pending(renewal)?;
  Ok(RenewalDecision {
    renewal_id: renewal.renewal_id,
    loan_id: renewal.loan_id,
    to: RenewalStatus::Cancelled,
    reviewer: None,
    at: now,
    new_due_at: None,
    extends_by_days: None,
    audit: AuditRecord {
      actor_user_id:  Some(actor),
      target_user_id: Some(loan.lender_id),
      action:         AuditAction::RenewalCancelled,
      details:        json!({}),
    },
  })
}
