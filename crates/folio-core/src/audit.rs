//! Append-only audit trail.
//!
//! Every committed transition of a loan or renewal writes exactly one event,
//! in the same transaction as the state change. Events are never updated or
//! deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened. The variant name serves as the `action` discriminant
/// stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
  Requested,
  Accepted,
  Rejected,
  Cancelled,
  Revoked,
  Returned,
  Expired,
  RenewalRequested,
  RenewalApproved,
  RenewalDenied,
  RenewalCancelled,
  RenewalExpired,
  Exported,
}

impl AuditAction {
  /// The discriminant string stored in the `action` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Requested => "requested",
      Self::Accepted => "accepted",
      Self::Rejected => "rejected",
      Self::Cancelled => "cancelled",
      Self::Revoked => "revoked",
      Self::Returned => "returned",
      Self::Expired => "expired",
      Self::RenewalRequested => "renewal_requested",
      Self::RenewalApproved => "renewal_approved",
      Self::RenewalDenied => "renewal_denied",
      Self::RenewalCancelled => "renewal_cancelled",
      Self::RenewalExpired => "renewal_expired",
      Self::Exported => "exported",
    }
  }
}

/// One entry in a loan's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
  pub event_id:       Uuid,
  pub loan_id:        Uuid,
  /// `None` for engine-initiated transitions (expiration and cascades).
  pub actor_user_id:  Option<Uuid>,
  /// The party on the receiving end of the action, where there is one.
  pub target_user_id: Option<Uuid>,
  pub action:         AuditAction,
  pub details:        serde_json::Value,
  pub recorded_at:    DateTime<Utc>,
}

/// The audit half of a transition, composed before commit. The store assigns
/// the event id and stamps `recorded_at` with the transition time.
#[derive(Debug, Clone)]
pub struct AuditRecord {
  pub actor_user_id:  Option<Uuid>,
  pub target_user_id: Option<Uuid>,
  pub action:         AuditAction,
  pub details:        serde_json::Value,
}
