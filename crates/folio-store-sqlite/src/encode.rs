//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings at fixed microsecond
//! precision, so lexicographic comparison in SQL matches chronological
//! order. UUIDs are stored as hyphenated lowercase strings. Enum columns use
//! the same discriminant strings as the serde tags in `folio-core`.

use chrono::{DateTime, SecondsFormat, Utc};
use folio_core::{
  Result,
  access::{AccessSource, LibraryAccessRecord},
  annotation::{Annotation, AnnotationScope, AnnotationValue},
  audit::{AuditAction, AuditEvent},
  loan::{
    AnnotationVisibility, Capabilities, LendingPolicy, Loan, LoanStatus,
  },
  renewal::{RenewalRequest, RenewalStatus},
};
use uuid::Uuid;

use crate::error::corrupt;

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|_| corrupt("uuid", s))
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| corrupt("timestamp", s))
}

pub fn decode_dt_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── Enum columns ────────────────────────────────────────────────────────────

pub fn decode_loan_status(s: &str) -> Result<LoanStatus> {
  match s {
    "pending" => Ok(LoanStatus::Pending),
    "active" => Ok(LoanStatus::Active),
    "returned" => Ok(LoanStatus::Returned),
    "revoked" => Ok(LoanStatus::Revoked),
    "expired" => Ok(LoanStatus::Expired),
    "rejected" => Ok(LoanStatus::Rejected),
    "cancelled" => Ok(LoanStatus::Cancelled),
    other => Err(corrupt("loan status", other)),
  }
}

pub fn decode_renewal_status(s: &str) -> Result<RenewalStatus> {
  match s {
    "pending" => Ok(RenewalStatus::Pending),
    "approved" => Ok(RenewalStatus::Approved),
    "denied" => Ok(RenewalStatus::Denied),
    "cancelled" => Ok(RenewalStatus::Cancelled),
    "expired" => Ok(RenewalStatus::Expired),
    other => Err(corrupt("renewal status", other)),
  }
}

pub fn decode_visibility(s: &str) -> Result<AnnotationVisibility> {
  match s {
    "private" => Ok(AnnotationVisibility::Private),
    "shared_with_lender" => Ok(AnnotationVisibility::SharedWithLender),
    other => Err(corrupt("annotation visibility", other)),
  }
}

pub fn decode_scope(s: &str) -> Result<AnnotationScope> {
  match s {
    "owner" => Ok(AnnotationScope::Owner),
    "lender_visible" => Ok(AnnotationScope::LenderVisible),
    "private_borrower" => Ok(AnnotationScope::PrivateBorrower),
    other => Err(corrupt("annotation scope", other)),
  }
}

pub fn decode_access_source(s: &str) -> Result<AccessSource> {
  match s {
    "purchase" => Ok(AccessSource::Purchase),
    "upload" => Ok(AccessSource::Upload),
    "loan" => Ok(AccessSource::Loan),
    other => Err(corrupt("access source", other)),
  }
}

pub fn decode_audit_action(s: &str) -> Result<AuditAction> {
  match s {
    "requested" => Ok(AuditAction::Requested),
    "accepted" => Ok(AuditAction::Accepted),
    "rejected" => Ok(AuditAction::Rejected),
    "cancelled" => Ok(AuditAction::Cancelled),
    "revoked" => Ok(AuditAction::Revoked),
    "returned" => Ok(AuditAction::Returned),
    "expired" => Ok(AuditAction::Expired),
    "renewal_requested" => Ok(AuditAction::RenewalRequested),
    "renewal_approved" => Ok(AuditAction::RenewalApproved),
    "renewal_denied" => Ok(AuditAction::RenewalDenied),
    "renewal_cancelled" => Ok(AuditAction::RenewalCancelled),
    "renewal_expired" => Ok(AuditAction::RenewalExpired),
    "exported" => Ok(AuditAction::Exported),
    other => Err(corrupt("audit action", other)),
  }
}

fn decode_days(n: i64, what: &str) -> Result<u32> {
  u32::try_from(n).map_err(|_| corrupt(what, n))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `loans` row, in column order.
pub struct RawLoan {
  pub loan_id:                  String,
  pub book_id:                  String,
  pub lender_id:                String,
  pub borrower_id:              String,
  pub status:                   String,
  pub message:                  Option<String>,
  pub duration_days:            i64,
  pub grace_days:               i64,
  pub can_add_highlights:       bool,
  pub can_edit_highlights:      bool,
  pub can_add_notes:            bool,
  pub can_edit_notes:           bool,
  pub annotation_visibility:    String,
  pub share_lender_annotations: bool,
  pub created_access_on_accept: bool,
  pub requested_at:             String,
  pub accepted_at:              Option<String>,
  pub due_at:                   Option<String>,
  pub returned_at:              Option<String>,
  pub revoked_at:               Option<String>,
  pub expired_at:               Option<String>,
  pub export_available_until:   Option<String>,
  pub due_soon_notified_at:     Option<String>,
  pub overdue_notified_at:      Option<String>,
}

impl RawLoan {
  pub fn into_loan(self) -> Result<Loan> {
    Ok(Loan {
      loan_id:     decode_uuid(&self.loan_id)?,
      book_id:     decode_uuid(&self.book_id)?,
      lender_id:   decode_uuid(&self.lender_id)?,
      borrower_id: decode_uuid(&self.borrower_id)?,
      status:      decode_loan_status(&self.status)?,
      message:     self.message,
      terms:       LendingPolicy {
        duration_days: decode_days(self.duration_days, "loan duration")?,
        grace_days: decode_days(self.grace_days, "grace period")?,
        capabilities: Capabilities {
          can_add_highlights:  self.can_add_highlights,
          can_edit_highlights: self.can_edit_highlights,
          can_add_notes:       self.can_add_notes,
          can_edit_notes:      self.can_edit_notes,
        },
        annotation_visibility: decode_visibility(
          &self.annotation_visibility,
        )?,
        share_lender_annotations: self.share_lender_annotations,
      },
      created_access_on_accept: self.created_access_on_accept,
      requested_at: decode_dt(&self.requested_at)?,
      accepted_at: decode_dt_opt(self.accepted_at.as_deref())?,
      due_at: decode_dt_opt(self.due_at.as_deref())?,
      returned_at: decode_dt_opt(self.returned_at.as_deref())?,
      revoked_at: decode_dt_opt(self.revoked_at.as_deref())?,
      expired_at: decode_dt_opt(self.expired_at.as_deref())?,
      export_available_until: decode_dt_opt(
        self.export_available_until.as_deref(),
      )?,
      due_soon_notified_at: decode_dt_opt(
        self.due_soon_notified_at.as_deref(),
      )?,
      overdue_notified_at: decode_dt_opt(
        self.overdue_notified_at.as_deref(),
      )?,
    })
  }
}

/// Raw values read directly from a `renewal_requests` row.
pub struct RawRenewal {
  pub renewal_id:           String,
  pub loan_id:              String,
  pub status:               String,
  pub requested_extra_days: i64,
  pub previous_due_at:      String,
  pub proposed_due_at:      String,
  pub requester_user_id:    String,
  pub reviewer_user_id:     Option<String>,
  pub requested_at:         String,
  pub decided_at:           Option<String>,
}

impl RawRenewal {
  pub fn into_renewal(self) -> Result<RenewalRequest> {
    Ok(RenewalRequest {
      renewal_id: decode_uuid(&self.renewal_id)?,
      loan_id: decode_uuid(&self.loan_id)?,
      status: decode_renewal_status(&self.status)?,
      requested_extra_days: decode_days(
        self.requested_extra_days,
        "renewal extra days",
      )?,
      previous_due_at: decode_dt(&self.previous_due_at)?,
      proposed_due_at: decode_dt(&self.proposed_due_at)?,
      requester_user_id: decode_uuid(&self.requester_user_id)?,
      reviewer_user_id: self
        .reviewer_user_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      requested_at: decode_dt(&self.requested_at)?,
      decided_at: decode_dt_opt(self.decided_at.as_deref())?,
    })
  }
}

/// Raw values read directly from an `annotations` row.
pub struct RawAnnotation {
  pub annotation_id: String,
  pub book_id:       String,
  pub author_id:     String,
  pub kind:          String,
  pub value_json:    String,
  pub scope:         String,
  pub revision:      i64,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawAnnotation {
  pub fn into_annotation(self) -> Result<Annotation> {
    let data: serde_json::Value = serde_json::from_str(&self.value_json)?;
    Ok(Annotation {
      annotation_id: decode_uuid(&self.annotation_id)?,
      book_id:       decode_uuid(&self.book_id)?,
      author_id:     decode_uuid(&self.author_id)?,
      value:         AnnotationValue::from_parts(&self.kind, data)?,
      scope:         decode_scope(&self.scope)?,
      revision:      self.revision,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from a `library_access` row.
pub struct RawAccess {
  pub user_id:    String,
  pub book_id:    String,
  pub source:     String,
  pub created_at: String,
  pub deleted_at: Option<String>,
}

impl RawAccess {
  pub fn into_access(self) -> Result<LibraryAccessRecord> {
    Ok(LibraryAccessRecord {
      user_id:    decode_uuid(&self.user_id)?,
      book_id:    decode_uuid(&self.book_id)?,
      source:     decode_access_source(&self.source)?,
      created_at: decode_dt(&self.created_at)?,
      deleted_at: decode_dt_opt(self.deleted_at.as_deref())?,
    })
  }
}

/// Raw values read directly from an `audit_events` row.
pub struct RawAuditEvent {
  pub event_id:       String,
  pub loan_id:        String,
  pub actor_user_id:  Option<String>,
  pub target_user_id: Option<String>,
  pub action:         String,
  pub details:        String,
  pub recorded_at:    String,
}

impl RawAuditEvent {
  pub fn into_event(self) -> Result<AuditEvent> {
    Ok(AuditEvent {
      event_id: decode_uuid(&self.event_id)?,
      loan_id: decode_uuid(&self.loan_id)?,
      actor_user_id: self
        .actor_user_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      target_user_id: self
        .target_user_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      action: decode_audit_action(&self.action)?,
      details: serde_json::from_str(&self.details)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}
