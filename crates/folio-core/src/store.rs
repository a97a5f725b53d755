//! The `LendingStore` trait.
//!
//! Implemented by storage backends (e.g. `folio-store-sqlite`). The engine
//! depends on this abstraction, not on any concrete backend.
//!
//! A transition value ([`Acceptance`], [`Settlement`], [`RenewalDecision`])
//! is committed by exactly one method call, in one atomic unit: the status
//! guard is re-checked against the live row, and the state change, the
//! access-record effect, the renewal cascade, and the audit event all land
//! together or not at all.
//!
//! Unlike most traits of this shape, the error type is fixed to
//! [`crate::Error`] rather than left associated: guard failures raised
//! inside store transactions (invalid state, revision mismatch, already
//! owned) are part of the caller contract and must survive the trip through
//! the backend intact.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Result,
  access::{AccessSource, LibraryAccessRecord},
  annotation::{Annotation, AnnotationValue, NewAnnotation},
  audit::AuditEvent,
  loan::{Loan, LoanBucket, LoanRequest, LoanRole, ReminderMarker},
  renewal::{NewRenewal, RenewalDecision, RenewalRequest},
  transition::{Acceptance, Settlement},
};

pub trait LendingStore: Send + Sync {
  // ── Loans ─────────────────────────────────────────────────────────────

  /// Create a pending offer, or refresh the existing pending offer for the
  /// same (book, lender, borrower) with the new message and terms.
  ///
  /// Fails with `Conflict` if an active loan already exists for the triple.
  fn upsert_pending_loan(
    &self,
    request: LoanRequest,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Loan>> + Send + '_;

  /// The direct borrow path: create a loan that is active from the start,
  /// granting access immediately.
  ///
  /// Fails with `Conflict` if an active loan already exists for the triple,
  /// and with `AlreadyOwned` if the borrower already has the book (unless
  /// `borrow_anyway`).
  fn create_active_loan(
    &self,
    request: LoanRequest,
    now: DateTime<Utc>,
    borrow_anyway: bool,
  ) -> impl Future<Output = Result<Loan>> + Send + '_;

  /// Retrieve a loan by id. Returns `None` if not found.
  fn get_loan(
    &self,
    loan_id: Uuid,
  ) -> impl Future<Output = Result<Option<Loan>>> + Send + '_;

  /// The most recently accepted active loan under which `borrower_id`
  /// borrows `book_id`, if any.
  fn find_active_borrow(
    &self,
    borrower_id: Uuid,
    book_id: Uuid,
  ) -> impl Future<Output = Result<Option<Loan>>> + Send + '_;

  /// All active loans on a book, any borrower.
  fn list_active_loans_for_book(
    &self,
    book_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Loan>>> + Send + '_;

  /// Every active loan in the store; the sweep's working set.
  fn list_active_loans(
    &self,
  ) -> impl Future<Output = Result<Vec<Loan>>> + Send + '_;

  /// Loans where `user_id` plays `role`, newest first, optionally narrowed
  /// to a status bucket.
  fn list_loans(
    &self,
    user_id: Uuid,
    role: LoanRole,
    bucket: Option<LoanBucket>,
  ) -> impl Future<Output = Result<Vec<Loan>>> + Send + '_;

  /// Commit an acceptance: pending → active, stamp the due date, and ensure
  /// the borrower holds an access record (recording whether this loan
  /// created it).
  ///
  /// Re-checks inside the transaction that the offer is still pending and
  /// unchanged, that no active loan exists for the triple, and that the
  /// borrower does not already own the book (unless `borrow_anyway`).
  fn accept_loan(
    &self,
    acceptance: Acceptance,
    borrow_anyway: bool,
  ) -> impl Future<Output = Result<Loan>> + Send + '_;

  /// Commit a settlement: move the loan to a terminal status, stamp the
  /// ending timestamp and export window, remove the access record if this
  /// loan created it, force-expire any pending renewal, and append the
  /// audit event.
  fn settle_loan(
    &self,
    settlement: Settlement,
  ) -> impl Future<Output = Result<Loan>> + Send + '_;

  /// Claim a reminder marker for an active loan. Returns `true` for the
  /// caller that actually set it; concurrent sweeps get `false` and send
  /// nothing.
  fn claim_reminder(
    &self,
    loan_id: Uuid,
    marker: ReminderMarker,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool>> + Send + '_;

  // ── Renewals ──────────────────────────────────────────────────────────

  /// Persist a proposed renewal. Re-checks inside the transaction that the
  /// loan is still active and that no other pending renewal exists for it.
  fn create_renewal(
    &self,
    proposal: NewRenewal,
  ) -> impl Future<Output = Result<RenewalRequest>> + Send + '_;

  /// Commit a decision on a pending renewal. Approval also moves the
  /// loan's due date and clears its reminder markers, in the same
  /// transaction, re-checking that the loan is still active.
  fn decide_renewal(
    &self,
    decision: RenewalDecision,
  ) -> impl Future<Output = Result<RenewalRequest>> + Send + '_;

  /// Retrieve a renewal by id. Returns `None` if not found.
  fn get_renewal(
    &self,
    renewal_id: Uuid,
  ) -> impl Future<Output = Result<Option<RenewalRequest>>> + Send + '_;

  /// The pending renewal on a loan, if one exists (at most one can).
  fn find_pending_renewal(
    &self,
    loan_id: Uuid,
  ) -> impl Future<Output = Result<Option<RenewalRequest>>> + Send + '_;

  /// Full negotiation history for a loan, oldest first.
  fn list_renewals(
    &self,
    loan_id: Uuid,
  ) -> impl Future<Output = Result<Vec<RenewalRequest>>> + Send + '_;

  // ── Library access ────────────────────────────────────────────────────

  /// The access record for (user, book), trashed or not. Returns `None` if
  /// none exists.
  fn get_access(
    &self,
    user_id: Uuid,
    book_id: Uuid,
  ) -> impl Future<Output = Result<Option<LibraryAccessRecord>>> + Send + '_;

  /// The purchase/upload write path into the shared table. Fails with
  /// `AlreadyOwned` if any record exists, trashed included.
  fn grant_access(
    &self,
    user_id: Uuid,
    book_id: Uuid,
    source: AccessSource,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<LibraryAccessRecord>> + Send + '_;

  /// Soft-delete an access record into the trash. The engine never calls
  /// this; it belongs to the library-management surface.
  fn trash_access(
    &self,
    user_id: Uuid,
    book_id: Uuid,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<LibraryAccessRecord>> + Send + '_;

  // ── Annotations ───────────────────────────────────────────────────────

  /// Persist a new annotation at revision 1.
  fn insert_annotation(
    &self,
    input: NewAnnotation,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Annotation>> + Send + '_;

  /// Retrieve an annotation by id. Returns `None` if not found.
  fn get_annotation(
    &self,
    annotation_id: Uuid,
  ) -> impl Future<Output = Result<Option<Annotation>>> + Send + '_;

  /// Every annotation on a book, oldest first, unfiltered. Visibility is
  /// the caller's job.
  fn list_annotations(
    &self,
    book_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Annotation>>> + Send + '_;

  /// Replace an annotation's value, bumping its revision. When
  /// `expected_revision` is given, fails with `Conflict` (carrying the
  /// current revision) unless it matches the live row.
  fn update_annotation(
    &self,
    annotation_id: Uuid,
    value: AnnotationValue,
    expected_revision: Option<i64>,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Annotation>> + Send + '_;

  /// Delete an annotation, with the same revision check as
  /// [`Self::update_annotation`].
  fn delete_annotation(
    &self,
    annotation_id: Uuid,
    expected_revision: Option<i64>,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  // ── Audit ─────────────────────────────────────────────────────────────

  /// A loan's audit trail, oldest first.
  fn list_audit_events(
    &self,
    loan_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AuditEvent>>> + Send + '_;

  /// Append the one audit event that does not ride a transition: a
  /// borrower exporting their annotations.
  fn record_export(
    &self,
    loan_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
    details: serde_json::Value,
  ) -> impl Future<Output = Result<AuditEvent>> + Send + '_;
}
