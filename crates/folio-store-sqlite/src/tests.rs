//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use folio_core::{
  access::AccessSource,
  annotation::{
    AnnotationScope, AnnotationValue, HighlightValue, NewAnnotation,
    NoteValue,
  },
  audit::AuditAction,
  error::{Conflict, Error},
  loan::{
    LendingPolicy, Loan, LoanBucket, LoanRequest, LoanRole, LoanStatus,
    ReminderMarker,
  },
  renewal::{self, RenewalStatus},
  store::LendingStore,
  transition,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn request(book: Uuid, lender: Uuid, borrower: Uuid) -> LoanRequest {
  LoanRequest {
    book_id: book,
    lender_id: lender,
    borrower_id: borrower,
    message: Some("have a read".into()),
    terms: LendingPolicy::default(),
  }
}

async fn pending_loan(s: &SqliteStore) -> Loan {
  s.upsert_pending_loan(
    request(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()),
    t0(),
  )
  .await
  .unwrap()
}

async fn accept(s: &SqliteStore, loan: &Loan, at: DateTime<Utc>) -> Loan {
  let acceptance = transition::accept(loan, loan.borrower_id, at).unwrap();
  s.accept_loan(acceptance, false).await.unwrap()
}

async fn active_loan(s: &SqliteStore) -> Loan {
  let loan = pending_loan(s).await;
  accept(s, &loan, t0()).await
}

fn note(text: &str) -> AnnotationValue {
  AnnotationValue::Note(NoteValue {
    location: Some("p.12".into()),
    text:     text.into(),
  })
}

fn highlight(location: &str) -> AnnotationValue {
  AnnotationValue::Highlight(HighlightValue {
    location: location.into(),
    color:    Some("yellow".into()),
  })
}

// ─── Pending offers ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_creates_pending_offer() {
  let s = store().await;

  let loan = pending_loan(&s).await;
  assert_eq!(loan.status, LoanStatus::Pending);
  assert_eq!(loan.message.as_deref(), Some("have a read"));
  assert_eq!(loan.terms, LendingPolicy::default());
  assert!(loan.accepted_at.is_none());
  assert!(loan.due_at.is_none());
  assert!(!loan.created_access_on_accept);

  let events = s.list_audit_events(loan.loan_id).await.unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].action, AuditAction::Requested);
}

#[tokio::test]
async fn upsert_refreshes_existing_pending_offer() {
  let s = store().await;
  let first = pending_loan(&s).await;

  let mut again =
    request(first.book_id, first.lender_id, first.borrower_id);
  again.message = Some("longer this time".into());
  again.terms.duration_days = 30;
  let refreshed = s
    .upsert_pending_loan(again, t0() + Duration::hours(2))
    .await
    .unwrap();

  // Same offer, new terms, newer timestamp.
  assert_eq!(refreshed.loan_id, first.loan_id);
  assert_eq!(refreshed.message.as_deref(), Some("longer this time"));
  assert_eq!(refreshed.terms.duration_days, 30);
  assert_eq!(refreshed.requested_at, t0() + Duration::hours(2));

  let pending = s
    .list_loans(first.borrower_id, LoanRole::Borrower, Some(LoanBucket::Pending))
    .await
    .unwrap();
  assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn upsert_conflicts_with_active_loan() {
  let s = store().await;
  let loan = active_loan(&s).await;

  let err = s
    .upsert_pending_loan(
      request(loan.book_id, loan.lender_id, loan.borrower_id),
      t0() + Duration::hours(1),
    )
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Conflict(Conflict::ActiveLoanExists)
  ));
}

// ─── Acceptance ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn accept_activates_and_grants_access() {
  let s = store().await;
  let loan = pending_loan(&s).await;
  let accepted = accept(&s, &loan, t0() + Duration::hours(1)).await;

  assert_eq!(accepted.status, LoanStatus::Active);
  assert_eq!(accepted.accepted_at, Some(t0() + Duration::hours(1)));
  assert_eq!(
    accepted.due_at,
    Some(t0() + Duration::hours(1) + Duration::days(14))
  );
  assert!(accepted.created_access_on_accept);

  let access = s
    .get_access(loan.borrower_id, loan.book_id)
    .await
    .unwrap()
    .expect("access record");
  assert_eq!(access.source, AccessSource::Loan);
  assert!(access.deleted_at.is_none());

  let actions: Vec<_> = s
    .list_audit_events(loan.loan_id)
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.action)
    .collect();
  assert_eq!(actions, vec![AuditAction::Requested, AuditAction::Accepted]);
}

#[tokio::test]
async fn accept_requires_pending_status() {
  let s = store().await;
  let loan = pending_loan(&s).await;
  accept(&s, &loan, t0()).await;

  // The snapshot still says pending; the live row does not.
  let stale = transition::accept(&loan, loan.borrower_id, t0()).unwrap();
  let err = s.accept_loan(stale, false).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn accept_stale_offer_conflicts() {
  let s = store().await;
  let loan = pending_loan(&s).await;

  // The lender re-issues the offer with different terms after the borrower
  // read it.
  let mut again = request(loan.book_id, loan.lender_id, loan.borrower_id);
  again.terms.duration_days = 3;
  s.upsert_pending_loan(again, t0() + Duration::hours(1))
    .await
    .unwrap();

  let stale =
    transition::accept(&loan, loan.borrower_id, t0() + Duration::hours(2))
      .unwrap();
  let err = s.accept_loan(stale, false).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(Conflict::OfferChanged)));
}

#[tokio::test]
async fn accept_refuses_already_owned_book() {
  let s = store().await;
  let loan = pending_loan(&s).await;
  s.grant_access(loan.borrower_id, loan.book_id, AccessSource::Purchase, t0())
    .await
    .unwrap();

  let acceptance =
    transition::accept(&loan, loan.borrower_id, t0()).unwrap();
  let err = s.accept_loan(acceptance, false).await.unwrap_err();
  assert!(
    matches!(err, Error::AlreadyOwned { in_trash: false, .. }),
    "got {err:?}"
  );
}

#[tokio::test]
async fn accept_reports_trashed_copy_as_owned() {
  let s = store().await;
  let loan = pending_loan(&s).await;
  s.grant_access(loan.borrower_id, loan.book_id, AccessSource::Purchase, t0())
    .await
    .unwrap();
  s.trash_access(loan.borrower_id, loan.book_id, t0())
    .await
    .unwrap();

  let acceptance =
    transition::accept(&loan, loan.borrower_id, t0()).unwrap();
  let err = s.accept_loan(acceptance, false).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyOwned { in_trash: true, .. }));
}

#[tokio::test]
async fn accept_borrow_anyway_keeps_owned_record() {
  let s = store().await;
  let loan = pending_loan(&s).await;
  s.grant_access(loan.borrower_id, loan.book_id, AccessSource::Purchase, t0())
    .await
    .unwrap();

  let acceptance =
    transition::accept(&loan, loan.borrower_id, t0()).unwrap();
  let accepted = s.accept_loan(acceptance, true).await.unwrap();
  assert!(!accepted.created_access_on_accept);

  // Ending the loan must leave the purchase untouched.
  let settlement =
    transition::return_to_lender(&accepted, accepted.borrower_id, t0())
      .unwrap();
  s.settle_loan(settlement).await.unwrap();

  let access = s
    .get_access(loan.borrower_id, loan.book_id)
    .await
    .unwrap()
    .expect("purchase record survives");
  assert_eq!(access.source, AccessSource::Purchase);
}

// ─── Settlement ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn return_stamps_window_and_removes_loan_access() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let at = t0() + Duration::days(3);

  let settlement =
    transition::return_to_lender(&loan, loan.borrower_id, at).unwrap();
  let settled = s.settle_loan(settlement).await.unwrap();

  assert_eq!(settled.status, LoanStatus::Returned);
  assert_eq!(settled.returned_at, Some(at));
  assert_eq!(
    settled.export_available_until,
    Some(at + Duration::days(14))
  );
  assert!(
    s.get_access(loan.borrower_id, loan.book_id)
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn settle_guard_rejects_second_settlement() {
  let s = store().await;
  let loan = active_loan(&s).await;

  let first =
    transition::revoke(&loan, loan.lender_id, t0() + Duration::days(1))
      .unwrap();
  s.settle_loan(first).await.unwrap();

  // A racer still holding the active snapshot loses.
  let second =
    transition::return_to_lender(&loan, loan.borrower_id, t0() + Duration::days(1))
      .unwrap();
  let err = s.settle_loan(second).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { .. }));

  let actions: Vec<_> = s
    .list_audit_events(loan.loan_id)
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.action)
    .collect();
  assert_eq!(
    actions,
    vec![AuditAction::Requested, AuditAction::Accepted, AuditAction::Revoked]
  );
}

#[tokio::test]
async fn settle_force_expires_pending_renewal() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let proposal =
    renewal::propose(&loan, loan.borrower_id, 7, t0() + Duration::days(1))
      .unwrap();
  let renewal = s.create_renewal(proposal).await.unwrap();

  let settlement =
    transition::revoke(&loan, loan.lender_id, t0() + Duration::days(2))
      .unwrap();
  s.settle_loan(settlement).await.unwrap();

  let renewal = s
    .get_renewal(renewal.renewal_id)
    .await
    .unwrap()
    .expect("renewal row");
  assert_eq!(renewal.status, RenewalStatus::Expired);
  assert_eq!(renewal.decided_at, Some(t0() + Duration::days(2)));

  let actions: Vec<_> = s
    .list_audit_events(loan.loan_id)
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.action)
    .collect();
  assert!(actions.contains(&AuditAction::RenewalExpired));
  assert!(actions.contains(&AuditAction::Revoked));
}

// ─── Listings ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_loans_by_role_and_bucket() {
  let s = store().await;
  let lender = Uuid::new_v4();
  let borrower = Uuid::new_v4();

  let kept = s
    .upsert_pending_loan(request(Uuid::new_v4(), lender, borrower), t0())
    .await
    .unwrap();
  let ended = s
    .upsert_pending_loan(
      request(Uuid::new_v4(), lender, borrower),
      t0() + Duration::hours(1),
    )
    .await
    .unwrap();
  let ended = accept(&s, &ended, t0() + Duration::hours(2)).await;
  let settlement = transition::return_to_lender(
    &ended,
    borrower,
    t0() + Duration::hours(3),
  )
  .unwrap();
  s.settle_loan(settlement).await.unwrap();

  let pending = s
    .list_loans(lender, LoanRole::Lender, Some(LoanBucket::Pending))
    .await
    .unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].loan_id, kept.loan_id);

  let done = s
    .list_loans(borrower, LoanRole::Borrower, Some(LoanBucket::Ended))
    .await
    .unwrap();
  assert_eq!(done.len(), 1);
  assert_eq!(done[0].loan_id, ended.loan_id);

  let all = s.list_loans(lender, LoanRole::Lender, None).await.unwrap();
  assert_eq!(all.len(), 2);

  // Nobody lends to this user.
  let none = s
    .list_loans(borrower, LoanRole::Lender, None)
    .await
    .unwrap();
  assert!(none.is_empty());
}

#[tokio::test]
async fn find_active_borrow_prefers_most_recent_acceptance() {
  let s = store().await;
  let borrower = Uuid::new_v4();
  let book = Uuid::new_v4();

  // The same borrower can hold the same title from two different lenders.
  let older = s
    .upsert_pending_loan(request(book, Uuid::new_v4(), borrower), t0())
    .await
    .unwrap();
  let older = accept(&s, &older, t0()).await;
  let newer = s
    .upsert_pending_loan(request(book, Uuid::new_v4(), borrower), t0())
    .await
    .unwrap();
  let acceptance = transition::accept(&newer, borrower, t0() + Duration::hours(1))
    .unwrap();
  // The first acceptance already created the access record.
  let newer = s.accept_loan(acceptance, true).await.unwrap();

  let found = s
    .find_active_borrow(borrower, book)
    .await
    .unwrap()
    .expect("active borrow");
  assert_eq!(found.loan_id, newer.loan_id);
  assert_ne!(found.loan_id, older.loan_id);
}

// ─── Reminder markers ────────────────────────────────────────────────────────

#[tokio::test]
async fn claim_reminder_first_caller_wins() {
  let s = store().await;
  let loan = active_loan(&s).await;

  let first = s
    .claim_reminder(loan.loan_id, ReminderMarker::DueSoon, t0())
    .await
    .unwrap();
  let second = s
    .claim_reminder(loan.loan_id, ReminderMarker::DueSoon, t0())
    .await
    .unwrap();
  assert!(first);
  assert!(!second);

  // The other marker is independent.
  assert!(
    s.claim_reminder(loan.loan_id, ReminderMarker::Overdue, t0())
      .await
      .unwrap()
  );
}

#[tokio::test]
async fn claim_reminder_ignores_settled_loans() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let settlement =
    transition::return_to_lender(&loan, loan.borrower_id, t0()).unwrap();
  s.settle_loan(settlement).await.unwrap();

  assert!(
    !s.claim_reminder(loan.loan_id, ReminderMarker::DueSoon, t0())
      .await
      .unwrap()
  );
}

// ─── Renewals ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_renewal_and_fetch() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let due = loan.due_at.unwrap();

  let proposal =
    renewal::propose(&loan, loan.borrower_id, 7, t0() + Duration::days(1))
      .unwrap();
  let created = s.create_renewal(proposal).await.unwrap();

  assert_eq!(created.status, RenewalStatus::Pending);
  assert_eq!(created.requested_extra_days, 7);
  assert_eq!(created.previous_due_at, due);
  assert_eq!(created.proposed_due_at, due + Duration::days(7));

  let found = s
    .find_pending_renewal(loan.loan_id)
    .await
    .unwrap()
    .expect("pending renewal");
  assert_eq!(found.renewal_id, created.renewal_id);
}

#[tokio::test]
async fn create_renewal_rejects_duplicate_pending() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let first =
    renewal::propose(&loan, loan.borrower_id, 7, t0()).unwrap();
  s.create_renewal(first).await.unwrap();

  let second =
    renewal::propose(&loan, loan.borrower_id, 3, t0()).unwrap();
  let err = s.create_renewal(second).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Conflict(Conflict::PendingRenewalExists)
  ));
}

#[tokio::test]
async fn create_renewal_requires_live_loan() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let proposal =
    renewal::propose(&loan, loan.borrower_id, 7, t0()).unwrap();

  let settlement =
    transition::return_to_lender(&loan, loan.borrower_id, t0()).unwrap();
  s.settle_loan(settlement).await.unwrap();

  let err = s.create_renewal(proposal).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn approve_moves_due_date_and_clears_markers() {
  let s = store().await;
  let loan = active_loan(&s).await;
  s.claim_reminder(loan.loan_id, ReminderMarker::DueSoon, t0())
    .await
    .unwrap();
  s.claim_reminder(loan.loan_id, ReminderMarker::Overdue, t0())
    .await
    .unwrap();

  let proposal =
    renewal::propose(&loan, loan.borrower_id, 7, t0()).unwrap();
  let created = s.create_renewal(proposal).await.unwrap();
  let decision = renewal::approve(
    &created,
    &loan,
    loan.lender_id,
    t0() + Duration::days(1),
  )
  .unwrap();
  let approved = s.decide_renewal(decision).await.unwrap();

  assert_eq!(approved.status, RenewalStatus::Approved);
  assert_eq!(approved.reviewer_user_id, Some(loan.lender_id));

  let loan = s.get_loan(loan.loan_id).await.unwrap().unwrap();
  assert_eq!(loan.due_at, Some(created.proposed_due_at));
  assert_eq!(loan.terms.duration_days, 21);
  // The new deadline gets fresh reminders.
  assert!(loan.due_soon_notified_at.is_none());
  assert!(loan.overdue_notified_at.is_none());
  assert!(
    s.claim_reminder(loan.loan_id, ReminderMarker::DueSoon, t0())
      .await
      .unwrap()
  );
}

#[tokio::test]
async fn deny_leaves_loan_untouched() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let due = loan.due_at;

  let proposal =
    renewal::propose(&loan, loan.borrower_id, 30, t0()).unwrap();
  let created = s.create_renewal(proposal).await.unwrap();
  let decision =
    renewal::deny(&created, &loan, loan.lender_id, t0()).unwrap();
  let denied = s.decide_renewal(decision).await.unwrap();

  assert_eq!(denied.status, RenewalStatus::Denied);
  let loan = s.get_loan(loan.loan_id).await.unwrap().unwrap();
  assert_eq!(loan.due_at, due);
  assert_eq!(loan.terms.duration_days, 14);
}

#[tokio::test]
async fn decide_renewal_twice_errors() {
  let s = store().await;
  let loan = active_loan(&s).await;
  let proposal =
    renewal::propose(&loan, loan.borrower_id, 7, t0()).unwrap();
  let created = s.create_renewal(proposal).await.unwrap();

  let deny =
    renewal::deny(&created, &loan, loan.lender_id, t0()).unwrap();
  s.decide_renewal(deny).await.unwrap();

  let approve =
    renewal::approve(&created, &loan, loan.lender_id, t0()).unwrap();
  let err = s.decide_renewal(approve).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn list_renewals_oldest_first() {
  let s = store().await;
  let loan = active_loan(&s).await;

  let first = renewal::propose(&loan, loan.borrower_id, 7, t0()).unwrap();
  let first = s.create_renewal(first).await.unwrap();
  let deny = renewal::deny(&first, &loan, loan.lender_id, t0()).unwrap();
  s.decide_renewal(deny).await.unwrap();

  let second = renewal::propose(
    &loan,
    loan.borrower_id,
    3,
    t0() + Duration::hours(1),
  )
  .unwrap();
  let second = s.create_renewal(second).await.unwrap();

  let all = s.list_renewals(loan.loan_id).await.unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].renewal_id, first.renewal_id);
  assert_eq!(all[1].renewal_id, second.renewal_id);
}

// ─── Library access ──────────────────────────────────────────────────────────

#[tokio::test]
async fn grant_access_roundtrip() {
  let s = store().await;
  let user = Uuid::new_v4();
  let book = Uuid::new_v4();

  s.grant_access(user, book, AccessSource::Upload, t0())
    .await
    .unwrap();
  let access = s.get_access(user, book).await.unwrap().expect("record");
  assert_eq!(access.source, AccessSource::Upload);
  assert_eq!(access.created_at, t0());
  assert!(!access.in_trash());
}

#[tokio::test]
async fn grant_access_twice_errors() {
  let s = store().await;
  let user = Uuid::new_v4();
  let book = Uuid::new_v4();
  s.grant_access(user, book, AccessSource::Purchase, t0())
    .await
    .unwrap();

  let err = s
    .grant_access(user, book, AccessSource::Purchase, t0())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyOwned { in_trash: false, .. }));

  // A trashed copy still blocks a fresh grant.
  s.trash_access(user, book, t0()).await.unwrap();
  let err = s
    .grant_access(user, book, AccessSource::Purchase, t0())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyOwned { in_trash: true, .. }));
}

#[tokio::test]
async fn trash_access_is_sticky() {
  let s = store().await;
  let user = Uuid::new_v4();
  let book = Uuid::new_v4();
  s.grant_access(user, book, AccessSource::Purchase, t0())
    .await
    .unwrap();

  let trashed = s
    .trash_access(user, book, t0() + Duration::days(1))
    .await
    .unwrap();
  assert_eq!(trashed.deleted_at, Some(t0() + Duration::days(1)));

  // Trashing again keeps the original deletion time.
  let again = s
    .trash_access(user, book, t0() + Duration::days(5))
    .await
    .unwrap();
  assert_eq!(again.deleted_at, Some(t0() + Duration::days(1)));
}

// ─── Annotations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_annotation() {
  let s = store().await;
  let book = Uuid::new_v4();
  let author = Uuid::new_v4();

  let created = s
    .insert_annotation(
      NewAnnotation {
        book_id: book,
        author_id: author,
        value: note("margin thought"),
        scope: AnnotationScope::Owner,
      },
      t0(),
    )
    .await
    .unwrap();
  assert_eq!(created.revision, 1);

  let fetched = s
    .get_annotation(created.annotation_id)
    .await
    .unwrap()
    .expect("annotation");
  assert_eq!(fetched.value, note("margin thought"));
  assert_eq!(fetched.scope, AnnotationScope::Owner);
  assert_eq!(fetched.revision, 1);
}

#[tokio::test]
async fn update_bumps_revision() {
  let s = store().await;
  let created = s
    .insert_annotation(
      NewAnnotation {
        book_id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        value: highlight("loc:400"),
        scope: AnnotationScope::Owner,
      },
      t0(),
    )
    .await
    .unwrap();

  let updated = s
    .update_annotation(
      created.annotation_id,
      highlight("loc:404"),
      Some(1),
      t0() + Duration::hours(1),
    )
    .await
    .unwrap();
  assert_eq!(updated.revision, 2);
  assert_eq!(updated.value, highlight("loc:404"));
  assert_eq!(updated.updated_at, t0() + Duration::hours(1));
  assert_eq!(updated.created_at, t0());
}

#[tokio::test]
async fn update_with_stale_revision_conflicts() {
  let s = store().await;
  let created = s
    .insert_annotation(
      NewAnnotation {
        book_id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        value: note("v1"),
        scope: AnnotationScope::Owner,
      },
      t0(),
    )
    .await
    .unwrap();
  s.update_annotation(created.annotation_id, note("v2"), Some(1), t0())
    .await
    .unwrap();

  // Another client is still on revision 1.
  let err = s
    .update_annotation(created.annotation_id, note("v2b"), Some(1), t0())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Conflict(Conflict::RevisionMismatch { current_revision: 2 })
  ));

  // The losing write changed nothing.
  let current = s
    .get_annotation(created.annotation_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(current.value, note("v2"));
  assert_eq!(current.revision, 2);
}

#[tokio::test]
async fn delete_checks_revision() {
  let s = store().await;
  let created = s
    .insert_annotation(
      NewAnnotation {
        book_id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        value: note("short-lived"),
        scope: AnnotationScope::PrivateBorrower,
      },
      t0(),
    )
    .await
    .unwrap();

  let err = s
    .delete_annotation(created.annotation_id, Some(5))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Conflict(Conflict::RevisionMismatch { current_revision: 1 })
  ));

  s.delete_annotation(created.annotation_id, Some(1))
    .await
    .unwrap();
  assert!(
    s.get_annotation(created.annotation_id)
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn update_missing_annotation_not_found() {
  let s = store().await;
  let err = s
    .update_annotation(Uuid::new_v4(), note("ghost"), None, t0())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(..)));
}

// ─── Audit ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn record_export_appends_event() {
  let s = store().await;
  let loan = active_loan(&s).await;

  s.record_export(
    loan.loan_id,
    loan.borrower_id,
    t0() + Duration::days(2),
    serde_json::json!({ "highlights": 3, "notes": 1 }),
  )
  .await
  .unwrap();

  let events = s.list_audit_events(loan.loan_id).await.unwrap();
  let last = events.last().expect("at least one event");
  assert_eq!(last.action, AuditAction::Exported);
  assert_eq!(last.actor_user_id, Some(loan.borrower_id));
  assert_eq!(last.details["highlights"], 3);
}

#[tokio::test]
async fn record_export_requires_existing_loan() {
  let s = store().await;
  let err = s
    .record_export(Uuid::new_v4(), Uuid::new_v4(), t0(), serde_json::json!({}))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(..)));
}

// ─── On-disk store ───────────────────────────────────────────────────────────

#[tokio::test]
async fn open_on_disk_persists_across_reopen() {
  let dir = tempfile::tempdir().expect("tempdir");
  let path = dir.path().join("folio.db");

  let loan = {
    let s = SqliteStore::open(&path).await.expect("open store");
    pending_loan(&s).await
  };

  // Reopening runs the idempotent schema again and finds the same data.
  let s = SqliteStore::open(&path).await.expect("reopen store");
  let found = s.get_loan(loan.loan_id).await.unwrap().expect("loan");
  assert_eq!(found.status, LoanStatus::Pending);
  assert_eq!(found.requested_at, loan.requested_at);
}
