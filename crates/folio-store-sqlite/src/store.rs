//! [`SqliteStore`] — the SQLite implementation of [`LendingStore`].

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension as _;
use serde_json::json;
use uuid::Uuid;

use folio_core::{
  Result,
  access::{AccessSource, LibraryAccessRecord},
  annotation::{Annotation, AnnotationValue, NewAnnotation},
  audit::{AuditAction, AuditEvent, AuditRecord},
  error::{Conflict, Error, Resource},
  loan::{Loan, LoanBucket, LoanRequest, LoanRole, LoanStatus, ReminderMarker},
  renewal::{NewRenewal, RenewalDecision, RenewalRequest},
  store::LendingStore,
  transition::{AccessDisposition, Acceptance, Settlement},
};

use crate::{
  encode::{
    RawAccess, RawAnnotation, RawAuditEvent, RawLoan, RawRenewal, encode_dt,
    encode_uuid,
  },
  error::{domain, recover},
  schema::SCHEMA,
};

// ─── Column lists and row mappers ────────────────────────────────────────────

const LOAN_COLUMNS: &str = "loan_id, book_id, lender_id, borrower_id, \
   status, message, duration_days, grace_days, can_add_highlights, \
   can_edit_highlights, can_add_notes, can_edit_notes, \
   annotation_visibility, share_lender_annotations, \
   created_access_on_accept, requested_at, accepted_at, due_at, \
   returned_at, revoked_at, expired_at, export_available_until, \
   due_soon_notified_at, overdue_notified_at";

const RENEWAL_COLUMNS: &str = "renewal_id, loan_id, status, \
   requested_extra_days, previous_due_at, proposed_due_at, \
   requester_user_id, reviewer_user_id, requested_at, decided_at";

const ANNOTATION_COLUMNS: &str = "annotation_id, book_id, author_id, kind, \
   value_json, scope, revision, created_at, updated_at";

const AUDIT_COLUMNS: &str = "event_id, loan_id, actor_user_id, \
   target_user_id, action, details, recorded_at";

fn loan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLoan> {
  Ok(RawLoan {
    loan_id:                  row.get(0)?,
    book_id:                  row.get(1)?,
    lender_id:                row.get(2)?,
    borrower_id:              row.get(3)?,
    status:                   row.get(4)?,
    message:                  row.get(5)?,
    duration_days:            row.get(6)?,
    grace_days:               row.get(7)?,
    can_add_highlights:       row.get(8)?,
    can_edit_highlights:      row.get(9)?,
    can_add_notes:            row.get(10)?,
    can_edit_notes:           row.get(11)?,
    annotation_visibility:    row.get(12)?,
    share_lender_annotations: row.get(13)?,
    created_access_on_accept: row.get(14)?,
    requested_at:             row.get(15)?,
    accepted_at:              row.get(16)?,
    due_at:                   row.get(17)?,
    returned_at:              row.get(18)?,
    revoked_at:               row.get(19)?,
    expired_at:               row.get(20)?,
    export_available_until:   row.get(21)?,
    due_soon_notified_at:     row.get(22)?,
    overdue_notified_at:      row.get(23)?,
  })
}

fn renewal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRenewal> {
  Ok(RawRenewal {
    renewal_id:           row.get(0)?,
    loan_id:              row.get(1)?,
    status:               row.get(2)?,
    requested_extra_days: row.get(3)?,
    previous_due_at:      row.get(4)?,
    proposed_due_at:      row.get(5)?,
    requester_user_id:    row.get(6)?,
    reviewer_user_id:     row.get(7)?,
    requested_at:         row.get(8)?,
    decided_at:           row.get(9)?,
  })
}

fn annotation_from_row(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<RawAnnotation> {
  Ok(RawAnnotation {
    annotation_id: row.get(0)?,
    book_id:       row.get(1)?,
    author_id:     row.get(2)?,
    kind:          row.get(3)?,
    value_json:    row.get(4)?,
    scope:         row.get(5)?,
    revision:      row.get(6)?,
    created_at:    row.get(7)?,
    updated_at:    row.get(8)?,
  })
}

fn access_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAccess> {
  Ok(RawAccess {
    user_id:    row.get(0)?,
    book_id:    row.get(1)?,
    source:     row.get(2)?,
    created_at: row.get(3)?,
    deleted_at: row.get(4)?,
  })
}

fn audit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAuditEvent> {
  Ok(RawAuditEvent {
    event_id:       row.get(0)?,
    loan_id:        row.get(1)?,
    actor_user_id:  row.get(2)?,
    target_user_id: row.get(3)?,
    action:         row.get(4)?,
    details:        row.get(5)?,
    recorded_at:    row.get(6)?,
  })
}

// ─── In-transaction helpers ──────────────────────────────────────────────────

fn fetch_loan(
  conn: &rusqlite::Connection,
  loan_id: &str,
) -> tokio_rusqlite::Result<RawLoan> {
  conn
    .query_row(
      &format!("SELECT {LOAN_COLUMNS} FROM loans WHERE loan_id = ?1"),
      rusqlite::params![loan_id],
      loan_from_row,
    )
    .optional()?
    .ok_or_else(|| {
      domain(Error::NotFound(
        Resource::Loan,
        Uuid::parse_str(loan_id).unwrap_or(Uuid::nil()),
      ))
    })
}

fn fetch_renewal(
  conn: &rusqlite::Connection,
  renewal_id: &str,
) -> tokio_rusqlite::Result<RawRenewal> {
  conn
    .query_row(
      &format!(
        "SELECT {RENEWAL_COLUMNS} FROM renewal_requests WHERE renewal_id = ?1"
      ),
      rusqlite::params![renewal_id],
      renewal_from_row,
    )
    .optional()?
    .ok_or_else(|| {
      domain(Error::NotFound(
        Resource::Renewal,
        Uuid::parse_str(renewal_id).unwrap_or(Uuid::nil()),
      ))
    })
}

fn fetch_annotation(
  conn: &rusqlite::Connection,
  annotation_id: &str,
) -> tokio_rusqlite::Result<RawAnnotation> {
  conn
    .query_row(
      &format!(
        "SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE annotation_id = ?1"
      ),
      rusqlite::params![annotation_id],
      annotation_from_row,
    )
    .optional()?
    .ok_or_else(|| {
      domain(Error::NotFound(
        Resource::Annotation,
        Uuid::parse_str(annotation_id).unwrap_or(Uuid::nil()),
      ))
    })
}

fn fetch_access(
  conn: &rusqlite::Connection,
  user_id: &str,
  book_id: &str,
) -> rusqlite::Result<Option<RawAccess>> {
  conn
    .query_row(
      "SELECT user_id, book_id, source, created_at, deleted_at
       FROM library_access WHERE user_id = ?1 AND book_id = ?2",
      rusqlite::params![user_id, book_id],
      access_from_row,
    )
    .optional()
}

fn require_loan_status(
  raw: &RawLoan,
  expected: &'static str,
) -> tokio_rusqlite::Result<()> {
  if raw.status == expected {
    Ok(())
  } else {
    Err(domain(Error::InvalidState {
      entity: "loan",
      expected,
      actual: raw.status.clone(),
    }))
  }
}

fn active_loan_exists(
  conn: &rusqlite::Connection,
  book_id: &str,
  lender_id: &str,
  borrower_id: &str,
) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM loans
         WHERE book_id = ?1 AND lender_id = ?2 AND borrower_id = ?3
           AND status = 'active'",
        rusqlite::params![book_id, lender_id, borrower_id],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

/// Append one audit event, returning the generated event id.
fn insert_audit(
  conn: &rusqlite::Connection,
  loan_id: &str,
  record: &AuditRecord,
  at: &str,
) -> rusqlite::Result<Uuid> {
  let event_id = Uuid::new_v4();
  conn.execute(
    "INSERT INTO audit_events (
       event_id, loan_id, actor_user_id, target_user_id, action, details,
       recorded_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    rusqlite::params![
      encode_uuid(event_id),
      loan_id,
      record.actor_user_id.map(encode_uuid),
      record.target_user_id.map(encode_uuid),
      record.action.as_str(),
      record.details.to_string(),
      at,
    ],
  )?;
  Ok(event_id)
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Folio lending store backed by a single SQLite file.
///
/// Clones share the underlying connection, so handing one to each task is
/// cheap.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open the database at `path`, creating it and its schema as needed.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path)
      .await
      .map_err(recover)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a throwaway in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(recover)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(recover)
  }
}

// ─── LendingStore impl ───────────────────────────────────────────────────────

impl LendingStore for SqliteStore {
  // ── Loans ─────────────────────────────────────────────────────────────

  async fn upsert_pending_loan(
    &self,
    request: LoanRequest,
    now: DateTime<Utc>,
  ) -> Result<Loan> {
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let book_str = encode_uuid(request.book_id);
        let lender_str = encode_uuid(request.lender_id);
        let borrower_str = encode_uuid(request.borrower_id);
        let now_str = encode_dt(now);

        if active_loan_exists(&tx, &book_str, &lender_str, &borrower_str)? {
          return Err(domain(Error::Conflict(Conflict::ActiveLoanExists)));
        }

        let terms = request.terms;
        let existing: Option<String> = tx
          .query_row(
            "SELECT loan_id FROM loans
             WHERE book_id = ?1 AND lender_id = ?2 AND borrower_id = ?3
               AND status = 'pending'",
            rusqlite::params![book_str, lender_str, borrower_str],
            |row| row.get(0),
          )
          .optional()?;

        let loan_id_str = match existing {
          // Re-requesting refreshes the open offer in place; its id is
          // stable so the borrower's view of "this offer" stays coherent.
          Some(id) => {
            tx.execute(
              "UPDATE loans SET
                 message = ?1, duration_days = ?2, grace_days = ?3,
                 can_add_highlights = ?4, can_edit_highlights = ?5,
                 can_add_notes = ?6, can_edit_notes = ?7,
                 annotation_visibility = ?8, share_lender_annotations = ?9,
                 requested_at = ?10
               WHERE loan_id = ?11",
              rusqlite::params![
                request.message,
                terms.duration_days,
                terms.grace_days,
                terms.capabilities.can_add_highlights,
                terms.capabilities.can_edit_highlights,
                terms.capabilities.can_add_notes,
                terms.capabilities.can_edit_notes,
                terms.annotation_visibility.as_str(),
                terms.share_lender_annotations,
                now_str,
                id,
              ],
            )?;
            id
          }
          None => {
            let id = encode_uuid(Uuid::new_v4());
            tx.execute(
              "INSERT INTO loans (
                 loan_id, book_id, lender_id, borrower_id, status, message,
                 duration_days, grace_days, can_add_highlights,
                 can_edit_highlights, can_add_notes, can_edit_notes,
                 annotation_visibility, share_lender_annotations,
                 requested_at
               ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9,
                         ?10, ?11, ?12, ?13, ?14)",
              rusqlite::params![
                id,
                book_str,
                lender_str,
                borrower_str,
                request.message,
                terms.duration_days,
                terms.grace_days,
                terms.capabilities.can_add_highlights,
                terms.capabilities.can_edit_highlights,
                terms.capabilities.can_add_notes,
                terms.capabilities.can_edit_notes,
                terms.annotation_visibility.as_str(),
                terms.share_lender_annotations,
                now_str,
              ],
            )?;
            id
          }
        };

        insert_audit(
          &tx,
          &loan_id_str,
          &AuditRecord {
            actor_user_id:  Some(request.lender_id),
            target_user_id: Some(request.borrower_id),
            action:         AuditAction::Requested,
            details:        json!({
              "duration_days": terms.duration_days,
              "grace_days":    terms.grace_days,
            }),
          },
          &now_str,
        )?;

        let raw = fetch_loan(&tx, &loan_id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_loan()
  }

  async fn create_active_loan(
    &self,
    request: LoanRequest,
    now: DateTime<Utc>,
    borrow_anyway: bool,
  ) -> Result<Loan> {
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let book_str = encode_uuid(request.book_id);
        let lender_str = encode_uuid(request.lender_id);
        let borrower_str = encode_uuid(request.borrower_id);
        let now_str = encode_dt(now);

        if active_loan_exists(&tx, &book_str, &lender_str, &borrower_str)? {
          return Err(domain(Error::Conflict(Conflict::ActiveLoanExists)));
        }

        let created = match fetch_access(&tx, &borrower_str, &book_str)? {
          Some(rec) if !borrow_anyway => {
            return Err(domain(Error::AlreadyOwned {
              user_id:  request.borrower_id,
              book_id:  request.book_id,
              in_trash: rec.deleted_at.is_some(),
            }));
          }
          Some(_) => false,
          None => {
            tx.execute(
              "INSERT INTO library_access (user_id, book_id, source, created_at)
               VALUES (?1, ?2, 'loan', ?3)",
              rusqlite::params![borrower_str, book_str, now_str],
            )?;
            true
          }
        };

        let terms = request.terms;
        let due_at = now + Duration::days(terms.duration_days as i64);
        let loan_id_str = encode_uuid(Uuid::new_v4());
        tx.execute(
          "INSERT INTO loans (
             loan_id, book_id, lender_id, borrower_id, status, message,
             duration_days, grace_days, can_add_highlights,
             can_edit_highlights, can_add_notes, can_edit_notes,
             annotation_visibility, share_lender_annotations,
             created_access_on_accept, requested_at, accepted_at, due_at
           ) VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
          rusqlite::params![
            loan_id_str,
            book_str,
            lender_str,
            borrower_str,
            request.message,
            terms.duration_days,
            terms.grace_days,
            terms.capabilities.can_add_highlights,
            terms.capabilities.can_edit_highlights,
            terms.capabilities.can_add_notes,
            terms.capabilities.can_edit_notes,
            terms.annotation_visibility.as_str(),
            terms.share_lender_annotations,
            created,
            now_str,
            now_str,
            encode_dt(due_at),
          ],
        )?;

        insert_audit(
          &tx,
          &loan_id_str,
          &AuditRecord {
            actor_user_id:  Some(request.borrower_id),
            target_user_id: Some(request.lender_id),
            action:         AuditAction::Accepted,
            details:        json!({
              "direct_borrow": true,
              "due_at":        due_at,
              "duration_days": terms.duration_days,
            }),
          },
          &now_str,
        )?;

        let raw = fetch_loan(&tx, &loan_id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_loan()
  }

  async fn get_loan(&self, loan_id: Uuid) -> Result<Option<Loan>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {LOAN_COLUMNS} FROM loans WHERE loan_id = ?1"),
              rusqlite::params![encode_uuid(loan_id)],
              loan_from_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(recover)?;
    raw.map(RawLoan::into_loan).transpose()
  }

  async fn find_active_borrow(
    &self,
    borrower_id: Uuid,
    book_id: Uuid,
  ) -> Result<Option<Loan>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LOAN_COLUMNS} FROM loans
                 WHERE borrower_id = ?1 AND book_id = ?2 AND status = 'active'
                 ORDER BY accepted_at DESC LIMIT 1"
              ),
              rusqlite::params![
                encode_uuid(borrower_id),
                encode_uuid(book_id)
              ],
              loan_from_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(recover)?;
    raw.map(RawLoan::into_loan).transpose()
  }

  async fn list_active_loans_for_book(&self, book_id: Uuid) -> Result<Vec<Loan>> {
    let raws: Vec<RawLoan> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LOAN_COLUMNS} FROM loans
           WHERE book_id = ?1 AND status = 'active'
           ORDER BY accepted_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(book_id)], loan_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(recover)?;
    raws.into_iter().map(RawLoan::into_loan).collect()
  }

  async fn list_active_loans(&self) -> Result<Vec<Loan>> {
    let raws: Vec<RawLoan> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LOAN_COLUMNS} FROM loans WHERE status = 'active'
           ORDER BY due_at ASC"
        ))?;
        let rows = stmt
          .query_map([], loan_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(recover)?;
    raws.into_iter().map(RawLoan::into_loan).collect()
  }

  async fn list_loans(
    &self,
    user_id: Uuid,
    role: LoanRole,
    bucket: Option<LoanBucket>,
  ) -> Result<Vec<Loan>> {
    let role_col = match role {
      LoanRole::Lender => "lender_id",
      LoanRole::Borrower => "borrower_id",
    };
    // Status lists are 'static discriminants, safe to inline.
    let status_clause = match bucket {
      None => String::new(),
      Some(b) => {
        let list = b
          .statuses()
          .iter()
          .map(|s| format!("'{}'", s.as_str()))
          .collect::<Vec<_>>()
          .join(", ");
        format!("AND status IN ({list})")
      }
    };
    let sql = format!(
      "SELECT {LOAN_COLUMNS} FROM loans
       WHERE {role_col} = ?1 {status_clause}
       ORDER BY requested_at DESC"
    );

    let raws: Vec<RawLoan> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(user_id)], loan_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(recover)?;
    raws.into_iter().map(RawLoan::into_loan).collect()
  }

  async fn accept_loan(
    &self,
    acceptance: Acceptance,
    borrow_anyway: bool,
  ) -> Result<Loan> {
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let loan_id_str = encode_uuid(acceptance.loan_id);
        let raw = fetch_loan(&tx, &loan_id_str)?;
        require_loan_status(&raw, "pending")?;

        // The acceptor saw a specific offer. A re-request in the meantime
        // replaced it, so this acceptance no longer applies.
        if raw.requested_at != encode_dt(acceptance.offer_requested_at) {
          return Err(domain(Error::Conflict(Conflict::OfferChanged)));
        }
        if active_loan_exists(
          &tx,
          &raw.book_id,
          &raw.lender_id,
          &raw.borrower_id,
        )? {
          return Err(domain(Error::Conflict(Conflict::ActiveLoanExists)));
        }

        let at_str = encode_dt(acceptance.at);
        let created = match fetch_access(&tx, &raw.borrower_id, &raw.book_id)? {
          Some(rec) if !borrow_anyway => {
            return Err(domain(Error::AlreadyOwned {
              user_id:  decode_or_nil(&raw.borrower_id),
              book_id:  decode_or_nil(&raw.book_id),
              in_trash: rec.deleted_at.is_some(),
            }));
          }
          Some(_) => false,
          None => {
            tx.execute(
              "INSERT INTO library_access (user_id, book_id, source, created_at)
               VALUES (?1, ?2, 'loan', ?3)",
              rusqlite::params![raw.borrower_id, raw.book_id, at_str],
            )?;
            true
          }
        };

        tx.execute(
          "UPDATE loans SET
             status = 'active', accepted_at = ?1, due_at = ?2,
             created_access_on_accept = ?3
           WHERE loan_id = ?4 AND status = 'pending'",
          rusqlite::params![
            at_str,
            encode_dt(acceptance.due_at),
            created,
            loan_id_str,
          ],
        )?;

        insert_audit(&tx, &loan_id_str, &acceptance.audit, &at_str)?;

        let raw = fetch_loan(&tx, &loan_id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_loan()
  }

  async fn settle_loan(&self, settlement: Settlement) -> Result<Loan> {
    let ended_col = match settlement.to {
      LoanStatus::Returned => Some("returned_at"),
      LoanStatus::Revoked => Some("revoked_at"),
      LoanStatus::Expired => Some("expired_at"),
      _ => None,
    };
    let update_sql = match ended_col {
      Some(col) => format!(
        "UPDATE loans SET status = ?1, {col} = ?2,
           export_available_until = ?3
         WHERE loan_id = ?4 AND status = ?5"
      ),
      None => "UPDATE loans SET status = ?1, export_available_until = ?2
               WHERE loan_id = ?3 AND status = ?4"
        .to_owned(),
    };

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let loan_id_str = encode_uuid(settlement.loan_id);
        let raw = fetch_loan(&tx, &loan_id_str)?;
        require_loan_status(&raw, settlement.from.as_str())?;

        let at_str = encode_dt(settlement.at);
        let to_str = settlement.to.as_str();
        let from_str = settlement.from.as_str();
        let export_str = settlement.export_available_until.map(encode_dt);
        if ended_col.is_some() {
          tx.execute(
            &update_sql,
            rusqlite::params![
              to_str, at_str, export_str, loan_id_str, from_str
            ],
          )?;
        } else {
          tx.execute(
            &update_sql,
            rusqlite::params![to_str, export_str, loan_id_str, from_str],
          )?;
        }

        if settlement.access == AccessDisposition::RemoveIfLoanCreated
          && raw.created_access_on_accept
        {
          // Only ever remove the record this loan created; a purchase that
          // predated the loan stays untouched.
          tx.execute(
            "DELETE FROM library_access
             WHERE user_id = ?1 AND book_id = ?2 AND source = 'loan'",
            rusqlite::params![raw.borrower_id, raw.book_id],
          )?;
        }

        if settlement.expire_pending_renewal {
          let pending: Option<(String, String)> = tx
            .query_row(
              "SELECT renewal_id, requester_user_id FROM renewal_requests
               WHERE loan_id = ?1 AND status = 'pending'",
              rusqlite::params![loan_id_str],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
          if let Some((renewal_id, requester)) = pending {
            tx.execute(
              "UPDATE renewal_requests SET status = 'expired', decided_at = ?1
               WHERE renewal_id = ?2",
              rusqlite::params![at_str, renewal_id],
            )?;
            insert_audit(
              &tx,
              &loan_id_str,
              &AuditRecord {
                actor_user_id:  None,
                target_user_id: Some(decode_or_nil(&requester)),
                action:         AuditAction::RenewalExpired,
                details:        json!({ "renewal_id": renewal_id }),
              },
              &at_str,
            )?;
          }
        }

        insert_audit(&tx, &loan_id_str, &settlement.audit, &at_str)?;

        let raw = fetch_loan(&tx, &loan_id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_loan()
  }

  async fn claim_reminder(
    &self,
    loan_id: Uuid,
    marker: ReminderMarker,
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let col = match marker {
      ReminderMarker::DueSoon => "due_soon_notified_at",
      ReminderMarker::Overdue => "overdue_notified_at",
    };
    let sql = format!(
      "UPDATE loans SET {col} = ?1
       WHERE loan_id = ?2 AND status = 'active' AND {col} IS NULL"
    );
    self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          &sql,
          rusqlite::params![encode_dt(now), encode_uuid(loan_id)],
        )?;
        Ok(changed == 1)
      })
      .await
      .map_err(recover)
  }

  // ── Renewals ──────────────────────────────────────────────────────────

  async fn create_renewal(&self, proposal: NewRenewal) -> Result<RenewalRequest> {
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let loan_id_str = encode_uuid(proposal.loan_id);
        let raw_loan = fetch_loan(&tx, &loan_id_str)?;
        require_loan_status(&raw_loan, "active")?;

        let pending_exists = tx
          .query_row(
            "SELECT 1 FROM renewal_requests
             WHERE loan_id = ?1 AND status = 'pending'",
            rusqlite::params![loan_id_str],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if pending_exists {
          return Err(domain(Error::Conflict(Conflict::PendingRenewalExists)));
        }

        let at_str = encode_dt(proposal.at);
        let renewal_id_str = encode_uuid(Uuid::new_v4());
        tx.execute(
          "INSERT INTO renewal_requests (
             renewal_id, loan_id, status, requested_extra_days,
             previous_due_at, proposed_due_at, requester_user_id,
             requested_at
           ) VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            renewal_id_str,
            loan_id_str,
            proposal.extra_days,
            encode_dt(proposal.previous_due_at),
            encode_dt(proposal.proposed_due_at),
            encode_uuid(proposal.requester_user_id),
            at_str,
          ],
        )?;

        insert_audit(&tx, &loan_id_str, &proposal.audit, &at_str)?;

        let raw = fetch_renewal(&tx, &renewal_id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_renewal()
  }

  async fn decide_renewal(
    &self,
    decision: RenewalDecision,
  ) -> Result<RenewalRequest> {
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let renewal_id_str = encode_uuid(decision.renewal_id);
        let raw = fetch_renewal(&tx, &renewal_id_str)?;
        if raw.status != "pending" {
          return Err(domain(Error::InvalidState {
            entity:   "renewal",
            expected: "pending",
            actual:   raw.status.clone(),
          }));
        }

        let at_str = encode_dt(decision.at);
        let loan_id_str = encode_uuid(decision.loan_id);
        if let Some(new_due_at) = decision.new_due_at {
          let raw_loan = fetch_loan(&tx, &loan_id_str)?;
          require_loan_status(&raw_loan, "active")?;
          // The new deadline gets a fresh set of reminders.
          tx.execute(
            "UPDATE loans SET
               due_at = ?1, duration_days = duration_days + ?2,
               due_soon_notified_at = NULL, overdue_notified_at = NULL
             WHERE loan_id = ?3 AND status = 'active'",
            rusqlite::params![
              encode_dt(new_due_at),
              decision.extends_by_days.unwrap_or(0),
              loan_id_str,
            ],
          )?;
        }

        tx.execute(
          "UPDATE renewal_requests SET
             status = ?1, reviewer_user_id = ?2, decided_at = ?3
           WHERE renewal_id = ?4 AND status = 'pending'",
          rusqlite::params![
            decision.to.as_str(),
            decision.reviewer.map(encode_uuid),
            at_str,
            renewal_id_str,
          ],
        )?;

        insert_audit(&tx, &loan_id_str, &decision.audit, &at_str)?;

        let raw = fetch_renewal(&tx, &renewal_id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_renewal()
  }

  async fn get_renewal(&self, renewal_id: Uuid) -> Result<Option<RenewalRequest>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {RENEWAL_COLUMNS} FROM renewal_requests
                 WHERE renewal_id = ?1"
              ),
              rusqlite::params![encode_uuid(renewal_id)],
              renewal_from_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(recover)?;
    raw.map(RawRenewal::into_renewal).transpose()
  }

  async fn find_pending_renewal(
    &self,
    loan_id: Uuid,
  ) -> Result<Option<RenewalRequest>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {RENEWAL_COLUMNS} FROM renewal_requests
                 WHERE loan_id = ?1 AND status = 'pending'"
              ),
              rusqlite::params![encode_uuid(loan_id)],
              renewal_from_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(recover)?;
    raw.map(RawRenewal::into_renewal).transpose()
  }

  async fn list_renewals(&self, loan_id: Uuid) -> Result<Vec<RenewalRequest>> {
    let raws: Vec<RawRenewal> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RENEWAL_COLUMNS} FROM renewal_requests
           WHERE loan_id = ?1 ORDER BY requested_at ASC, rowid ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(loan_id)], renewal_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(recover)?;
    raws.into_iter().map(RawRenewal::into_renewal).collect()
  }

  // ── Library access ────────────────────────────────────────────────────

  async fn get_access(
    &self,
    user_id: Uuid,
    book_id: Uuid,
  ) -> Result<Option<LibraryAccessRecord>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(fetch_access(
          conn,
          &encode_uuid(user_id),
          &encode_uuid(book_id),
        )?)
      })
      .await
      .map_err(recover)?;
    raw.map(RawAccess::into_access).transpose()
  }

  async fn grant_access(
    &self,
    user_id: Uuid,
    book_id: Uuid,
    source: AccessSource,
    now: DateTime<Utc>,
  ) -> Result<LibraryAccessRecord> {
    let record = LibraryAccessRecord {
      user_id,
      book_id,
      source,
      created_at: now,
      deleted_at: None,
    };
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let user_str = encode_uuid(user_id);
        let book_str = encode_uuid(book_id);
        if let Some(rec) = fetch_access(&tx, &user_str, &book_str)? {
          return Err(domain(Error::AlreadyOwned {
            user_id,
            book_id,
            in_trash: rec.deleted_at.is_some(),
          }));
        }
        tx.execute(
          "INSERT INTO library_access (user_id, book_id, source, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![user_str, book_str, source.as_str(), encode_dt(now)],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(recover)?;
    Ok(record)
  }

  async fn trash_access(
    &self,
    user_id: Uuid,
    book_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<LibraryAccessRecord> {
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let user_str = encode_uuid(user_id);
        let book_str = encode_uuid(book_id);
        let existing = fetch_access(&tx, &user_str, &book_str)?.ok_or_else(
          || domain(Error::NotFound(Resource::AccessRecord, book_id)),
        )?;
        // Trashing twice keeps the original deletion time.
        if existing.deleted_at.is_none() {
          tx.execute(
            "UPDATE library_access SET deleted_at = ?1
             WHERE user_id = ?2 AND book_id = ?3",
            rusqlite::params![encode_dt(now), user_str, book_str],
          )?;
        }
        let raw = fetch_access(&tx, &user_str, &book_str)?.ok_or_else(
          || domain(Error::NotFound(Resource::AccessRecord, book_id)),
        )?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_access()
  }

  // ── Annotations ───────────────────────────────────────────────────────

  async fn insert_annotation(
    &self,
    input: NewAnnotation,
    now: DateTime<Utc>,
  ) -> Result<Annotation> {
    let annotation = Annotation {
      annotation_id: Uuid::new_v4(),
      book_id:       input.book_id,
      author_id:     input.author_id,
      value:         input.value,
      scope:         input.scope,
      revision:      1,
      created_at:    now,
      updated_at:    now,
    };

    let id_str = encode_uuid(annotation.annotation_id);
    let book_str = encode_uuid(annotation.book_id);
    let author_str = encode_uuid(annotation.author_id);
    let kind_str = annotation.value.kind().as_str();
    let value_json = annotation.value.to_json()?.to_string();
    let scope_str = annotation.scope.as_str();
    let now_str = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO annotations (
             annotation_id, book_id, author_id, kind, value_json, scope,
             revision, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)",
          rusqlite::params![
            id_str, book_str, author_str, kind_str, value_json, scope_str,
            now_str, now_str,
          ],
        )?;
        Ok(())
      })
      .await
      .map_err(recover)?;

    Ok(annotation)
  }

  async fn get_annotation(
    &self,
    annotation_id: Uuid,
  ) -> Result<Option<Annotation>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ANNOTATION_COLUMNS} FROM annotations
                 WHERE annotation_id = ?1"
              ),
              rusqlite::params![encode_uuid(annotation_id)],
              annotation_from_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(recover)?;
    raw.map(RawAnnotation::into_annotation).transpose()
  }

  async fn list_annotations(&self, book_id: Uuid) -> Result<Vec<Annotation>> {
    let raws: Vec<RawAnnotation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ANNOTATION_COLUMNS} FROM annotations
           WHERE book_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![encode_uuid(book_id)],
            annotation_from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(recover)?;
    raws.into_iter().map(RawAnnotation::into_annotation).collect()
  }

  async fn update_annotation(
    &self,
    annotation_id: Uuid,
    value: AnnotationValue,
    expected_revision: Option<i64>,
    now: DateTime<Utc>,
  ) -> Result<Annotation> {
    let kind_str = value.kind().as_str();
    let value_json = value.to_json()?.to_string();

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let id_str = encode_uuid(annotation_id);
        let raw = fetch_annotation(&tx, &id_str)?;
        if let Some(expected) = expected_revision {
          if raw.revision != expected {
            return Err(domain(Error::Conflict(Conflict::RevisionMismatch {
              current_revision: raw.revision,
            })));
          }
        }
        tx.execute(
          "UPDATE annotations SET
             kind = ?1, value_json = ?2, revision = revision + 1,
             updated_at = ?3
           WHERE annotation_id = ?4",
          rusqlite::params![kind_str, value_json, encode_dt(now), id_str],
        )?;
        let raw = fetch_annotation(&tx, &id_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await
      .map_err(recover)?;
    raw.into_annotation()
  }

  async fn delete_annotation(
    &self,
    annotation_id: Uuid,
    expected_revision: Option<i64>,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let id_str = encode_uuid(annotation_id);
        let raw = fetch_annotation(&tx, &id_str)?;
        if let Some(expected) = expected_revision {
          if raw.revision != expected {
            return Err(domain(Error::Conflict(Conflict::RevisionMismatch {
              current_revision: raw.revision,
            })));
          }
        }
        tx.execute(
          "DELETE FROM annotations WHERE annotation_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(recover)
  }

  // ── Audit ─────────────────────────────────────────────────────────────

  async fn list_audit_events(&self, loan_id: Uuid) -> Result<Vec<AuditEvent>> {
    let raws: Vec<RawAuditEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {AUDIT_COLUMNS} FROM audit_events
           WHERE loan_id = ?1 ORDER BY recorded_at ASC, rowid ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(loan_id)], audit_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(recover)?;
    raws.into_iter().map(RawAuditEvent::into_event).collect()
  }

  async fn record_export(
    &self,
    loan_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
    details: serde_json::Value,
  ) -> Result<AuditEvent> {
    let record = AuditRecord {
      actor_user_id:  Some(actor_id),
      target_user_id: None,
      action:         AuditAction::Exported,
      details:        details.clone(),
    };
    let event_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let loan_id_str = encode_uuid(loan_id);
        fetch_loan(&tx, &loan_id_str)?;
        let event_id = insert_audit(&tx, &loan_id_str, &record, &encode_dt(at))?;
        tx.commit()?;
        Ok(event_id)
      })
      .await
      .map_err(recover)?;

    Ok(AuditEvent {
      event_id,
      loan_id,
      actor_user_id: Some(actor_id),
      target_user_id: None,
      action: AuditAction::Exported,
      details,
      recorded_at: at,
    })
  }
}

/// For error payloads composed inside closures, where the id has already
/// been round-tripped through its encoded form.
fn decode_or_nil(s: &str) -> Uuid {
  Uuid::parse_str(s).unwrap_or(Uuid::nil())
}
