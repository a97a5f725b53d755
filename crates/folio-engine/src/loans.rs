//! Loan operations, the mutating surface of the loan state machine.
//!
//! Each operation validates the actor and the current status through the
//! pure builders in [`folio_core::transition`], commits the resulting
//! transition value through one atomic store call, and notifies the other
//! party once the commit has landed. A notification is never sent for a
//! transition that did not commit.

use chrono::{DateTime, Utc};
use folio_core::{
  Result,
  audit::AuditEvent,
  clock::Clock,
  collab::NotificationKind,
  error::{Denial, Error, Resource},
  loan::{
    AnnotationVisibility, Capabilities, LendingPolicy, Loan, LoanBucket,
    LoanRequest, LoanRole,
  },
  store::LendingStore,
  transition,
};
use uuid::Uuid;

use crate::{Engine, export::ExportPayload};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Per-request deviations from the lender's standing policy. Anything left
/// `None` falls back to the social graph's `lending_defaults`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyOverrides {
  pub duration_days:            Option<u32>,
  pub grace_days:               Option<u32>,
  pub capabilities:             Option<Capabilities>,
  pub annotation_visibility:    Option<AnnotationVisibility>,
  pub share_lender_annotations: Option<bool>,
}

impl PolicyOverrides {
  pub fn apply_to(self, base: LendingPolicy) -> LendingPolicy {
    LendingPolicy {
      duration_days: self.duration_days.unwrap_or(base.duration_days),
      grace_days: self.grace_days.unwrap_or(base.grace_days),
      capabilities: self.capabilities.unwrap_or(base.capabilities),
      annotation_visibility: self
        .annotation_visibility
        .unwrap_or(base.annotation_visibility),
      share_lender_annotations: self
        .share_lender_annotations
        .unwrap_or(base.share_lender_annotations),
    }
  }
}

/// A lender offering one book to one borrower.
#[derive(Debug, Clone)]
pub struct LoanOffer {
  pub lender_id:   Uuid,
  pub borrower_id: Uuid,
  pub book_id:     Uuid,
  pub message:     Option<String>,
  pub overrides:   PolicyOverrides,
}

/// The outcome of `return_loan`: the settled loan, plus the annotation
/// snapshot when the borrower asked for one in the same call.
#[derive(Debug, Clone)]
pub struct LoanReturn {
  pub loan:   Loan,
  pub export: Option<ExportPayload>,
}

// ─── Operations ──────────────────────────────────────────────────────────────

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  /// Offer a book on loan, or refresh the already-open offer for the same
  /// (book, lender, borrower). Terms default to the lender's standing
  /// policy unless overridden per request.
  pub async fn request_loan(&self, offer: LoanOffer) -> Result<Loan> {
    if offer.lender_id == offer.borrower_id {
      return Err(Error::Forbidden(Denial::SelfLoan));
    }
    if !self.social().may_lend_to(offer.lender_id, offer.borrower_id) {
      return Err(Error::Forbidden(Denial::LendingNotPermitted));
    }

    let terms = offer
      .overrides
      .apply_to(self.social().lending_defaults(offer.lender_id));
    let now = self.now();
    let loan = self
      .store()
      .upsert_pending_loan(
        LoanRequest {
          book_id:     offer.book_id,
          lender_id:   offer.lender_id,
          borrower_id: offer.borrower_id,
          message:     offer.message,
          terms,
        },
        now,
      )
      .await?;

    tracing::info!(
      loan_id = %loan.loan_id,
      lender = %loan.lender_id,
      borrower = %loan.borrower_id,
      "loan offer recorded"
    );
    self.notify(
      loan.borrower_id,
      NotificationKind::LoanRequested,
      &loan,
      now,
      "Loan offer",
      format!(
        "{} offered to lend you {} for {} days.",
        self.user_label(loan.lender_id),
        self.book_label(loan.book_id),
        loan.terms.duration_days,
      ),
    );
    Ok(loan)
  }

  /// Borrower accepts a pending offer. `borrow_anyway` confirms borrowing
  /// a book the borrower already has in their library; without it such an
  /// accept fails with the recoverable `AlreadyOwned`.
  pub async fn accept_loan(
    &self,
    loan_id: Uuid,
    actor: Uuid,
    borrow_anyway: bool,
  ) -> Result<Loan> {
    let loan = self.require_loan(loan_id).await?;
    let acceptance = transition::accept(&loan, actor, self.now())?;
    let at = acceptance.at;
    let loan = self.store().accept_loan(acceptance, borrow_anyway).await?;

    tracing::info!(loan_id = %loan.loan_id, "loan accepted");
    self.notify(
      loan.lender_id,
      NotificationKind::LoanAccepted,
      &loan,
      at,
      "Loan accepted",
      format!(
        "{} accepted your loan of {}. Due back {}.",
        self.user_label(loan.borrower_id),
        self.book_label(loan.book_id),
        due_label(&loan),
      ),
    );
    Ok(loan)
  }

  /// Borrower declines a pending offer.
  pub async fn reject_loan(&self, loan_id: Uuid, actor: Uuid) -> Result<Loan> {
    let loan = self.require_loan(loan_id).await?;
    let settlement = transition::reject(&loan, actor, self.now())?;
    let at = settlement.at;
    let loan = self.store().settle_loan(settlement).await?;

    tracing::info!(loan_id = %loan.loan_id, "loan offer rejected");
    self.notify(
      loan.lender_id,
      NotificationKind::LoanRejected,
      &loan,
      at,
      "Loan declined",
      format!(
        "{} declined your offer of {}.",
        self.user_label(loan.borrower_id),
        self.book_label(loan.book_id),
      ),
    );
    Ok(loan)
  }

  /// Lender withdraws a pending offer they made.
  pub async fn cancel_loan(&self, loan_id: Uuid, actor: Uuid) -> Result<Loan> {
    let loan = self.require_loan(loan_id).await?;
    let settlement = transition::cancel(&loan, actor, self.now())?;
    let at = settlement.at;
    let loan = self.store().settle_loan(settlement).await?;

    tracing::info!(loan_id = %loan.loan_id, "loan offer cancelled");
    self.notify(
      loan.borrower_id,
      NotificationKind::LoanCancelled,
      &loan,
      at,
      "Loan offer withdrawn",
      format!(
        "{} withdrew the offer of {}.",
        self.user_label(loan.lender_id),
        self.book_label(loan.book_id),
      ),
    );
    Ok(loan)
  }

  /// Lender ends an active loan early. The borrower keeps an export window
  /// for their annotations.
  pub async fn revoke_loan(&self, loan_id: Uuid, actor: Uuid) -> Result<Loan> {
    let loan = self.require_loan(loan_id).await?;
    let settlement = transition::revoke(&loan, actor, self.now())?;
    let at = settlement.at;
    let loan = self.store().settle_loan(settlement).await?;

    tracing::info!(loan_id = %loan.loan_id, "loan revoked");
    self.notify(
      loan.borrower_id,
      NotificationKind::LoanRevoked,
      &loan,
      at,
      "Loan revoked",
      format!(
        "{} took back {}. You can export your annotations until {}.",
        self.user_label(loan.lender_id),
        self.book_label(loan.book_id),
        window_label(&loan),
      ),
    );
    Ok(loan)
  }

  /// Borrower gives the book back. With `with_export`, the same call also
  /// produces the annotation snapshot, saving a round trip before the
  /// borrower loses interest.
  pub async fn return_loan(
    &self,
    loan_id: Uuid,
    actor: Uuid,
    with_export: bool,
  ) -> Result<LoanReturn> {
    let loan = self.require_loan(loan_id).await?;
    let settlement = transition::return_to_lender(&loan, actor, self.now())?;
    let at = settlement.at;
    let loan = self.store().settle_loan(settlement).await?;

    tracing::info!(loan_id = %loan.loan_id, "loan returned");
    self.notify(
      loan.lender_id,
      NotificationKind::LoanReturned,
      &loan,
      at,
      "Book returned",
      format!(
        "{} returned {}.",
        self.user_label(loan.borrower_id),
        self.book_label(loan.book_id),
      ),
    );

    let export = if with_export {
      Some(self.build_and_record_export(&loan, actor, at).await?)
    } else {
      None
    };
    Ok(LoanReturn { loan, export })
  }

  /// The direct borrow path: pull a book straight out of a friend's
  /// library, skipping the offer/accept negotiation. Terms are always the
  /// lender's current standing policy.
  pub async fn borrow_from_library(
    &self,
    borrower_id: Uuid,
    lender_id: Uuid,
    book_id: Uuid,
    borrow_anyway: bool,
  ) -> Result<Loan> {
    if borrower_id == lender_id {
      return Err(Error::Forbidden(Denial::SelfLoan));
    }
    if !self.social().may_borrow_from(borrower_id, lender_id) {
      return Err(Error::Forbidden(Denial::BorrowingNotPermitted));
    }

    let now = self.now();
    let loan = self
      .store()
      .create_active_loan(
        LoanRequest {
          book_id,
          lender_id,
          borrower_id,
          message: None,
          terms: self.social().lending_defaults(lender_id),
        },
        now,
        borrow_anyway,
      )
      .await?;

    tracing::info!(
      loan_id = %loan.loan_id,
      lender = %loan.lender_id,
      borrower = %loan.borrower_id,
      "direct borrow"
    );
    self.notify(
      loan.lender_id,
      NotificationKind::LoanAccepted,
      &loan,
      now,
      "Book borrowed",
      format!(
        "{} borrowed {} from your library. Due back {}.",
        self.user_label(loan.borrower_id),
        self.book_label(loan.book_id),
        due_label(&loan),
      ),
    );
    Ok(loan)
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub async fn get_loan(&self, loan_id: Uuid) -> Result<Loan> {
    self.require_loan(loan_id).await
  }

  /// Loans this user has offered, newest first, optionally narrowed to a
  /// status bucket.
  pub async fn list_for_lender(
    &self,
    lender_id: Uuid,
    bucket: Option<LoanBucket>,
  ) -> Result<Vec<Loan>> {
    self
      .store()
      .list_loans(lender_id, LoanRole::Lender, bucket)
      .await
  }

  /// Loans this user has been offered or holds, newest first.
  pub async fn list_for_borrower(
    &self,
    borrower_id: Uuid,
    bucket: Option<LoanBucket>,
  ) -> Result<Vec<Loan>> {
    self
      .store()
      .list_loans(borrower_id, LoanRole::Borrower, bucket)
      .await
  }

  /// A loan's full audit trail, oldest first.
  pub async fn list_audit_events(
    &self,
    loan_id: Uuid,
  ) -> Result<Vec<AuditEvent>> {
    self.require_loan(loan_id).await?;
    self.store().list_audit_events(loan_id).await
  }

  pub(crate) async fn require_loan(&self, loan_id: Uuid) -> Result<Loan> {
    self
      .store()
      .get_loan(loan_id)
      .await?
      .ok_or(Error::NotFound(Resource::Loan, loan_id))
  }
}

// ─── Label helpers ───────────────────────────────────────────────────────────

pub(crate) fn due_label(loan: &Loan) -> String {
  date_label(loan.due_at)
}

pub(crate) fn window_label(loan: &Loan) -> String {
  date_label(loan.export_available_until)
}

fn date_label(at: Option<DateTime<Utc>>) -> String {
  match at {
    Some(at) => at.format("%Y-%m-%d").to_string(),
    None => "n/a".into(),
  }
}
