//! The entitlement resolver and lazy expiration.
//!
//! Expiration has no writer of its own. An active loan past its effective
//! end is settled by whichever path notices first: an entitlement read here,
//! an export, or the background sweep. All of them funnel through
//! [`Engine::commit_expiration`], and the store's status guard makes sure
//! only one of them wins.

use chrono::{DateTime, Utc};
use folio_core::{
  Result,
  access::Entitlement,
  clock::Clock,
  collab::NotificationKind,
  error::Error,
  loan::Loan,
  store::LendingStore,
  transition,
};
use uuid::Uuid;

use crate::{Engine, loans::window_label};

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  /// Where `user_id` stands with `book_id` right now.
  ///
  /// Reads are the first place an overrun deadline becomes visible, so the
  /// resolver settles the expiration before answering. A borrower can never
  /// open a book through a loan whose effective end has passed, however
  /// long ago the sweep last ran.
  pub async fn resolve_entitlement(
    &self,
    user_id: Uuid,
    book_id: Uuid,
  ) -> Result<Entitlement> {
    let now = self.now();
    let mut borrow = self.store().find_active_borrow(user_id, book_id).await?;

    if let Some(loan) = &borrow {
      if loan.is_past_effective_end(now) {
        self.commit_expiration(loan, now).await?;
        // Re-read rather than patching the snapshot: settling removed the
        // loan-created access record too, and another live borrow from a
        // different lender may remain.
        borrow = self.store().find_active_borrow(user_id, book_id).await?;
      }
    }

    let library_access = self.store().get_access(user_id, book_id).await?;
    Ok(Entitlement { library_access, active_borrow_loan: borrow })
  }

  /// Settle an active loan past its effective end as expired, and tell both
  /// parties. Returns `None` when another path settled the loan first;
  /// losing that race sends nothing.
  pub(crate) async fn commit_expiration(
    &self,
    loan: &Loan,
    now: DateTime<Utc>,
  ) -> Result<Option<Loan>> {
    let settlement = transition::expire(loan, now)?;
    let expired = match self.store().settle_loan(settlement).await {
      Ok(loan) => loan,
      Err(Error::InvalidState { .. }) => return Ok(None),
      Err(err) => return Err(err),
    };

    tracing::info!(
      loan_id = %expired.loan_id,
      due_at = ?expired.due_at,
      grace_days = expired.terms.grace_days,
      "loan expired"
    );
    self.notify(
      expired.borrower_id,
      NotificationKind::LoanExpired,
      &expired,
      now,
      "Loan expired",
      format!(
        "Your loan of {} has expired. You can export your annotations \
         until {}.",
        self.book_label(expired.book_id),
        window_label(&expired),
      ),
    );
    self.notify(
      expired.lender_id,
      NotificationKind::LoanExpired,
      &expired,
      now,
      "Loan expired",
      format!(
        "Your loan of {} to {} has expired.",
        self.book_label(expired.book_id),
        self.user_label(expired.borrower_id),
      ),
    );
    Ok(Some(expired))
  }
}
