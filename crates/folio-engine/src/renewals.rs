//! Renewal negotiation operations.
//!
//! A renewal is the borrower's side of the due-date conversation; the
//! decision is the lender's. Approval is the only path that touches the
//! loan, and the store commits that move atomically with the renewal's own
//! status change.

use folio_core::{
  Result,
  clock::Clock,
  collab::NotificationKind,
  error::{Error, Resource},
  renewal::{self, RenewalRequest},
  store::LendingStore,
};
use uuid::Uuid;

use crate::{Engine, loans::due_label};

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  /// Borrower asks for `extra_days` more time on an active loan. At most
  /// one renewal per loan can be pending.
  pub async fn request_renewal(
    &self,
    loan_id: Uuid,
    actor: Uuid,
    extra_days: u32,
  ) -> Result<RenewalRequest> {
    let loan = self.require_loan(loan_id).await?;
    let proposal = renewal::propose(&loan, actor, extra_days, self.now())?;
    let at = proposal.at;
    let request = self.store().create_renewal(proposal).await?;

    tracing::info!(
      renewal_id = %request.renewal_id,
      loan_id = %loan.loan_id,
      extra_days,
      "renewal requested"
    );
    self.notify(
      loan.lender_id,
      NotificationKind::RenewalRequested,
      &loan,
      at,
      "Renewal requested",
      format!(
        "{} asked to keep {} for {extra_days} more days.",
        self.user_label(loan.borrower_id),
        self.book_label(loan.book_id),
      ),
    );
    Ok(request)
  }

  /// Lender grants the extension. Moves the loan's due date and clears its
  /// reminder markers, so the new deadline gets reminders of its own.
  ///
  /// The loan must still be active. A pending renewal on a loan the sweep
  /// has since expired was already force-closed by the cascade.
  pub async fn approve_renewal(
    &self,
    renewal_id: Uuid,
    actor: Uuid,
  ) -> Result<RenewalRequest> {
    let request = self.require_renewal(renewal_id).await?;
    let loan = self.require_loan(request.loan_id).await?;
    let decision = renewal::approve(&request, &loan, actor, self.now())?;
    let at = decision.at;
    let request = self.store().decide_renewal(decision).await?;
    let loan = self.require_loan(request.loan_id).await?;

    tracing::info!(
      renewal_id = %request.renewal_id,
      loan_id = %loan.loan_id,
      new_due_at = ?loan.due_at,
      "renewal approved"
    );
    self.notify(
      request.requester_user_id,
      NotificationKind::RenewalApproved,
      &loan,
      at,
      "Renewal approved",
      format!(
        "{} extended your loan of {}. Now due back {}.",
        self.user_label(loan.lender_id),
        self.book_label(loan.book_id),
        due_label(&loan),
      ),
    );
    Ok(request)
  }

  /// Lender turns the request down. The loan keeps its deadline.
  pub async fn deny_renewal(
    &self,
    renewal_id: Uuid,
    actor: Uuid,
  ) -> Result<RenewalRequest> {
    let request = self.require_renewal(renewal_id).await?;
    let loan = self.require_loan(request.loan_id).await?;
    let decision = renewal::deny(&request, &loan, actor, self.now())?;
    let at = decision.at;
    let request = self.store().decide_renewal(decision).await?;

    tracing::info!(
      renewal_id = %request.renewal_id,
      loan_id = %loan.loan_id,
      "renewal denied"
    );
    self.notify(
      request.requester_user_id,
      NotificationKind::RenewalDenied,
      &loan,
      at,
      "Renewal declined",
      format!(
        "{} declined to extend your loan of {}. Still due back {}.",
        self.user_label(loan.lender_id),
        self.book_label(loan.book_id),
        due_label(&loan),
      ),
    );
    Ok(request)
  }

  /// Requester withdraws their own pending request.
  pub async fn cancel_renewal(
    &self,
    renewal_id: Uuid,
    actor: Uuid,
  ) -> Result<RenewalRequest> {
    let request = self.require_renewal(renewal_id).await?;
    let loan = self.require_loan(request.loan_id).await?;
    let decision = renewal::cancel(&request, &loan, actor, self.now())?;
    let at = decision.at;
    let request = self.store().decide_renewal(decision).await?;

    tracing::info!(
      renewal_id = %request.renewal_id,
      loan_id = %loan.loan_id,
      "renewal cancelled"
    );
    self.notify(
      loan.lender_id,
      NotificationKind::RenewalCancelled,
      &loan,
      at,
      "Renewal withdrawn",
      format!(
        "{} withdrew their renewal request for {}.",
        self.user_label(request.requester_user_id),
        self.book_label(loan.book_id),
      ),
    );
    Ok(request)
  }

  /// A loan's full negotiation history, oldest first.
  pub async fn list_renewals(
    &self,
    loan_id: Uuid,
  ) -> Result<Vec<RenewalRequest>> {
    self.require_loan(loan_id).await?;
    self.store().list_renewals(loan_id).await
  }

  async fn require_renewal(&self, renewal_id: Uuid) -> Result<RenewalRequest> {
    self
      .store()
      .get_renewal(renewal_id)
      .await?
      .ok_or(Error::NotFound(Resource::Renewal, renewal_id))
  }
}
