//! The maintenance sweep.
//!
//! One pass over every active loan: settle the overrun ones, remind about
//! approaching and missed deadlines. The sweep holds no state of its own;
//! expiration goes through the same guarded commit as the lazy read path,
//! and reminders are gated on markers claimed with a guarded update. Runs
//! at any frequency without double-sending.

use chrono::{DateTime, Duration, Utc};
use folio_core::{
  Result,
  clock::Clock,
  collab::NotificationKind,
  loan::{Loan, ReminderMarker},
  store::LendingStore,
};

use crate::{Engine, loans::due_label};

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub expired:           usize,
  pub due_soon_notified: usize,
  pub overdue_notified:  usize,
}

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  pub async fn sweep(&self) -> Result<SweepReport> {
    let now = self.now();
    let mut report = SweepReport::default();

    for loan in self.store().list_active_loans().await? {
      if loan.is_past_effective_end(now) {
        if self.commit_expiration(&loan, now).await?.is_some() {
          report.expired += 1;
        }
        continue;
      }
      let Some(due_at) = loan.due_at else {
        continue;
      };

      if due_at < now {
        // Past due but inside the grace period.
        if loan.overdue_notified_at.is_none()
          && self
            .store()
            .claim_reminder(loan.loan_id, ReminderMarker::Overdue, now)
            .await?
        {
          self.send_overdue(&loan, now);
          report.overdue_notified += 1;
        }
      } else if due_at - now
        <= Duration::days(self.config().due_soon_days as i64)
        && loan.due_soon_notified_at.is_none()
        && self
          .store()
          .claim_reminder(loan.loan_id, ReminderMarker::DueSoon, now)
          .await?
      {
        self.send_due_soon(&loan, now);
        report.due_soon_notified += 1;
      }
    }

    tracing::info!(
      expired = report.expired,
      due_soon = report.due_soon_notified,
      overdue = report.overdue_notified,
      "sweep complete"
    );
    Ok(report)
  }

  fn send_due_soon(&self, loan: &Loan, now: DateTime<Utc>) {
    self.notify(
      loan.borrower_id,
      NotificationKind::DueSoon,
      loan,
      now,
      "Loan due soon",
      format!(
        "{} is due back to {} on {}.",
        self.book_label(loan.book_id),
        self.user_label(loan.lender_id),
        due_label(loan),
      ),
    );
  }

  fn send_overdue(&self, loan: &Loan, now: DateTime<Utc>) {
    self.notify(
      loan.borrower_id,
      NotificationKind::Overdue,
      loan,
      now,
      "Loan overdue",
      format!(
        "{} was due back on {}. Return it or ask {} for more time.",
        self.book_label(loan.book_id),
        due_label(loan),
        self.user_label(loan.lender_id),
      ),
    );
    self.notify(
      loan.lender_id,
      NotificationKind::Overdue,
      loan,
      now,
      "Loan overdue",
      format!(
        "{}, lent to {}, was due back on {}.",
        self.book_label(loan.book_id),
        self.user_label(loan.borrower_id),
        due_label(loan),
      ),
    );
  }
}
