//! The operations layer of the Folio lending engine.
//!
//! [`Engine`] is what the surrounding application calls: route handlers for
//! every mutating loan/renewal/annotation action, and every read of
//! loan-gated data. It is generic over any [`LendingStore`] and [`Clock`],
//! validates actors and transitions via `folio-core`, commits through the
//! store's atomic transition methods, and fires collaborator notifications
//! only after a commit has succeeded.
//!
//! # Construction
//!
//! ```rust,ignore
//! let engine = Engine::new(store, SystemClock)
//!   .with_social_graph(graph)
//!   .with_notifier(sink);
//! ```

pub mod annotations;
pub mod entitlement;
pub mod export;
pub mod loans;
pub mod renewals;
pub mod sweep;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use folio_core::{
  clock::{Clock, SystemClock},
  collab::{
    Directory, EmptyDirectory, Notification, NotificationKind, Notifier,
    NullNotifier, OpenSocialGraph, SocialGraph, event_key,
  },
  loan::Loan,
  store::LendingStore,
};
use serde::Deserialize;
use uuid::Uuid;

pub use export::ExportPayload;
pub use loans::{LoanOffer, LoanReturn, PolicyOverrides};
pub use sweep::SweepReport;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tunables for the engine. Everything has a sensible default; deployments
/// override via the daemon's TOML config.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How many days before `due_at` the due-soon reminder fires.
  pub due_soon_days: u32,
}

impl Default for EngineConfig {
  fn default() -> Self { Self { due_soon_days: 2 } }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The lending engine. One instance serves all concurrent callers; every
/// operation is `&self`.
pub struct Engine<S, C = SystemClock> {
  store:     S,
  clock:     C,
  social:    Arc<dyn SocialGraph>,
  notifier:  Arc<dyn Notifier>,
  directory: Arc<dyn Directory>,
  config:    EngineConfig,
}

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  /// An engine with an open social graph, no notification sink, and an
  /// empty directory. Wire real collaborators with the `with_*` builders.
  pub fn new(store: S, clock: C) -> Self {
    Self {
      store,
      clock,
      social: Arc::new(OpenSocialGraph),
      notifier: Arc::new(NullNotifier),
      directory: Arc::new(EmptyDirectory),
      config: EngineConfig::default(),
    }
  }

  pub fn with_social_graph(mut self, social: Arc<dyn SocialGraph>) -> Self {
    self.social = social;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
    self.directory = directory;
    self
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  /// The backing store, for collaborating subsystems that share it (the
  /// purchase/upload flow writes library access records through here).
  pub fn store(&self) -> &S { &self.store }

  pub(crate) fn config(&self) -> &EngineConfig { &self.config }

  pub(crate) fn social(&self) -> &dyn SocialGraph { self.social.as_ref() }

  pub(crate) fn now(&self) -> DateTime<Utc> { self.clock.now() }

  // ── Notification plumbing ─────────────────────────────────────────────

  /// Fire-and-forget dispatch to the notification sink. Only called after
  /// the transition it announces has committed. Meta is derived from the
  /// loan snapshot so sinks that format their own copy get the deadline or
  /// window as data, not prose.
  pub(crate) fn notify(
    &self,
    user_id: Uuid,
    kind: NotificationKind,
    loan: &Loan,
    at: DateTime<Utc>,
    title: impl Into<String>,
    body: impl Into<String>,
  ) {
    let meta = match kind {
      NotificationKind::LoanAccepted
      | NotificationKind::RenewalApproved
      | NotificationKind::DueSoon
      | NotificationKind::Overdue => {
        loan.due_at.map(|due| serde_json::json!({ "due_at": due }))
      }
      NotificationKind::LoanReturned
      | NotificationKind::LoanRevoked
      | NotificationKind::LoanExpired => loan
        .export_available_until
        .map(|until| serde_json::json!({ "export_available_until": until })),
      _ => None,
    };
    self.notifier.notify(Notification {
      user_id,
      event_key: event_key(loan.loan_id, kind.as_str(), at),
      kind,
      title: title.into(),
      body: body.into(),
      loan_id: Some(loan.loan_id),
      meta,
    });
  }

  /// Book label for notification and export text: the catalogue title when
  /// the directory knows one, the bare id otherwise.
  pub(crate) fn book_label(&self, book_id: Uuid) -> String {
    self
      .directory
      .book_title(book_id)
      .unwrap_or_else(|| format!("book {book_id}"))
  }

  pub(crate) fn user_label(&self, user_id: Uuid) -> String {
    self
      .directory
      .user_name(user_id)
      .unwrap_or_else(|| format!("user {user_id}"))
  }

  pub(crate) fn directory(&self) -> &dyn Directory {
    self.directory.as_ref()
  }
}
