//! Annotation export — the borrower's way out with their own words.
//!
//! The payload is a versioned, self-contained JSON document: the loan, the
//! parties, the book, and every note and highlight the borrower wrote on
//! it. `seal` stamps a SHA-256 of the canonical serialization into the
//! `integrity` field, computed with that field absent, so any recipient can
//! strip it, rehash, and compare.

use chrono::{DateTime, Utc};
use folio_core::{
  Result,
  annotation::AnnotationValue,
  clock::Clock,
  error::{Denial, Error},
  loan::{Loan, LoanStatus},
  store::LendingStore,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::Engine;

pub const EXPORT_SCHEMA_VERSION: u32 = 1;

const SHA256_ALGORITHM: &str = "sha256";

// ─── Payload ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanSummary {
  pub loan_id:      Uuid,
  pub status:       LoanStatus,
  pub requested_at: DateTime<Utc>,
  pub accepted_at:  Option<DateTime<Utc>>,
  pub due_at:       Option<DateTime<Utc>>,
  pub ended_at:     Option<DateTime<Utc>>,
  pub export_available_until: Option<DateTime<Utc>>,
}

/// One side of the loan. The name is best-effort directory data; the id is
/// the durable part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySummary {
  pub user_id: Uuid,
  pub name:    Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSummary {
  pub book_id: Uuid,
  pub title:   Option<String>,
  pub author:  Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedHighlight {
  pub annotation_id: Uuid,
  pub location:      String,
  pub color:         Option<String>,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedNote {
  pub annotation_id: Uuid,
  pub location:      Option<String>,
  pub text:          String,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
  pub algorithm: String,
  pub hash:      String,
}

/// The exported document. Hash with [`Self::seal`], check with
/// [`Self::verify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
  pub schema_version: u32,
  pub exported_at:    DateTime<Utc>,
  pub loan:           LoanSummary,
  pub lender:         PartySummary,
  pub borrower:       PartySummary,
  pub book:           BookSummary,
  pub notes:          Vec<ExportedNote>,
  pub highlights:     Vec<ExportedHighlight>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub integrity:      Option<Integrity>,
}

impl ExportPayload {
  /// Stamp the integrity hash. Any prior seal is discarded first.
  pub fn seal(mut self) -> Result<Self> {
    self.integrity = None;
    let hash = payload_hash(&self)?;
    self.integrity =
      Some(Integrity { algorithm: SHA256_ALGORITHM.into(), hash });
    Ok(self)
  }

  /// Recompute the hash over everything but the `integrity` field and
  /// compare. Unsealed payloads never verify.
  pub fn verify(&self) -> Result<bool> {
    let Some(integrity) = &self.integrity else {
      return Ok(false);
    };
    if integrity.algorithm != SHA256_ALGORITHM {
      return Ok(false);
    }
    let mut unsealed = self.clone();
    unsealed.integrity = None;
    Ok(integrity.hash == payload_hash(&unsealed)?)
  }
}

fn payload_hash(payload: &ExportPayload) -> Result<String> {
  let bytes = serde_json::to_vec(payload)?;
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  Ok(hex::encode(hasher.finalize()))
}

// ─── Operation ───────────────────────────────────────────────────────────────

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  /// Export the borrower's annotations on a loan's book: any time while the
  /// loan runs, and within the export window once it has ended.
  ///
  /// An overrun loan is settled first, the same as any other read, so the
  /// export rides the window that settlement stamps rather than a loan
  /// pretending to still be active.
  pub async fn export(
    &self,
    loan_id: Uuid,
    actor: Uuid,
  ) -> Result<ExportPayload> {
    let mut loan = self.require_loan(loan_id).await?;
    if actor != loan.borrower_id {
      return Err(Error::Forbidden(Denial::NotBorrower));
    }

    let now = self.now();
    if loan.is_past_effective_end(now) {
      loan = match self.commit_expiration(&loan, now).await? {
        Some(expired) => expired,
        None => self.require_loan(loan_id).await?,
      };
    }
    if !loan.export_window_open(now) {
      return Err(Error::Forbidden(Denial::ExportWindowClosed));
    }

    self.build_and_record_export(&loan, actor, now).await
  }

  /// Assemble, seal, and audit the export. Callers have already checked
  /// the window.
  pub(crate) async fn build_and_record_export(
    &self,
    loan: &Loan,
    actor: Uuid,
    at: DateTime<Utc>,
  ) -> Result<ExportPayload> {
    let mut notes = Vec::new();
    let mut highlights = Vec::new();
    for annotation in self.store().list_annotations(loan.book_id).await? {
      if annotation.author_id != actor {
        continue;
      }
      match annotation.value {
        AnnotationValue::Highlight(value) => {
          highlights.push(ExportedHighlight {
            annotation_id: annotation.annotation_id,
            location:      value.location,
            color:         value.color,
            created_at:    annotation.created_at,
            updated_at:    annotation.updated_at,
          });
        }
        AnnotationValue::Note(value) => {
          notes.push(ExportedNote {
            annotation_id: annotation.annotation_id,
            location:      value.location,
            text:          value.text,
            created_at:    annotation.created_at,
            updated_at:    annotation.updated_at,
          });
        }
      }
    }

    let directory = self.directory();
    let payload = ExportPayload {
      schema_version: EXPORT_SCHEMA_VERSION,
      exported_at: at,
      loan: LoanSummary {
        loan_id:      loan.loan_id,
        status:       loan.status,
        requested_at: loan.requested_at,
        accepted_at:  loan.accepted_at,
        due_at:       loan.due_at,
        ended_at:     loan.ended_at(),
        export_available_until: loan.export_available_until,
      },
      lender: PartySummary {
        user_id: loan.lender_id,
        name:    directory.user_name(loan.lender_id),
      },
      borrower: PartySummary {
        user_id: loan.borrower_id,
        name:    directory.user_name(loan.borrower_id),
      },
      book: BookSummary {
        book_id: loan.book_id,
        title:   directory.book_title(loan.book_id),
        author:  directory.book_author(loan.book_id),
      },
      notes,
      highlights,
      integrity: None,
    }
    .seal()?;

    let hash = payload
      .integrity
      .as_ref()
      .map(|integrity| integrity.hash.clone())
      .unwrap_or_default();
    self
      .store()
      .record_export(loan.loan_id, actor, at, json!({
        "notes":      payload.notes.len(),
        "highlights": payload.highlights.len(),
        "sha256":     hash,
      }))
      .await?;
    tracing::info!(
      loan_id = %loan.loan_id,
      notes = payload.notes.len(),
      highlights = payload.highlights.len(),
      "annotations exported"
    );
    Ok(payload)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn payload() -> ExportPayload {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    ExportPayload {
      schema_version: EXPORT_SCHEMA_VERSION,
      exported_at: at,
      loan: LoanSummary {
        loan_id:      Uuid::new_v4(),
        status:       LoanStatus::Returned,
        requested_at: at,
        accepted_at:  Some(at),
        due_at:       Some(at + chrono::Duration::days(14)),
        ended_at:     Some(at + chrono::Duration::days(3)),
        export_available_until: Some(at + chrono::Duration::days(17)),
      },
      lender: PartySummary { user_id: Uuid::new_v4(), name: None },
      borrower: PartySummary {
        user_id: Uuid::new_v4(),
        name:    Some("Ida".into()),
      },
      book: BookSummary {
        book_id: Uuid::new_v4(),
        title:   Some("Middlemarch".into()),
        author:  Some("George Eliot".into()),
      },
      notes: vec![ExportedNote {
        annotation_id: Uuid::new_v4(),
        location:      Some("ch3".into()),
        text:          "the web of relations".into(),
        created_at:    at,
        updated_at:    at,
      }],
      highlights: vec![],
      integrity: None,
    }
  }

  #[test]
  fn sealed_payload_verifies() {
    let sealed = payload().seal().unwrap();
    assert!(sealed.integrity.is_some());
    assert!(sealed.verify().unwrap());
  }

  #[test]
  fn unsealed_payload_does_not_verify() {
    assert!(!payload().verify().unwrap());
  }

  #[test]
  fn tampering_breaks_verification() {
    let mut sealed = payload().seal().unwrap();
    sealed.notes[0].text = "something else".into();
    assert!(!sealed.verify().unwrap());
  }

  #[test]
  fn resealing_after_change_verifies_again() {
    let mut sealed = payload().seal().unwrap();
    sealed.notes[0].text = "something else".into();
    let resealed = sealed.seal().unwrap();
    assert!(resealed.verify().unwrap());
  }
}
