//! Annotations — highlights and notes, and who gets to see them.
//!
//! An annotation's visibility scope is a snapshot of the author's standing
//! at write time. It is stamped once and never recomputed, so annotations
//! written under a shared loan stay visible to the lender after the loan
//! ends, and private ones stay private.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Result,
  loan::{Capabilities, Loan},
};

// ─── Scope ───────────────────────────────────────────────────────────────────

/// Visibility class stamped on an annotation when it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationScope {
  /// Written by someone annotating their own book.
  Owner,
  /// Written by a borrower under a loan that shares annotations with the
  /// lender.
  LenderVisible,
  /// Written by a borrower under a loan that keeps annotations private.
  PrivateBorrower,
}

impl AnnotationScope {
  /// The discriminant string stored in the `scope` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Owner => "owner",
      Self::LenderVisible => "lender_visible",
      Self::PrivateBorrower => "private_borrower",
    }
  }
}

/// Resolve the scope for a new annotation from the author's active borrow
/// loan on the book, if any.
pub fn resolve_scope(active_borrow: Option<&Loan>) -> AnnotationScope {
  use crate::loan::AnnotationVisibility;
  match active_borrow {
    None => AnnotationScope::Owner,
    Some(loan)
      if loan.terms.annotation_visibility
        == AnnotationVisibility::SharedWithLender =>
    {
      AnnotationScope::LenderVisible
    }
    Some(_) => AnnotationScope::PrivateBorrower,
  }
}

// ─── Capabilities ────────────────────────────────────────────────────────────

/// A single annotation permission a lender can grant on a loan. Each
/// capability maps to exactly one flag in [`Capabilities`]; there is no
/// string lookup anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  AddHighlights,
  EditHighlights,
  AddNotes,
  EditNotes,
}

impl Capability {
  /// The capability required to create an annotation of `kind`.
  pub fn add(kind: AnnotationKind) -> Self {
    match kind {
      AnnotationKind::Highlight => Self::AddHighlights,
      AnnotationKind::Note => Self::AddNotes,
    }
  }

  /// The capability required to edit or delete an annotation of `kind`.
  pub fn edit(kind: AnnotationKind) -> Self {
    match kind {
      AnnotationKind::Highlight => Self::EditHighlights,
      AnnotationKind::Note => Self::EditNotes,
    }
  }

  pub fn granted_by(self, caps: &Capabilities) -> bool {
    match self {
      Self::AddHighlights => caps.can_add_highlights,
      Self::EditHighlights => caps.can_edit_highlights,
      Self::AddNotes => caps.can_add_notes,
      Self::EditNotes => caps.can_edit_notes,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::AddHighlights => "add_highlights",
      Self::EditHighlights => "edit_highlights",
      Self::AddNotes => "add_notes",
      Self::EditNotes => "edit_notes",
    }
  }
}

// ─── Values ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
  Highlight,
  Note,
}

impl AnnotationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Highlight => "highlight",
      Self::Note => "note",
    }
  }
}

/// A marked passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightValue {
  /// Position in the book, in whatever addressing scheme the reader uses
  /// (CFI, page/offset). Opaque to the engine.
  pub location: String,
  pub color:    Option<String>,
}

/// A written remark, optionally anchored to a passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteValue {
  pub location: Option<String>,
  pub text:     String,
}

/// The typed payload of an annotation. The variant name serves as the
/// `kind` discriminant stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AnnotationValue {
  Highlight(HighlightValue),
  Note(NoteValue),
}

impl AnnotationValue {
  pub fn kind(&self) -> AnnotationKind {
    match self {
      Self::Highlight(_) => AnnotationKind::Highlight,
      Self::Note(_) => AnnotationKind::Note,
    }
  }

  /// Serialise the inner payload (without the type tag) for the
  /// `value_json` database column.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    // The full serialised form is `{"type": "...", "data": <payload>}`.
    // We want only the payload.
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Deserialise from the discriminant string and JSON payload stored in
  /// the database.
  pub fn from_parts(kind: &str, data: serde_json::Value) -> Result<Self> {
    let wrapped = serde_json::json!({ "type": kind, "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }
}

// ─── Annotation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
  pub annotation_id: Uuid,
  pub book_id:       Uuid,
  pub author_id:     Uuid,
  pub value:         AnnotationValue,
  pub scope:         AnnotationScope,
  /// Optimistic-concurrency token; incremented on every committed write.
  pub revision:      i64,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

/// Input to [`crate::store::LendingStore::insert_annotation`]. The scope has
/// already been resolved by the caller; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewAnnotation {
  pub book_id:   Uuid,
  pub author_id: Uuid,
  pub value:     AnnotationValue,
  pub scope:     AnnotationScope,
}

// ─── Visibility ──────────────────────────────────────────────────────────────

/// Read-side visibility decision for one (viewer, book) pair. Built once per
/// listing from the viewer's entitlement and the book's currently active
/// borrows, then applied to each annotation.
#[derive(Debug, Clone)]
pub struct VisibilityFilter {
  viewer_id:           Uuid,
  /// Set when the viewer currently borrows the book.
  borrow:              Option<BorrowSide>,
  /// Borrowers with a live loan on the book; their private annotations are
  /// hidden from everyone else.
  active_borrower_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
struct BorrowSide {
  lender_id:                Uuid,
  share_lender_annotations: bool,
}

impl VisibilityFilter {
  pub fn new(
    viewer_id: Uuid,
    viewer_borrow: Option<&Loan>,
    active_borrower_ids: Vec<Uuid>,
  ) -> Self {
    Self {
      viewer_id,
      borrow: viewer_borrow.map(|loan| BorrowSide {
        lender_id:                loan.lender_id,
        share_lender_annotations: loan.terms.share_lender_annotations,
      }),
      active_borrower_ids,
    }
  }

  pub fn allows(&self, annotation: &Annotation) -> bool {
    if annotation.author_id == self.viewer_id {
      return true;
    }
    match &self.borrow {
      // An active borrower sees, besides their own, only the lender's own
      // annotations, and only when the loan shares them.
      Some(borrow) => {
        borrow.share_lender_annotations
          && annotation.scope == AnnotationScope::Owner
          && annotation.author_id == borrow.lender_id
      }
      // Everyone else sees everything except the private annotations of
      // the book's current borrowers.
      None => {
        !(annotation.scope == AnnotationScope::PrivateBorrower
          && self.active_borrower_ids.contains(&annotation.author_id))
      }
    }
  }
}
