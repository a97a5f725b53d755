//! Annotation operations.
//!
//! The write path stamps the visibility scope from the author's standing at
//! that moment and checks the capability the active borrow loan grants; the
//! read path filters a book's annotations through the viewer's standing.
//! Scope is a snapshot. What a loan's terms said at write time is what the
//! annotation keeps, whatever happens to the loan afterwards.

use folio_core::{
  Result,
  annotation::{
    Annotation, AnnotationValue, Capability, NewAnnotation, VisibilityFilter,
    resolve_scope,
  },
  clock::Clock,
  error::{Denial, Error, Resource},
  loan::Loan,
  store::LendingStore,
};
use uuid::Uuid;

use crate::Engine;

impl<S, C> Engine<S, C>
where
  S: LendingStore,
  C: Clock,
{
  /// Create a highlight or note on a book the author can open.
  ///
  /// An author borrowing the book needs the matching add capability from
  /// their loan; an author reading their own copy needs nothing beyond an
  /// untrashed access record.
  pub async fn create_annotation(
    &self,
    author_id: Uuid,
    book_id: Uuid,
    value: AnnotationValue,
  ) -> Result<Annotation> {
    let entitlement = self.resolve_entitlement(author_id, book_id).await?;
    let borrow = entitlement.active_borrow_loan.as_ref();
    if !entitlement.can_open() && borrow.is_none() {
      return Err(Error::Forbidden(Denial::NoLibraryAccess));
    }
    if let Some(loan) = borrow {
      require_capability(Capability::add(value.kind()), loan)?;
    }

    let scope = resolve_scope(borrow);
    let annotation = self
      .store()
      .insert_annotation(
        NewAnnotation { book_id, author_id, value, scope },
        self.now(),
      )
      .await?;
    tracing::debug!(
      annotation_id = %annotation.annotation_id,
      book_id = %book_id,
      scope = scope.as_str(),
      "annotation created"
    );
    Ok(annotation)
  }

  /// Replace an annotation's value. Author-only; an author currently
  /// borrowing the book also needs the matching edit capability. Pass the
  /// revision the edit was based on to reject writes over a newer version.
  pub async fn edit_annotation(
    &self,
    annotation_id: Uuid,
    actor: Uuid,
    value: AnnotationValue,
    expected_revision: Option<i64>,
  ) -> Result<Annotation> {
    let existing = self.require_annotation(annotation_id).await?;
    if existing.author_id != actor {
      return Err(Error::Forbidden(Denial::NotAuthor));
    }
    if let Some(loan) =
      self.store().find_active_borrow(actor, existing.book_id).await?
    {
      require_capability(Capability::edit(existing.value.kind()), &loan)?;
    }

    self
      .store()
      .update_annotation(annotation_id, value, expected_revision, self.now())
      .await
  }

  /// Delete an annotation, with the same author, capability, and revision
  /// rules as [`Self::edit_annotation`].
  pub async fn delete_annotation(
    &self,
    annotation_id: Uuid,
    actor: Uuid,
    expected_revision: Option<i64>,
  ) -> Result<()> {
    let existing = self.require_annotation(annotation_id).await?;
    if existing.author_id != actor {
      return Err(Error::Forbidden(Denial::NotAuthor));
    }
    if let Some(loan) =
      self.store().find_active_borrow(actor, existing.book_id).await?
    {
      require_capability(Capability::edit(existing.value.kind()), &loan)?;
    }

    self
      .store()
      .delete_annotation(annotation_id, expected_revision)
      .await
  }

  /// The annotations on a book that `viewer_id` is allowed to see, oldest
  /// first. The viewer must hold access to the book or borrow it.
  pub async fn list_visible_annotations(
    &self,
    viewer_id: Uuid,
    book_id: Uuid,
  ) -> Result<Vec<Annotation>> {
    let entitlement = self.resolve_entitlement(viewer_id, book_id).await?;
    if !entitlement.can_open() && entitlement.active_borrow_loan.is_none() {
      return Err(Error::Forbidden(Denial::NoLibraryAccess));
    }

    let active_borrower_ids: Vec<Uuid> = self
      .store()
      .list_active_loans_for_book(book_id)
      .await?
      .iter()
      .map(|loan| loan.borrower_id)
      .collect();
    let filter = VisibilityFilter::new(
      viewer_id,
      entitlement.active_borrow_loan.as_ref(),
      active_borrower_ids,
    );

    let annotations = self.store().list_annotations(book_id).await?;
    Ok(
      annotations
        .into_iter()
        .filter(|annotation| filter.allows(annotation))
        .collect(),
    )
  }

  async fn require_annotation(
    &self,
    annotation_id: Uuid,
  ) -> Result<Annotation> {
    self
      .store()
      .get_annotation(annotation_id)
      .await?
      .ok_or(Error::NotFound(Resource::Annotation, annotation_id))
  }
}

fn require_capability(needed: Capability, loan: &Loan) -> Result<()> {
  if needed.granted_by(&loan.terms.capabilities) {
    Ok(())
  } else {
    Err(Error::Forbidden(Denial::MissingCapability(needed)))
  }
}
