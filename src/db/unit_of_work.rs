use uuid::Uuid;

use crate::db::models::{Comment, Document, DocumentMetadata};

/// A single pending write collected by a [`UnitOfWork`].
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    InsertDocument(Document),
    /// Replace a stored document, but only while its persisted version
    /// still equals `expected_version`. A mismatch fails the whole commit
    /// with [`AppError::Conflict`](crate::error::AppError::Conflict).
    UpdateDocument {
        document: Document,
        expected_version: i64,
    },
    /// Bump the version of a document that must exist and not be deleted.
    /// Serializes writes to dependent records against a concurrent delete.
    TouchDocument(Uuid),
    /// Insert or replace the metadata of `metadata.document_id`.
    UpsertMetadata(DocumentMetadata),
    InsertComment(Comment),
    /// Remove the metadata attached to the given document, if any.
    RemoveMetadata(Uuid),
    /// Remove every comment attached to the given document.
    RemoveComments(Uuid),
}

/// An explicit batch of writes that is committed all-or-nothing.
///
/// Operations build one of these, hand it to
/// [`DocumentRepository::commit`](crate::db::repository::DocumentRepository::commit),
/// and either every write lands or none does.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UnitOfWork {
    writes: Vec<PendingWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_document(&mut self, document: Document) -> &mut Self {
        self.writes.push(PendingWrite::InsertDocument(document));
        self
    }

    /// Queue a replacement of `document`, guarded by the version it was
    /// read at. The stored copy carries the next version.
    pub fn update_document(&mut self, mut document: Document) -> &mut Self {
        let expected_version = document.version;
        document.version += 1;
        self.writes.push(PendingWrite::UpdateDocument {
            document,
            expected_version,
        });
        self
    }

    /// Require the document to still be live when the unit commits.
    pub fn touch_document(&mut self, document_id: Uuid) -> &mut Self {
        self.writes.push(PendingWrite::TouchDocument(document_id));
        self
    }

    pub fn upsert_metadata(&mut self, metadata: DocumentMetadata) -> &mut Self {
        self.writes.push(PendingWrite::UpsertMetadata(metadata));
        self
    }

    pub fn insert_comment(&mut self, comment: Comment) -> &mut Self {
        self.writes.push(PendingWrite::InsertComment(comment));
        self
    }

    pub fn remove_metadata(&mut self, document_id: Uuid) -> &mut Self {
        self.writes.push(PendingWrite::RemoveMetadata(document_id));
        self
    }

    pub fn remove_comments(&mut self, document_id: Uuid) -> &mut Self {
        self.writes.push(PendingWrite::RemoveComments(document_id));
        self
    }

    /// Queue removal of everything a deleted document owns.
    pub fn cascade_delete(&mut self, document_id: Uuid) -> &mut Self {
        self.remove_metadata(document_id).remove_comments(document_id)
    }

    /// Append every write of `other`, keeping its order.
    pub fn extend(&mut self, other: UnitOfWork) -> &mut Self {
        self.writes.extend(other.writes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<PendingWrite> {
        self.writes
    }
}
