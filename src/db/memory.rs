use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Comment, Document, DocumentMetadata, Lifecycle, User};
use crate::db::repository::DocumentRepository;
use crate::db::unit_of_work::{PendingWrite, UnitOfWork};
use crate::error::AppError;

#[derive(Debug, Default, Clone)]
struct Tables {
    documents: HashMap<Uuid, Document>,
    /// Keyed by document id.
    metadata: HashMap<Uuid, DocumentMetadata>,
    comments: Vec<Comment>,
    users: HashMap<Uuid, User>,
}

/// Process-local implementation of the DocumentRepository.
///
/// Commits are applied to a scratch copy of the tables and swapped in only
/// when every write succeeded, which gives the same all-or-nothing contract
/// as the MongoDB transaction. Used by the `memory` backend and in tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentRepository {
    tables: Mutex<Tables>,
    failing_commits: Mutex<usize>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user record.
    pub fn insert_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }

    /// Make the next `count` commits fail with a database error.
    pub fn fail_next_commits(&self, count: usize) {
        *self
            .failing_commits
            .lock()
            .expect("commit failure counter poisoned") = count;
    }

    /// Every stored document, in no particular order.
    pub fn all_documents(&self) -> Vec<Document> {
        self.lock().documents.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("in-memory tables poisoned")
    }

    fn take_injected_failure(&self) -> bool {
        let mut failing = self
            .failing_commits
            .lock()
            .expect("commit failure counter poisoned");
        if *failing > 0 {
            *failing -= 1;
            true
        } else {
            false
        }
    }

    fn select(&self, predicate: impl Fn(&Document) -> bool) -> Vec<Document> {
        let mut documents: Vec<Document> = self
            .lock()
            .documents
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect();
        documents.sort_by_key(|d| (d.created_at, d.id));
        documents
    }
}

fn apply(tables: &mut Tables, write: PendingWrite) -> Result<(), AppError> {
    match write {
        PendingWrite::InsertDocument(document) => {
            if tables.documents.contains_key(&document.id) {
                return Err(AppError::Database(format!(
                    "Duplicate document id {}",
                    document.id
                )));
            }
            check_token_unique(tables, &document)?;
            tables.documents.insert(document.id, document);
        }
        PendingWrite::UpdateDocument {
            document,
            expected_version,
        } => {
            let stored = tables.documents.get(&document.id).ok_or_else(|| {
                AppError::Database(format!("Document {} does not exist", document.id))
            })?;
            if stored.version != expected_version {
                return Err(AppError::Conflict(document.id));
            }
            check_token_unique(tables, &document)?;
            tables.documents.insert(document.id, document);
        }
        PendingWrite::TouchDocument(document_id) => {
            match tables.documents.get_mut(&document_id) {
                Some(stored) if !stored.is_deleted() => stored.version += 1,
                _ => return Err(AppError::Conflict(document_id)),
            }
        }
        PendingWrite::UpsertMetadata(metadata) => {
            tables.metadata.insert(metadata.document_id, metadata);
        }
        PendingWrite::InsertComment(comment) => {
            tables.comments.push(comment);
        }
        PendingWrite::RemoveMetadata(document_id) => {
            tables.metadata.remove(&document_id);
        }
        PendingWrite::RemoveComments(document_id) => {
            tables.comments.retain(|c| c.document_id != document_id);
        }
    }
    Ok(())
}

/// Mirrors the unique share token index of the MongoDB backend.
fn check_token_unique(tables: &Tables, document: &Document) -> Result<(), AppError> {
    let Lifecycle::Active { share: Some(grant) } = &document.lifecycle else {
        return Ok(());
    };

    let taken = tables.documents.values().any(|other| {
        other.id != document.id
            && matches!(&other.lifecycle, Lifecycle::Active { share: Some(g) } if g.token == grant.token)
    });

    if taken {
        Err(AppError::Database("Share token already in use".into()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<Document>, AppError> {
        Ok(self.select(|d| d.owner_id == owner_id))
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Document>, AppError> {
        Ok(self
            .lock()
            .documents
            .get(&id)
            .filter(|d| d.owner_id == owner_id)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self.lock().documents.get(&id).cloned())
    }

    async fn find_by_share_token(&self, token: &str) -> Result<Option<Document>, AppError> {
        Ok(self
            .select(|d| matches!(&d.lifecycle, Lifecycle::Active { share: Some(g) } if g.token == token))
            .into_iter()
            .next())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Document>, AppError> {
        Ok(self.select(|d| matches!(d.lifecycle, Lifecycle::Active { .. }) && d.expires_at <= now))
    }

    async fn find_archived_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, AppError> {
        Ok(self.select(|d| matches!(&d.lifecycle, Lifecycle::Archived(stamp) if stamp.archived_at <= cutoff)))
    }

    async fn find_metadata(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentMetadata>, AppError> {
        Ok(self.lock().metadata.get(&document_id).cloned())
    }

    async fn find_comments(&self, document_id: Uuid) -> Result<Vec<Comment>, AppError> {
        let mut comments: Vec<Comment> = self
            .lock()
            .comments
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), AppError> {
        if self.take_injected_failure() {
            return Err(AppError::Database("Injected commit failure".into()));
        }

        let mut tables = self.lock();
        let mut scratch = tables.clone();
        for write in unit.into_writes() {
            apply(&mut scratch, write)?;
        }
        *tables = scratch;
        Ok(())
    }
}
