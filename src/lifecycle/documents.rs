use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{Comment, Document, DocumentMetadata, Payload};
use crate::db::repository::DocumentRepository;
use crate::db::unit_of_work::UnitOfWork;
use crate::error::AppError;
use crate::lifecycle::{remove_payload, settle_conflict};
use crate::storage::client::{content_type_for, StorageClient};

/// Input for creating a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub description: Option<String>,
    /// Days from now until the document expires. Must be positive.
    pub expiration_days: i64,
    pub upload: Option<Upload>,
}

/// A file attached at creation time.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Editable fields of an active document.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentUpdate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Days from now until the document expires. Must be positive.
    pub expiration_days: i64,
}

/// Geolocation to attach to a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataInput {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
}

/// A payload ready to be streamed back to its owner.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A comment together with its author's e-mail, when known.
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub user_email: Option<String>,
}

/// A document with the records it owns, as shown in listings.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub document: Document,
    pub metadata: Option<DocumentMetadata>,
    pub comments: Vec<CommentView>,
}

/// Owner-facing document operations.
///
/// Every lookup that fails, whether because the document does not exist,
/// belongs to someone else, or is in the wrong lifecycle state, reports
/// the same `NotFound`.
pub struct DocumentService {
    repo: Arc<dyn DocumentRepository>,
    storage: Arc<dyn StorageClient>,
}

impl DocumentService {
    pub fn new(repo: Arc<dyn DocumentRepository>, storage: Arc<dyn StorageClient>) -> Self {
        Self { repo, storage }
    }

    /// Create an active document, storing its payload first if one is given.
    pub async fn create(&self, owner_id: Uuid, request: NewDocument) -> Result<Document, AppError> {
        let name = validate_name(&request.name)?;
        let now = Utc::now();
        let expires_at = expiration_from(now, request.expiration_days)?;

        let mut document = Document::new(owner_id, name, request.description, now, expires_at);

        if let Some(upload) = request.upload.filter(|u| !u.content.is_empty()) {
            let size = upload.content.len() as u64;
            let content_type = content_type_for(&upload.file_name);
            let key = self
                .storage
                .save(upload.content, &upload.file_name, document.id, owner_id)
                .await?;
            document.payload = Some(Payload {
                key,
                file_name: upload.file_name,
                size,
                content_type,
            });
        }

        let mut unit = UnitOfWork::new();
        unit.insert_document(document.clone());

        if let Err(e) = self.repo.commit(unit).await {
            if let Some(payload) = &document.payload {
                remove_payload(self.storage.as_ref(), payload, document.id).await;
            }
            return Err(e);
        }

        tracing::info!(document_id = %document.id, %owner_id, "Document created");
        Ok(document)
    }

    /// Change name, description and expiration of an active document.
    ///
    /// The new expiration is counted from now.
    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        request: DocumentUpdate,
    ) -> Result<Document, AppError> {
        let name = validate_name(&request.name)?;
        let now = Utc::now();
        let expires_at = expiration_from(now, request.expiration_days)?;

        let mut document = self.owned(owner_id, id).await?;
        if !document.is_mutable() {
            return Err(AppError::document_not_found());
        }

        document.name = name;
        document.description = request.description;
        document.expires_at = expires_at;

        let mut unit = UnitOfWork::new();
        unit.update_document(document.clone());
        if let Err(e) = self.repo.commit(unit).await {
            return Err(settle_conflict(self.repo.as_ref(), id, e, Document::is_mutable).await);
        }

        tracing::info!(document_id = %id, "Document updated");
        document.version += 1;
        Ok(document)
    }

    /// Explicit `Active → Deleted` by the owner.
    ///
    /// The tombstone and the removal of metadata and comments are committed
    /// first; the payload is removed afterwards on a best-effort basis, so a
    /// storage failure can only leave an unreferenced object behind.
    pub async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<(), AppError> {
        let mut document = self.owned(owner_id, id).await?;
        if !document.is_active() || !document.soft_delete(Utc::now()) {
            return Err(AppError::document_not_found());
        }

        let payload = document.payload.clone();
        let mut unit = UnitOfWork::new();
        unit.update_document(document).cascade_delete(id);
        if let Err(e) = self.repo.commit(unit).await {
            return Err(settle_conflict(self.repo.as_ref(), id, e, Document::is_active).await);
        }

        if let Some(payload) = payload {
            remove_payload(self.storage.as_ref(), &payload, id).await;
        }

        tracing::info!(document_id = %id, %owner_id, "Document deleted");
        Ok(())
    }

    /// Fetch the payload of a non-deleted document owned by the caller.
    pub async fn download(&self, owner_id: Uuid, id: Uuid) -> Result<Download, AppError> {
        let document = self.owned(owner_id, id).await?;
        if document.is_deleted() {
            return Err(AppError::document_not_found());
        }

        let payload = document
            .payload
            .ok_or_else(|| AppError::NotFound("Document has no file".into()))?;

        let content = self
            .storage
            .read(&payload.key)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".into()))?;

        Ok(Download {
            file_name: payload.file_name,
            content_type: payload.content_type,
            content,
        })
    }

    /// The caller's active documents.
    pub async fn list_active(&self, owner_id: Uuid) -> Result<Vec<DocumentView>, AppError> {
        let documents = self.repo.find_by_owner(owner_id).await?;
        self.views(documents.into_iter().filter(|d| d.is_active()).collect())
            .await
    }

    /// The caller's archive (history): archived documents not yet purged.
    pub async fn list_archived(&self, owner_id: Uuid) -> Result<Vec<DocumentView>, AppError> {
        let documents = self.repo.find_by_owner(owner_id).await?;
        self.views(documents.into_iter().filter(|d| d.is_archived()).collect())
            .await
    }

    /// Append a comment from any known user to a non-deleted document.
    pub async fn add_comment(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<CommentView, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::BadRequest("Comment text cannot be empty".into()));
        }

        self.available(document_id).await?;
        let user = self
            .repo
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        let comment = Comment {
            id: Uuid::new_v4(),
            document_id,
            user_id,
            text: text.to_string(),
            created_at: Utc::now(),
        };

        let mut unit = UnitOfWork::new();
        unit.touch_document(document_id).insert_comment(comment.clone());
        if let Err(e) = self.repo.commit(unit).await {
            return Err(settle_conflict(self.repo.as_ref(), document_id, e, is_live).await);
        }

        Ok(CommentView {
            id: comment.id,
            text: comment.text,
            created_at: comment.created_at,
            user_id,
            user_email: Some(user.email),
        })
    }

    /// Comments of a non-deleted document, oldest first.
    pub async fn list_comments(&self, document_id: Uuid) -> Result<Vec<CommentView>, AppError> {
        self.available(document_id).await?;
        let comments = self.repo.find_comments(document_id).await?;
        let mut emails = HashMap::new();
        self.comment_views(comments, &mut emails).await
    }

    /// Create or replace the geolocation of a non-deleted owned document.
    pub async fn set_metadata(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: MetadataInput,
    ) -> Result<DocumentMetadata, AppError> {
        validate_coordinates(&input)?;

        let document = self.owned(owner_id, id).await?;
        if document.is_deleted() {
            return Err(AppError::document_not_found());
        }

        let metadata = match self.repo.find_metadata(id).await? {
            Some(existing) => DocumentMetadata {
                latitude: input.latitude,
                longitude: input.longitude,
                location_name: input.location_name,
                ..existing
            },
            None => DocumentMetadata {
                id: Uuid::new_v4(),
                document_id: id,
                latitude: input.latitude,
                longitude: input.longitude,
                location_name: input.location_name,
                created_at: Utc::now(),
            },
        };

        let mut unit = UnitOfWork::new();
        unit.touch_document(id).upsert_metadata(metadata.clone());
        if let Err(e) = self.repo.commit(unit).await {
            return Err(settle_conflict(self.repo.as_ref(), id, e, is_live).await);
        }

        Ok(metadata)
    }

    async fn owned(&self, owner_id: Uuid, id: Uuid) -> Result<Document, AppError> {
        self.repo
            .find_by_owner_and_id(owner_id, id)
            .await?
            .ok_or_else(AppError::document_not_found)
    }

    async fn available(&self, id: Uuid) -> Result<Document, AppError> {
        self.repo
            .find_by_id(id)
            .await?
            .filter(is_live)
            .ok_or_else(AppError::document_not_found)
    }

    async fn views(&self, documents: Vec<Document>) -> Result<Vec<DocumentView>, AppError> {
        let mut emails = HashMap::new();
        let mut views = Vec::with_capacity(documents.len());

        for document in documents {
            let metadata = self.repo.find_metadata(document.id).await?;
            let comments = self.repo.find_comments(document.id).await?;
            let comments = self.comment_views(comments, &mut emails).await?;
            views.push(DocumentView {
                document,
                metadata,
                comments,
            });
        }

        Ok(views)
    }

    async fn comment_views(
        &self,
        comments: Vec<Comment>,
        emails: &mut HashMap<Uuid, Option<String>>,
    ) -> Result<Vec<CommentView>, AppError> {
        let mut views = Vec::with_capacity(comments.len());

        for comment in comments {
            let user_email = match emails.get(&comment.user_id) {
                Some(email) => email.clone(),
                None => {
                    let email = self.repo.find_user(comment.user_id).await?.map(|u| u.email);
                    emails.insert(comment.user_id, email.clone());
                    email
                }
            };

            views.push(CommentView {
                id: comment.id,
                text: comment.text,
                created_at: comment.created_at,
                user_id: comment.user_id,
                user_email,
            });
        }

        Ok(views)
    }
}

/// Comments and metadata may be attached until the document is deleted.
fn is_live(document: &Document) -> bool {
    !document.is_deleted()
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Document name cannot be empty".into()));
    }
    Ok(name.to_string())
}

/// `now + days`, rejecting non-positive or unrepresentable windows.
fn expiration_from(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, AppError> {
    if days <= 0 {
        return Err(AppError::BadRequest(format!(
            "Expiration must be a positive number of days, got {days}"
        )));
    }

    Duration::try_days(days)
        .and_then(|window| now.checked_add_signed(window))
        .ok_or_else(|| AppError::BadRequest(format!("Expiration of {days} days is out of range")))
}

fn validate_coordinates(input: &MetadataInput) -> Result<(), AppError> {
    if let Some(lat) = input.latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::BadRequest(format!("Latitude {lat} is out of range")));
        }
    }
    if let Some(lon) = input.longitude {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::BadRequest(format!("Longitude {lon} is out of range")));
        }
    }
    Ok(())
}
