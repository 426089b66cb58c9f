use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Comment, Document, DocumentMetadata, User};
use crate::db::unit_of_work::UnitOfWork;
use crate::error::AppError;

/// Persistence gateway for documents and the records they own.
///
/// Reads return a snapshot of committed state. All writes go through
/// [`commit`](DocumentRepository::commit), which applies a [`UnitOfWork`]
/// atomically. This trait allows swapping the database layer in tests.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// All documents of an owner, in every lifecycle state.
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<Document>, AppError>;

    /// A document by id, only if it belongs to `owner_id`.
    async fn find_by_owner_and_id(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Document>, AppError>;

    /// A document by id regardless of owner.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError>;

    /// The non-deleted document currently holding `token`.
    async fn find_by_share_token(&self, token: &str) -> Result<Option<Document>, AppError>;

    /// Active documents whose expiration is at or before `now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Document>, AppError>;

    /// Archived, non-deleted documents archived at or before `cutoff`.
    async fn find_archived_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, AppError>;

    async fn find_metadata(&self, document_id: Uuid)
        -> Result<Option<DocumentMetadata>, AppError>;

    /// Comments of a document, oldest first.
    async fn find_comments(&self, document_id: Uuid) -> Result<Vec<Comment>, AppError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// Apply every pending write of `unit` atomically.
    async fn commit(&self, unit: UnitOfWork) -> Result<(), AppError>;
}

/// MongoDB implementation of the DocumentRepository.
///
/// Each commit runs inside a multi-document transaction, so the deployment
/// must be a replica set. Only available with the `server` feature.
#[cfg(feature = "server")]
pub struct MongoDocumentRepository {
    client: mongodb::Client,
    documents: mongodb::Collection<Document>,
    metadata: mongodb::Collection<DocumentMetadata>,
    comments: mongodb::Collection<Comment>,
    users: mongodb::Collection<User>,
}

#[cfg(feature = "server")]
fn db_err(e: mongodb::error::Error) -> AppError {
    AppError::Database(e.to_string())
}

/// A write that lost to a concurrent transaction on the same document is a
/// conflict, not a backend failure.
#[cfg(feature = "server")]
fn write_err(id: Uuid, e: mongodb::error::Error) -> AppError {
    if e.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
        AppError::Conflict(id)
    } else {
        db_err(e)
    }
}

#[cfg(feature = "server")]
fn id_filter(id: Uuid) -> bson::Bson {
    bson::Bson::from(bson::Uuid::from_uuid_1(id))
}

#[cfg(feature = "server")]
impl MongoDocumentRepository {
    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            client: db.client().clone(),
            documents: db.collection("documents"),
            metadata: db.collection("document_metadata"),
            comments: db.collection("comments"),
            users: db.collection("users"),
        }
    }

    /// Register a user record. Accounts are normally provisioned by the
    /// authentication service; this exists for seeding and tests.
    pub async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        self.users.insert_one(user).await.map_err(db_err)?;
        Ok(())
    }

    /// Create the indexes the lifecycle queries rely on.
    ///
    /// The share token index is unique over documents that hold a token,
    /// which enforces single ownership of a token at the storage level.
    pub async fn ensure_indexes(&self) -> Result<(), AppError> {
        use mongodb::bson::doc;
        use mongodb::options::IndexOptions;
        use mongodb::IndexModel;

        let share_token = IndexModel::builder()
            .keys(doc! { "lifecycle.active.share.token": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(
                        doc! { "lifecycle.active.share.token": { "$exists": true } },
                    )
                    .build(),
            )
            .build();

        let indexes = vec![
            IndexModel::builder().keys(doc! { "owner_id": 1 }).build(),
            IndexModel::builder().keys(doc! { "expires_at": 1 }).build(),
            IndexModel::builder()
                .keys(doc! { "lifecycle.archived.archived_at": 1 })
                .build(),
            share_token,
        ];

        self.documents
            .create_indexes(indexes)
            .await
            .map_err(db_err)?;

        self.metadata
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "document_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(db_err)?;

        self.comments
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "document_id": 1, "created_at": 1 })
                    .build(),
            )
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn find_documents(&self, filter: bson::Document) -> Result<Vec<Document>, AppError> {
        use futures::TryStreamExt;

        let cursor = self.documents.find(filter).await.map_err(db_err)?;
        cursor.try_collect().await.map_err(db_err)
    }

    async fn apply(
        &self,
        session: &mut mongodb::ClientSession,
        unit: UnitOfWork,
    ) -> Result<(), AppError> {
        use crate::db::unit_of_work::PendingWrite;
        use mongodb::bson::doc;
        use mongodb::options::ReplaceOptions;

        for write in unit.into_writes() {
            match write {
                PendingWrite::InsertDocument(document) => {
                    self.documents
                        .insert_one(&document)
                        .session(&mut *session)
                        .await
                        .map_err(db_err)?;
                }
                PendingWrite::UpdateDocument {
                    document,
                    expected_version,
                } => {
                    let id = document.id;
                    let result = self
                        .documents
                        .replace_one(
                            doc! { "_id": id_filter(id), "version": expected_version },
                            &document,
                        )
                        .session(&mut *session)
                        .await
                        .map_err(|e| write_err(id, e))?;
                    if result.matched_count == 0 {
                        return Err(AppError::Conflict(id));
                    }
                }
                PendingWrite::TouchDocument(id) => {
                    let result = self
                        .documents
                        .update_one(
                            doc! {
                                "_id": id_filter(id),
                                "lifecycle.deleted": { "$exists": false },
                            },
                            doc! { "$inc": { "version": 1_i64 } },
                        )
                        .session(&mut *session)
                        .await
                        .map_err(|e| write_err(id, e))?;
                    if result.matched_count == 0 {
                        return Err(AppError::Conflict(id));
                    }
                }
                PendingWrite::UpsertMetadata(metadata) => {
                    let options = ReplaceOptions::builder().upsert(true).build();
                    self.metadata
                        .replace_one(doc! { "document_id": id_filter(metadata.document_id) }, &metadata)
                        .with_options(options)
                        .session(&mut *session)
                        .await
                        .map_err(db_err)?;
                }
                PendingWrite::InsertComment(comment) => {
                    self.comments
                        .insert_one(&comment)
                        .session(&mut *session)
                        .await
                        .map_err(db_err)?;
                }
                PendingWrite::RemoveMetadata(document_id) => {
                    self.metadata
                        .delete_many(doc! { "document_id": id_filter(document_id) })
                        .session(&mut *session)
                        .await
                        .map_err(db_err)?;
                }
                PendingWrite::RemoveComments(document_id) => {
                    self.comments
                        .delete_many(doc! { "document_id": id_filter(document_id) })
                        .session(&mut *session)
                        .await
                        .map_err(db_err)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(feature = "server")]
#[async_trait]
impl DocumentRepository for MongoDocumentRepository {
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<Document>, AppError> {
        use mongodb::bson::doc;

        self.find_documents(doc! { "owner_id": id_filter(owner_id) })
            .await
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Document>, AppError> {
        use mongodb::bson::doc;

        self.documents
            .find_one(doc! { "_id": id_filter(id), "owner_id": id_filter(owner_id) })
            .await
            .map_err(db_err)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        use mongodb::bson::doc;

        self.documents
            .find_one(doc! { "_id": id_filter(id) })
            .await
            .map_err(db_err)
    }

    async fn find_by_share_token(&self, token: &str) -> Result<Option<Document>, AppError> {
        use mongodb::bson::doc;

        // Tokens only exist on active documents, so the path itself
        // excludes archived and deleted ones.
        self.documents
            .find_one(doc! { "lifecycle.active.share.token": token })
            .await
            .map_err(db_err)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Document>, AppError> {
        use mongodb::bson::doc;

        self.find_documents(doc! {
            "lifecycle.active": { "$exists": true },
            "expires_at": { "$lte": bson::DateTime::from_chrono(now) },
        })
        .await
    }

    async fn find_archived_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, AppError> {
        use mongodb::bson::doc;

        self.find_documents(doc! {
            "lifecycle.archived.archived_at": { "$lte": bson::DateTime::from_chrono(cutoff) },
        })
        .await
    }

    async fn find_metadata(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentMetadata>, AppError> {
        use mongodb::bson::doc;

        self.metadata
            .find_one(doc! { "document_id": id_filter(document_id) })
            .await
            .map_err(db_err)
    }

    async fn find_comments(&self, document_id: Uuid) -> Result<Vec<Comment>, AppError> {
        use futures::TryStreamExt;
        use mongodb::bson::doc;
        use mongodb::options::FindOptions;

        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();

        let mut cursor = self
            .comments
            .find(doc! { "document_id": id_filter(document_id) })
            .with_options(options)
            .await
            .map_err(db_err)?;

        let mut comments = Vec::new();
        while let Some(comment) = cursor.try_next().await.map_err(db_err)? {
            comments.push(comment);
        }

        Ok(comments)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        use mongodb::bson::doc;

        self.users
            .find_one(doc! { "_id": id_filter(user_id) })
            .await
            .map_err(db_err)
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), AppError> {
        if unit.is_empty() {
            return Ok(());
        }

        let mut session = self.client.start_session().await.map_err(db_err)?;
        session.start_transaction().await.map_err(db_err)?;

        match self.apply(&mut session, unit).await {
            Ok(()) => session.commit_transaction().await.map_err(db_err),
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::warn!(error = %abort_err, "Failed to abort transaction");
                }
                Err(e)
            }
        }
    }
}
