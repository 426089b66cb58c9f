//! The document lifecycle engine.
//!
//! Request-driven operations live in [`documents`] and [`sharing`]; the
//! time-driven transitions are owned by the [`sweeper`]. Everything reads
//! committed state through a [`DocumentRepository`](crate::db::repository::DocumentRepository)
//! and writes through a [`UnitOfWork`](crate::db::unit_of_work::UnitOfWork).

pub mod documents;
pub mod sharing;
pub mod state;
pub mod statistics;
pub mod sweeper;

use uuid::Uuid;

use crate::db::models::{Document, Payload};
use crate::db::repository::DocumentRepository;
use crate::error::AppError;
use crate::storage::client::StorageClient;

/// Map a lost race on `document_id` to what the caller should see.
///
/// If the winner moved the document into a state where the operation no
/// longer applies (`applies` is false), retrying can never succeed and the
/// outcome is `NotFound`. Otherwise the conflict is returned as is.
pub(crate) async fn settle_conflict(
    repo: &dyn DocumentRepository,
    document_id: Uuid,
    err: AppError,
    applies: fn(&Document) -> bool,
) -> AppError {
    if !matches!(err, AppError::Conflict(_)) {
        return err;
    }

    match repo.find_by_id(document_id).await {
        Ok(Some(current)) if applies(&current) => err,
        Ok(_) => AppError::document_not_found(),
        Err(read_err) => read_err,
    }
}

/// Delete a payload without letting a storage failure escape.
///
/// Returns `true` only if the object was actually removed.
pub(crate) async fn remove_payload(
    storage: &dyn StorageClient,
    payload: &Payload,
    document_id: Uuid,
) -> bool {
    match storage.delete(&payload.key).await {
        Ok(true) => true,
        Ok(false) => {
            tracing::debug!(%document_id, key = %payload.key, "Payload already absent");
            false
        }
        Err(e) => {
            tracing::warn!(%document_id, key = %payload.key, error = %e, "Failed to delete payload");
            false
        }
    }
}
