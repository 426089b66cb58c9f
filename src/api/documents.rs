use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::caller::CallerId;
use crate::app::AppState;
use crate::db::models::{Document, DocumentMetadata, Lifecycle};
use crate::error::AppError;
use crate::lifecycle::documents::{
    CommentView, DocumentUpdate, DocumentView, MetadataInput, NewDocument, Upload,
};
use crate::lifecycle::sharing::ShareLink;
use crate::lifecycle::statistics::UserStatistics;

/// Body of `POST /api/documents`.
#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub expiration_days: i64,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Base64-encoded file body.
    #[serde(default)]
    pub file_content: Option<String>,
}

impl CreateDocumentRequest {
    fn into_new_document(self) -> Result<NewDocument, AppError> {
        let upload = match (self.file_name, self.file_content) {
            (_, None) => None,
            (None, Some(_)) => {
                return Err(AppError::BadRequest(
                    "file_name is required when file_content is given".into(),
                ))
            }
            (Some(file_name), Some(encoded)) => {
                let content = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| AppError::BadRequest(format!("Invalid file_content: {e}")))?;
                Some(Upload { file_name, content })
            }
        };

        Ok(NewDocument {
            name: self.name,
            description: self.description,
            expiration_days: self.expiration_days,
            upload,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DocumentMetadata> for MetadataResponse {
    fn from(metadata: DocumentMetadata) -> Self {
        Self {
            latitude: metadata.latitude,
            longitude: metadata.longitude,
            location_name: metadata.location_name,
            created_at: metadata.created_at,
        }
    }
}

/// Client-facing view of a document. The share token is never exposed.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub purge_at: Option<DateTime<Utc>>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub content_type: Option<String>,
    pub metadata: Option<MetadataResponse>,
    pub comments: Vec<CommentView>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        let (status, archive) = match &document.lifecycle {
            Lifecycle::Active { .. } => ("active", None),
            Lifecycle::Archived(stamp) => ("archived", Some(*stamp)),
            Lifecycle::Deleted { archive, .. } => ("deleted", *archive),
        };

        Self {
            id: document.id,
            owner_id: document.owner_id,
            name: document.name,
            description: document.description,
            status,
            created_at: document.created_at,
            expires_at: document.expires_at,
            archived_at: archive.map(|a| a.archived_at),
            purge_at: archive.map(|a| a.purge_at),
            file_name: document.payload.as_ref().map(|p| p.file_name.clone()),
            file_size: document.payload.as_ref().map(|p| p.size),
            content_type: document.payload.map(|p| p.content_type),
            metadata: None,
            comments: Vec::new(),
        }
    }
}

impl From<DocumentView> for DocumentResponse {
    fn from(view: DocumentView) -> Self {
        Self {
            metadata: view.metadata.map(MetadataResponse::from),
            comments: view.comments,
            ..Self::from(view.document)
        }
    }
}

/// `GET /api/documents/my`
pub async fn list_active_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let views = state.documents.list_active(caller).await?;
    Ok(Json(views.into_iter().map(DocumentResponse::from).collect()))
}

/// `GET /api/documents/history`
pub async fn list_archived_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let views = state.documents.list_archived(caller).await?;
    Ok(Json(views.into_iter().map(DocumentResponse::from).collect()))
}

/// `POST /api/documents`
pub async fn create_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    let document = state
        .documents
        .create(caller, request.into_new_document()?)
        .await?;
    Ok((StatusCode::CREATED, Json(document.into())))
}

/// `PUT /api/documents/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Json(request): Json<DocumentUpdate>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.documents.update(caller, id, request).await?;
    Ok(Json(document.into()))
}

/// `DELETE /api/documents/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.documents.delete(caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/documents/{id}/download`
pub async fn download_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let download = state.documents.download(caller, id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_safe_file_name(&download.file_name)
    );

    Ok((
        [
            (header::CONTENT_TYPE, download.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.content,
    )
        .into_response())
}

/// `POST /api/documents/{id}/share`
pub async fn share_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<ShareLink>, AppError> {
    let link = state.sharing.create_share_link(caller, id).await?;
    Ok(Json(link))
}

/// `GET /api/documents/share/{token}`: the caller becomes the owner of a copy.
pub async fn redeem_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(token): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.sharing.redeem_share_link(&token, caller).await?;
    Ok(Json(document.into()))
}

/// `GET /api/documents/{id}/comments`
pub async fn list_comments_handler(
    State(state): State<AppState>,
    CallerId(_caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CommentView>>, AppError> {
    Ok(Json(state.documents.list_comments(id).await?))
}

/// `POST /api/documents/{id}/comments`
pub async fn add_comment_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), AppError> {
    let comment = state.documents.add_comment(id, caller, &request.text).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `PUT /api/documents/{id}/metadata`
pub async fn set_metadata_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Json(input): Json<MetadataInput>,
) -> Result<Json<MetadataResponse>, AppError> {
    let metadata = state.documents.set_metadata(caller, id, input).await?;
    Ok(Json(metadata.into()))
}

/// `GET /api/documents/statistics`
pub async fn statistics_handler(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<UserStatistics>, AppError> {
    Ok(Json(state.statistics.get_statistics(caller, query.year).await?))
}

fn header_safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
