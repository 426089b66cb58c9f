use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::api::documents;
use crate::db::repository::DocumentRepository;
use crate::lifecycle::documents::DocumentService;
use crate::lifecycle::sharing::SharingService;
use crate::lifecycle::statistics::StatisticsService;
use crate::storage::client::StorageClient;

/// Shared state available to every handler.
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub sharing: Arc<SharingService>,
    pub statistics: Arc<StatisticsService>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        storage: Arc<dyn StorageClient>,
        public_base_url: Url,
    ) -> Self {
        Self {
            documents: Arc::new(DocumentService::new(repo.clone(), storage.clone())),
            sharing: Arc::new(SharingService::new(repo.clone(), storage, public_base_url)),
            statistics: Arc::new(StatisticsService::new(repo)),
        }
    }
}

/// Build the HTTP API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/documents", post(documents::create_handler))
        .route("/api/documents/my", get(documents::list_active_handler))
        .route("/api/documents/history", get(documents::list_archived_handler))
        .route("/api/documents/statistics", get(documents::statistics_handler))
        .route("/api/documents/share/{token}", get(documents::redeem_handler))
        .route(
            "/api/documents/{id}",
            put(documents::update_handler).delete(documents::delete_handler),
        )
        .route("/api/documents/{id}/download", get(documents::download_handler))
        .route("/api/documents/{id}/share", post(documents::share_handler))
        .route(
            "/api/documents/{id}/comments",
            get(documents::list_comments_handler).post(documents::add_comment_handler),
        )
        .route("/api/documents/{id}/metadata", put(documents::set_metadata_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
