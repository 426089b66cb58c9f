use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::db::models::{Document, DocumentMetadata, Payload};
use crate::db::repository::DocumentRepository;
use crate::db::unit_of_work::UnitOfWork;
use crate::error::AppError;
use crate::lifecycle::{remove_payload, settle_conflict};
use crate::storage::client::StorageClient;

/// Random bytes behind a share token (256 bits).
pub const SHARE_TOKEN_BYTES: usize = 32;

/// Path under the public base URL where share links are redeemed.
pub const SHARE_PATH: &str = "api/documents/share";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLink {
    pub token: String,
    pub url: String,
}

/// Generate an unguessable, URL-safe share token.
pub fn generate_share_token() -> String {
    let mut bytes = [0u8; SHARE_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Transfers ownership of a document through single-use links.
///
/// Redeeming a link gives the recipient an independent copy and retires the
/// original, so the link can never be used twice.
pub struct SharingService {
    repo: Arc<dyn DocumentRepository>,
    storage: Arc<dyn StorageClient>,
    public_base_url: Url,
}

impl SharingService {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        storage: Arc<dyn StorageClient>,
        public_base_url: Url,
    ) -> Self {
        Self {
            repo,
            storage,
            public_base_url,
        }
    }

    /// Issue a fresh token for an active document owned by `owner_id`.
    ///
    /// Any previously issued token for the same document stops working.
    pub async fn create_share_link(&self, owner_id: Uuid, id: Uuid) -> Result<ShareLink, AppError> {
        let mut document = self
            .repo
            .find_by_owner_and_id(owner_id, id)
            .await?
            .ok_or_else(AppError::document_not_found)?;

        let token = generate_share_token();
        if !document.grant_share(token.clone(), Utc::now()) {
            return Err(AppError::document_not_found());
        }

        let mut unit = UnitOfWork::new();
        unit.update_document(document);
        if let Err(e) = self.repo.commit(unit).await {
            return Err(settle_conflict(self.repo.as_ref(), id, e, Document::is_active).await);
        }

        tracing::info!(document_id = %id, "Share link created");
        Ok(ShareLink {
            url: self.share_url(&token),
            token,
        })
    }

    /// Redeem `token` on behalf of `new_owner_id`.
    ///
    /// The recipient gets a new active document with a copied payload and
    /// the geolocation moved over; the original is tombstoned in the same
    /// commit. Comments stay with the original.
    pub async fn redeem_share_link(
        &self,
        token: &str,
        new_owner_id: Uuid,
    ) -> Result<Document, AppError> {
        let original = self
            .repo
            .find_by_share_token(token)
            .await?
            .filter(|d| d.share_token() == Some(token))
            .ok_or_else(|| AppError::NotFound("Share link is invalid or expired".into()))?;
        let metadata = self.repo.find_metadata(original.id).await?;

        let now = Utc::now();
        let mut copy = Document::new(
            new_owner_id,
            original.name.clone(),
            original.description.clone(),
            now,
            original.expires_at,
        );

        if let Some(payload) = &original.payload {
            let key = self
                .storage
                .copy(&payload.key, &payload.file_name, copy.id, new_owner_id)
                .await?;
            copy.payload = Some(Payload {
                key,
                ..payload.clone()
            });
        }

        let mut unit = UnitOfWork::new();
        unit.insert_document(copy.clone());

        if let Some(metadata) = metadata {
            unit.upsert_metadata(DocumentMetadata {
                id: Uuid::new_v4(),
                document_id: copy.id,
                created_at: now,
                ..metadata
            })
            .remove_metadata(original.id);
        }

        let original_id = original.id;
        let mut retired = original;
        retired.soft_delete(now);
        unit.update_document(retired);

        if let Err(e) = self.repo.commit(unit).await {
            if let Some(payload) = &copy.payload {
                remove_payload(self.storage.as_ref(), payload, copy.id).await;
            }
            return Err(self.settle_redemption(token, original_id, e).await);
        }

        tracing::info!(
            original_id = %original_id,
            document_id = %copy.id,
            %new_owner_id,
            "Share link redeemed"
        );
        Ok(copy)
    }

    /// A redemption that lost a race is only worth retrying while the same
    /// document still holds the same token.
    async fn settle_redemption(&self, token: &str, original_id: Uuid, err: AppError) -> AppError {
        if !matches!(err, AppError::Conflict(_)) {
            return err;
        }

        match self.repo.find_by_share_token(token).await {
            Ok(Some(current)) if current.id == original_id => err,
            Ok(_) => AppError::NotFound("Share link is invalid or expired".into()),
            Err(read_err) => read_err,
        }
    }

    fn share_url(&self, token: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url.as_str().trim_end_matches('/'),
            SHARE_PATH,
            token
        )
    }
}
