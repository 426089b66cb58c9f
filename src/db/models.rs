use bson::serde_helpers::chrono_datetime_as_bson_datetime as bson_datetime;
use bson::serde_helpers::uuid_1_as_binary as bson_uuid;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days an archived document stays in the owner's history before it is purged.
pub const DEFAULT_ARCHIVE_RETENTION_DAYS: i64 = 30;

/// A user-owned document stored in the `documents` collection.
///
/// Timestamps are persisted as BSON datetimes so that range filters
/// (`expires_at <= now`, `archived_at <= cutoff`) compare chronologically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", with = "bson_uuid")]
    pub id: Uuid,
    /// The user that owns this document.
    #[serde(with = "bson_uuid")]
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "bson_datetime")]
    pub created_at: DateTime<Utc>,
    /// Once reached, the sweeper moves the document into the archive.
    #[serde(with = "bson_datetime")]
    pub expires_at: DateTime<Utc>,
    /// Where the document is in its lifecycle. See `crate::lifecycle::state`.
    pub lifecycle: Lifecycle,
    /// The binary body kept in the content store, if one was uploaded.
    #[serde(default)]
    pub payload: Option<Payload>,
    /// Bumped by every committed update; guarded writes compare against it.
    #[serde(default)]
    pub version: i64,
}

/// Lifecycle state of a document.
///
/// `Active → Archived → Deleted`, or `Active → Deleted` on explicit removal.
/// A share grant can only live inside `Active`, so an archived or deleted
/// document can never carry a redeemable token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active {
        #[serde(default)]
        share: Option<ShareGrant>,
    },
    Archived(ArchiveStamp),
    Deleted {
        #[serde(with = "bson_datetime")]
        deleted_at: DateTime<Utc>,
        /// Kept for audit when the document was archived before deletion.
        #[serde(default)]
        archive: Option<ArchiveStamp>,
    },
}

/// When a document was archived and when it becomes eligible for purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStamp {
    #[serde(with = "bson_datetime")]
    pub archived_at: DateTime<Utc>,
    #[serde(with = "bson_datetime")]
    pub purge_at: DateTime<Utc>,
}

impl ArchiveStamp {
    pub fn new(archived_at: DateTime<Utc>, retention: Duration) -> Self {
        Self {
            archived_at,
            purge_at: archived_at + retention,
        }
    }
}

/// An outstanding one-time share link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub token: String,
    #[serde(with = "bson_datetime")]
    pub shared_at: DateTime<Utc>,
}

/// Descriptor of a document's binary body in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Content store key, e.g. `{owner_id}/{document_id}.pdf`.
    pub key: String,
    /// The file name as uploaded.
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
}

/// Optional geolocation annotation, at most one per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(rename = "_id", with = "bson_uuid")]
    pub id: Uuid,
    #[serde(with = "bson_uuid")]
    pub document_id: Uuid,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(with = "bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Append-only remark left by a user on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "_id", with = "bson_uuid")]
    pub id: Uuid,
    #[serde(with = "bson_uuid")]
    pub document_id: Uuid,
    #[serde(with = "bson_uuid")]
    pub user_id: Uuid,
    pub text: String,
    #[serde(with = "bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Account record. Credentials live with the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "bson_uuid")]
    pub id: Uuid,
    pub email: String,
}
