//! Lifecycle transitions of a single document.
//!
//! ```text
//! Active ──(expired, sweeper)──▶ Archived ──(purge due, sweeper)──▶ Deleted
//!   │                                                                  ▲
//!   └───────────────(owner delete / share redemption)──────────────────┘
//! ```
//!
//! Each transition returns `true` when it changed the document and `false`
//! when the document was not in a state the transition applies to. Applying
//! a transition twice is therefore a no-op, which lets the sweeper and
//! request handlers race on the same document and still converge.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::models::{ArchiveStamp, Document, Lifecycle, ShareGrant};

impl Document {
    /// A fresh active document with no payload.
    pub fn new(
        owner_id: Uuid,
        name: String,
        description: Option<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name,
            description,
            created_at,
            expires_at,
            lifecycle: Lifecycle::Active { share: None },
            payload: None,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Active { .. })
    }

    pub fn is_archived(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Archived(_))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Deleted { .. })
    }

    /// When the document entered the archive, if it did and is still there.
    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        match &self.lifecycle {
            Lifecycle::Archived(stamp) => Some(stamp.archived_at),
            _ => None,
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match &self.lifecycle {
            Lifecycle::Deleted { deleted_at, .. } => Some(*deleted_at),
            _ => None,
        }
    }

    /// The outstanding share token, if any.
    pub fn share_token(&self) -> Option<&str> {
        match &self.lifecycle {
            Lifecycle::Active { share: Some(grant) } => Some(grant.token.as_str()),
            _ => None,
        }
    }

    /// Name, description and expiration may only change while active.
    pub fn is_mutable(&self) -> bool {
        self.is_active()
    }

    /// Attach a share grant. Replaces any previous token.
    ///
    /// Refused once the expiration has passed, even if the sweeper has not
    /// archived the document yet.
    pub fn grant_share(&mut self, token: String, now: DateTime<Utc>) -> bool {
        if now >= self.expires_at {
            return false;
        }

        match &mut self.lifecycle {
            Lifecycle::Active { share } => {
                *share = Some(ShareGrant {
                    token,
                    shared_at: now,
                });
                true
            }
            _ => false,
        }
    }

    /// `Active → Archived` once the expiration has been reached.
    ///
    /// Schedules the purge `retention` after `now` and drops any share grant.
    pub fn archive(&mut self, now: DateTime<Utc>, retention: Duration) -> bool {
        if !self.is_active() || now < self.expires_at {
            return false;
        }

        self.lifecycle = Lifecycle::Archived(ArchiveStamp::new(now, retention));
        true
    }

    /// `Archived → Deleted` once the scheduled purge time has been reached.
    pub fn purge(&mut self, now: DateTime<Utc>) -> bool {
        match self.lifecycle {
            Lifecycle::Archived(stamp) if now >= stamp.purge_at => {
                self.lifecycle = Lifecycle::Deleted {
                    deleted_at: now,
                    archive: Some(stamp),
                };
                true
            }
            _ => false,
        }
    }

    /// Tombstone the document. Any share grant is dropped with the active
    /// state; an archive stamp is kept for audit.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) -> bool {
        let archive = match self.lifecycle {
            Lifecycle::Active { .. } => None,
            Lifecycle::Archived(stamp) => Some(stamp),
            Lifecycle::Deleted { .. } => return false,
        };

        self.lifecycle = Lifecycle::Deleted {
            deleted_at: now,
            archive,
        };
        true
    }
}
