use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::models::DEFAULT_ARCHIVE_RETENTION_DAYS;
use crate::db::repository::DocumentRepository;
use crate::db::unit_of_work::UnitOfWork;
use crate::error::AppError;
use crate::lifecycle::remove_payload;
use crate::storage::client::StorageClient;

/// Default time between sweep cycles.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    /// Time between the start of consecutive cycles.
    pub interval: Duration,
    /// How long an archived document stays in history before purge.
    pub retention: chrono::Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            retention: chrono::Duration::days(DEFAULT_ARCHIVE_RETENTION_DAYS),
        }
    }
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub archived: usize,
    pub purged: usize,
    /// Passes that failed and will be retried on the next cycle.
    pub failed_passes: usize,
}

/// Time-driven half of the lifecycle: `Active → Archived` on expiry and
/// `Archived → Deleted` once retention has elapsed.
///
/// Each pass commits its transitions as one unit of work, so a backend
/// failure leaves every document of that pass untouched for the next cycle.
/// A document changed concurrently is skipped without holding back the rest.
pub struct ArchivalSweeper {
    repo: Arc<dyn DocumentRepository>,
    storage: Arc<dyn StorageClient>,
    settings: SweepSettings,
}

impl ArchivalSweeper {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        storage: Arc<dyn StorageClient>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            repo,
            storage,
            settings,
        }
    }

    /// Archive every active document whose expiration is at or before `now`.
    pub async fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.repo.find_expired(now).await?;

        let mut batches = Vec::new();
        for mut document in expired {
            if document.archive(now, self.settings.retention) {
                let id = document.id;
                let mut unit = UnitOfWork::new();
                unit.update_document(document);
                batches.push((id, unit));
            }
        }

        let archived = self.commit_batches(batches).await?;
        if archived > 0 {
            info!(count = archived, "Archived expired documents");
        }
        Ok(archived)
    }

    /// Purge archived documents whose retention has elapsed.
    ///
    /// Payload deletion is best-effort: a storage failure is logged and the
    /// document is tombstoned regardless.
    pub async fn purge_archived(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let cutoff = now - self.settings.retention;
        let due = self.repo.find_archived_older_than(cutoff).await?;

        let mut batches = Vec::new();
        for mut document in due {
            if !document.purge(now) {
                continue;
            }

            if let Some(payload) = &document.payload {
                remove_payload(self.storage.as_ref(), payload, document.id).await;
            }

            let id = document.id;
            let mut unit = UnitOfWork::new();
            unit.update_document(document).cascade_delete(id);
            batches.push((id, unit));
        }

        let purged = self.commit_batches(batches).await?;
        if purged > 0 {
            info!(count = purged, "Purged archived documents");
        }
        Ok(purged)
    }

    /// Commit the per-document batches of a pass as one unit of work.
    ///
    /// A document that changed since it was read is dropped from the pass
    /// and the remaining batches are committed again; the next cycle
    /// re-reads it. Returns how many documents were committed.
    async fn commit_batches(&self, mut batches: Vec<(Uuid, UnitOfWork)>) -> Result<usize, AppError> {
        while !batches.is_empty() {
            let mut unit = UnitOfWork::new();
            for (_, batch) in &batches {
                unit.extend(batch.clone());
            }

            match self.repo.commit(unit).await {
                Ok(()) => return Ok(batches.len()),
                Err(AppError::Conflict(id)) if batches.iter().any(|(doc, _)| *doc == id) => {
                    debug!(document_id = %id, "Document changed during sweep, skipped");
                    batches.retain(|(doc, _)| *doc != id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(0)
    }

    /// Run both passes. A failing pass is logged and does not stop the other.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match self.archive_expired(now).await {
            Ok(count) => report.archived = count,
            Err(e) => {
                error!(error = %e, transient = e.is_transient(), "Archive pass failed");
                report.failed_passes += 1;
            }
        }

        match self.purge_archived(now).await {
            Ok(count) => report.purged = count,
            Err(e) => {
                error!(error = %e, transient = e.is_transient(), "Purge pass failed");
                report.failed_passes += 1;
            }
        }

        report
    }

    /// Run cycles on a fixed interval until `cancel` fires.
    ///
    /// The first cycle starts immediately. Cancellation is only observed
    /// between cycles; a cycle in progress always runs to completion.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            retention_days = self.settings.retention.num_days(),
            "Archival sweeper started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle(Utc::now()).await;
                }
            }
        }

        info!("Archival sweeper stopped");
    }

    /// Start the sweeper as a background task.
    pub fn spawn(self) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        SweeperHandle { cancel, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop scheduling cycles and wait for the current one to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Archival sweeper task failed");
        }
    }
}
