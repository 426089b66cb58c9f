mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use url::Url;
use uuid::Uuid;

use docshelf::db::memory::InMemoryDocumentRepository;
use docshelf::db::repository::DocumentRepository;
use docshelf::error::AppError;
use docshelf::lifecycle::documents::{DocumentService, DocumentUpdate, NewDocument, Upload};
use docshelf::lifecycle::sharing::SharingService;
use docshelf::lifecycle::statistics::StatisticsService;
use docshelf::lifecycle::sweeper::{ArchivalSweeper, SweepSettings};
use docshelf::storage::memory::InMemoryStorageClient;

struct Engine {
    repo: Arc<InMemoryDocumentRepository>,
    storage: Arc<InMemoryStorageClient>,
    documents: DocumentService,
    sharing: SharingService,
    statistics: StatisticsService,
    sweeper: ArchivalSweeper,
}

fn engine() -> Engine {
    let repo = Arc::new(InMemoryDocumentRepository::new());
    let storage = Arc::new(InMemoryStorageClient::new());
    Engine {
        documents: DocumentService::new(repo.clone(), storage.clone()),
        sharing: SharingService::new(
            repo.clone(),
            storage.clone(),
            Url::parse(common::PUBLIC_BASE_URL).unwrap(),
        ),
        statistics: StatisticsService::new(repo.clone()),
        sweeper: ArchivalSweeper::new(repo.clone(), storage.clone(), SweepSettings::default()),
        repo,
        storage,
    }
}

fn new_document(name: &str, days: i64, file: bool) -> NewDocument {
    NewDocument {
        name: name.to_string(),
        description: None,
        expiration_days: days,
        upload: file.then(|| Upload {
            file_name: format!("{name}.txt"),
            content: name.as_bytes().to_vec(),
        }),
    }
}

#[tokio::test]
async fn document_runs_full_lifecycle() {
    let e = engine();
    let owner = Uuid::new_v4();
    let doc = e
        .documents
        .create(owner, new_document("lease", 1, true))
        .await
        .unwrap();

    // Not yet expired.
    let report = e.sweeper.run_cycle(Utc::now()).await;
    assert_eq!(report.archived, 0);

    let archived_at = doc.expires_at + Duration::seconds(1);
    let report = e.sweeper.run_cycle(archived_at).await;
    assert_eq!(report.archived, 1);

    assert!(e.documents.list_active(owner).await.unwrap().is_empty());
    let history = e.documents.list_archived(owner).await.unwrap();
    assert_eq!(history.len(), 1);

    // Archived documents stay downloadable and editable fields are frozen.
    let download = e.documents.download(owner, doc.id).await.unwrap();
    assert_eq!(download.content, b"lease");
    assert!(e.sharing.create_share_link(owner, doc.id).await.is_err());

    let stats = e.statistics.get_statistics(owner, None).await.unwrap();
    assert_eq!(stats.archived_documents, 1);

    let report = e.sweeper.run_cycle(archived_at + Duration::days(30)).await;
    assert_eq!(report.purged, 1);
    assert!(e.documents.list_archived(owner).await.unwrap().is_empty());
    assert!(e.storage.is_empty());

    let stats = e.statistics.get_statistics(owner, None).await.unwrap();
    assert_eq!(stats.total_documents, 0);
}

#[tokio::test]
async fn share_of_document_that_expires_before_redemption() {
    let e = engine();
    let owner = Uuid::new_v4();
    let doc = e
        .documents
        .create(owner, new_document("note", 1, false))
        .await
        .unwrap();
    let link = e.sharing.create_share_link(owner, doc.id).await.unwrap();

    e.sweeper
        .run_cycle(doc.expires_at + Duration::minutes(1))
        .await;

    match e.sharing.redeem_share_link(&link.token, Uuid::new_v4()).await {
        Err(AppError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }
}

#[tokio::test]
async fn redeemed_copy_keeps_original_expiration() {
    let e = engine();
    let owner = Uuid::new_v4();
    let recipient = Uuid::new_v4();
    let doc = e
        .documents
        .create(owner, new_document("voucher", 2, true))
        .await
        .unwrap();
    let link = e.sharing.create_share_link(owner, doc.id).await.unwrap();
    let copy = e.sharing.redeem_share_link(&link.token, recipient).await.unwrap();

    // The tombstone is out of the sweeper's reach; only the copy archives.
    let report = e.sweeper.run_cycle(doc.expires_at).await;
    assert_eq!(report.archived, 1);
    let copy = e.repo.find_by_id(copy.id).await.unwrap().unwrap();
    assert!(copy.is_archived());
    assert!(e.repo.find_by_id(doc.id).await.unwrap().unwrap().is_deleted());
}

/// Services over a repository whose reads can be held mid-operation.
struct Race {
    repo: Arc<common::PausingRepository>,
    storage: Arc<InMemoryStorageClient>,
    documents: DocumentService,
    sharing: SharingService,
    sweeper: ArchivalSweeper,
}

fn race() -> Arc<Race> {
    let repo = Arc::new(common::PausingRepository::new(Arc::new(
        InMemoryDocumentRepository::new(),
    )));
    let storage = Arc::new(InMemoryStorageClient::new());
    Arc::new(Race {
        documents: DocumentService::new(repo.clone(), storage.clone()),
        sharing: SharingService::new(
            repo.clone(),
            storage.clone(),
            Url::parse(common::PUBLIC_BASE_URL).unwrap(),
        ),
        sweeper: ArchivalSweeper::new(repo.clone(), storage.clone(), SweepSettings::default()),
        repo,
        storage,
    })
}

async fn stored(r: &Race, id: Uuid) -> docshelf::db::models::Document {
    r.repo.inner.find_by_id(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn owner_update_between_sweep_read_and_commit_is_kept() {
    let r = race();
    let owner = Uuid::new_v4();
    let doc = r
        .documents
        .create(owner, new_document("lease", 1, false))
        .await
        .unwrap();
    let now = doc.expires_at + Duration::seconds(1);

    let mut held = r.repo.pause_after(common::Read::Expired);
    let pass = {
        let r = r.clone();
        tokio::spawn(async move { r.sweeper.archive_expired(now).await })
    };
    held.reached().await;

    let update = DocumentUpdate {
        name: "renamed".into(),
        description: None,
        expiration_days: 365,
    };
    r.documents.update(owner, doc.id, update).await.unwrap();
    held.resume();

    assert_eq!(pass.await.unwrap().unwrap(), 0);
    let current = stored(&r, doc.id).await;
    assert!(current.is_active());
    assert_eq!(current.name, "renamed");
    assert!(current.expires_at > now);

    // Extended past `now`, so a fresh pass leaves it alone too.
    assert_eq!(r.sweeper.archive_expired(now).await.unwrap(), 0);
}

#[tokio::test]
async fn document_changed_mid_pass_does_not_hold_back_the_others() {
    let r = race();
    let owner = Uuid::new_v4();
    let mut docs = Vec::new();
    for name in ["a", "b", "c"] {
        docs.push(
            r.documents
                .create(owner, new_document(name, 1, false))
                .await
                .unwrap(),
        );
    }
    let now = docs.iter().map(|d| d.expires_at).max().unwrap() + Duration::minutes(1);

    let mut held = r.repo.pause_after(common::Read::Expired);
    let pass = {
        let r = r.clone();
        tokio::spawn(async move { r.sweeper.archive_expired(now).await })
    };
    held.reached().await;
    let link = r.sharing.create_share_link(owner, docs[0].id).await.unwrap();
    held.resume();

    assert_eq!(pass.await.unwrap().unwrap(), 2);
    let shared = stored(&r, docs[0].id).await;
    assert!(shared.is_active());
    assert_eq!(shared.share_token(), Some(link.token.as_str()));
    assert!(stored(&r, docs[1].id).await.is_archived());
    assert!(stored(&r, docs[2].id).await.is_archived());

    // The skipped document is picked up by the next cycle.
    let report = r.sweeper.run_cycle(now).await;
    assert_eq!(report.archived, 1);
    assert_eq!(report.failed_passes, 0);
    assert!(stored(&r, docs[0].id).await.is_archived());
}

#[tokio::test]
async fn redemption_losing_the_race_reports_dead_link() {
    let r = race();
    let owner = Uuid::new_v4();
    let doc = r
        .documents
        .create(owner, new_document("ticket", 5, true))
        .await
        .unwrap();
    let link = r.sharing.create_share_link(owner, doc.id).await.unwrap();

    let mut held = r.repo.pause_after(common::Read::ShareToken);
    let loser = {
        let r = r.clone();
        let token = link.token.clone();
        tokio::spawn(async move { r.sharing.redeem_share_link(&token, Uuid::new_v4()).await })
    };
    held.reached().await;

    let winner = r
        .sharing
        .redeem_share_link(&link.token, Uuid::new_v4())
        .await
        .unwrap();
    held.resume();

    match loser.await.unwrap() {
        Err(AppError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }

    let active: Vec<_> = r
        .repo
        .inner
        .all_documents()
        .into_iter()
        .filter(|d| d.is_active())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, winner.id);
    // Original payload plus the winner's copy; the loser's copy is gone.
    assert_eq!(r.storage.len(), 2);
}

#[tokio::test]
async fn delete_between_sweep_read_and_commit_wins() {
    let r = race();
    let owner = Uuid::new_v4();
    let doc = r
        .documents
        .create(owner, new_document("race", 1, true))
        .await
        .unwrap();
    let now = doc.expires_at + Duration::seconds(1);

    let mut held = r.repo.pause_after(common::Read::Expired);
    let pass = {
        let r = r.clone();
        tokio::spawn(async move { r.sweeper.run_cycle(now).await })
    };
    held.reached().await;
    r.documents.delete(owner, doc.id).await.unwrap();
    held.resume();

    let report = pass.await.unwrap();
    assert_eq!(report.archived, 0);
    assert_eq!(report.failed_passes, 0);
    assert!(stored(&r, doc.id).await.is_deleted());
    assert!(r.storage.is_empty());
}

#[tokio::test]
async fn archive_between_delete_read_and_commit_wins() {
    let r = race();
    let owner = Uuid::new_v4();
    let doc = r
        .documents
        .create(owner, new_document("race", 1, true))
        .await
        .unwrap();

    let mut held = r.repo.pause_after(common::Read::OwnerAndId);
    let deleting = {
        let r = r.clone();
        tokio::spawn(async move { r.documents.delete(owner, doc.id).await })
    };
    held.reached().await;
    let archived = r
        .sweeper
        .archive_expired(doc.expires_at + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(archived, 1);
    held.resume();

    match deleting.await.unwrap() {
        Err(AppError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }
    assert!(stored(&r, doc.id).await.is_archived());
    // The archived document keeps its payload until it is purged.
    assert_eq!(r.storage.len(), 1);
}

#[tokio::test]
async fn concurrent_owner_edits_surface_a_conflict() {
    let r = race();
    let owner = Uuid::new_v4();
    let doc = r
        .documents
        .create(owner, new_document("draft", 3, false))
        .await
        .unwrap();

    let mut held = r.repo.pause_after(common::Read::OwnerAndId);
    let slow = {
        let r = r.clone();
        tokio::spawn(async move {
            let update = DocumentUpdate {
                name: "slow".into(),
                description: None,
                expiration_days: 3,
            };
            r.documents.update(owner, doc.id, update).await
        })
    };
    held.reached().await;
    let update = DocumentUpdate {
        name: "fast".into(),
        description: None,
        expiration_days: 3,
    };
    r.documents.update(owner, doc.id, update).await.unwrap();
    held.resume();

    assert!(matches!(slow.await.unwrap(), Err(AppError::Conflict(id)) if id == doc.id));
    assert_eq!(stored(&r, doc.id).await.name, "fast");
}

#[tokio::test]
async fn comment_racing_a_delete_leaves_no_orphan() {
    let r = race();
    let owner = Uuid::new_v4();
    let author = Uuid::new_v4();
    r.repo.inner.insert_user(docshelf::db::models::User {
        id: author,
        email: "author@example.com".into(),
    });
    let doc = r
        .documents
        .create(owner, new_document("notes", 3, false))
        .await
        .unwrap();

    let mut held = r.repo.pause_after(common::Read::ById);
    let commenting = {
        let r = r.clone();
        tokio::spawn(async move { r.documents.add_comment(doc.id, author, "late").await })
    };
    held.reached().await;
    r.documents.delete(owner, doc.id).await.unwrap();
    held.resume();

    match commenting.await.unwrap() {
        Err(AppError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }
    assert!(r.repo.inner.find_comments(doc.id).await.unwrap().is_empty());
}
