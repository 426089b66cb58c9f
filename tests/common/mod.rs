#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::minio::MinIO;
use testcontainers_modules::mongo::Mongo;
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use docshelf::app::{router, AppState};
use docshelf::db::memory::InMemoryDocumentRepository;
use docshelf::db::models::{Comment, Document, DocumentMetadata, User};
use docshelf::db::repository::{DocumentRepository, MongoDocumentRepository};
use docshelf::db::unit_of_work::UnitOfWork;
use docshelf::error::AppError;
use docshelf::storage::client::S3StorageClient;
use docshelf::storage::memory::InMemoryStorageClient;

pub const PUBLIC_BASE_URL: &str = "http://docshelf.test";

/// The HTTP API wired to in-memory collaborators.
///
/// The collaborators are exposed so tests can inspect state or inject
/// failures behind the API's back.
pub struct TestEnv {
    pub router: Router,
    pub repo: Arc<InMemoryDocumentRepository>,
    pub storage: Arc<InMemoryStorageClient>,
}

impl TestEnv {
    pub fn start() -> Self {
        let repo = Arc::new(InMemoryDocumentRepository::new());
        let storage = Arc::new(InMemoryStorageClient::new());
        let state = AppState::new(
            repo.clone(),
            storage.clone(),
            Url::parse(PUBLIC_BASE_URL).expect("valid base url"),
        );

        Self {
            router: router(state),
            repo,
            storage,
        }
    }

    /// Build an `axum_test::TestServer` from this environment's router.
    pub fn server(&self) -> axum_test::TestServer {
        axum_test::TestServer::builder()
            .expect_success_by_default()
            .try_build(self.router.clone())
            .expect("Failed to build TestServer")
    }

    /// Build a `TestServer` that does NOT expect success by default (for error tests).
    pub fn server_permissive(&self) -> axum_test::TestServer {
        axum_test::TestServer::builder()
            .try_build(self.router.clone())
            .expect("Failed to build TestServer")
    }

    /// Register a user record and return its id.
    pub fn register_user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.repo.insert_user(User {
            id,
            email: email.to_string(),
        });
        id
    }

    /// Helper: create a document via the API and return the JSON body.
    pub async fn create_document(
        &self,
        server: &axum_test::TestServer,
        owner: Uuid,
        name: &str,
        file: Option<(&str, &[u8])>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "name": name,
            "description": "integration test",
            "expiration_days": 7
        });
        if let Some((file_name, content)) = file {
            body["file_name"] = file_name.into();
            body["file_content"] = STANDARD.encode(content).into();
        }

        server
            .post("/api/documents")
            .add_header(caller_header(), caller_value(owner))
            .json(&body)
            .await
            .json()
    }
}

pub fn caller_header() -> HeaderName {
    HeaderName::from_static("x-user-id")
}

pub fn caller_value(user: Uuid) -> HeaderValue {
    HeaderValue::from_str(&user.to_string()).expect("uuid is a valid header value")
}

/// Reads a test can hold an operation at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    Expired,
    ShareToken,
    OwnerAndId,
    ById,
}

struct Pause {
    at: Read,
    reached: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

/// Controls an operation held by [`PausingRepository::pause_after`].
pub struct Held {
    reached: oneshot::Receiver<()>,
    resume: oneshot::Sender<()>,
}

impl Held {
    /// Wait until the held operation has completed its read.
    pub async fn reached(&mut self) {
        (&mut self.reached)
            .await
            .expect("held operation dropped before reaching its read");
    }

    /// Let the held operation continue to its commit.
    pub fn resume(self) {
        let _ = self.resume.send(());
    }
}

/// In-memory repository that can stop the next call of one read right
/// after it returned, so another operation can run in between the read and
/// the commit that depends on it.
pub struct PausingRepository {
    pub inner: Arc<InMemoryDocumentRepository>,
    pause: Mutex<Option<Pause>>,
}

impl PausingRepository {
    pub fn new(inner: Arc<InMemoryDocumentRepository>) -> Self {
        Self {
            inner,
            pause: Mutex::new(None),
        }
    }

    /// Hold the next call of `at`. Only one call is held.
    pub fn pause_after(&self, at: Read) -> Held {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *self.pause.lock().unwrap() = Some(Pause {
            at,
            reached: reached_tx,
            resume: resume_rx,
        });
        Held {
            reached: reached_rx,
            resume: resume_tx,
        }
    }

    async fn checkpoint(&self, read: Read) {
        let pause = {
            let mut slot = self.pause.lock().unwrap();
            match slot.as_ref() {
                Some(p) if p.at == read => slot.take(),
                _ => None,
            }
        };

        if let Some(pause) = pause {
            let _ = pause.reached.send(());
            let _ = pause.resume.await;
        }
    }
}

#[async_trait]
impl DocumentRepository for PausingRepository {
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<Document>, AppError> {
        self.inner.find_by_owner(owner_id).await
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Document>, AppError> {
        let found = self.inner.find_by_owner_and_id(owner_id, id).await;
        self.checkpoint(Read::OwnerAndId).await;
        found
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        let found = self.inner.find_by_id(id).await;
        self.checkpoint(Read::ById).await;
        found
    }

    async fn find_by_share_token(&self, token: &str) -> Result<Option<Document>, AppError> {
        let found = self.inner.find_by_share_token(token).await;
        self.checkpoint(Read::ShareToken).await;
        found
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Document>, AppError> {
        let found = self.inner.find_expired(now).await;
        self.checkpoint(Read::Expired).await;
        found
    }

    async fn find_archived_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, AppError> {
        self.inner.find_archived_older_than(cutoff).await
    }

    async fn find_metadata(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentMetadata>, AppError> {
        self.inner.find_metadata(document_id).await
    }

    async fn find_comments(&self, document_id: Uuid) -> Result<Vec<Comment>, AppError> {
        self.inner.find_comments(document_id).await
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.inner.find_user(user_id).await
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), AppError> {
        self.inner.commit(unit).await
    }
}

/// Real MongoDB (replica set, for transactions) and MinIO containers.
///
/// Containers are kept alive for as long as this struct lives.
pub struct ContainerEnv {
    _mongo: ContainerAsync<Mongo>,
    _minio: ContainerAsync<MinIO>,
    pub repo: MongoDocumentRepository,
    pub storage: S3StorageClient,
}

impl ContainerEnv {
    pub async fn start() -> Self {
        let (mongo_container, minio_container) =
            tokio::join!(Mongo::repl_set().start(), MinIO::default().start());
        let mongo_container = mongo_container.expect("Failed to start MongoDB container");
        let minio_container = minio_container.expect("Failed to start MinIO container");

        // --- MongoDB ---
        let mongo_port = mongo_container
            .get_host_port_ipv4(27017)
            .await
            .expect("Failed to get MongoDB port");
        let mongo_uri = format!("mongodb://127.0.0.1:{}/?directConnection=true", mongo_port);
        let mongo_client = mongodb::Client::with_uri_str(&mongo_uri)
            .await
            .expect("Failed to connect to MongoDB");
        let repo = MongoDocumentRepository::new(&mongo_client.database("docshelf_test"));
        repo.ensure_indexes()
            .await
            .expect("Failed to create indexes");

        // --- MinIO (S3) ---
        let minio_port = minio_container
            .get_host_port_ipv4(9000)
            .await
            .expect("Failed to get MinIO port");
        let minio_endpoint = format!("http://127.0.0.1:{}", minio_port);

        let credentials =
            aws_sdk_s3::config::Credentials::new("minioadmin", "minioadmin", None, None, "test");
        let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&minio_endpoint)
            .region(aws_config::Region::new("us-east-1"))
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&s3_config)
                .force_path_style(true)
                .build(),
        );

        let bucket_name = "docshelf-test";
        let _ = s3_client.create_bucket().bucket(bucket_name).send().await;

        Self {
            _mongo: mongo_container,
            _minio: minio_container,
            repo,
            storage: S3StorageClient::new(s3_client, bucket_name.to_string()),
        }
    }
}
