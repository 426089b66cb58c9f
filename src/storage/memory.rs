use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::client::{payload_key, StorageClient};

/// Process-local StorageClient backed by a hash map.
///
/// Used by the `memory` backend and by tests. Copies and deletes can be made
/// to fail on demand to exercise the error paths of the lifecycle engine.
#[derive(Debug, Default)]
pub struct InMemoryStorageClient {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_copies: AtomicBool,
    fail_deletes: AtomicBool,
}

impl InMemoryStorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().expect("in-memory objects poisoned")
    }
}

#[async_trait]
impl StorageClient for InMemoryStorageClient {
    async fn save(
        &self,
        content: Vec<u8>,
        file_name: &str,
        document_id: Uuid,
        owner_id: Uuid,
    ) -> Result<String, AppError> {
        let key = payload_key(file_name, document_id, owner_id);
        self.lock().insert(key.clone(), content);
        Ok(key)
    }

    async fn copy(
        &self,
        key: &str,
        file_name: &str,
        new_document_id: Uuid,
        new_owner_id: Uuid,
    ) -> Result<String, AppError> {
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("Failed to copy object '{}'", key)));
        }

        let mut objects = self.lock();
        let content = objects
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("Source object '{}' not found", key)))?;
        let new_key = payload_key(file_name, new_document_id, new_owner_id);
        objects.insert(new_key.clone(), content);
        Ok(new_key)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("Failed to delete object '{}'", key)));
        }

        Ok(self.lock().remove(key).is_some())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        Ok(self.lock().get(key).cloned())
    }
}
