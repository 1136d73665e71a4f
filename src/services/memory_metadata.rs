//! In-memory [`MetadataStore`] used by unit tests.

use crate::{
    models::object::ObjectRecord,
    services::{
        metadata_store::MetadataStore,
        object_store::{StoreError, StoreResult},
    },
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    io,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<String, ObjectRecord>>,
    fail_next_insert: AtomicBool,
    fail_deletes_for: RwLock<Option<String>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `insert` fail with an I/O error.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Make every `delete` of `id` fail with an I/O error.
    pub async fn fail_deletes_for(&self, id: &str) {
        *self.fail_deletes_for.write().await = Some(id.to_string());
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: &ObjectRecord) -> StoreResult<()> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("injected insert failure")));
        }
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<ObjectRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn expired(&self, now: i64) -> StoreResult<Vec<ObjectRecord>> {
        let mut expired: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.expires_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        if self.fail_deletes_for.read().await.as_deref() == Some(id) {
            return Err(StoreError::Io(io::Error::other("injected delete failure")));
        }
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
