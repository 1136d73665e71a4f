//! ObjectStore: create / read / delete for expiring uploads.
//!
//! Metadata lives behind [`MetadataStore`], payloads in the [`BlobStore`].
//! The blob is always fully on disk before its record is committed, and a
//! record is always removed after (never before) an attempt on its blob.
//! Liveness is computed from `expires_at` on every read, so an expired
//! object is unreachable whether or not the sweeper has caught up yet.

use crate::{
    clock::SharedClock,
    models::{object::ObjectRecord, ttl::Ttl},
    services::{
        blob_store::{BlobStore, PendingBlob},
        id_generator::IdGenerator,
        metadata_store::MetadataStore,
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{io, sync::Arc};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, error, info, warn};

/// Attempts at drawing an id that is neither recorded nor present on disk.
const MAX_ID_ATTEMPTS: usize = 5;
const MAX_EXTENSION_LEN: usize = 16;
const MAX_DISPLAY_NAME_CHARS: usize = 255;
const FALLBACK_DISPLAY_NAME: &str = "file";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` has expired")]
    Expired(String),
    #[error("payload for object `{0}` is missing from disk")]
    BlobMissing(String),
    #[error("file too large: {size} bytes exceeds the limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("storage full: maximum of {max} files reached")]
    CapacityExceeded { max: u64 },
    #[error("object id `{0}` already in use")]
    DuplicateId(String),
    #[error("invalid storage key `{0}`")]
    InvalidStorageKey(String),
    #[error("could not allocate an unused object id")]
    IdsExhausted,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Admission limits enforced by [`ObjectStore::create`].
#[derive(Clone, Copy, Debug)]
pub struct StoreLimits {
    /// Largest accepted payload in bytes.
    pub max_file_size: u64,
    /// Most metadata rows kept at once, expired-but-unswept ones included.
    pub max_files: u64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            max_files: 10,
        }
    }
}

/// A payload on disk that has not been registered yet.
#[derive(Debug)]
pub struct StagedObject {
    display_name: String,
    content_type: Option<String>,
    blob: PendingBlob,
}

impl StagedObject {
    pub fn size(&self) -> u64 {
        self.blob.size()
    }
}

/// ObjectStore provides the operations behind the HTTP surface:
/// - Create an object (stage the blob, then commit the metadata row)
/// - Read metadata or bytes of a live object
/// - Delete an object (idempotent)
/// - Count rows and purge expired ones for the sweeper
#[derive(Clone)]
pub struct ObjectStore {
    metadata: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    ids: IdGenerator,
    clock: SharedClock,
    limits: StoreLimits,
}

impl ObjectStore {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: BlobStore,
        clock: SharedClock,
        limits: StoreLimits,
    ) -> Self {
        Self {
            metadata,
            blobs,
            ids: IdGenerator::default(),
            clock,
            limits,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// First half of storing an object: stream the payload to disk.
    ///
    /// Capacity is checked before a single byte is read, so a full store
    /// rejects even an empty upload; the size limit is enforced while the
    /// payload streams in. Nothing is visible until [`ObjectStore::commit`];
    /// dropping the returned [`StagedObject`] discards the payload.
    pub async fn stage<S>(
        &self,
        body: S,
        display_name: &str,
        content_type: Option<&str>,
    ) -> StoreResult<StagedObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_capacity().await?;

        let blob = self
            .blobs
            .write_pending(body, self.limits.max_file_size)
            .await?;

        Ok(StagedObject {
            display_name: normalize_display_name(display_name),
            content_type: content_type
                .map(str::trim)
                .filter(|ct| !ct.is_empty())
                .map(str::to_string),
            blob,
        })
    }

    /// Second half: give a staged payload an id and register it with `ttl`.
    ///
    /// Capacity is checked again since other uploads may have landed while
    /// this one streamed. The record is only inserted once the payload is in
    /// place; if the insert fails the payload is removed again.
    pub async fn commit(&self, staged: StagedObject, ttl: Ttl) -> StoreResult<ObjectRecord> {
        self.ensure_capacity().await?;

        let StagedObject {
            display_name,
            content_type,
            blob,
        } = staged;
        let (id, storage_key) = self.allocate_id(&display_name).await?;
        let size_bytes = self.blobs.persist(blob, &storage_key).await?;

        let created_at = self.clock.now();
        let record = ObjectRecord {
            id,
            display_name,
            storage_key,
            size_bytes: size_bytes as i64,
            content_type,
            created_at,
            expires_at: created_at + ttl.as_secs(),
        };

        if let Err(err) = self.metadata.insert(&record).await {
            if let Err(cleanup) = self.blobs.remove(&record.storage_key).await {
                warn!(
                    id = %record.id,
                    error = %cleanup,
                    "could not remove blob after failed metadata insert"
                );
            }
            return Err(err);
        }

        info!(
            id = %record.id,
            size = record.size_bytes,
            ttl = %ttl,
            expires_at = record.expires_at,
            "stored object"
        );
        Ok(record)
    }

    async fn ensure_capacity(&self) -> StoreResult<()> {
        let stored = self.metadata.count().await?;
        if stored >= self.limits.max_files {
            return Err(StoreError::CapacityExceeded {
                max: self.limits.max_files,
            });
        }
        Ok(())
    }

    /// Draw an id whose record and storage key are both unused.
    async fn allocate_id(&self, display_name: &str) -> StoreResult<(String, String)> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.next_id();
            let storage_key = storage_key_for(&id, display_name);
            if self.metadata.get(&id).await?.is_some() {
                warn!(id = %id, "generated id already recorded, drawing again");
                continue;
            }
            if self.blobs.exists(&storage_key).await? {
                warn!(id = %id, "generated id has a blob on disk, drawing again");
                continue;
            }
            return Ok((id, storage_key));
        }
        Err(StoreError::IdsExhausted)
    }

    /// Metadata of a live object.
    ///
    /// `NotFound` if the id was never stored (or already swept), `Expired`
    /// if the record is still there but its TTL has passed.
    pub async fn get_metadata(&self, id: &str) -> StoreResult<ObjectRecord> {
        if !self.ids.is_well_formed(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let record = self
            .metadata
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !record.is_live(self.clock.now()) {
            return Err(StoreError::Expired(id.to_string()));
        }
        Ok(record)
    }

    /// Metadata plus an open handle on the payload of a live object.
    ///
    /// A live record without its blob is an integrity fault and comes back
    /// as `BlobMissing`, never as `NotFound`.
    pub async fn get_bytes(&self, id: &str) -> StoreResult<(ObjectRecord, File)> {
        let record = self.get_metadata(id).await?;
        match self.blobs.open(&record.storage_key).await? {
            Some(file) => Ok((record, file)),
            None => {
                error!(
                    id = %record.id,
                    storage_key = %record.storage_key,
                    "integrity fault: metadata present but blob missing"
                );
                Err(StoreError::BlobMissing(record.id))
            }
        }
    }

    /// Delete an object. Deleting something that is not there is a no-op.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let Some(record) = self.metadata.get(id).await? else {
            debug!(id, "delete of absent object ignored");
            return Ok(());
        };
        if self.purge(&record).await? {
            info!(id = %record.id, "deleted object");
        }
        Ok(())
    }

    /// Number of metadata rows, including expired ones not yet swept.
    pub async fn count(&self) -> StoreResult<u64> {
        self.metadata.count().await
    }

    /// Records whose TTL has passed.
    pub async fn expired(&self) -> StoreResult<Vec<ObjectRecord>> {
        self.metadata.expired(self.clock.now()).await
    }

    /// Remove one object: blob first, then the record.
    ///
    /// A failed blob removal is logged and does not stop the record from
    /// being deleted. Returns whether a record was actually removed.
    pub async fn purge(&self, record: &ObjectRecord) -> StoreResult<bool> {
        if let Err(err) = self.blobs.remove(&record.storage_key).await {
            warn!(
                id = %record.id,
                storage_key = %record.storage_key,
                error = %err,
                "failed to remove blob; dropping metadata anyway"
            );
        }
        self.metadata.delete(&record.id).await
    }
}

/// Trim the uploader's filename, cap its length, and fall back to a
/// placeholder when nothing is left.
fn normalize_display_name(raw: &str) -> String {
    let trimmed: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect();
    if trimmed.is_empty() {
        FALLBACK_DISPLAY_NAME.to_string()
    } else {
        trimmed
    }
}

/// Storage key for an object: the id plus the sanitized extension of the
/// uploader's filename, if it has one.
pub fn storage_key_for(id: &str, display_name: &str) -> String {
    match sanitized_extension(display_name) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// Last extension token of `display_name`, reduced to ASCII alphanumerics.
///
/// Directory components (either separator) are ignored and dot-files such
/// as `.bashrc` have no extension.
fn sanitized_extension(display_name: &str) -> Option<String> {
    let base = display_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(display_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let ext: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_LEN)
        .collect();
    (!ext.is_empty()).then_some(ext)
}

#[cfg(test)]
impl ObjectStore {
    /// Stage and commit an in-memory payload in one go.
    pub(crate) async fn create(
        &self,
        bytes: Bytes,
        display_name: &str,
        content_type: Option<&str>,
        ttl: Ttl,
    ) -> StoreResult<ObjectRecord> {
        let body = futures::stream::once(async move { Ok(bytes) });
        let staged = self.stage(body, display_name, content_type).await?;
        self.commit(staged, ttl).await
    }
}
