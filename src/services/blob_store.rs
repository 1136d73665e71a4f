//! On-disk payload storage.
//!
//! Blobs live in one flat directory, each file named by its storage key.
//! Writes go to a `.tmp-<uuid>` file first, are fsynced, and are renamed
//! into place, so a reader never observes a half-written payload. Between
//! the two steps the payload is a [`PendingBlob`], whose temp file goes away
//! with it unless it was persisted.

use crate::services::object_store::{StoreError, StoreResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_STORAGE_KEY_LEN: usize = 128;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

/// A fully written payload still sitting in its temp file.
#[derive(Debug)]
pub struct PendingBlob {
    path: PathBuf,
    size: u64,
    armed: bool,
}

impl PendingBlob {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("discarded pending blob {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                error = %err,
                "could not remove pending blob {}",
                self.path.display()
            ),
        }
    }
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage keys are generated internally, but refuse anything that could
    /// escape the blob directory or collide with temp files anyway.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_STORAGE_KEY_LEN {
            return Err(StoreError::InvalidStorageKey(key.to_string()));
        }
        if key.starts_with('.') || key.contains("..") {
            return Err(StoreError::InvalidStorageKey(key.to_string()));
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(StoreError::InvalidStorageKey(key.to_string()));
        }
        Ok(())
    }

    fn blob_path(&self, key: &str) -> StoreResult<PathBuf> {
        Self::ensure_key_safe(key)?;
        Ok(self.root.join(key))
    }

    /// Stream a payload into a fresh temp file in the blob directory.
    ///
    /// Fails with `TooLarge` as soon as more than `max_size` bytes have
    /// arrived. The data is flushed and fsynced before this returns; the
    /// temp file is removed on any error, and later whenever the returned
    /// [`PendingBlob`] is dropped without being persisted.
    pub async fn write_pending<S>(&self, stream: S, max_size: u64) -> StoreResult<PendingBlob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(&self.root).await?;
        let tmp_path = self.root.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let mut pending = PendingBlob {
            path: tmp_path,
            size: 0,
            armed: true,
        };

        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            pending.size += chunk.len() as u64;
            if pending.size > max_size {
                return Err(StoreError::TooLarge {
                    size: pending.size,
                    max: max_size,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        Ok(pending)
    }

    /// Move a pending blob into place under `key`; returns its size.
    pub async fn persist(&self, mut pending: PendingBlob, key: &str) -> StoreResult<u64> {
        let file_path = self.blob_path(key)?;
        fs::rename(&pending.path, &file_path).await?;
        pending.armed = false;

        debug!(key, size_bytes = pending.size, "wrote blob");
        Ok(pending.size)
    }

    /// Open a blob for reading. `None` if the file does not exist.
    pub async fn open(&self, key: &str) -> StoreResult<Option<File>> {
        let path = self.blob_path(key)?;
        match File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.blob_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Remove a blob. Returns `false` if it was already gone.
    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path).await {
            Ok(_) => {
                debug!("removed blob {}", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
                Ok(false)
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Delete temp files left behind by writes that never finished, e.g.
    /// after a crash. Only safe before the server starts accepting uploads.
    pub async fn remove_stale_temp_files(&self) -> StoreResult<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(_) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
        Ok(removed)
    }
}
