//! Represents an uploaded file and its expiry window.

use sqlx::FromRow;

/// MIME type served when the uploader did not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata for a single stored object.
///
/// The struct describes the payload, it never holds the bytes themselves.
/// Records are written once at upload time and never mutated afterwards.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Public identifier used in share links.
    pub id: String,

    /// Original filename as supplied by the uploader. Untrusted; only used
    /// for presentation and the download filename.
    pub display_name: String,

    /// File name of the payload inside the blob directory. Never exposed.
    pub storage_key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type) declared at upload, if any.
    pub content_type: Option<String>,

    /// Unix timestamp (seconds) of the upload.
    pub created_at: i64,

    /// Unix timestamp (seconds) after which the object is gone for good.
    pub expires_at: i64,
}

impl ObjectRecord {
    /// An object is live while its expiry lies strictly in the future.
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }

    pub fn content_type_or_default(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}
