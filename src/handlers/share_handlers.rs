//! HTTP handlers for uploading, inspecting, downloading and deleting shares.
//! Uploads stream to disk and downloads stream from it; admission is decided
//! before the upload body is read.

use crate::{
    errors::{AppError, multipart_failure},
    handlers::client_addr::ClientAddr,
    models::{object::ObjectRecord, ttl::Ttl},
    services::{
        admission::Decision,
        object_store::{StagedObject, StoreError},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Header carrying the shared upload password.
pub const UPLOAD_PASSWORD_HEADER: &str = "x-upload-password";

/// Characters left alone by JavaScript's `encodeURIComponent`; used inside
/// the quoted `filename` parameter.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// RFC 5987 `attr-char`: everything else is percent-encoded in `filename*`.
const EXT_VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    pub url: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataResponse {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl From<ObjectRecord> for FileMetadataResponse {
    fn from(rec: ObjectRecord) -> Self {
        Self {
            id: rec.id,
            name: rec.display_name,
            size: rec.size_bytes,
            mime_type: rec.content_type,
            created_at: rec.created_at,
            expires_at: rec.expires_at,
        }
    }
}

/// Run the admission gate for a mutating request.
fn admit(state: &AppState, client: &str, headers: &HeaderMap) -> Result<(), AppError> {
    let supplied = headers
        .get(UPLOAD_PASSWORD_HEADER)
        .map(HeaderValue::as_bytes)
        .unwrap_or_default();
    match state.gate.authorize(client, supplied) {
        Decision::Allowed => Ok(()),
        Decision::Denied(reason) => {
            warn!(client, %reason, "request refused by admission gate");
            Err(reason.into())
        }
    }
}

/// `POST /upload`: multipart form with a `file` part and an optional
/// `expiresIn` field (`1h`, `24h` or `7d`).
pub async fn upload(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    admit(&state, &client, &headers)?;

    let mut multipart =
        multipart.map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;

    // The payload streams to disk while the form is read; it is only
    // registered once `expiresIn`, which follows the file, is known.
    let mut staged: Option<StagedObject> = None;
    let mut expires_in: Option<String> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") if staged.is_none() => {
                let display_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let body = field.map_err(io::Error::other);
                let object = state
                    .store
                    .stage(body, &display_name, content_type.as_deref())
                    .await
                    .map_err(upload_failure)?;
                debug!(client = %client, size = object.size(), "upload staged");
                staged = Some(object);
            }
            Some("expiresIn") => expires_in = Some(field.text().await?),
            _ => {}
        }
    }

    let Some(staged) = staged else {
        return Err(AppError::bad_request("No file provided"));
    };

    let ttl = Ttl::parse_or_default(expires_in.as_deref());
    let record = state.store.commit(staged, ttl).await?;

    info!(id = %record.id, client = %client, size = record.size_bytes, "upload accepted");
    let url = format!("{}/share/{}", base_url(&state, &headers), record.id);
    Ok(Json(UploadResponse {
        id: record.id,
        url,
        expires_at: record.expires_at,
    }))
}

/// Errors reading the request body reach the store as I/O errors; report
/// them the way the multipart extractor would.
fn upload_failure(err: StoreError) -> AppError {
    if let StoreError::Io(io_err) = &err {
        if let Some(multipart) = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return multipart_failure(multipart);
        }
    }
    err.into()
}

/// `GET /files/{id}`: metadata of a live share.
pub async fn file_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileMetadataResponse>, AppError> {
    let record = state.store.get_metadata(&id).await?;
    Ok(Json(record.into()))
}

/// `GET /download/{id}`: stream the payload as an attachment.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (meta, file) = state.store.get_bytes(&id).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// `DELETE /files/{id}`: remove a share early. Requires the upload
/// password; succeeds whether or not the share still exists.
pub async fn delete_file(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    admit(&state, &client, &headers)?;
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_download_headers(headers: &mut HeaderMap, meta: &ObjectRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(meta.content_type_or_default())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    let quoted = utf8_percent_encode(&meta.display_name, FILENAME_ENCODE_SET);
    let extended = utf8_percent_encode(&meta.display_name, EXT_VALUE_ENCODE_SET);
    let disposition = format!("attachment; filename=\"{quoted}\"; filename*=UTF-8''{extended}");
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}

/// Origin used in share links: the configured public URL, else the
/// request's (possibly proxied) scheme and host.
fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_url {
        return url.clone();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = state
        .trust_proxy_headers
        .then(|| headers.get("x-forwarded-proto"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}
