//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks metadata store and disk I/O

use crate::{services::sweeper::SweepStatus, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness check. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness check that:
/// 1. Pings the metadata store.
/// 2. Performs a best-effort write/read/delete in the blob directory.
///
/// Also reports the sweeper's latest status and the stored object count.
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let metadata_check = match state.store.metadata().ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let disk_check = check_disk(&state).await;

    let overall_ok = metadata_check.ok && disk_check.ok;
    let mut checks = BTreeMap::new();
    checks.insert("metadata", metadata_check);
    checks.insert("disk", disk_check);

    let objects = state.store.count().await.ok();
    let sweeper = *state.sweep_status.borrow();

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
        objects,
        sweeper,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Write, read back and delete a scratch file next to the blobs.
async fn check_disk(state: &AppState) -> CheckStatus {
    let root = state.store.blobs().root();
    if let Err(e) = fs::create_dir_all(root).await {
        return CheckStatus::failed(format!("could not create storage dir: {}", e));
    }

    let tmp_path = root.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        return CheckStatus::failed(format!("could not write tmp file: {}", e));
    }

    let check = match fs::read(&tmp_path).await {
        Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
        Ok(_) => CheckStatus::failed("file content mismatch"),
        Err(e) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
    };

    match fs::remove_file(&tmp_path).await {
        Ok(_) => check,
        Err(e) if check.ok => CheckStatus {
            ok: true,
            error: Some(format!("could not remove tmp file: {}", e)),
        },
        Err(_) => check,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
    objects: Option<u64>,
    sweeper: SweepStatus,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        clock::ManualClock,
        routes::routes::app,
        services::{
            admission::{AdmissionGate, AdmissionSettings},
            blob_store::BlobStore,
            memory_metadata::MemoryMetadataStore,
            object_store::{ObjectStore, StoreLimits},
            sweeper::SweepStatus,
        },
        state::AppState,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    #[tokio::test]
    async fn liveness_and_readiness_report_ok() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(0);
        let store = ObjectStore::new(
            Arc::new(MemoryMetadataStore::new()),
            BlobStore::new(dir.path().join("uploads")),
            clock.clone(),
            StoreLimits::default(),
        );
        let (_tx, sweep_status) = watch::channel(SweepStatus {
            cycles: 3,
            ..SweepStatus::default()
        });
        let router = app(
            AppState {
                store,
                gate: Arc::new(AdmissionGate::new(AdmissionSettings::default(), clock)),
                public_url: None,
                trust_proxy_headers: false,
                sweep_status,
            },
            1024,
        );

        let resp = router
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value =
            serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["metadata"]["ok"], true);
        assert_eq!(body["checks"]["disk"]["ok"], true);
        assert_eq!(body["objects"], 0);
        assert_eq!(body["sweeper"]["phase"], "idle");
        assert_eq!(body["sweeper"]["cycles"], 3);
    }
}
