//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the catalog and the upload directory

use crate::services::video_service::VideoService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe; never performs I/O.
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
/// 200 when SQLite answers `SELECT 1` and a scratch file can be written,
/// read back and removed in the upload directory; 503 otherwise.
pub async fn readyz(State(service): State<VideoService>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert("sqlite", check_sqlite(&service).await);
    checks.insert("uploadDir", check_upload_dir(&service).await);

    let ready = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(service: &VideoService) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => CheckStatus::passed(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

async fn check_upload_dir(service: &VideoService) -> CheckStatus {
    const PROBE: &[u8] = b"readyz";
    let base = service.layout.base_path();
    let tmp_path = base.join(format!(".readyz-{}", Uuid::new_v4()));

    if let Err(e) = fs::create_dir_all(base).await {
        return CheckStatus::failed(format!("could not create upload dir: {}", e));
    }
    if let Err(e) = fs::write(&tmp_path, PROBE).await {
        return CheckStatus::failed(format!("could not write tmp file: {}", e));
    }
    let read_back = fs::read(&tmp_path).await;
    let removed = fs::remove_file(&tmp_path).await;

    match (read_back, removed) {
        (Ok(bytes), _) if bytes != PROBE => CheckStatus::failed("file content mismatch"),
        (Ok(_), Ok(())) => CheckStatus::passed(),
        (Ok(_), Err(e)) => CheckStatus {
            ok: true,
            error: Some(format!("could not remove tmp file: {}", e)),
        },
        (Err(e), _) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
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
