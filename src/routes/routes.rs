//! Defines routes for the upload server.
//!
//! ## Structure
//! - **Upload endpoints** (Fine Uploader protocol)
//!   - `POST   /upload`: store one chunk, or a whole file
//!   - `POST   /chunksdone`: reassemble and verify a chunked upload
//!   - `DELETE /upload/{uuid}`: remove a session's files and record
//!
//! - **Video endpoints**
//!   - `GET    /videos/{uuid}`: catalog entry with probed metadata
//!   - `GET    /videos/{uuid}/file`: download the stored file

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{chunks_done, delete_upload, upload},
        video_handlers::{download_video, get_video},
    },
    services::video_service::VideoService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. Request bodies up to `max_request_bytes` are accepted.
pub fn routes(max_request_bytes: usize) -> Router<VideoService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload endpoints
        .route("/upload", post(upload))
        .route("/upload/", post(upload))
        .route("/upload/{uuid}", delete(delete_upload))
        .route("/chunksdone", post(chunks_done))
        // video endpoints
        .route("/videos/{uuid}", get(get_video))
        .route("/videos/{uuid}/file", get(download_video))
        .layer(DefaultBodyLimit::max(max_request_bytes))
}

#[cfg(test)]
mod tests {
    use super::routes;
    use crate::services::video_service::testing::test_service;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----fineuploaderboundary";
    const UUID: &str = "2c1f0e8a-4b7d-4f2e-8c39-1d5e6f7a8b9c";

    async fn app(tmp: &TempDir) -> Router {
        routes(1024 * 1024).with_state(test_service(tmp.path()).await)
    }

    fn multipart_request(params: &[(&str, &str)], file: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in params {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"qqfile\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn chunk_request(index: u32, bytes: &[u8]) -> Request<Body> {
        let index = index.to_string();
        multipart_request(
            &[
                ("qquuid", UUID),
                ("qqfilename", "movie.mp4"),
                ("qqpartindex", &index),
                ("qqtotalparts", "2"),
            ],
            bytes,
        )
    }

    fn chunks_done_request(total_size: u64, total_parts: u32) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chunksdone")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "qquuid={UUID}&qqfilename=movie.mp4&qqtotalfilesize={total_size}&qqtotalparts={total_parts}&userid=138483"
            )))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let tmp = TempDir::new().expect("tempdir");
        let (status, body) = send_json(&app(&tmp).await, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn readyz_checks_catalog_and_disk() {
        let tmp = TempDir::new().expect("tempdir");
        let (status, body) = send_json(&app(&tmp).await, get("/readyz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["uploadDir"]["ok"], true);
    }

    #[tokio::test]
    async fn chunked_upload_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let app = app(&tmp).await;

        let (status, body) = send_json(&app, chunk_request(0, b"first-")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let (status, _) = send_json(&app, chunk_request(1, b"second")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, chunks_done_request(12, 2)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["size"], 12);
        assert!(body["videoInfo"].is_null());

        let (status, body) = send_json(&app, get(&format!("/videos/{UUID}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fileName"], "movie.mp4");
        assert_eq!(body["userId"], "138483");

        let (status, bytes) = send(&app, get(&format!("/videos/{UUID}/file"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"first-second");
    }

    #[tokio::test]
    async fn size_mismatch_is_reported_distinctly() {
        let tmp = TempDir::new().expect("tempdir");
        let app = app(&tmp).await;
        send(&app, chunk_request(0, b"first-")).await;
        send(&app, chunk_request(1, b"second")).await;

        let (status, body) = send_json(&app, chunks_done_request(13, 2)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "size_mismatch");
        assert_eq!(body["preventRetry"], true);
    }

    #[tokio::test]
    async fn missing_part_is_reported_distinctly() {
        let tmp = TempDir::new().expect("tempdir");
        let app = app(&tmp).await;
        send(&app, chunk_request(0, b"first-")).await;

        let (status, body) = send_json(&app, chunks_done_request(12, 2)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "missing_part");
        assert_eq!(body["error"], "part 1 is missing");
    }

    #[tokio::test]
    async fn repeated_completion_withdraws_the_video() {
        let tmp = TempDir::new().expect("tempdir");
        let app = app(&tmp).await;
        send(&app, chunk_request(0, b"first-")).await;
        send(&app, chunk_request(1, b"second")).await;
        let (status, _) = send_json(&app, chunks_done_request(12, 2)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, chunks_done_request(12, 2)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "missing_part");

        let (status, _) = send(&app, get(&format!("/videos/{UUID}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, get(&format!("/videos/{UUID}/file"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn whole_file_upload_is_catalogued_and_deletable() {
        let tmp = TempDir::new().expect("tempdir");
        let app = app(&tmp).await;

        let request = multipart_request(&[("qquuid", UUID), ("qqfilename", "clip.webm")], b"whole");
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = send_json(&app, get(&format!("/videos/{UUID}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sizeBytes"], 5);

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/upload/{UUID}"))
            .body(Body::empty())
            .expect("request");
        let (status, _) = send_json(&app, delete).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, get(&format!("/videos/{UUID}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn upload_without_uuid_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let request = multipart_request(&[("qqfilename", "clip.webm")], b"data");
        let (status, body) = send_json(&app(&tmp).await, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No uuid received");
    }

    #[tokio::test]
    async fn malformed_completion_form_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let request = Request::builder()
            .method("POST")
            .uri("/chunksdone")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "qquuid={UUID}&qqfilename=movie.mp4&qqtotalfilesize=abc&qqtotalparts=2"
            )))
            .expect("request");
        let (status, body) = send_json(&app(&tmp).await, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }
}
