//! Read access to completed uploads.

use crate::{
    errors::AppError,
    models::video::{Video, VideoInfo},
    services::video_service::VideoService,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;

/// Catalog row plus its metadata, `null` when probing failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    #[serde(flatten)]
    pub video: Video,
    pub video_info: Option<VideoInfo>,
}

/// `GET /videos/{uuid}`: catalog entry of a completed upload.
pub async fn get_video(
    State(service): State<VideoService>,
    Path(uuid): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let video = service.get_video(&uuid).await?;
    Ok(Json(VideoResponse {
        video_info: video.video_info(),
        video,
    }))
}

/// `GET /videos/{uuid}/file`: stream the stored file.
pub async fn download_video(
    State(service): State<VideoService>,
    Path(uuid): Path<String>,
) -> Result<Response, AppError> {
    let (video, file) = service.open_video(&uuid).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &video);
    Ok(response)
}

fn set_file_headers(headers: &mut HeaderMap, video: &Video) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&video.size_bytes.max(0).to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", video.etag)) {
        headers.insert(header::ETAG, value);
    }
    // Names that are not valid header text simply go without a disposition.
    let disposition = format!("attachment; filename=\"{}\"", video.file_name.replace('"', ""));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}
