//! HTTP handlers for the Fine Uploader endpoints.
//! Chunk bodies are streamed straight to disk; storage, reassembly and
//! probing are delegated to `VideoService`.

use crate::{
    errors::AppError,
    models::session::{ChunkPart, UploadSession},
    services::video_service::{CompletedUpload, VideoService},
};
use axum::{
    Form, Json,
    extract::{Multipart, Path, State, rejection::FormRejection},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io};
use tracing::{debug, info};

// Request parameters
const PARAM_UUID: &str = "qquuid";
const PARAM_FILE: &str = "qqfile";
const PARAM_USER_ID: &str = "userid";

// Chunked request parameters
const PARAM_PART_INDEX: &str = "qqpartindex";
const PARAM_FILE_NAME: &str = "qqfilename";

/// Body Fine Uploader expects from every upload endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub prevent_retry: bool,
}

impl UploadResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            prevent_retry: false,
        }
    }
}

/// Reply to `/chunksdone`: the success flag plus what was stored.
#[derive(Debug, Serialize)]
pub struct ChunksDoneResponse {
    #[serde(flatten)]
    pub status: UploadResponse,
    #[serde(flatten)]
    pub upload: CompletedUpload,
}

/// Form posted once every chunk of a file has been sent.
#[derive(Debug, Deserialize)]
pub struct ChunksDoneForm {
    pub qquuid: String,
    pub qqfilename: String,
    pub qqtotalfilesize: u64,
    pub qqtotalparts: u32,
    pub userid: Option<String>,
}

impl From<ChunksDoneForm> for UploadSession {
    fn from(form: ChunksDoneForm) -> Self {
        Self {
            id: form.qquuid,
            final_name: form.qqfilename,
            declared_part_count: form.qqtotalparts,
            declared_total_size: form.qqtotalfilesize,
            user_id: form.userid.filter(|id| !id.is_empty()),
        }
    }
}

/// `POST /upload`: store a chunk, or a whole file when no part index is sent.
///
/// Text parameters must precede the `qqfile` field, which Fine Uploader
/// does by default.
pub async fn upload(
    State(service): State<VideoService>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut params: HashMap<String, String> = HashMap::new();
    let mut stored = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != PARAM_FILE {
            let value = field
                .text()
                .await
                .map_err(|err| AppError::bad_request(err.body_text()))?;
            params.insert(name, value);
            continue;
        }

        let uuid = params
            .get(PARAM_UUID)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| AppError::bad_request("No uuid received"))?;
        let file_name = params
            .get(PARAM_FILE_NAME)
            .cloned()
            .or_else(|| field.file_name().map(str::to_string))
            .unwrap_or_default();
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));

        match params.get(PARAM_PART_INDEX) {
            Some(index) => {
                let index: u32 = index.parse().map_err(|_| {
                    AppError::bad_request(format!("invalid {} `{}`", PARAM_PART_INDEX, index))
                })?;
                debug!("part index is {} for upload {}", index, uuid);
                service
                    .store_chunk(&ChunkPart::new(uuid, index), stream)
                    .await?;
            }
            None => {
                let user_id = params.get(PARAM_USER_ID).filter(|v| !v.is_empty());
                service
                    .store_upload(&uuid, &file_name, user_id.map(String::as_str), stream)
                    .await?;
            }
        }
        stored = true;
    }

    if !stored {
        return Err(AppError::bad_request("No qqfile received"));
    }
    Ok(Json(UploadResponse::ok()))
}

/// `POST /chunksdone`: reassemble, verify, probe and record an upload.
pub async fn chunks_done(
    State(service): State<VideoService>,
    form: Result<Form<ChunksDoneForm>, FormRejection>,
) -> Result<Json<ChunksDoneResponse>, AppError> {
    let Form(form) = form.map_err(|err| AppError::bad_request(err.body_text()))?;
    let session = UploadSession::from(form);
    info!(
        "chunks done for {}: {} parts, {} bytes",
        session.id,
        session.declared_part_count,
        session.declared_total_size
    );

    let upload = service.complete(&session).await?;
    Ok(Json(ChunksDoneResponse {
        status: UploadResponse::ok(),
        upload,
    }))
}

/// `DELETE /upload/{uuid}`: drop everything stored for a session.
pub async fn delete_upload(
    State(service): State<VideoService>,
    Path(uuid): Path<String>,
) -> Result<Json<UploadResponse>, AppError> {
    service.delete_session(&uuid).await?;
    Ok(Json(UploadResponse::ok()))
}
