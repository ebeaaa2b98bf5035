//! src/services/video_service.rs
//!
//! VideoService: chunk intake, reassembly, probing and the SQLite catalog
//! of completed uploads. Payloads live on local disk beneath
//! `upload_dir/{session}/`; see [`crate::services::layout`].

use crate::{
    config::AppConfig,
    models::{
        session::{ChunkPart, UploadSession},
        video::{Video, VideoInfo},
    },
    services::{
        layout::{LayoutError, UploadLayout},
        prober::Prober,
        reassembler::{ChunkReassembler, ReassemblyError},
        session_lock::SessionLocks,
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use serde::Serialize;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    #[error("upload `{0}` not found")]
    UploadNotFound(String),
    #[error("video `{0}` not found")]
    VideoNotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A file that is complete on disk, with whatever metadata could be probed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub path: PathBuf,
    pub size: u64,
    pub etag: String,
    pub video_info: Option<VideoInfo>,
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct VideoService {
    /// Shared SQLite connection pool for the video catalog.
    pub db: Arc<SqlitePool>,

    pub layout: UploadLayout,

    reassembler: ChunkReassembler,
    prober: Prober,
    locks: SessionLocks,
}

impl VideoService {
    pub fn new(db: Arc<SqlitePool>, cfg: &AppConfig) -> Self {
        let layout = UploadLayout::new(cfg.upload_dir.clone());
        Self {
            db,
            reassembler: ChunkReassembler::new(layout.clone()),
            prober: Prober::new(cfg.ffprobe_path.clone(), cfg.probe_timeout),
            locks: SessionLocks::new(),
            layout,
        }
    }

    /// Persist one chunk at its part path.
    ///
    /// The body is streamed into a temporary file that is renamed into place
    /// only once complete, so reassembly never sees a half-written part.
    /// Returns the number of bytes stored.
    pub async fn store_chunk<S>(&self, part: &ChunkPart, stream: S) -> ServiceResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let part_path = self.layout.part_path(part)?;
        let (size, _) = self.write_atomically(&part_path, stream).await?;
        debug!(
            "stored part {} of session {} ({} bytes)",
            part.index, part.session_id, size
        );
        Ok(size)
    }

    /// Store a whole (non-chunked) upload as the session's final file, then
    /// probe and record it.
    pub async fn store_upload<S>(
        &self,
        session_id: &str,
        file_name: &str,
        user_id: Option<&str>,
        stream: S,
    ) -> ServiceResult<CompletedUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let final_path = self.layout.final_path(session_id, file_name)?;
        let _guard = self.locks.lock(session_id).await;

        let (size, etag) = self.write_atomically(&final_path, stream).await?;
        info!("stored upload {} ({} bytes)", final_path.display(), size);
        if let Some(previous) = self
            .catalogued_file_name(session_id)
            .await?
            .filter(|name| name != file_name)
        {
            self.discard_final(session_id, &previous).await;
        }

        let video_info = self.describe(&final_path).await;
        self.record(session_id, user_id, file_name, &final_path, size, &etag, video_info)
            .await?;

        Ok(CompletedUpload {
            path: final_path,
            size,
            etag,
            video_info,
        })
    }

    /// Reassemble a chunked upload once the client reports every part sent.
    ///
    /// Runs under the session lock so concurrent completions of the same
    /// session are applied one after another.
    pub async fn complete(&self, session: &UploadSession) -> ServiceResult<CompletedUpload> {
        let _guard = self.locks.lock(&session.id).await;
        let previous = self.catalogued_file_name(&session.id).await?;

        let reassembled = self
            .reassembler
            .reassemble(
                &session.id,
                &session.final_name,
                session.declared_part_count,
                session.declared_total_size,
            )
            .await;
        let done = match reassembled {
            Ok(done) => done,
            Err(ReassemblyError::Layout(err)) => return Err(err.into()),
            Err(err) => {
                // The output may have been recreated, so an earlier catalog
                // entry no longer describes what is on disk.
                if let Some(previous) = previous {
                    self.forget(&session.id, &previous, &session.final_name).await;
                }
                return Err(err.into());
            }
        };
        if let Some(previous) = previous.filter(|name| *name != session.final_name) {
            self.discard_final(&session.id, &previous).await;
        }

        let video_info = self.describe(&done.path).await;
        self.record(
            &session.id,
            session.user_id.as_deref(),
            &session.final_name,
            &done.path,
            done.bytes_written,
            &done.etag,
            video_info,
        )
        .await?;

        Ok(CompletedUpload {
            path: done.path,
            size: done.bytes_written,
            etag: done.etag,
            video_info,
        })
    }

    /// Fetch the catalog entry of a completed upload.
    pub async fn get_video(&self, session_id: &str) -> ServiceResult<Video> {
        sqlx::query_as::<_, Video>(
            "SELECT id, user_id, file_name, file_path, size_bytes, etag, probed,
                    video_width, video_height, bit_rate, duration_seconds,
                    probe_size_bytes, created_at
             FROM videos WHERE id = ?",
        )
        .bind(session_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ServiceError::VideoNotFound(session_id.to_string()),
            other => ServiceError::Sqlx(other),
        })
    }

    /// Catalog entry plus an open handle on the stored file.
    pub async fn open_video(&self, session_id: &str) -> ServiceResult<(Video, File)> {
        let video = self.get_video(session_id).await?;
        let path = self.layout.final_path(session_id, &video.file_name)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ServiceError::VideoNotFound(session_id.to_string())
            } else {
                ServiceError::Io(err)
            }
        })?;
        Ok((video, file))
    }

    /// Remove everything stored for a session: parts, final file and
    /// catalog row.
    pub async fn delete_session(&self, session_id: &str) -> ServiceResult<()> {
        let session_dir = self.layout.session_dir(session_id)?;
        let _guard = self.locks.lock(session_id).await;

        let removed_files = match fs::remove_dir_all(&session_dir).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(ServiceError::Io(err)),
        };
        let removed_rows = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(session_id)
            .execute(&*self.db)
            .await?
            .rows_affected();

        if !removed_files && removed_rows == 0 {
            return Err(ServiceError::UploadNotFound(session_id.to_string()));
        }
        info!("deleted upload session {}", session_id);
        Ok(())
    }

    async fn catalogued_file_name(&self, session_id: &str) -> ServiceResult<Option<String>> {
        let name = sqlx::query_scalar::<_, String>("SELECT file_name FROM videos WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(name)
    }

    /// Drop the catalog row of a session whose completion failed, along with
    /// the file it pointed at unless that is the output just rewritten.
    async fn forget(&self, session_id: &str, previous: &str, current: &str) {
        let removed = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(session_id)
            .execute(&*self.db)
            .await;
        match removed {
            Ok(_) => info!("dropped catalog entry of session {}", session_id),
            Err(err) => warn!(
                "failed to drop catalog entry of session {}: {}",
                session_id, err
            ),
        }
        if previous != current {
            self.discard_final(session_id, previous).await;
        }
    }

    /// Remove a final file the catalog no longer references.
    async fn discard_final(&self, session_id: &str, file_name: &str) {
        let path = match self.layout.final_path(session_id, file_name) {
            Ok(path) => path,
            Err(err) => {
                warn!("not removing stale file of session {}: {}", session_id, err);
                return;
            }
        };
        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed stale file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove stale file {}: {}", path.display(), err),
        }
    }

    /// Best-effort metadata: a failed probe is logged and yields `None`.
    async fn describe(&self, path: &Path) -> Option<VideoInfo> {
        match self.prober.video_info(path).await {
            Ok(info) => Some(info),
            Err(err) => {
                warn!("probing {} failed: {}", path.display(), err);
                None
            }
        }
    }

    /// Upsert the catalog row of a completed upload.
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        file_name: &str,
        path: &Path,
        size: u64,
        etag: &str,
        video_info: Option<VideoInfo>,
    ) -> ServiceResult<Video> {
        let info = video_info.unwrap_or_default();

        let video = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO videos (
                id, user_id, file_name, file_path, size_bytes, etag, probed,
                video_width, video_height, bit_rate, duration_seconds,
                probe_size_bytes, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                file_name = excluded.file_name,
                file_path = excluded.file_path,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                probed = excluded.probed,
                video_width = excluded.video_width,
                video_height = excluded.video_height,
                bit_rate = excluded.bit_rate,
                duration_seconds = excluded.duration_seconds,
                probe_size_bytes = excluded.probe_size_bytes,
                created_at = excluded.created_at
            RETURNING id, user_id, file_name, file_path, size_bytes, etag, probed,
                      video_width, video_height, bit_rate, duration_seconds,
                      probe_size_bytes, created_at
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(file_name)
        .bind(path.to_string_lossy().into_owned())
        .bind(saturating_i64(size))
        .bind(etag)
        .bind(video_info.is_some())
        .bind(i64::from(info.video_width))
        .bind(i64::from(info.video_height))
        .bind(saturating_i64(info.bit_rate))
        .bind(info.duration_seconds)
        .bind(saturating_i64(info.size_bytes))
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(video)
    }

    /// Stream `stream` into `dest` via a temporary sibling and rename it into
    /// place. Returns the byte count and MD5 of what was written.
    async fn write_atomically<S>(&self, dest: &Path, stream: S) -> ServiceResult<(u64, String)>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let parent = dest.parent().map(Path::to_path_buf).ok_or_else(|| {
            ServiceError::Io(io::Error::new(
                ErrorKind::Other,
                "upload path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        match write_stream(&tmp_path, stream).await {
            Ok(written) => {
                if let Err(err) = fs::rename(&tmp_path, dest).await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ServiceError::Io(err));
                }
                Ok(written)
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(ServiceError::Io(err))
            }
        }
    }
}

async fn write_stream<S>(path: &Path, stream: S) -> io::Result<(u64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size: u64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size, format!("{:x}", digest.compute())))
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    /// Service over an in-memory catalog with probing disabled, so tests
    /// never spawn a process.
    pub(crate) async fn test_service(upload_dir: &Path) -> VideoService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db::apply_sql(&pool, db::INIT_SQL).await.expect("schema");

        let cfg = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            upload_dir: upload_dir.to_path_buf(),
            database_url: "sqlite::memory:".into(),
            ffprobe_path: String::new(),
            probe_timeout: Duration::from_secs(1),
            max_request_bytes: 1024 * 1024,
        };
        VideoService::new(Arc::new(pool), &cfg)
    }
}
