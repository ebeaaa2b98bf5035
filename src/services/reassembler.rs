//! Reassembly of chunked uploads.
//!
//! Parts are appended to the session's final file strictly in index order
//! and deleted once copied. The operation is not transactional: when it
//! fails, the partial output and any parts not yet consumed stay on disk.

use crate::{
    models::session::ChunkPart,
    services::layout::{LayoutError, UploadLayout},
};
use md5::Context;
use std::{io, path::PathBuf};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("failed to create output {path}: {source}")]
    OutputCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("part {index} is missing")]
    MissingPart { index: u32 },
    #[error("copying part {index} failed: {source}")]
    CopyFailed {
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to flush output {path}: {source}")]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("total file size mismatch, expected {expected} bytes but actual is {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Outcome of a successful reassembly.
#[derive(Debug, Clone)]
pub struct Reassembled {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Lowercase hex MD5 of the written bytes.
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct ChunkReassembler {
    layout: UploadLayout,
}

impl ChunkReassembler {
    pub fn new(layout: UploadLayout) -> Self {
        Self { layout }
    }

    /// Concatenate parts `0..declared_part_count` of `session_id` into
    /// `final_name` and verify the result is `declared_total_size` bytes.
    ///
    /// Callers must serialize invocations per session id; two concurrent
    /// runs over the same parts race on reading and deleting them.
    pub async fn reassemble(
        &self,
        session_id: &str,
        final_name: &str,
        declared_part_count: u32,
        declared_total_size: u64,
    ) -> Result<Reassembled, ReassemblyError> {
        let output_path = self.layout.final_path(session_id, final_name)?;
        let session_dir = self.layout.session_dir(session_id)?;

        fs::create_dir_all(&session_dir)
            .await
            .map_err(|source| ReassemblyError::OutputCreateFailed {
                path: session_dir.clone(),
                source,
            })?;
        let mut output = File::create(&output_path).await.map_err(|source| {
            ReassemblyError::OutputCreateFailed {
                path: output_path.clone(),
                source,
            }
        })?;

        let mut digest = Context::new();
        let copied = self
            .copy_parts(session_id, declared_part_count, &mut output, &mut digest)
            .await;

        // Flush on failure too: the partial output is left for diagnosis.
        let finalized = finalize(&mut output).await;
        let bytes_written = copied?;
        finalized.map_err(|source| ReassemblyError::FinalizeFailed {
            path: output_path.clone(),
            source,
        })?;

        if bytes_written != declared_total_size {
            warn!(
                "session {} reassembled {} bytes but {} were declared",
                session_id, bytes_written, declared_total_size
            );
            return Err(ReassemblyError::SizeMismatch {
                expected: declared_total_size,
                actual: bytes_written,
            });
        }

        info!(
            "reassembled {} parts ({} bytes) into {}",
            declared_part_count,
            bytes_written,
            output_path.display()
        );

        Ok(Reassembled {
            path: output_path,
            bytes_written,
            etag: format!("{:x}", digest.compute()),
        })
    }

    async fn copy_parts(
        &self,
        session_id: &str,
        declared_part_count: u32,
        output: &mut File,
        digest: &mut Context,
    ) -> Result<u64, ReassemblyError> {
        let mut total: u64 = 0;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        for index in 0..declared_part_count {
            let part_path = self.layout.part_path(&ChunkPart::new(session_id, index))?;
            let mut part = match File::open(&part_path).await {
                Ok(file) => file,
                Err(err) => {
                    warn!("cannot open part {}: {}", part_path.display(), err);
                    return Err(ReassemblyError::MissingPart { index });
                }
            };

            let written = append(&mut part, output, digest, &mut buf)
                .await
                .map_err(|source| ReassemblyError::CopyFailed { index, source })?;
            drop(part);
            total += written;
            debug!("appended part {} of session {} ({} bytes)", index, session_id, written);

            if let Err(err) = fs::remove_file(&part_path).await {
                warn!("failed to remove part {}: {}", part_path.display(), err);
            }
        }

        Ok(total)
    }
}

async fn append(
    part: &mut File,
    output: &mut File,
    digest: &mut Context,
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut written: u64 = 0;
    loop {
        let n = part.read(buf).await?;
        if n == 0 {
            return Ok(written);
        }
        digest.consume(&buf[..n]);
        output.write_all(&buf[..n]).await?;
        written += n as u64;
    }
}

async fn finalize(output: &mut File) -> io::Result<()> {
    output.flush().await?;
    output.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    const SESSION: &str = "9a3c83eb-2560-42df-b9d7-901b54b5161f";

    fn write_parts(root: &Path, parts: &[(u32, &[u8])]) {
        let dir = root.join(SESSION);
        std::fs::create_dir_all(&dir).expect("session dir");
        for (index, bytes) in parts {
            let name = ChunkPart::new(SESSION, *index).file_name();
            std::fs::write(dir.join(name), bytes).expect("write part");
        }
    }

    fn part_exists(root: &Path, index: u32) -> bool {
        root.join(SESSION)
            .join(ChunkPart::new(SESSION, index).file_name())
            .exists()
    }

    #[tokio::test]
    async fn concatenates_parts_in_order_and_deletes_them() {
        let tmp = tempdir().expect("tempdir");
        write_parts(tmp.path(), &[(0, &[b'a'; 10]), (1, &[b'b'; 20]), (2, &[b'c'; 5])]);
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let done = reassembler
            .reassemble(SESSION, "movie.mp4", 3, 35)
            .await
            .expect("reassemble");

        assert_eq!(done.bytes_written, 35);
        let mut expected = vec![b'a'; 10];
        expected.extend_from_slice(&[b'b'; 20]);
        expected.extend_from_slice(&[b'c'; 5]);
        assert_eq!(std::fs::read(&done.path).expect("read output"), expected);
        assert_eq!(done.etag, format!("{:x}", md5::compute(&expected)));
        assert!((0..3).all(|i| !part_exists(tmp.path(), i)));
    }

    #[tokio::test]
    async fn size_mismatch_keeps_written_output() {
        let tmp = tempdir().expect("tempdir");
        write_parts(tmp.path(), &[(0, &[1; 10]), (1, &[2; 20]), (2, &[3; 5])]);
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let err = reassembler
            .reassemble(SESSION, "movie.mp4", 3, 36)
            .await
            .expect_err("size must not match");

        assert!(matches!(
            err,
            ReassemblyError::SizeMismatch {
                expected: 36,
                actual: 35
            }
        ));
        let output = tmp.path().join(SESSION).join("movie.mp4");
        assert_eq!(std::fs::metadata(output).expect("output").len(), 35);
    }

    #[tokio::test]
    async fn missing_part_aborts_after_consuming_earlier_parts() {
        let tmp = tempdir().expect("tempdir");
        write_parts(tmp.path(), &[(0, b"first"), (2, b"third")]);
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let err = reassembler
            .reassemble(SESSION, "movie.mp4", 3, 10)
            .await
            .expect_err("part 1 is absent");

        assert!(matches!(err, ReassemblyError::MissingPart { index: 1 }));
        assert!(!part_exists(tmp.path(), 0));
        assert!(part_exists(tmp.path(), 2));
        let output = tmp.path().join(SESSION).join("movie.mp4");
        assert_eq!(std::fs::read(output).expect("partial output"), b"first");
    }

    #[tokio::test]
    async fn unwritable_output_leaves_parts_untouched() {
        let tmp = tempdir().expect("tempdir");
        write_parts(tmp.path(), &[(0, b"first")]);
        std::fs::create_dir(tmp.path().join(SESSION).join("movie.mp4")).expect("blocking dir");
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let err = reassembler
            .reassemble(SESSION, "movie.mp4", 1, 5)
            .await
            .expect_err("output is a directory");

        assert!(matches!(err, ReassemblyError::OutputCreateFailed { .. }));
        assert!(part_exists(tmp.path(), 0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_part_fails_copy_and_keeps_earlier_bytes() {
        let tmp = tempdir().expect("tempdir");
        write_parts(tmp.path(), &[(0, b"first")]);
        let unreadable = tmp
            .path()
            .join(SESSION)
            .join(ChunkPart::new(SESSION, 1).file_name());
        std::fs::create_dir(&unreadable).expect("part 1 as directory");
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let err = reassembler
            .reassemble(SESSION, "movie.mp4", 2, 10)
            .await
            .expect_err("part 1 cannot be read");

        assert!(matches!(err, ReassemblyError::CopyFailed { index: 1, .. }));
        assert!(!part_exists(tmp.path(), 0));
        assert!(unreadable.is_dir());
        let output = tmp.path().join(SESSION).join("movie.mp4");
        assert_eq!(std::fs::read(output).expect("partial output"), b"first");
    }

    #[tokio::test]
    async fn zero_parts_yield_empty_output() {
        let tmp = tempdir().expect("tempdir");
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let done = reassembler
            .reassemble(SESSION, "empty.bin", 0, 0)
            .await
            .expect("reassemble");

        assert_eq!(done.bytes_written, 0);
        assert_eq!(std::fs::metadata(&done.path).expect("output").len(), 0);
    }

    #[tokio::test]
    async fn keeps_order_beyond_single_digit_indices() {
        let tmp = tempdir().expect("tempdir");
        let parts: Vec<(u32, Vec<u8>)> = (0..12).map(|i| (i, vec![i as u8; 3])).collect();
        let borrowed: Vec<(u32, &[u8])> = parts.iter().map(|(i, b)| (*i, b.as_slice())).collect();
        write_parts(tmp.path(), &borrowed);
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let done = reassembler
            .reassemble(SESSION, "clip.webm", 12, 36)
            .await
            .expect("reassemble");

        let expected: Vec<u8> = (0..12u8).flat_map(|i| [i; 3]).collect();
        assert_eq!(std::fs::read(done.path).expect("read"), expected);
    }

    #[tokio::test]
    async fn rejects_unsafe_session_before_touching_disk() {
        let tmp = tempdir().expect("tempdir");
        let reassembler = ChunkReassembler::new(UploadLayout::new(tmp.path()));

        let err = reassembler
            .reassemble("../escape", "movie.mp4", 1, 1)
            .await
            .expect_err("unsafe id");

        assert!(matches!(
            err,
            ReassemblyError::Layout(LayoutError::InvalidSessionId(_))
        ));
        assert_eq!(std::fs::read_dir(tmp.path()).expect("list").count(), 0);
    }
}
