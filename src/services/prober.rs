//! Runs ffprobe against a stored file.
//!
//! The binary is invoked directly with an argument vector and a deadline;
//! a probe that outlives the deadline is killed.

use crate::{models::video::VideoInfo, services::probe_parser};
use std::{
    io,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

const PROBE_ARGS: [&str; 7] = [
    "-v",
    "error",
    "-show_format",
    "-show_streams",
    "-print_format",
    "flat",
    "--",
];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe path is empty")]
    NotConfigured,
    #[error("unable to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("ffprobe did not finish within {0:?}")]
    Timeout(Duration),
    #[error("ffprobe exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

#[derive(Debug, Clone)]
pub struct Prober {
    program: String,
    timeout: Duration,
}

impl Prober {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Capture ffprobe's flat report for `path`.
    pub async fn probe(&self, path: &Path) -> Result<String, ProbeError> {
        if self.program.trim().is_empty() {
            return Err(ProbeError::NotConfigured);
        }

        let mut command = Command::new(&self.program);
        command
            .args(PROBE_ARGS)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!("running {} on {}", self.program, path.display());

        let output = match timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!("ffprobe on {} timed out after {:?}", path.display(), self.timeout);
                return Err(ProbeError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Probe `path` and parse the report.
    pub async fn video_info(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let report = self.probe(path).await?;
        Ok(probe_parser::parse(&report))
    }
}
