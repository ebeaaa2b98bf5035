use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub database_url: String,
    pub ffprobe_path: String,
    pub probe_timeout: Duration,
    pub max_request_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked video upload server")]
pub struct Args {
    /// Host to bind to (overrides VIDEO_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides VIDEO_UPLOAD_PORT)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Base upload directory (overrides VIDEO_UPLOAD_DIR)
    #[arg(short = 'd', long)]
    pub upload_dir: Option<PathBuf>,

    /// Database URL (overrides VIDEO_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// ffprobe binary (overrides VIDEO_UPLOAD_FFPROBE)
    #[arg(long = "ffprobe")]
    pub ffprobe_path: Option<String>,

    /// Seconds before a running ffprobe is killed (overrides VIDEO_UPLOAD_PROBE_TIMEOUT_SECS)
    #[arg(long)]
    pub probe_timeout_secs: Option<u64>,

    /// Largest accepted request body in bytes (overrides VIDEO_UPLOAD_MAX_REQUEST_BYTES)
    #[arg(long)]
    pub max_request_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_REQUEST_BYTES: usize = 512 * 1024 * 1024;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI arguments over the environment.
    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("VIDEO_UPLOAD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("VIDEO_UPLOAD_PORT", DEFAULT_PORT)?;
        let env_upload_dir = env::var("VIDEO_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into());
        let env_db = env::var("VIDEO_UPLOAD_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/videos.db".into());
        let env_ffprobe = env::var("VIDEO_UPLOAD_FFPROBE").unwrap_or_else(|_| "ffprobe".into());
        let env_timeout =
            env_parsed("VIDEO_UPLOAD_PROBE_TIMEOUT_SECS", DEFAULT_PROBE_TIMEOUT_SECS)?;
        let env_max_body = env_parsed("VIDEO_UPLOAD_MAX_REQUEST_BYTES", DEFAULT_MAX_REQUEST_BYTES)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or_else(|| env_upload_dir.into()),
            database_url: args.database_url.unwrap_or(env_db),
            ffprobe_path: args.ffprobe_path.unwrap_or(env_ffprobe),
            probe_timeout: Duration::from_secs(args.probe_timeout_secs.unwrap_or(env_timeout)),
            max_request_bytes: args.max_request_bytes.unwrap_or(env_max_body),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
