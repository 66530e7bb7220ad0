use crate::services::session_store::StoreKind;
use anyhow::{Context, Result};
use clap::Parser;
use std::env;

const DEFAULT_CHUNK_SIZE: u64 = 52_428_800; // 50 MiB
const DEFAULT_MAX_FILE_SIZE: u64 = 1_099_511_627_776; // 1 TiB

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Base directory for the filesystem blob backend.
    pub data_dir: String,
    /// Which session store backend to run.
    pub session_store: StoreKind,
    /// State directory for the file session store.
    pub session_dir: String,
    /// Connection URL for the redis session store.
    pub redis_url: String,
    /// Chunk size handed to clients at init.
    pub chunk_size: u64,
    /// Largest declared upload size accepted at init.
    pub max_file_size: u64,
    /// Retention: sessions older than this are swept. `None` keeps them
    /// forever.
    pub session_ttl_secs: Option<u64>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked upload coordinator")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where committed objects and staged blocks are stored
    /// (overrides UPLOAD_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Session store backend: file | redis (overrides UPLOAD_SESSION_STORE)
    #[arg(long)]
    pub session_store: Option<String>,

    /// Directory for file-backed session state (overrides UPLOAD_SESSION_DIR)
    #[arg(long)]
    pub session_dir: Option<String>,

    /// Redis URL for the redis session store (overrides UPLOAD_REDIS_URL)
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Chunk size in bytes handed to clients (overrides UPLOAD_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Maximum accepted declared file size in bytes (overrides UPLOAD_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Sweep sessions older than this many seconds (overrides UPLOAD_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::merge(args)
    }

    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("UPLOAD_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing UPLOAD_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 8001,
            Err(err) => return Err(err).context("reading UPLOAD_PORT"),
        };
        let env_data = env::var("UPLOAD_DATA_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_store = env::var("UPLOAD_SESSION_STORE").unwrap_or_else(|_| "file".into());
        let env_session_dir =
            env::var("UPLOAD_SESSION_DIR").unwrap_or_else(|_| "./data/sessions".into());
        let env_redis =
            env::var("UPLOAD_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".into());

        // --- Merge ---
        let store_raw = args.session_store.unwrap_or(env_store);
        let session_store = store_raw
            .parse::<StoreKind>()
            .map_err(anyhow::Error::msg)
            .context("parsing session store kind")?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_dir: args.data_dir.unwrap_or(env_data),
            session_store,
            session_dir: args.session_dir.unwrap_or(env_session_dir),
            redis_url: args.redis_url.unwrap_or(env_redis),
            chunk_size: args
                .chunk_size
                .or(env_u64("UPLOAD_CHUNK_SIZE")?)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            max_file_size: args
                .max_file_size
                .or(env_u64("UPLOAD_MAX_FILE_SIZE")?)
                .unwrap_or(DEFAULT_MAX_FILE_SIZE),
            session_ttl_secs: args.session_ttl_secs.or(env_u64("UPLOAD_SESSION_TTL_SECS")?),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
