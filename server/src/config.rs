use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;

use crate::env_utils::{
    parse_bool_env, parse_optional_path, parse_path, parse_socket_addr, parse_u64, parse_usize,
};

const MAX_BODY_BYTES_DEFAULT: usize = 10 * 1024 * 1024;
const SESSION_TTL_SECONDS_DEFAULT: u64 = 3600;
const MAX_SESSIONS_DEFAULT: usize = 1_000;
const RUNNERS_UP_DEFAULT: usize = 4;

#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) bind: SocketAddr,
    pub(crate) index_path: PathBuf,
    pub(crate) weights_path: PathBuf,
    pub(crate) detector_model_path: PathBuf,
    pub(crate) catalog_dir: Option<PathBuf>,
    pub(crate) request_timeout_ms: u64,
    pub(crate) max_body_bytes: usize,
    pub(crate) max_concurrency: usize,
    pub(crate) session_ttl_seconds: u64,
    pub(crate) max_sessions: usize,
    pub(crate) require_non_empty_index: bool,
    pub(crate) runners_up: usize,
}

impl AppConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let bind = parse_socket_addr("LOOKALIKE_BIND", "127.0.0.1:8080")?;
        let index_path = parse_path("LOOKALIKE_INDEX_PATH", "data/lookalike_index.json")?;
        let weights_path = parse_path(
            "LOOKALIKE_WEIGHTS_PATH",
            "models/vgg16_features.safetensors",
        )?;
        let detector_model_path = parse_path(
            "LOOKALIKE_DETECTOR_MODEL_PATH",
            "models/seeta_fd_frontal_v1.0.bin",
        )?;
        let catalog_dir = parse_optional_path("LOOKALIKE_CATALOG_DIR");
        let request_timeout_ms = parse_u64("LOOKALIKE_REQUEST_TIMEOUT_MS", 10_000)?;
        let max_body_bytes = parse_usize("LOOKALIKE_MAX_BODY_BYTES", MAX_BODY_BYTES_DEFAULT)?;
        let max_concurrency = parse_usize("LOOKALIKE_MAX_CONCURRENCY", 64)?;
        let session_ttl_seconds =
            parse_u64("LOOKALIKE_SESSION_TTL_SECONDS", SESSION_TTL_SECONDS_DEFAULT)?;
        let max_sessions = parse_usize("LOOKALIKE_MAX_SESSIONS", MAX_SESSIONS_DEFAULT)?;
        let require_non_empty_index = parse_bool_env("LOOKALIKE_REQUIRE_NON_EMPTY_INDEX", true)?;
        let runners_up = parse_usize("LOOKALIKE_RUNNERS_UP", RUNNERS_UP_DEFAULT)?;

        if request_timeout_ms == 0 {
            anyhow::bail!("LOOKALIKE_REQUEST_TIMEOUT_MS must be > 0");
        }
        if max_body_bytes == 0 {
            anyhow::bail!("LOOKALIKE_MAX_BODY_BYTES must be > 0");
        }
        if max_concurrency == 0 {
            anyhow::bail!("LOOKALIKE_MAX_CONCURRENCY must be > 0");
        }
        if session_ttl_seconds == 0 {
            anyhow::bail!("LOOKALIKE_SESSION_TTL_SECONDS must be > 0");
        }
        if max_sessions == 0 {
            anyhow::bail!("LOOKALIKE_MAX_SESSIONS must be > 0");
        }

        Ok(Self {
            bind,
            index_path,
            weights_path,
            detector_model_path,
            catalog_dir,
            request_timeout_ms,
            max_body_bytes,
            max_concurrency,
            session_ttl_seconds,
            max_sessions,
            require_non_empty_index,
            runners_up,
        })
    }
}
