use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

const PROGRESS_EVERY_DEFAULT: usize = 500;

#[derive(Debug, Clone)]
pub(crate) struct IndexerConfig {
    pub(crate) catalog_dir: PathBuf,
    pub(crate) index_path: PathBuf,
    pub(crate) weights_path: PathBuf,
    /// Zero lets rayon pick one thread per core.
    pub(crate) threads: usize,
    pub(crate) progress_every: usize,
}

impl IndexerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let catalog_dir = parse_path("LOOKALIKE_CATALOG_DIR", "Images")?;
        let index_path = parse_path("LOOKALIKE_INDEX_PATH", "data/lookalike_index.json")?;
        let weights_path = parse_path(
            "LOOKALIKE_WEIGHTS_PATH",
            "models/vgg16_features.safetensors",
        )?;
        let threads = parse_usize("LOOKALIKE_INDEX_THREADS", 0)?;
        let progress_every = parse_usize("LOOKALIKE_PROGRESS_EVERY", PROGRESS_EVERY_DEFAULT)?;

        if progress_every == 0 {
            anyhow::bail!("LOOKALIKE_PROGRESS_EVERY must be > 0");
        }

        Ok(Self {
            catalog_dir,
            index_path,
            weights_path,
            threads,
            progress_every,
        })
    }
}

fn parse_usize(key: &str, default: usize) -> Result<usize> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a positive integer, got '{raw}'"))
}

fn parse_path(key: &str, default: &str) -> Result<PathBuf> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    let path = PathBuf::from(raw);
    if path.as_os_str().is_empty() {
        anyhow::bail!("{key} must not be empty");
    }
    Ok(path)
}
