#![forbid(unsafe_code)]
//! Offline catalog indexer: embeds every catalog image and writes the
//! similarity index the server loads at startup.

use anyhow::{Context, Result};
use lookalike_core::{Embedder, EmbedderConfig};
use lookalike_vision::{cpu_device, Vgg16Features};
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;
mod index_build;

use crate::catalog::discover;
use crate::config::IndexerConfig;
use crate::index_build::build_index;

fn main() -> Result<()> {
    init_tracing();

    let config = IndexerConfig::from_env().context("invalid configuration")?;
    let images = discover(&config.catalog_dir)?;
    tracing::info!(
        catalog_dir = %config.catalog_dir.display(),
        images = images.len(),
        "catalog scanned"
    );

    let backbone = Vgg16Features::load(
        &config.weights_path,
        EmbedderConfig::VGG16_BLOCK5_POOL,
        cpu_device(),
    )
    .context("failed to load feature extractor")?;
    let embedder = Embedder::new(Box::new(backbone)).context("invalid embedder")?;

    let (index, report) = if config.threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .context("failed to build indexing thread pool")?;
        pool.install(|| build_index(&embedder, &images, config.progress_every))
    } else {
        build_index(&embedder, &images, config.progress_every)
    };

    if report.embedded == 0 {
        anyhow::bail!(
            "no catalog image under {} could be embedded",
            config.catalog_dir.display()
        );
    }

    index.persist(&config.index_path).with_context(|| {
        format!(
            "failed to write similarity index to {}",
            config.index_path.display()
        )
    })?;

    tracing::info!(
        path = %config.index_path.display(),
        discovered = report.discovered,
        embedded = report.embedded,
        skipped = report.skipped,
        dimension = index.dimension(),
        "similarity index written"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("failed to initialize tracing subscriber: {error}");
    }
}
