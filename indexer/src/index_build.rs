use std::sync::atomic::{AtomicUsize, Ordering};

use lookalike_core::{embed_catalog_image, Embedder, Embedding, IndexBuilder, SimilarityIndex};
use rayon::prelude::*;

use crate::catalog::CatalogImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BuildReport {
    pub(crate) discovered: usize,
    pub(crate) embedded: usize,
    pub(crate) skipped: usize,
}

/// Embeds every catalog image on the current rayon pool.
///
/// Images that cannot be decoded or embedded are logged and left out of the
/// index; one bad file never aborts the build.
pub(crate) fn build_index(
    embedder: &Embedder,
    images: &[CatalogImage],
    progress_every: usize,
) -> (SimilarityIndex, BuildReport) {
    let processed = AtomicUsize::new(0);
    let total = images.len();

    let embedded: Vec<Option<Embedding>> = images
        .par_iter()
        .map(|image| {
            let result = embed_catalog_image(embedder, &image.path);
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if progress_every > 0 && (done % progress_every == 0 || done == total) {
                tracing::info!(done, total, "catalog images processed");
            }
            match result {
                Ok(embedding) => Some(embedding),
                Err(error) => {
                    tracing::warn!(
                        identifier = %image.identifier,
                        %error,
                        "skipping catalog image"
                    );
                    None
                }
            }
        })
        .collect();

    let mut builder = IndexBuilder::new(*embedder.config());
    let mut skipped = 0usize;
    for (image, embedding) in images.iter().zip(embedded) {
        let Some(embedding) = embedding else {
            skipped += 1;
            continue;
        };
        if let Err(error) = builder.insert(image.identifier.clone(), embedding) {
            tracing::warn!(identifier = %image.identifier, %error, "rejected by index");
            skipped += 1;
        }
    }

    let report = BuildReport {
        discovered: total,
        embedded: builder.len(),
        skipped,
    };
    (builder.finish(), report)
}
