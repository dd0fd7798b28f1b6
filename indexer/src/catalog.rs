//! Catalog discovery: every decodable-looking image file under a root.

use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogImage {
    /// Path relative to the catalog root, always `/`-separated.
    pub(crate) identifier: String,
    pub(crate) path: PathBuf,
}

pub(crate) fn is_catalog_image(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn relative_identifier(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let parts = parts?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Lists catalog images under `root`, sorted by identifier.
///
/// Unreadable directory entries and non-UTF-8 names are logged and skipped.
pub(crate) fn discover(root: &Path) -> Result<Vec<CatalogImage>> {
    if !root.is_dir() {
        anyhow::bail!("catalog directory {} does not exist", root.display());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(%error, "skipping unreadable catalog entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_catalog_image(entry.path()) {
            continue;
        }
        match relative_identifier(root, entry.path()) {
            Some(identifier) => images.push(CatalogImage {
                identifier,
                path: entry.into_path(),
            }),
            None => {
                tracing::warn!(path = %entry.path().display(), "skipping image with unusable name");
            }
        }
    }

    images.sort_by(|left, right| left.identifier.cmp(&right.identifier));
    Ok(images)
}
