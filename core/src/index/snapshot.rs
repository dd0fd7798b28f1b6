use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embed::EmbedderConfig;

use super::{IndexBuilder, IndexError, SimilarityIndex};

const INDEX_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct IndexDocumentRef<'a> {
    version: u32,
    embedder: &'a EmbedderConfig,
    dimension: usize,
    checksum: u32,
    entries: Vec<IndexEntryRef<'a>>,
}

#[derive(Debug, Serialize)]
struct IndexEntryRef<'a> {
    id: &'a str,
    values: &'a [f32],
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    version: u32,
    embedder: EmbedderConfig,
    dimension: usize,
    checksum: u32,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    id: String,
    values: Vec<f32>,
}

impl SimilarityIndex {
    /// Writes the index as a single JSON document, atomically replacing any
    /// previous file at `path`.
    pub fn persist(&self, path: &Path) -> Result<(), IndexError> {
        ensure_parent_dir(path)?;

        let document = IndexDocumentRef {
            version: INDEX_VERSION,
            embedder: &self.embedder,
            dimension: self.dimension,
            checksum: checksum(self.iter()),
            entries: self
                .iter()
                .map(|(id, values)| IndexEntryRef { id, values })
                .collect(),
        };

        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &document)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }

    /// Loads an index written by [`SimilarityIndex::persist`].
    ///
    /// Any missing file, parse error, checksum mismatch or invalid vector is
    /// an error; there is no partial load.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::Missing(path.to_path_buf()));
        }

        let reader = BufReader::new(File::open(path)?);
        let document: IndexDocument = serde_json::from_reader(reader)?;

        if document.version != INDEX_VERSION {
            return Err(IndexError::UnsupportedVersion(document.version));
        }
        if document.dimension != document.embedder.output_len() {
            return Err(IndexError::InvalidData(format!(
                "dimension {} does not match embedder output length {}",
                document.dimension,
                document.embedder.output_len()
            )));
        }

        let computed = checksum(
            document
                .entries
                .iter()
                .map(|entry| (entry.id.as_str(), entry.values.as_slice())),
        );
        if computed != document.checksum {
            return Err(IndexError::ChecksumMismatch {
                stored: document.checksum,
                computed,
            });
        }

        let mut builder = IndexBuilder::new(document.embedder);
        for entry in document.entries {
            builder.insert_values(entry.id, entry.values)?;
        }
        Ok(builder.finish())
    }
}

pub(super) fn checksum<'a>(entries: impl Iterator<Item = (&'a str, &'a [f32])>) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for (id, values) in entries {
        hasher.update(id.as_bytes());
        hasher.update(&[0]);
        for value in values {
            hasher.update(&value.to_le_bytes());
        }
    }
    hasher.finalize()
}

fn ensure_parent_dir(path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
