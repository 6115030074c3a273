use std::{path::Path, time::Instant};

use anyhow::{Context, Result};
use human_bytes::human_bytes;
use log::info;
use tokio::fs;

use crate::{import, repo::DecodeOptions, tree::RepositoryIndex};

/// Reads a whole archive into memory.
pub async fn read_archive(path: &Path) -> Result<Vec<u8>> {
    let start = Instant::now();

    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading archive {}", path.display()))?;

    info!(
        "{} read from {} in {:.2?}",
        human_bytes(bytes.len() as f64),
        path.display(),
        start.elapsed()
    );

    Ok(bytes)
}

/// Reads, decodes and projects an archive file.
pub async fn import_path(path: &Path, options: DecodeOptions) -> Result<RepositoryIndex> {
    let bytes = read_archive(path).await?;

    let start = Instant::now();
    let index = import(&bytes, options)
        .with_context(|| format!("decoding archive {}", path.display()))?;

    info!(
        "{} records ({}) indexed in {:.2?}.",
        index.record_count,
        human_bytes(index.total_size as f64),
        start.elapsed()
    );

    Ok(index)
}
