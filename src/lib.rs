use std::path::Path;

use anyhow::Result;
use log::{info, warn};

pub mod builder;
pub mod car;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod listing;
pub mod repo;
pub mod tree;

use repo::{DecodeOptions, RepoReader, SizeAccounting};
use tree::{Projector, RepositoryIndex};

/// Decode an archive buffer and project its records into a folder tree.
pub fn import(bytes: &[u8], options: DecodeOptions) -> error::Result<RepositoryIndex> {
    let reader = RepoReader::with_options(bytes, options)?;
    let mut projector = Projector::for_commit(reader.commit());

    for record in reader.records() {
        projector.insert(record?);
    }

    Ok(projector.finish())
}

/// Command line overrides for the configured decode options.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImportOpts {
    pub verify: bool,
    pub payload_sizes: bool,
}

async fn load(archive: &Path, opts: ImportOpts) -> Result<(config::SysCfg, RepositoryIndex)> {
    let mut cfg = config::get_cfg().await?;
    if opts.verify {
        cfg.verify_blocks = true;
    }
    if opts.payload_sizes {
        cfg.size_accounting = SizeAccounting::Payload;
    }

    info!("Importing {}...", archive.display());
    let index = file::import_path(archive, cfg.decode_options()).await?;

    if !index.warnings.is_empty() {
        warn!(
            "{} records skipped due to label collisions.",
            index.warnings.len()
        );
    }

    Ok((cfg, index))
}

pub async fn summary(archive: &Path, opts: ImportOpts) -> Result<RepositoryIndex> {
    let (_, index) = load(archive, opts).await?;

    println!("{}", listing::render_summary(&index));
    if let Some(rev) = &index.rev {
        println!("rev {}", rev);
    }
    for warning in &index.warnings {
        println!("skipped: {}", warning);
    }

    Ok(index)
}

/// Prints the folder tree. `depth` overrides the configured tree depth.
pub async fn tree(archive: &Path, depth: Option<usize>, opts: ImportOpts) -> Result<RepositoryIndex> {
    let (cfg, index) = load(archive, opts).await?;

    println!(
        "{}",
        listing::render_tree(&index, depth.unwrap_or(cfg.tree_depth))
    );
    info!("{} folders.", index.folder_count());

    Ok(index)
}

pub async fn list(archive: &Path, path: &[String], opts: ImportOpts) -> Result<RepositoryIndex> {
    let (_, index) = load(archive, opts).await?;

    if !path.is_empty() && index.lookup(path).is_empty() {
        warn!("Nothing found at {}", path.join("/"));
    }
    println!("{}", listing::render_listing(&index, path));
    info!("{}", listing::render_summary(&index));

    Ok(index)
}
