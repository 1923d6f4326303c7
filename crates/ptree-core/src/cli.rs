use std::path::PathBuf;

use clap::Parser;

/// ptree - a content-hash cache for filesystem subtrees
///
/// Computes and memoizes a stable digest for a path inside a local
/// directory tree, following the same lazy-scan / change-journal model
/// used for mountable layer snapshots.
#[derive(Parser, Debug)]
#[command(name = "ptree")]
#[command(about = "Content-hash cache for mountable filesystem layers")]
pub struct Args {
    /// Root of the layer to mount (a local directory for this demo binary)
    pub layer_root: PathBuf,

    /// Path inside the layer to checksum (default: layer root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Override cache directory location for the persisted snapshot
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Disable the persisted snapshot entirely (scan fresh every run)
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum contexts retained by the cache manager's recency window
    #[arg(long, default_value_t = 20)]
    pub context_capacity: usize,

    /// Display summary statistics (scan time, cache hit/miss, digest)
    #[arg(long)]
    pub stats: bool,
}

pub fn parse_args() -> Args {
    Args::parse()
}
