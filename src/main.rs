use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use ptree_cache::filehash::DefaultFileHasher;
use ptree_cache::metastore::{LocalFileMetadataStore, MetadataStore};
use ptree_cache::mount::{IdentityLocalMounter, LocalDirMountable};
use ptree_core::CacheManagerConfig;
use ptree_traversal::CacheManager;

fn main() -> Result<()> {
    env_logger::init();
    let program_start = Instant::now();

    let args = ptree_core::parse_args();

    if !args.layer_root.is_dir() {
        anyhow::bail!("layer root is not a directory: {}", args.layer_root.display());
    }

    let store: Arc<dyn MetadataStore> = if args.no_cache {
        Arc::new(ptree_cache::metastore::InMemoryMetadataStore::new())
    } else {
        let cache_dir = args.cache_dir.clone().unwrap_or_else(default_cache_dir);
        ptree_cache::metastore::ensure_dir(std::path::Path::new(&cache_dir))?;
        Arc::new(LocalFileMetadataStore::new(cache_dir))
    };

    let config = CacheManagerConfig { context_capacity: args.context_capacity };
    let manager = CacheManager::new(store, config);

    let mountable = LocalDirMountable::new(&args.layer_root);
    let mounter = IdentityLocalMounter;
    let hasher = DefaultFileHasher;

    let layer_id = args.layer_root.to_string_lossy().into_owned();
    let checksum_start = Instant::now();
    let digest = manager.checksum(&layer_id, &mountable, &mounter, &hasher, &args.path)?;
    let checksum_elapsed = checksum_start.elapsed();

    println!("{}", hex_encode(&digest));

    if args.stats {
        eprintln!("at:         {}", chrono::Utc::now().to_rfc3339());
        eprintln!("layer:      {}", args.layer_root.display());
        eprintln!("path:       {}", args.path);
        eprintln!("digest:     {}", hex_encode(&digest));
        eprintln!("checksum:   {:.3} ms", checksum_elapsed.as_secs_f64() * 1000.0);
        eprintln!("total:      {:.3} ms", program_start.elapsed().as_secs_f64() * 1000.0);
    }

    Ok(())
}

fn default_cache_dir() -> String {
    std::env::temp_dir().join("ptree-cache").to_string_lossy().into_owned()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
