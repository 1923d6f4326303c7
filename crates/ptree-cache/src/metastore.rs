//! Metadata persistence (spec.md §4.7, §6): a cache context's entire trie is
//! encoded as one opaque blob and handed to a `MetadataStore`. The store
//! itself is an external collaborator — spec.md treats "how a blob gets
//! persisted" as out of scope, naming only `GetExternal`/`SetExternal`-style
//! accessors keyed by layer id.
//!
//! `LocalFileMetadataStore` reuses the teacher's atomic write-to-temp-then-
//! rename framing from `cache_rkyv.rs::save_index`, collapsed to a single
//! blob per layer instead of a separate index/data-file pair, since spec.md
//! §6 describes one blob per layer rather than an offset-indexed record file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ptree_core::ChecksumError;

/// Persists and retrieves one opaque bincode blob per layer id.
pub trait MetadataStore: Send + Sync {
    /// Returns `Ok(None)` if no blob has ever been stored for this layer, or
    /// if the stored blob is corrupt (per spec.md §7: "Loading a corrupt
    /// blob silently starts fresh" rather than surfacing `EncodingFailure`).
    fn get_external(&self, layer_id: &str) -> Result<Option<Vec<u8>>, ChecksumError>;

    fn set_external(&self, layer_id: &str, blob: &[u8]) -> Result<(), ChecksumError>;
}

/// An in-memory store, used by tests and as a building block for callers
/// who persist elsewhere.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get_external(&self, layer_id: &str) -> Result<Option<Vec<u8>>, ChecksumError> {
        let blobs = self.blobs.lock().expect("metadata store mutex poisoned");
        Ok(blobs.get(layer_id).cloned())
    }

    fn set_external(&self, layer_id: &str, blob: &[u8]) -> Result<(), ChecksumError> {
        let mut blobs = self.blobs.lock().expect("metadata store mutex poisoned");
        blobs.insert(layer_id.to_string(), blob.to_vec());
        Ok(())
    }
}

/// One blob file per layer under a base directory, named after the layer id.
/// Writes go to a `.tmp` sibling and are renamed into place, so a reader
/// never observes a partially-written blob.
pub struct LocalFileMetadataStore {
    base_dir: PathBuf,
}

impl LocalFileMetadataStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        LocalFileMetadataStore { base_dir: base_dir.into() }
    }

    fn blob_path(&self, layer_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.ptreecache", sanitize(layer_id)))
    }
}

fn sanitize(layer_id: &str) -> String {
    layer_id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

impl MetadataStore for LocalFileMetadataStore {
    fn get_external(&self, layer_id: &str) -> Result<Option<Vec<u8>>, ChecksumError> {
        let path = self.blob_path(layer_id);
        if !path.exists() {
            return Ok(None);
        }
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(_) => Ok(None),
        }
    }

    fn set_external(&self, layer_id: &str, blob: &[u8]) -> Result<(), ChecksumError> {
        fs::create_dir_all(&self.base_dir)?;
        let path = self.blob_path(layer_id);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, blob)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// Create `path` (and any missing parents) if it does not already exist —
/// exercised by the demo CLI's `--cache-dir` flag before it constructs a
/// [`LocalFileMetadataStore`] over that directory.
pub fn ensure_dir(path: &Path) -> Result<(), ChecksumError> {
    fs::create_dir_all(path)?;
    Ok(())
}
