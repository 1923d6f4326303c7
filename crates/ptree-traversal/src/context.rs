//! Cache-context lifecycle (spec.md §4.7) and the concurrency/resource model
//! of spec.md §5: one read/write lock per layer, lock upgrade by
//! drop-then-reacquire with a state re-check, and detached background
//! persistence after a dirty write.
//!
//! Grounded in the teacher's `TraversalState`/`Arc<RwLock<DiskCache>>`
//! pairing (deleted `ptree-traversal::traversal`), which held exactly this
//! shape — one `parking_lot::RwLock`-guarded cache shared across readers and
//! a writer — generalized here from a disk-wide cache to a per-layer one
//! with an explicit staged-journal step before the fast path.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use ptree_cache::filehash::FileHasher;
use ptree_cache::metastore::MetadataStore;
use ptree_cache::path;
use ptree_cache::record::CacheRecord;
use ptree_cache::trie::{TrieSnapshot, TrieWriter};
use ptree_core::ChecksumError;
use ptree_incremental::journal::{ChangeEvent, ChangeJournal};

use crate::checksum;

struct ContextState {
    trie: TrieSnapshot,
    journal: ChangeJournal,
    dirty: bool,
}

/// Per-layer in-memory cache of records and the journal of pending changes.
///
/// `state` is `Arc`-shared (not just lock-guarded) so a detached background
/// save can hold a handle to it independently of `self`: the save clears
/// `dirty` itself, from inside the task, once the blob actually reaches the
/// metadata store (spec.md §5: "after a checksum write that dirties the
/// context, a detached task calls `save()`"). Until then `is_dirty()`
/// genuinely reflects "there is unpersisted state" rather than flipping
/// back to `false` the instant the task is merely spawned.
pub struct CacheContext {
    layer_id: String,
    state: Arc<RwLock<ContextState>>,
    store: Arc<dyn MetadataStore>,
}

const PERSISTED_BLOB_KEY_SUFFIX: &str = "buildkit.contenthash.v0";

impl CacheContext {
    /// Construction reads persisted records (if any) from the external
    /// metadata store and bulk-inserts them into an empty trie. A missing or
    /// corrupt blob yields an empty context rather than a construction error
    /// (spec.md §7: "Loading a corrupt blob silently starts fresh").
    pub fn load(layer_id: impl Into<String>, store: Arc<dyn MetadataStore>) -> Result<Self, ChecksumError> {
        let layer_id = layer_id.into();
        let key = persisted_key(&layer_id);
        let trie = match store.get_external(&key)? {
            Some(blob) => match decode_trie(&blob) {
                Ok(entries) => {
                    let mut writer = TrieWriter::new(TrieSnapshot::default());
                    for (k, v) in entries {
                        writer.insert(k, v);
                    }
                    writer.commit()
                }
                Err(_) => TrieSnapshot::default(),
            },
            None => TrieSnapshot::default(),
        };

        Ok(CacheContext {
            layer_id,
            state: Arc::new(RwLock::new(ContextState { trie, journal: ChangeJournal::new(), dirty: false })),
            store,
        })
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Feed a single change notification into the staged journal (spec.md
    /// §4.6). The transaction commits lazily on the next read that sees it.
    pub fn handle_change(&self, event: ChangeEvent) -> Result<(), ChecksumError> {
        let mut state = self.state.write();
        let base = state.trie.clone();
        state.journal.handle_change(&base, event)
    }

    /// `checksum_no_follow(path)` (spec.md §4.5): the read-lock fast path,
    /// write-lock upgrade, journal-commit-before-read, and dirty bookkeeping.
    pub fn checksum_no_follow(&self, mount_root: &Path, hasher: &dyn FileHasher, logical_path: &str) -> Result<CacheRecord, ChecksumError> {
        {
            let state = self.state.read();
            if !state.journal.is_active() {
                let key = path::encode(&path::clean(logical_path));
                if let Some(record) = state.trie.get(&key) {
                    if !record.is_stub() {
                        return Ok(record);
                    }
                }
            }
        }

        let mut state = self.state.write();
        if state.journal.is_active() {
            if let Some(new_trie) = state.journal.commit() {
                state.trie = new_trie;
            }
        }

        let key = path::encode(&path::clean(logical_path));
        if let Some(record) = state.trie.get(&key) {
            if !record.is_stub() {
                return Ok(record);
            }
        }

        let (new_trie, _digest) = checksum::lazy_checksum(&state.trie, mount_root, hasher, logical_path)?;
        state.trie = new_trie;
        state.dirty = true;

        let (_, record) = checksum::get_follow_links(&state.trie, &key)?;
        drop(state);

        // The context is now dirty: hand persistence to a detached task
        // that acquires the lock itself and clears `dirty` only once the
        // blob has actually been written (see `perform_save`).
        spawn_background_save(Arc::clone(&self.state), Arc::clone(&self.store), self.layer_id.clone());

        Ok(record)
    }

    /// Commit any pending journal, snapshot the trie, encode all records and
    /// write the blob back to the metadata store. Called directly by the
    /// manager on re-parenting and asynchronously after a dirty write.
    pub fn save(&self) -> Result<(), ChecksumError> {
        perform_save(&self.state, self.store.as_ref(), &self.layer_id)
    }

    pub fn snapshot(&self) -> TrieSnapshot {
        self.state.read().trie.clone()
    }

    /// Used by [`crate::manager::CacheManager::set_cache_context`] to
    /// re-parent a context's trie onto a different layer identity.
    pub fn from_snapshot(layer_id: impl Into<String>, trie: TrieSnapshot, store: Arc<dyn MetadataStore>) -> Self {
        CacheContext {
            layer_id: layer_id.into(),
            state: Arc::new(RwLock::new(ContextState { trie, journal: ChangeJournal::new(), dirty: false })),
            store,
        }
    }
}

fn persisted_key(layer_id: &str) -> String {
    format!("{}:{}", layer_id, PERSISTED_BLOB_KEY_SUFFIX)
}

/// Commit any pending journal, encode the trie, and write it to the store,
/// clearing `dirty` only after the write succeeds. Shared by the
/// synchronous `CacheContext::save` and the detached background task so
/// both go through the same commit-then-persist-then-clear sequence.
fn perform_save(state: &RwLock<ContextState>, store: &dyn MetadataStore, layer_id: &str) -> Result<(), ChecksumError> {
    let mut state = state.write();
    if state.journal.is_active() {
        if let Some(new_trie) = state.journal.commit() {
            state.trie = new_trie;
        }
    }
    let blob = encode_trie(&state.trie)?;
    store.set_external(&persisted_key(layer_id), &blob)?;
    state.dirty = false;
    Ok(())
}

fn spawn_background_save(state: Arc<RwLock<ContextState>>, store: Arc<dyn MetadataStore>, layer_id: String) {
    std::thread::spawn(move || {
        if let Err(err) = perform_save(&state, store.as_ref(), &layer_id) {
            log::warn!("background save failed for layer {}: {}", layer_id, err);
        }
    });
}

fn encode_trie(trie: &TrieSnapshot) -> Result<Vec<u8>, ChecksumError> {
    let entries: Vec<(Vec<u8>, CacheRecord)> = trie.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(bincode::serialize(&entries)?)
}

fn decode_trie(blob: &[u8]) -> Result<Vec<(Vec<u8>, CacheRecord)>, bincode::Error> {
    bincode::deserialize(blob)
}
