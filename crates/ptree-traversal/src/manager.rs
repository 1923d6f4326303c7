//! Cache manager (spec.md §4.8): a process-wide map from layer-id to
//! context with a recency-bounded retention window and per-layer
//! serialization of context construction.
//!
//! The named-mutex-per-key ("striped lock") pattern and the
//! `Arc<Mutex<...>>`-guarded shared map are grounded in the teacher's own
//! `TraversalState` fields (`in_progress: Arc<Mutex<HashSet<PathBuf>>>`),
//! which serialized per-directory work the same way this serializes
//! per-layer context construction, scaled down from per-directory to
//! per-layer granularity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ptree_cache::filehash::FileHasher;
use ptree_cache::metastore::MetadataStore;
use ptree_cache::mount::{LocalMounter, Mountable};
use ptree_cache::record::Digest;
use ptree_core::{CacheManagerConfig, ChecksumError};

use crate::checksum;
use crate::context::CacheContext;

struct Recency {
    contexts: HashMap<String, Arc<CacheContext>>,
    order: Vec<String>,
    capacity: usize,
}

impl Recency {
    fn new(capacity: usize) -> Self {
        Recency { contexts: HashMap::new(), order: Vec::new(), capacity }
    }

    fn touch(&mut self, layer_id: &str) {
        if let Some(pos) = self.order.iter().position(|id| id == layer_id) {
            let id = self.order.remove(pos);
            self.order.push(id);
        }
    }

    fn get(&mut self, layer_id: &str) -> Option<Arc<CacheContext>> {
        let found = self.contexts.get(layer_id).cloned();
        if found.is_some() {
            self.touch(layer_id);
        }
        found
    }

    /// Insert a freshly constructed context, evicting the least-recently-used
    /// entry if over capacity. An evicted dirty context is force-saved
    /// first (spec.md §9 open question: this spec mandates a synchronous
    /// save on eviction rather than the source's silent drop).
    fn insert(&mut self, layer_id: String, context: Arc<CacheContext>) {
        if self.contexts.len() >= self.capacity && !self.contexts.contains_key(&layer_id) {
            if let Some(evicted_id) = self.order.first().cloned() {
                self.order.remove(0);
                if let Some(evicted) = self.contexts.remove(&evicted_id) {
                    if evicted.is_dirty() {
                        if let Err(err) = evicted.save() {
                            log::warn!("failed to save evicted dirty context for layer {}: {}", evicted_id, err);
                        }
                    }
                }
            }
        }
        self.order.push(layer_id.clone());
        self.contexts.insert(layer_id, context);
    }
}

/// A process-wide registry of per-layer cache contexts.
pub struct CacheManager {
    store: Arc<dyn MetadataStore>,
    recency: Mutex<Recency>,
    construction_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

const EQUAL_MUTABLE_SUFFIX: &str = "cache.equalMutable";

impl CacheManager {
    pub fn new(store: Arc<dyn MetadataStore>, config: CacheManagerConfig) -> Self {
        CacheManager { store, recency: Mutex::new(Recency::new(config.context_capacity)), construction_locks: Mutex::new(HashMap::new()) }
    }

    fn construction_lock(&self, layer_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.construction_locks.lock().expect("construction lock table poisoned");
        locks.entry(layer_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Resolve a layer id through the `cache.equalMutable` indirection
    /// (spec.md §6), dereferenced once.
    fn resolve_layer_id(&self, layer_id: &str) -> Result<String, ChecksumError> {
        let key = format!("{}:{}", layer_id, EQUAL_MUTABLE_SUFFIX);
        match self.store.get_external(&key)? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => Ok(layer_id.to_string()),
        }
    }

    /// `GetCacheContext(layer)` (spec.md §4.8): acquire the named lock for
    /// `layer.id`, serve from the recency map on hit, otherwise construct
    /// (errors propagate rather than soft-failing — spec.md §9 open
    /// question).
    pub fn get_cache_context(&self, layer_id: &str) -> Result<Arc<CacheContext>, ChecksumError> {
        let resolved_id = self.resolve_layer_id(layer_id)?;
        let lock = self.construction_lock(&resolved_id);
        let _guard = lock.lock().expect("per-layer construction lock poisoned");

        if let Some(ctx) = self.recency.lock().expect("recency map poisoned").get(&resolved_id) {
            return Ok(ctx);
        }

        let context = Arc::new(CacheContext::load(resolved_id.clone(), Arc::clone(&self.store))?);
        self.recency.lock().expect("recency map poisoned").insert(resolved_id, Arc::clone(&context));
        Ok(context)
    }

    /// `SetCacheContext(layer, ctx)` (spec.md §4.8): if `layer_id` already
    /// names `ctx`'s layer, just persist it; otherwise synthesize a new
    /// context sharing `ctx`'s trie as a snapshot and a fresh empty journal,
    /// then register it under the new identity.
    pub fn set_cache_context(&self, layer_id: &str, ctx: &Arc<CacheContext>) -> Result<Arc<CacheContext>, ChecksumError> {
        if ctx.layer_id() == layer_id {
            ctx.save()?;
            return Ok(Arc::clone(ctx));
        }

        let reparented = Arc::new(CacheContext::from_snapshot(layer_id.to_string(), ctx.snapshot(), Arc::clone(&self.store)));
        reparented.save()?;
        self.recency.lock().expect("recency map poisoned").insert(layer_id.to_string(), Arc::clone(&reparented));
        Ok(reparented)
    }

    /// `Checksum(layer, path)` (spec.md §4.8): the top-level entrypoint.
    pub fn checksum(
        &self,
        layer_id: &str,
        mountable: &dyn Mountable,
        mounter: &dyn LocalMounter,
        hasher: &dyn FileHasher,
        path: &str,
    ) -> Result<Digest, ChecksumError> {
        let context = self.get_cache_context(layer_id)?;
        checksum::checksum(&context, mountable, mounter, hasher, path)
    }
}
