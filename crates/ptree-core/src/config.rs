/// Tuning knobs for the cache manager's recency-bounded context window.
///
/// See spec.md §4.8: default capacity 20 contexts, evicted least-recently-used.
#[derive(Debug, Clone, Copy)]
pub struct CacheManagerConfig {
    pub context_capacity: usize,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        CacheManagerConfig { context_capacity: 20 }
    }
}
