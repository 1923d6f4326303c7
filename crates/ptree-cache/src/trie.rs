//! Persistent radix trie (spec.md §4.2): an ordered-prefix map over byte
//! keys with O(key-length) point lookups, a staged transactional writer,
//! prefix walks, and seek/next cursor semantics.
//!
//! The commit-atomicity property (spec.md §9 design note) is what matters,
//! not the underlying data structure: a snapshot is an `Arc`-shared
//! immutable `BTreeMap`, and `commit` publishes a freshly built map in one
//! atomic pointer swap at the call site. Readers holding an older `Arc`
//! never observe a partially-applied commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::record::CacheRecord;

/// A point-get source, implemented by both a published [`TrieSnapshot`] and
/// an in-flight [`TrieWriter`] — lets resolution helpers (symlink-following
/// lookups) work identically before and during a staged transaction.
pub trait Lookup {
    fn get(&self, key: &[u8]) -> Option<CacheRecord>;
}

/// An immutable, cheaply-cloned view of the trie at a point in time.
#[derive(Clone, Default)]
pub struct TrieSnapshot(Arc<BTreeMap<Vec<u8>, CacheRecord>>);

impl TrieSnapshot {
    pub fn get(&self, key: &[u8]) -> Option<CacheRecord> {
        self.0.get(key).cloned()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate all keys with the given prefix, in sorted order.
    pub fn prefix_iter<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a CacheRecord)> + 'a {
        self.0
            .range(prefix.to_vec()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v))
    }

    /// A cursor positioned at the first key >= `key`.
    pub fn seek(&self, key: &[u8]) -> Cursor<'_> {
        Cursor { map: &self.0, next_key: Some(key.to_vec()) }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &CacheRecord)> {
        self.0.iter()
    }

    fn from_map(map: BTreeMap<Vec<u8>, CacheRecord>) -> Self {
        TrieSnapshot(Arc::new(map))
    }
}

/// A forward cursor over a snapshot, supporting reseeking past a subtree
/// (used by the checksum engine to skip a nested directory's descendants).
pub struct Cursor<'a> {
    map: &'a BTreeMap<Vec<u8>, CacheRecord>,
    next_key: Option<Vec<u8>>,
}

impl<'a> Cursor<'a> {
    pub fn next(&mut self) -> Option<(&'a Vec<u8>, &'a CacheRecord)> {
        let from = self.next_key.take()?;
        let mut range = self.map.range(from..);
        let (k, v) = range.next()?;
        self.next_key = range.next().map(|(k2, _)| k2.clone());
        Some((k, v))
    }

    /// Reposition the cursor at the first key >= `key`, discarding whatever
    /// `next` would otherwise have returned.
    pub fn seek(&mut self, key: &[u8]) {
        self.next_key = Some(key.to_vec());
    }
}

impl Lookup for TrieSnapshot {
    fn get(&self, key: &[u8]) -> Option<CacheRecord> {
        TrieSnapshot::get(self, key)
    }
}

/// A value staged by [`TrieWriter`]: either an insert/update or a tombstone.
#[derive(Clone)]
enum Staged {
    Put(CacheRecord),
    Delete,
}

/// A batch of trie mutations not yet visible to snapshot readers. Only a
/// single writer exists at a time per cache context (enforced by the
/// context's mutex, not by this type).
pub struct TrieWriter {
    base: TrieSnapshot,
    overlay: BTreeMap<Vec<u8>, Staged>,
}

impl TrieWriter {
    pub fn new(base: TrieSnapshot) -> Self {
        TrieWriter { base, overlay: BTreeMap::new() }
    }

    pub fn base(&self) -> &TrieSnapshot {
        &self.base
    }

    /// Read through the staged overlay first, falling back to the base
    /// snapshot — a key inserted earlier in this same transaction is
    /// visible to later reads within it.
    pub fn get(&self, key: &[u8]) -> Option<CacheRecord> {
        match self.overlay.get(key) {
            Some(Staged::Put(record)) => Some(record.clone()),
            Some(Staged::Delete) => None,
            None => self.base.get(key),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Vec<u8>, record: CacheRecord) {
        self.overlay.insert(key, Staged::Put(record));
    }

    /// Delete `key`, returning the prior value (from the overlay or base).
    pub fn delete(&mut self, key: &[u8]) -> Option<CacheRecord> {
        let prior = self.get(key);
        self.overlay.insert(key.to_vec(), Staged::Delete);
        prior
    }

    /// Delete every key having `prefix` as a prefix, returning the deleted
    /// keys. Used when a `Delete` change notification removes a directory,
    /// or when `Add`/`Modify` replaces a former directory with a file.
    pub fn delete_prefix(&mut self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self
            .base
            .prefix_iter(prefix)
            .map(|(k, _)| k.to_vec())
            .filter(|k| !matches!(self.overlay.get(k), Some(Staged::Delete)))
            .collect();

        for (k, staged) in &self.overlay {
            if k.starts_with(prefix) && matches!(staged, Staged::Put(_)) && !keys.contains(k) {
                keys.push(k.clone());
            }
        }

        for key in &keys {
            self.overlay.insert(key.clone(), Staged::Delete);
        }
        keys
    }

    /// Publish the staged mutations atomically, producing a new snapshot.
    pub fn commit(self) -> TrieSnapshot {
        let mut merged = (*self.base.0).clone();
        for (key, staged) in self.overlay {
            match staged {
                Staged::Put(record) => {
                    merged.insert(key, record);
                }
                Staged::Delete => {
                    merged.remove(&key);
                }
            }
        }
        TrieSnapshot::from_map(merged)
    }
}

impl Lookup for TrieWriter {
    fn get(&self, key: &[u8]) -> Option<CacheRecord> {
        TrieWriter::get(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec() -> CacheRecord {
        CacheRecord::File { digest: vec![1] }
    }

    #[test]
    fn unpublished_mutations_are_invisible_to_snapshot_readers() {
        let snap = TrieSnapshot::default();
        let mut writer = TrieWriter::new(snap.clone());
        writer.insert(b"/a".to_vec(), rec());
        assert!(snap.get(b"/a").is_none());
        assert!(writer.get(b"/a").is_some());

        let committed = writer.commit();
        assert!(committed.get(b"/a").is_some());
        assert!(snap.get(b"/a").is_none(), "old snapshot handle stays frozen");
    }

    #[test]
    fn delete_prefix_removes_descendants_only() {
        let key_a = vec![0u8, b'a']; // "/a"
        let key_a_b = vec![0u8, b'a', 0u8, b'b']; // "/a/b"
        let key_ab = vec![0u8, b'a', b'b']; // "/ab", shares the string prefix "a" but not the trie prefix "/a\0"

        let mut w = TrieWriter::new(TrieSnapshot::default());
        w.insert(key_a.clone(), rec());
        w.insert(key_a_b.clone(), rec());
        w.insert(key_ab.clone(), rec());
        let snap = w.commit();

        let mut w2 = TrieWriter::new(snap);
        w2.delete(&key_a);
        let mut subtree_prefix = key_a.clone();
        subtree_prefix.push(0u8);
        let deleted = w2.delete_prefix(&subtree_prefix);
        assert_eq!(deleted, vec![key_a_b.clone()]);
        let snap2 = w2.commit();
        assert!(snap2.get(&key_a).is_none());
        assert!(snap2.get(&key_a_b).is_none());
        assert!(snap2.get(&key_ab).is_some());
    }

    #[test]
    fn cursor_seek_skips_a_subtree() {
        let mut w = TrieWriter::new(TrieSnapshot::default());
        for k in [
            vec![0, b'a'],
            vec![0, b'a', 0], // DirHeader
            vec![0, b'a', 0, b'x'],
            vec![0, b'a', 0, b'x', 0],
            vec![0, b'a', 0, b'y'],
        ] {
            w.insert(k, rec());
        }
        let snap = w.commit();

        let mut cur = snap.seek(&[0, b'a', 0]);
        let (k, _) = cur.next().unwrap();
        assert_eq!(k, &vec![0, b'a', 0]);

        // skip past "/a/x" and its descendant by seeking to "/a/x" + 0x00 + 0xFF
        let skip_key = vec![0, b'a', 0, b'x', 0, 0xFF];
        cur.seek(&skip_key);
        let (k, _) = cur.next().unwrap();
        assert_eq!(k, &vec![0, b'a', 0, b'y']);
    }

    #[test]
    fn prefix_iter_excludes_non_prefixed_siblings() {
        let mut w = TrieWriter::new(TrieSnapshot::default());
        w.insert(b"/a".to_vec(), rec());
        w.insert(b"/ab".to_vec(), rec());
        let snap = w.commit();
        let found: Vec<_> = snap.prefix_iter(b"/a").map(|(k, _)| k.to_vec()).collect();
        assert_eq!(found, vec![b"/a".to_vec(), b"/ab".to_vec()]);
    }
}
