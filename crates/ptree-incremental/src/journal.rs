//! Change journal (spec.md §4.6): applies a stream of filesystem change
//! notifications to a staged trie transaction, tracks which directories have
//! stale digests, and commits.
//!
//! Grounded in the teacher's `ptree-incremental::incremental` USN-journal
//! listener, which played the same role (ingest external change events,
//! mutate the cached tree) for a Windows-specific change source; this keeps
//! the "kind + path + precomputed facts" notification shape but drives a
//! `TrieWriter` instead of a `DiskCache`.

use std::collections::BTreeSet;

use ptree_cache::path;
use ptree_cache::record::CacheRecord;
use ptree_cache::trie::{TrieSnapshot, TrieWriter};
use ptree_core::ChecksumError;

/// The nature of a single filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// The type a non-delete notification asserts for its path. `Directory`
/// notifications insert both the `Dir` and `DirHeader` records (spec.md
/// §4.6 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFileInfo {
    File { digest: Vec<u8> },
    Symlink { digest: Vec<u8>, linkname: String },
    Directory { header_digest: Vec<u8> },
}

/// One notification fed to [`ChangeJournal::handle_change`]. `fileinfo` is
/// required for `Add`/`Modify` (spec.md §6: "the change stream is expected
/// to carry these — the journal does not open files") and ignored for
/// `Delete`.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
    pub fileinfo: Option<ChangeFileInfo>,
}

/// A staged transaction plus the set of directories it has made dirty.
/// Lives inside a cache context; never observed across a lock release
/// (spec.md §5).
pub struct ChangeJournal {
    staged: Option<TrieWriter>,
    dirty: BTreeSet<Vec<u8>>,
}

impl ChangeJournal {
    pub fn new() -> Self {
        ChangeJournal { staged: None, dirty: BTreeSet::new() }
    }

    pub fn is_active(&self) -> bool {
        self.staged.is_some()
    }

    /// Open a staged transaction from `base` if one is not already active,
    /// ensuring the root sentinel exists.
    fn ensure_open(&mut self, base: &TrieSnapshot) {
        if self.staged.is_some() {
            return;
        }
        let mut writer = TrieWriter::new(base.clone());
        let root_header_key = vec![0u8];
        if writer.get(&root_header_key).is_none() {
            writer.insert(root_header_key, CacheRecord::DirHeader { digest: empty_digest() });
        }
        if writer.get(&[]).is_none() {
            writer.insert(Vec::new(), CacheRecord::stub_dir());
        }
        self.staged = Some(writer);
    }

    pub fn handle_change(&mut self, base: &TrieSnapshot, event: ChangeEvent) -> Result<(), ChecksumError> {
        self.ensure_open(base);
        let writer = self.staged.as_mut().expect("journal transaction just opened");

        let cleaned = path::clean(&event.path);
        let key = path::encode(&cleaned);
        let parent = path::dirname(&cleaned);

        match event.kind {
            ChangeKind::Delete => {
                let prior = writer.delete(&key);
                if matches!(prior, Some(CacheRecord::Dir { .. })) {
                    let mut subtree_prefix = key.clone();
                    subtree_prefix.push(0u8);
                    writer.delete_prefix(&subtree_prefix);
                }
            }
            ChangeKind::Add | ChangeKind::Modify => {
                let fileinfo = event.fileinfo.ok_or_else(|| ChecksumError::InvalidChange {
                    path: cleaned.clone(),
                    reason: "Add/Modify notification missing fileinfo".to_string(),
                })?;

                if matches!(writer.get(&key), Some(CacheRecord::Dir { .. })) {
                    let mut subtree_prefix = key.clone();
                    subtree_prefix.push(0u8);
                    writer.delete_prefix(&subtree_prefix);
                }

                match fileinfo {
                    ChangeFileInfo::File { digest } => {
                        writer.insert(key.clone(), CacheRecord::File { digest });
                    }
                    ChangeFileInfo::Symlink { digest, linkname } => {
                        writer.insert(key.clone(), CacheRecord::Symlink { digest, linkname });
                    }
                    ChangeFileInfo::Directory { header_digest } => {
                        writer.insert(key.clone(), CacheRecord::stub_dir());
                        let mut header_key = key.clone();
                        header_key.push(0u8);
                        writer.insert(header_key, CacheRecord::DirHeader { digest: header_digest });
                    }
                }
            }
        }

        self.dirty.insert(path::encode(&parent));
        Ok(())
    }

    /// Commit the staged transaction (spec.md §4.6 "commit semantics"): the
    /// dirty set is expanded to every ancestor, each dirty directory present
    /// in the staged trie is overwritten with an empty-digest `Dir` stub,
    /// then the transaction is published.
    pub fn commit(&mut self) -> Option<TrieSnapshot> {
        let mut writer = self.staged.take()?;

        let mut all_dirty: BTreeSet<Vec<u8>> = BTreeSet::new();
        for dirty_key in &self.dirty {
            let mut cursor_key = dirty_key.clone();
            loop {
                all_dirty.insert(cursor_key.clone());
                if cursor_key.is_empty() {
                    break;
                }
                let (parent_key, _) = path::split_key(&cursor_key);
                cursor_key = parent_key;
            }
        }

        for dirty_key in &all_dirty {
            if let Some(CacheRecord::Dir { .. }) = writer.get(dirty_key) {
                writer.insert(dirty_key.clone(), CacheRecord::stub_dir());
            }
        }

        self.dirty.clear();
        Some(writer.commit())
    }
}

impl Default for ChangeJournal {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_digest() -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest([]).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_file(journal: &mut ChangeJournal, base: &TrieSnapshot, path: &str, digest: Vec<u8>) {
        journal
            .handle_change(
                base,
                ChangeEvent { kind: ChangeKind::Add, path: path.to_string(), fileinfo: Some(ChangeFileInfo::File { digest }) },
            )
            .unwrap();
    }

    #[test]
    fn add_without_fileinfo_is_invalid_change() {
        let base = TrieSnapshot::default();
        let mut journal = ChangeJournal::new();
        let err = journal
            .handle_change(&base, ChangeEvent { kind: ChangeKind::Add, path: "/a".to_string(), fileinfo: None })
            .unwrap_err();
        assert!(matches!(err, ChecksumError::InvalidChange { .. }));
    }

    #[test]
    fn delete_removes_directory_subtree() {
        let base = TrieSnapshot::default();
        let mut journal = ChangeJournal::new();
        journal
            .handle_change(
                &base,
                ChangeEvent {
                    kind: ChangeKind::Add,
                    path: "/d".to_string(),
                    fileinfo: Some(ChangeFileInfo::Directory { header_digest: vec![9] }),
                },
            )
            .unwrap();
        add_file(&mut journal, &base, "/d/a.txt", vec![1]);
        let snap = journal.commit().unwrap();

        let mut journal2 = ChangeJournal::new();
        journal2.handle_change(&snap, ChangeEvent { kind: ChangeKind::Delete, path: "/d".to_string(), fileinfo: None }).unwrap();
        let snap2 = journal2.commit().unwrap();

        assert!(snap2.get(&path::encode("/d")).is_none());
        assert!(snap2.get(&path::encode("/d/a.txt")).is_none());
    }

    #[test]
    fn modify_invalidates_ancestor_directories() {
        let base = TrieSnapshot::default();
        let mut journal = ChangeJournal::new();
        journal
            .handle_change(
                &base,
                ChangeEvent {
                    kind: ChangeKind::Add,
                    path: "/d".to_string(),
                    fileinfo: Some(ChangeFileInfo::Directory { header_digest: vec![9] }),
                },
            )
            .unwrap();
        add_file(&mut journal, &base, "/d/a.txt", vec![1]);
        add_file(&mut journal, &base, "/d/b.txt", vec![2]);
        let snap = journal.commit().unwrap();

        // Simulate a prior checksum computation caching the directory digest.
        let mut w = TrieWriter::new(snap);
        w.insert(path::encode("/d"), CacheRecord::Dir { digest: vec![0xAB] });
        let snap_cached = w.commit();
        assert!(!snap_cached.get(&path::encode("/d")).unwrap().is_stub());

        let mut journal2 = ChangeJournal::new();
        journal2
            .handle_change(
                &snap_cached,
                ChangeEvent {
                    kind: ChangeKind::Modify,
                    path: "/d/a.txt".to_string(),
                    fileinfo: Some(ChangeFileInfo::File { digest: vec![0xFF] }),
                },
            )
            .unwrap();
        let snap2 = journal2.commit().unwrap();

        assert!(snap2.get(&path::encode("/d")).unwrap().is_stub());
        assert_eq!(snap2.get(&path::encode("/d/b.txt")).unwrap().digest(), &vec![2]);
    }
}
