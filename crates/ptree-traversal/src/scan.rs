//! Scan engine (spec.md §4.4): populates stub records for a subtree by
//! walking a mounted layer on disk.
//!
//! The scope-safe component-by-component resolver is grounded in
//! `other_examples/40ece19b_montanetech-codeix__src-mount-mod.rs`'s
//! treatment of a mount root as a boundary a walker must not escape; the
//! directory-enumeration loop (file-type dispatch, symlink target capture
//! via `fs::read_link`) is grounded in the teacher's `dfs_worker` in the
//! deleted `ptree-traversal::traversal` module, reduced from a
//! multi-threaded work-stealing queue to the recursive-but-single-call scan
//! the spec calls for (spec.md §4.4: "recursively walk the resolved parent
//! directory"). The teacher parallelized directory enumeration across a
//! rayon pool sized by `num_cpus`; this scan keeps that parallelism at the
//! entry-stat granularity within each directory level instead (see
//! `stat_entries` below), while the recursion across levels stays on the
//! calling thread.

use std::fs;
use std::path::{Path, PathBuf};

use ptree_cache::path;
use ptree_cache::record::CacheRecord;
use ptree_cache::trie::{TrieSnapshot, TrieWriter};
use ptree_core::{ChecksumError, MAX_SYMLINK_HOPS};
use rayon::prelude::*;

/// One freshly enumerated directory child, stat'd but not yet staged.
enum EntryKind {
    Symlink(String),
    Dir,
    File,
}

/// Stat each directory entry (symlink-target read or file-type dispatch) in
/// parallel once the entry count clears `num_cpus::get()`; below that the
/// syscall overhead dwarfs any thread-pool gain, so it runs sequentially on
/// the calling thread instead (mirrors the teacher's threshold-gated
/// thread-local flush in `dfs_worker`, generalized from a batch-size trigger
/// to an entry-count trigger).
fn stat_entries(dir: &Path) -> Result<Vec<(String, EntryKind)>, ChecksumError> {
    let names: Vec<PathBuf> = fs::read_dir(dir)?.map(|e| e.map(|e| e.path())).collect::<std::io::Result<_>>()?;

    let stat_one = |path: &PathBuf| -> Result<(String, EntryKind), ChecksumError> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let file_type = fs::symlink_metadata(path)?.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink(read_link_forward_slash(path)?)
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        Ok((name, kind))
    };

    if names.len() > num_cpus::get() {
        names.par_iter().map(stat_one).collect()
    } else {
        names.iter().map(stat_one).collect()
    }
}

/// Scope-safe resolver: walks `logical_dir` component by component under
/// `mount_root`, refusing to step outside it, and records every symlink
/// traversed along the way as a `Symlink` stub so the checksum engine can
/// see it later without a second mount walk (spec.md §4.4 step 2, §9).
///
/// Returns the resolved local filesystem path of `logical_dir`.
pub fn resolve_scope_safe(mount_root: &Path, logical_dir: &str, writer: &mut TrieWriter) -> Result<PathBuf, ChecksumError> {
    let cleaned = path::clean(logical_dir);
    let mut local = mount_root.to_path_buf();
    let mut logical = String::new();
    let mut hops = 0u32;

    for segment in cleaned.split('/').filter(|s| !s.is_empty()) {
        local.push(segment);
        logical = format!("{}/{}", logical, segment);

        let meta = fs::symlink_metadata(&local)?;
        if meta.file_type().is_symlink() {
            let linkname = read_link_forward_slash(&local)?;
            let key = path::encode(&logical);
            if writer.get(&key).is_none() {
                writer.insert(key, CacheRecord::stub_symlink(linkname.clone()));
            }

            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(ChecksumError::TooManySymlinks(cleaned.clone()));
            }

            let resolved_logical = path::join(&path::dirname(&logical), &linkname);
            let resolved_local = mount_root.join(resolved_logical.trim_start_matches('/'));
            if !resolved_local.starts_with(mount_root) {
                return Err(ChecksumError::MountFailure(format!("symlink escapes mount root: {}", logical)));
            }
            local = resolved_local;
            logical = resolved_logical;
        }
    }

    Ok(local)
}

fn read_link_forward_slash(path: &Path) -> Result<String, ChecksumError> {
    let target = fs::read_link(path)?;
    Ok(target.to_string_lossy().replace('\\', "/"))
}

/// Populate stub records for the entire subtree under `logical_path`'s
/// resolved parent directory (spec.md §4.4: "recursively walk the resolved
/// parent directory"). Scans are additive: an entry already present in the
/// snapshot is left untouched, and its subtree (if any) is not re-walked —
/// a previously scanned directory is assumed fully stubbed already.
pub fn scan(mount_root: &Path, logical_path: &str, base: &TrieSnapshot) -> Result<TrieSnapshot, ChecksumError> {
    let mut writer = TrieWriter::new(base.clone());
    let parent_dir = path::dirname(logical_path);
    let local_parent = resolve_scope_safe(mount_root, &parent_dir, &mut writer)?;

    let parent_key = path::encode(&parent_dir);
    if writer.get(&parent_key).is_none() {
        writer.insert(parent_key.clone(), CacheRecord::stub_dir());
        let mut header_key = parent_key.clone();
        header_key.push(0u8);
        writer.insert(header_key, CacheRecord::stub_dir_header());
    }

    scan_subtree(&local_parent, &parent_dir, &mut writer)?;

    Ok(writer.commit())
}

/// Stub every entry under `local_dir` (logically named `logical_dir`),
/// recursing into freshly discovered subdirectories so the whole subtree
/// is populated in one pass rather than just `local_dir`'s immediate
/// children.
fn scan_subtree(local_dir: &Path, logical_dir: &str, writer: &mut TrieWriter) -> Result<(), ChecksumError> {
    let entries = match stat_entries(local_dir) {
        Ok(entries) => entries,
        Err(ChecksumError::IoFailure(err)) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    for (name, kind) in entries {
        let child_logical = format!("{}/{}", logical_dir, name);
        let child_key = path::encode(&child_logical);
        if writer.get(&child_key).is_some() {
            continue;
        }

        match kind {
            EntryKind::Symlink(linkname) => writer.insert(child_key, CacheRecord::stub_symlink(linkname)),
            EntryKind::Dir => {
                writer.insert(child_key.clone(), CacheRecord::stub_dir());
                let mut header_key = child_key;
                header_key.push(0u8);
                writer.insert(header_key, CacheRecord::stub_dir_header());

                let child_local = local_dir.join(&name);
                scan_subtree(&child_local, &child_logical, writer)?;
            }
            EntryKind::File => writer.insert(child_key, CacheRecord::stub_file()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_inserts_stubs_for_immediate_children() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let base = TrieSnapshot::default();
        let snap = scan(dir.path(), "/a.txt", &base).unwrap();

        assert!(snap.get(&path::encode("/a.txt")).is_some());
        assert!(snap.get(&path::encode("/sub")).unwrap().is_dir());
        let mut sub_header_key = path::encode("/sub");
        sub_header_key.push(0u8);
        assert!(snap.get(&sub_header_key).is_some());
    }

    #[test]
    fn scan_recurses_into_nested_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::write(dir.path().join("a/b/c/deep.txt"), b"deep").unwrap();

        let base = TrieSnapshot::default();
        // Scanning a path under "/a" walks the whole subtree under root in
        // one pass, not just root's immediate children.
        let snap = scan(dir.path(), "/a", &base).unwrap();

        assert!(snap.get(&path::encode("/a/b")).unwrap().is_dir());
        assert!(snap.get(&path::encode("/a/b/c")).unwrap().is_dir());
        assert!(snap.get(&path::encode("/a/b/c/deep.txt")).is_some());
    }

    #[test]
    fn scan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();

        let base = TrieSnapshot::default();
        let snap1 = scan(dir.path(), "/a.txt", &base).unwrap();
        let snap2 = scan(dir.path(), "/a.txt", &snap1).unwrap();
        assert_eq!(snap1.len(), snap2.len());
    }

    #[test]
    fn scan_does_not_overwrite_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();

        let base = TrieSnapshot::default();
        let mut w = TrieWriter::new(base);
        w.insert(vec![0u8], CacheRecord::stub_dir_header());
        w.insert(Vec::new(), CacheRecord::Dir { digest: vec![1] });
        w.insert(path::encode("/a.txt"), CacheRecord::File { digest: vec![0xAB] });
        let pre_populated = w.commit();

        let snap = scan(dir.path(), "/a.txt", &pre_populated).unwrap();
        assert_eq!(snap.get(&path::encode("/a.txt")).unwrap().digest(), &vec![0xAB]);
    }
}
