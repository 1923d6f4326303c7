//! Checksum engine (spec.md §4.5): resolves a path (following symlinks with
//! a hop limit), determines whether a scan is needed, then recursively
//! computes and memoizes digests.
//!
//! The locking/read-then-upgrade-to-write protocol lives in
//! [`crate::context::CacheContext`]; this module holds the pure algorithm —
//! symlink-chain resolution and the recursive directory-composition hash —
//! so it can be exercised without a live cache context. Directory digest
//! composition is grounded in
//! `other_examples/386986cd_crev-dev-cargo-crev__recursive-digest-src-lib.rs`'s
//! pattern of folding a child's name and digest into the parent's hasher in
//! trie order; the seek-past-a-subtree cursor trick is native to
//! `ptree_cache::trie::TrieSnapshot::seek`.

use std::path::Path;

use ptree_cache::filehash::FileHasher;
use ptree_cache::mount::{LocalMounter, MountHandle, Mountable};
use ptree_cache::path;
use ptree_cache::record::{CacheRecord, Digest};
use ptree_cache::trie::{Lookup, TrieSnapshot, TrieWriter};
use ptree_core::{ChecksumError, MAX_SYMLINK_HOPS};
use sha2::{Digest as _, Sha256};

use crate::context::CacheContext;
use crate::scan;

/// Walk the parent chain of `path` upward; a scan is needed when an
/// ancestor is missing from the trie. A `Symlink` ancestor is followed
/// (rather than counted as missing) and the walk continues from its target.
pub fn needs_scan(snapshot: &TrieSnapshot, logical_path: &str) -> Result<bool, ChecksumError> {
    let mut current = path::clean(logical_path);
    let mut hops = 0u32;
    loop {
        let key = path::encode(&current);
        match snapshot.get(&key) {
            None => return Ok(true),
            Some(CacheRecord::Symlink { linkname, .. }) => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(ChecksumError::TooManySymlinks(logical_path.to_string()));
                }
                current = path::clean(&path::join(&path::dirname(&current), &linkname));
            }
            Some(_) => {
                if current.is_empty() {
                    return Ok(false);
                }
                current = path::dirname(&current);
            }
        }
    }
}

/// Resolve `key` through the trie's key space, substituting a symlink
/// ancestor's target as the new prefix whenever an exact point-get misses
/// (spec.md §4.5 "Recursive checksum with symlink resolution"). Returns the
/// canonical `(key, record)` pair.
pub fn get_follow_links<L: Lookup>(source: &L, key: &[u8]) -> Result<(Vec<u8>, CacheRecord), ChecksumError> {
    let mut hops = 0u32;
    get_follow_links_inner(source, key, &mut hops)
}

fn get_follow_links_inner<L: Lookup>(source: &L, key: &[u8], hops: &mut u32) -> Result<(Vec<u8>, CacheRecord), ChecksumError> {
    if let Some(record) = source.get(key) {
        return Ok((key.to_vec(), record));
    }
    if key.is_empty() {
        return Err(ChecksumError::NotFound(path::decode(key)));
    }

    let (parent_key, last_segment) = path::split_key(key);
    let (resolved_parent_key, parent_record) = get_follow_links_inner(source, &parent_key, hops)?;

    match parent_record {
        CacheRecord::Symlink { linkname, .. } => {
            *hops += 1;
            if *hops > MAX_SYMLINK_HOPS {
                return Err(ChecksumError::TooManySymlinks(path::decode(key)));
            }
            let parent_path = path::decode(&resolved_parent_key);
            let resolved_parent_path = path::join(&path::dirname(&parent_path), &linkname);
            let last_str = path::decode(&last_segment);
            let new_key = path::encode(&format!("{}{}", resolved_parent_path, last_str));
            get_follow_links_inner(source, &new_key, hops)
        }
        _ => Err(ChecksumError::NotFound(path::decode(key))),
    }
}

/// Recursively compute and memoize the digest at `key`, staging any newly
/// computed records into `writer` (spec.md §4.5, steps 1-5 of the recursive
/// `checksum(root, txn, key)` algorithm).
pub fn checksum_at_key(writer: &mut TrieWriter, mount_root: &Path, hasher: &dyn FileHasher, key: &[u8]) -> Result<Digest, ChecksumError> {
    let (resolved_key, record) = get_follow_links(writer, key)?;

    if !record.digest().is_empty() {
        return Ok(record.digest().clone());
    }

    let digest = if record.is_dir() {
        compose_dir_digest(writer, mount_root, hasher, &resolved_key)?
    } else {
        let local_path = local_path_for_key(mount_root, &resolved_key);
        match &record {
            CacheRecord::File { .. } => hasher.hash_file(&local_path)?.to_vec(),
            CacheRecord::Symlink { .. } => hasher.hash_symlink_meta(&local_path)?.to_vec(),
            CacheRecord::DirHeader { .. } => hasher.hash_dir_header(&local_path)?.to_vec(),
            CacheRecord::Dir { .. } => unreachable!("handled above"),
        }
    };

    writer.insert(resolved_key, record.with_digest(digest.clone()));
    Ok(digest)
}

/// Directory composition (spec.md §4.5 step 3, §8 property 5): seek to the
/// first key strictly greater than `dir_key+0x00` and walk forward while
/// keys retain that prefix, folding each child's relative segment and digest
/// into the hash in trie order. A nested `Dir` child's descendants are
/// skipped by reseeking the cursor past its subtree.
fn compose_dir_digest(writer: &mut TrieWriter, mount_root: &Path, hasher: &dyn FileHasher, dir_key: &[u8]) -> Result<Digest, ChecksumError> {
    let mut subtree_prefix = dir_key.to_vec();
    subtree_prefix.push(0u8);

    let mut h = Sha256::new();
    let base_snapshot = writer.base().clone();
    let mut cursor = base_snapshot.seek(&subtree_prefix);

    loop {
        let child_key = match cursor.next() {
            Some((k, _)) if k.starts_with(&subtree_prefix) => k.clone(),
            _ => break,
        };

        if writer.get(&child_key).is_none() {
            // Deleted by a staged mutation within this same transaction.
            continue;
        }

        let relative = &child_key[dir_key.len()..];
        let child_digest = checksum_at_key(writer, mount_root, hasher, &child_key)?;

        h.update(relative);
        h.update(&child_digest);

        if matches!(writer.get(&child_key), Some(CacheRecord::Dir { .. })) {
            let mut skip_past = child_key.clone();
            skip_past.push(0u8);
            skip_past.push(0xFF);
            cursor.seek(&skip_past);
        }
    }

    Ok(h.finalize().to_vec())
}

/// `lazy_checksum(path)` (spec.md §4.5): scan if needed, then compute the
/// digest recursively in a fresh staged transaction and commit.
pub fn lazy_checksum(base: &TrieSnapshot, mount_root: &Path, hasher: &dyn FileHasher, logical_path: &str) -> Result<(TrieSnapshot, Digest), ChecksumError> {
    let scanned = if needs_scan(base, logical_path)? { scan::scan(mount_root, logical_path, base)? } else { base.clone() };

    let mut writer = TrieWriter::new(scanned);
    let key = path::encode(&path::clean(logical_path));
    let digest = checksum_at_key(&mut writer, mount_root, hasher, &key)?;
    Ok((writer.commit(), digest))
}

/// Public operation: `Checksum(mountable, path)` (spec.md §4.5 steps 1-2).
/// Creates a mount handle released on every exit path and follows symlinks
/// up to the hop limit, delegating the locked read/compute/commit protocol
/// to [`CacheContext::checksum_no_follow`].
pub fn checksum(
    context: &CacheContext,
    mountable: &dyn Mountable,
    mounter: &dyn LocalMounter,
    hasher: &dyn FileHasher,
    path_in: &str,
) -> Result<Digest, ChecksumError> {
    let handle = MountHandle::new(mountable, mounter);
    let mut current = path_in.to_string();
    let mut hops = 0u32;

    loop {
        let mount_root = handle.mount()?;
        let record = context.checksum_no_follow(&mount_root, hasher, &current)?;
        match record {
            CacheRecord::Symlink { linkname, .. } => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(ChecksumError::TooManySymlinks(path_in.to_string()));
                }
                current = path::join(&path::dirname(&path::clean(&current)), &linkname);
            }
            other => return Ok(other.digest().clone()),
        }
    }
}

fn local_path_for_key(mount_root: &Path, key: &[u8]) -> std::path::PathBuf {
    let key_without_trailing_zero = if key.last() == Some(&0u8) { &key[..key.len() - 1] } else { key };
    let logical = path::decode(key_without_trailing_zero);
    if logical.is_empty() {
        mount_root.to_path_buf()
    } else {
        mount_root.join(logical.trim_start_matches('/'))
    }
}
