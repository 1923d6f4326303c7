//! File-hash primitive (spec.md §1, "out of scope... invoking the
//! primitive"; §4.5 step 4). The core only ever calls `FileHasher`, never
//! opens a file to hash it itself — callers may substitute their own
//! implementation, e.g. one backed by a content-addressable store.
//!
//! The default implementation streams file content through SHA-256 the way
//! `other_examples/0a8c2773_containers-bootc__src-filetree.rs`'s
//! `FileMetadata::new_from_path` streams through an `openssl::Hasher`, and
//! folds in normalized stat metadata the way
//! `other_examples/386986cd_crev-dev-cargo-crev__recursive-digest-src-lib.rs`
//! folds a type tag ("F"/"L"/"D") into its hasher before the payload.

use std::fs::{self, Metadata};
use std::io::Read;
use std::path::Path;

use ptree_core::ChecksumError;
use sha2::{Digest, Sha256};

pub type Hash32 = [u8; 32];

/// Digests a single file's content plus stat metadata, or a symlink's/
/// directory's own metadata. Implementations must not follow symlinks
/// (`lstat` semantics) — the checksum engine resolves symlinks logically
/// through the trie, not through the OS.
pub trait FileHasher: Send + Sync {
    fn hash_file(&self, local_path: &Path) -> Result<Hash32, ChecksumError>;
    fn hash_symlink_meta(&self, local_path: &Path) -> Result<Hash32, ChecksumError>;
    fn hash_dir_header(&self, local_path: &Path) -> Result<Hash32, ChecksumError>;
}

/// The reference `FileHasher`: SHA-256 over a normalized stat tuple
/// (mode, size, uid/gid, mtime) followed by content bytes for files.
#[derive(Default)]
pub struct DefaultFileHasher;

fn hash_stat(hasher: &mut Sha256, meta: &Metadata) {
    hasher.update(mode_bits(meta).to_le_bytes());
    hasher.update(meta.len().to_le_bytes());
    let (uid, gid) = owner_bits(meta);
    hasher.update(uid.to_le_bytes());
    hasher.update(gid.to_le_bytes());
    hasher.update(mtime_nanos(meta).to_le_bytes());
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

#[cfg(unix)]
fn owner_bits(meta: &Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn owner_bits(_meta: &Metadata) -> (u32, u32) {
    (0, 0)
}

#[cfg(unix)]
fn mtime_nanos(meta: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime() * 1_000_000_000 + meta.mtime_nsec()
}

#[cfg(not(unix))]
fn mtime_nanos(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl FileHasher for DefaultFileHasher {
    fn hash_file(&self, local_path: &Path) -> Result<Hash32, ChecksumError> {
        let meta = fs::symlink_metadata(local_path)?;
        let mut hasher = Sha256::new();
        hasher.update(b"F");
        hash_stat(&mut hasher, &meta);

        let mut file = fs::File::open(local_path)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().into())
    }

    fn hash_symlink_meta(&self, local_path: &Path) -> Result<Hash32, ChecksumError> {
        let meta = fs::symlink_metadata(local_path)?;
        let mut hasher = Sha256::new();
        hasher.update(b"L");
        hash_stat(&mut hasher, &meta);
        Ok(hasher.finalize().into())
    }

    fn hash_dir_header(&self, local_path: &Path) -> Result<Hash32, ChecksumError> {
        let meta = fs::symlink_metadata(local_path)?;
        let mut hasher = Sha256::new();
        hasher.update(b"D");
        hash_stat(&mut hasher, &meta);
        Ok(hasher.finalize().into())
    }
}
