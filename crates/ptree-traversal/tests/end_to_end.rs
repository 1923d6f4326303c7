//! End-to-end scenarios exercising the public `CacheManager::checksum` entry
//! point against a real temp-directory mount, covering spec.md §8's S1-S6.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ptree_cache::filehash::{FileHasher, Hash32};
use ptree_cache::metastore::{InMemoryMetadataStore, MetadataStore};
use ptree_cache::mount::{IdentityLocalMounter, LocalDirMountable};
use ptree_core::{ChecksumError, CacheManagerConfig};
use ptree_traversal::CacheManager;

/// Wraps [`ptree_cache::filehash::DefaultFileHasher`] and counts how many
/// times `hash_file` actually opens a file, so S1 can assert a second
/// `Checksum` call does no redundant I/O.
#[derive(Default)]
struct CountingFileHasher {
    inner: ptree_cache::filehash::DefaultFileHasher,
    opens: AtomicUsize,
}

impl FileHasher for CountingFileHasher {
    fn hash_file(&self, local_path: &Path) -> Result<Hash32, ChecksumError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.hash_file(local_path)
    }

    fn hash_symlink_meta(&self, local_path: &Path) -> Result<Hash32, ChecksumError> {
        self.inner.hash_symlink_meta(local_path)
    }

    fn hash_dir_header(&self, local_path: &Path) -> Result<Hash32, ChecksumError> {
        self.inner.hash_dir_header(local_path)
    }
}

fn manager() -> (CacheManager, Arc<dyn MetadataStore>) {
    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
    (CacheManager::new(Arc::clone(&store), CacheManagerConfig::default()), store)
}

#[test]
fn s1_repeated_checksum_does_not_rehash_file_content() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

    let (manager, _store) = manager();
    let mountable = LocalDirMountable::new(dir.path());
    let mounter = IdentityLocalMounter;
    let hasher = CountingFileHasher::default();

    let d1 = manager.checksum("layer", &mountable, &mounter, &hasher, "/hello.txt").unwrap();
    let d2 = manager.checksum("layer", &mountable, &mounter, &hasher, "/hello.txt").unwrap();

    assert_eq!(d1, d2);
    assert_eq!(hasher.opens.load(Ordering::SeqCst), 1);
}

#[test]
fn s2_directory_digest_is_composed_from_child_segments_and_digests() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d/a.txt"), b"A").unwrap();
    fs::write(dir.path().join("d/b.txt"), b"B").unwrap();

    let (manager, _store) = manager();
    let mountable = LocalDirMountable::new(dir.path());
    let mounter = IdentityLocalMounter;
    let hasher = ptree_cache::filehash::DefaultFileHasher;

    let digest_a = manager.checksum("layer", &mountable, &mounter, &hasher, "/d/a.txt").unwrap();
    let digest_b = manager.checksum("layer", &mountable, &mounter, &hasher, "/d/b.txt").unwrap();
    let digest_d = manager.checksum("layer", &mountable, &mounter, &hasher, "/d").unwrap();

    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(ptree_cache::path::encode("/a.txt"));
    h.update(&digest_a);
    h.update(ptree_cache::path::encode("/b.txt"));
    h.update(&digest_b);
    assert_eq!(digest_d, h.finalize().to_vec());
}

#[test]
fn s4_symlink_to_directory_has_the_same_digest_as_the_target() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d/a.txt"), b"A").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("d", dir.path().join("link")).unwrap();
    #[cfg(not(unix))]
    return;

    let (manager, _store) = manager();
    let mountable = LocalDirMountable::new(dir.path());
    let mounter = IdentityLocalMounter;
    let hasher = ptree_cache::filehash::DefaultFileHasher;

    let direct = manager.checksum("layer", &mountable, &mounter, &hasher, "/d/a.txt").unwrap();
    let via_link = manager.checksum("layer", &mountable, &mounter, &hasher, "/link/a.txt").unwrap();
    assert_eq!(direct, via_link);
}

#[cfg(unix)]
#[test]
fn s5_symlink_self_loop_returns_too_many_symlinks() {
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink("loop", dir.path().join("loop")).unwrap();

    let (manager, _store) = manager();
    let mountable = LocalDirMountable::new(dir.path());
    let mounter = IdentityLocalMounter;
    let hasher = ptree_cache::filehash::DefaultFileHasher;

    let err = manager.checksum("layer", &mountable, &mounter, &hasher, "/loop").unwrap_err();
    assert!(matches!(err, ChecksumError::TooManySymlinks(_)));
}

#[test]
fn s6_persisted_context_reload_serves_cached_digest_without_remounting() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d/a.txt"), b"A").unwrap();

    let (manager, store) = manager();
    let mountable = LocalDirMountable::new(dir.path());
    let mounter = IdentityLocalMounter;
    let hasher = ptree_cache::filehash::DefaultFileHasher;

    let digest = manager.checksum("layer", &mountable, &mounter, &hasher, "/d").unwrap();

    let ctx = manager.get_cache_context("layer").unwrap();
    ctx.save().unwrap();

    // A fresh manager over the same persisted store should serve the same
    // digest; the mountable below panics if ever asked for mount entries.
    struct PanicsIfMounted;
    impl ptree_cache::mount::Mountable for PanicsIfMounted {
        fn mounts(&self) -> Result<Vec<ptree_cache::mount::MountEntry>, ChecksumError> {
            panic!("mount provider should not be invoked for a fully cached digest");
        }
    }

    let reloaded_manager = CacheManager::new(store, CacheManagerConfig::default());
    let never_mount = PanicsIfMounted;
    let digest2 = reloaded_manager.checksum("layer", &never_mount, &mounter, &hasher, "/d").unwrap();
    assert_eq!(digest, digest2);
}
