//! Mount handle (spec.md §4.3) and the mount-provider contract (spec.md §6).
//!
//! `Mountable` and `LocalMounter` are the external collaborators the spec
//! treats as out-of-scope: production callers plug in whatever snapshot
//! provider materializes a layer onto local disk. `LocalDirMountable` is
//! the read-only pass-through implementation used by tests and the demo
//! binary, grounded in `other_examples/40ece19b_montanetech-codeix__src-mount-mod.rs`'s
//! treatment of a mount as "surface this set of sources at one local root".

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ptree_core::ChecksumError;

/// One source to be surfaced at the mounted root.
#[derive(Debug, Clone)]
pub struct MountEntry {
    pub source: PathBuf,
}

/// A handle that can be asked to surface itself at a local filesystem path.
pub trait Mountable: Send + Sync {
    fn mounts(&self) -> Result<Vec<MountEntry>, ChecksumError>;
}

pub type UnmountFn = Box<dyn FnOnce() + Send>;

/// Materializes a set of mount entries at a local path, read-only.
pub trait LocalMounter: Send + Sync {
    fn mount(&self, entries: &[MountEntry]) -> Result<(PathBuf, UnmountFn), ChecksumError>;
}

/// A `Mountable` that is already a local directory — the layer is "mounted"
/// by pointing at it directly. Used for tests and the demo CLI, which have
/// no real snapshot/mount daemon to talk to.
pub struct LocalDirMountable {
    root: PathBuf,
}

impl LocalDirMountable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDirMountable { root: root.into() }
    }
}

impl Mountable for LocalDirMountable {
    fn mounts(&self) -> Result<Vec<MountEntry>, ChecksumError> {
        Ok(vec![MountEntry { source: self.root.clone() }])
    }
}

/// Pairs with [`LocalDirMountable`]: "mounting" a single local source is
/// just handing back its path, unmount is a no-op.
pub struct IdentityLocalMounter;

impl LocalMounter for IdentityLocalMounter {
    fn mount(&self, entries: &[MountEntry]) -> Result<(PathBuf, UnmountFn), ChecksumError> {
        let entry = entries
            .first()
            .ok_or_else(|| ChecksumError::MountFailure("no mount entries".to_string()))?;
        if !entry.source.exists() {
            return Err(ChecksumError::MountFailure(format!("mount source does not exist: {}", entry.source.display())));
        }
        let path = entry.source.clone();
        Ok((path, Box::new(|| {})))
    }
}

/// Lazily resolves a mountable to a local path and guarantees release.
/// Scoped to the lifetime of a single top-level `Checksum` call (spec.md §5:
/// "the mount handle is scoped to the lifetime of the top-level `Checksum`
/// call and unmounted on every exit path, success or failure").
pub struct MountHandle<'a> {
    mountable: &'a dyn Mountable,
    mounter: &'a dyn LocalMounter,
    state: Mutex<Option<(PathBuf, UnmountFn)>>,
}

impl<'a> MountHandle<'a> {
    pub fn new(mountable: &'a dyn Mountable, mounter: &'a dyn LocalMounter) -> Self {
        MountHandle { mountable, mounter, state: Mutex::new(None) }
    }

    /// Idempotent: the first call mounts and memoizes the path; subsequent
    /// calls return the memoized path without remounting.
    pub fn mount(&self) -> Result<PathBuf, ChecksumError> {
        let mut guard = self.state.lock().expect("mount handle mutex poisoned");
        if let Some((path, _)) = guard.as_ref() {
            return Ok(path.clone());
        }
        let entries = self.mountable.mounts()?;
        let (path, unmount) = self.mounter.mount(&entries)?;
        *guard = Some((path.clone(), unmount));
        Ok(path)
    }

    /// Called on every exit path from a `Checksum` invocation. A no-op if
    /// the handle was never mounted.
    pub fn clean(&self) {
        let mut guard = self.state.lock().expect("mount handle mutex poisoned");
        if let Some((_, unmount)) = guard.take() {
            unmount();
        }
    }

    pub fn local_path_for(&self, mount_root: &Path, key_relative_path: &str) -> PathBuf {
        if key_relative_path.is_empty() {
            mount_root.to_path_buf()
        } else {
            mount_root.join(key_relative_path.trim_start_matches('/'))
        }
    }
}

impl Drop for MountHandle<'_> {
    fn drop(&mut self) {
        self.clean();
    }
}
