//! Cache record model (spec.md §3): the tagged record stored at each trie
//! key.

use serde::{Deserialize, Serialize};

pub type Digest = Vec<u8>;

/// A record stored at one trie key. `digest` is empty for a stub: the path
/// is known to exist (and its type is known) but its digest has not yet
/// been computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheRecord {
    /// Digest over file content plus normalized stat metadata.
    File { digest: Digest },
    /// Digest over the symlink's metadata; `linkname` is the raw target as
    /// a forward-slash path (absolute or relative), stored verbatim.
    Symlink { digest: Digest, linkname: String },
    /// Digest of a directory's own metadata (its header, not its contents).
    DirHeader { digest: Digest },
    /// Recursive digest of directory contents (stable composition of child
    /// entries' names and digests).
    Dir { digest: Digest },
}

impl CacheRecord {
    pub fn digest(&self) -> &Digest {
        match self {
            CacheRecord::File { digest }
            | CacheRecord::Symlink { digest, .. }
            | CacheRecord::DirHeader { digest }
            | CacheRecord::Dir { digest } => digest,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.digest().is_empty()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, CacheRecord::Dir { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, CacheRecord::Symlink { .. })
    }

    pub fn linkname(&self) -> Option<&str> {
        match self {
            CacheRecord::Symlink { linkname, .. } => Some(linkname),
            _ => None,
        }
    }

    /// A copy of this record with `digest` replaced.
    pub fn with_digest(&self, digest: Digest) -> Self {
        match self {
            CacheRecord::File { .. } => CacheRecord::File { digest },
            CacheRecord::Symlink { linkname, .. } => CacheRecord::Symlink { digest, linkname: linkname.clone() },
            CacheRecord::DirHeader { .. } => CacheRecord::DirHeader { digest },
            CacheRecord::Dir { .. } => CacheRecord::Dir { digest },
        }
    }

    pub fn stub_dir() -> Self {
        CacheRecord::Dir { digest: Vec::new() }
    }

    pub fn stub_dir_header() -> Self {
        CacheRecord::DirHeader { digest: Vec::new() }
    }

    pub fn stub_file() -> Self {
        CacheRecord::File { digest: Vec::new() }
    }

    pub fn stub_symlink(linkname: String) -> Self {
        CacheRecord::Symlink { digest: Vec::new(), linkname }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_records_have_empty_digest() {
        assert!(CacheRecord::stub_dir().is_stub());
        assert!(CacheRecord::stub_file().is_stub());
        assert!(CacheRecord::stub_symlink("/x".into()).is_stub());
    }

    #[test]
    fn with_digest_preserves_linkname() {
        let stub = CacheRecord::stub_symlink("/x".into());
        let filled = stub.with_digest(vec![1, 2, 3]);
        assert_eq!(filled.linkname(), Some("/x"));
        assert!(!filled.is_stub());
    }
}
