pub mod filehash;
pub mod mount;
pub mod metastore;
pub mod path;
pub mod record;
pub mod trie;

pub use filehash::{DefaultFileHasher, FileHasher, Hash32};
pub use mount::{IdentityLocalMounter, LocalDirMountable, LocalMounter, MountEntry, MountHandle, Mountable, UnmountFn};
pub use metastore::{InMemoryMetadataStore, LocalFileMetadataStore, MetadataStore};
pub use record::{CacheRecord, Digest};
pub use trie::{Cursor, Lookup, TrieSnapshot, TrieWriter};
