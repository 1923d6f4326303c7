use std::io;

use thiserror::Error;

/// Maximum symlink hops followed by `Checksum`, `needs_scan`, and
/// `get_follow_links` before giving up.
pub const MAX_SYMLINK_HOPS: u32 = 255;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("too many symlinks resolving {0} (limit {MAX_SYMLINK_HOPS})")]
    TooManySymlinks(String),

    #[error("invalid change notification for {path}: {reason}")]
    InvalidChange { path: String, reason: String },

    #[error("mount failure: {0}")]
    MountFailure(String),

    #[error("io error: {0}")]
    IoFailure(#[from] io::Error),

    #[error("encoding error: {0}")]
    EncodingFailure(#[from] bincode::Error),
}

pub type ChecksumResult<T> = Result<T, ChecksumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_path() {
        let err = ChecksumError::NotFound("/a/b".to_string());
        assert!(err.to_string().contains("/a/b"));
    }
}
