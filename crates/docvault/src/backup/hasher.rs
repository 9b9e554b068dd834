//! Streaming SHA-256 content hashing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::BackupError;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Hashes files in fixed-size chunks; memory use is bounded by the chunk
/// size regardless of file size.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ContentHasher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns the lowercase hex SHA-256 of the file and its size in bytes.
    pub fn hash_file(&self, path: &Path) -> Result<(String, u64), BackupError> {
        let unreadable = |e: std::io::Error| BackupError::FileUnreadable {
            path: path.to_path_buf(),
            source: e,
        };

        let file = File::open(path).map_err(unreadable)?;
        if file.metadata().map_err(unreadable)?.is_dir() {
            return Err(unreadable(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }
        self.hash_reader(&mut BufReader::with_capacity(self.chunk_size, file))
            .map_err(unreadable)
    }

    /// Hashes any reader the same way, e.g. an archive entry.
    pub fn hash_reader<R: Read>(&self, reader: &mut R) -> std::io::Result<(String, u64)> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            total += bytes_read as u64;
        }

        Ok((hex::encode(hasher.finalize()), total))
    }
}
