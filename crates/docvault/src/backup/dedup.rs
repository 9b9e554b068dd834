//! Cross-run and in-run deduplication of file bytes.

use std::collections::HashSet;

/// Decides whether a file's bytes must be copied into the current archive.
///
/// The reference set holds the digests of the most recent completed backup
/// only. Bytes that were last archived further back are copied again.
#[derive(Debug, Default)]
pub struct Deduplicator {
    previous: HashSet<String>,
    copied: HashSet<String>,
}

impl Deduplicator {
    pub fn new(previous: HashSet<String>) -> Self {
        Self {
            previous,
            copied: HashSet::new(),
        }
    }

    /// True if neither the previous backup nor this run holds the digest.
    pub fn must_copy(&self, digest: &str) -> bool {
        !self.previous.contains(digest) && !self.copied.contains(digest)
    }

    pub fn mark_copied(&mut self, digest: &str) {
        self.copied.insert(digest.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_digest_is_not_copied() {
        let dedup = Deduplicator::new(HashSet::from(["aaa".to_string()]));
        assert!(!dedup.must_copy("aaa"));
        assert!(dedup.must_copy("bbb"));
    }

    #[test]
    fn test_same_digest_copied_once_per_run() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.must_copy("ccc"));
        dedup.mark_copied("ccc");
        assert!(!dedup.must_copy("ccc"));
        assert!(dedup.must_copy("ddd"));
    }
}
