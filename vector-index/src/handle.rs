use std::sync::{Arc, RwLock};

use crate::VectorIndex;

/// Explicit handle to the currently served index. Queries take a cheap
/// snapshot; a rebuild installs a fresh index by swapping the inner `Arc`,
/// so readers holding the old snapshot are never disturbed and a partially
/// built index is never visible.
#[derive(Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<Arc<VectorIndex>>>,
}

impl SharedIndex {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    pub fn snapshot(&self) -> Arc<VectorIndex> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replaces the served index with a fully built one.
    pub fn install(&self, index: VectorIndex) {
        let fresh = Arc::new(index);
        match self.inner.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::chunk::Chunk;

    fn index_with(text: &str) -> VectorIndex {
        let chunks = vec![Chunk::new("ai", "facts", 0, text, "https://x")];
        VectorIndex::build(chunks, vec![vec![1.0, 0.0]], "hashed:2").expect("build")
    }

    #[test]
    fn snapshot_survives_install() {
        let shared = SharedIndex::new(index_with("before"));
        let snapshot = shared.snapshot();

        shared.install(index_with("after"));

        let old_chunk = snapshot.chunk_at(0).expect("chunk");
        assert_eq!(old_chunk.text, "before", "existing readers keep their view");

        let new_chunk = shared.snapshot();
        assert_eq!(new_chunk.chunk_at(0).expect("chunk").text, "after");
    }

    #[test]
    fn clones_share_the_same_index() {
        let shared = SharedIndex::new(index_with("one"));
        let other = shared.clone();

        shared.install(index_with("two"));
        assert_eq!(other.snapshot().chunk_at(0).expect("chunk").text, "two");
    }
}
