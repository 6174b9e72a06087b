//! Document ids tying a request record to its response record.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Correlation id of a captured exchange. Zero means "not persisted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    /// The "do not persist" sentinel.
    pub const NONE: DocumentId = DocumentId(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// True when this exchange is tracked for persistence.
    pub fn is_tracked(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Issues strictly increasing document ids, starting at 1.
///
/// Owned by whoever builds the interceptor and shared through an `Arc`.
/// Relaxed ordering is enough: only uniqueness is needed.
#[derive(Debug)]
pub struct DocumentIdAllocator {
    next: AtomicU64,
}

impl DocumentIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> DocumentId {
        DocumentId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for DocumentIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_above_zero() {
        let ids = DocumentIdAllocator::new();
        let first = ids.next();
        assert!(first.is_tracked());
        assert_eq!(first.as_u64(), 1);
        assert!(ids.next() > first);
        assert!(!DocumentId::NONE.is_tracked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_are_dense_and_unique() {
        const TASKS: usize = 8;
        const PER_TASK: usize = 500;

        let ids = Arc::new(DocumentIdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                (0..PER_TASK).map(|_| ids.next().as_u64()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }

        let n = (TASKS * PER_TASK) as u64;
        assert_eq!(seen.len() as u64, n);
        assert_eq!(*seen.iter().min().unwrap(), 1);
        assert_eq!(*seen.iter().max().unwrap(), n);
    }
}
