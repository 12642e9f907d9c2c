//! Memory store boundary
//!
//! Append/recall of short text items in per-team banks. The core only uses
//! it to compute the prior-context count fed into generation and to retain
//! stage summaries; it is not part of the scheduler's correctness.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

/// External memory capability, keyed by bank (e.g. `team-backend_eng`).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Most recent `limit` items for a bank, oldest first.
    async fn recall(&self, bank: &str, limit: usize) -> Vec<String>;
    async fn retain(&self, bank: &str, item: String);
}

/// In-process store, the default when no remote store is wired. Each bank
/// keeps at most `capacity` items, oldest dropped first.
pub struct InMemoryStore {
    banks: RwLock<HashMap<String, Vec<String>>>,
    capacity: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(50)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            banks: RwLock::new(HashMap::new()),
            capacity,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn recall(&self, bank: &str, limit: usize) -> Vec<String> {
        let banks = self.banks.read();
        match banks.get(bank) {
            Some(items) => {
                let skip = items.len().saturating_sub(limit);
                items[skip..].to_vec()
            }
            None => Vec::new(),
        }
    }

    async fn retain(&self, bank: &str, item: String) {
        let mut banks = self.banks.write();
        let items = banks.entry(bank.to_string()).or_default();
        items.push(item);
        if items.len() > self.capacity {
            let overflow = items.len() - self.capacity;
            items.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recall_empty_bank() {
        let store = InMemoryStore::new();
        assert!(store.recall("team-qa_eng", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_retain_and_recall_most_recent() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.retain("team-backend_eng", format!("item{i}")).await;
        }
        let items = store.recall("team-backend_eng", 3).await;
        assert_eq!(items, vec!["item2", "item3", "item4"]);
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let store = InMemoryStore::with_capacity(2);
        store.retain("b", "a".into()).await;
        store.retain("b", "b".into()).await;
        store.retain("b", "c".into()).await;
        assert_eq!(store.recall("b", 10).await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_banks_are_isolated() {
        let store = InMemoryStore::new();
        store.retain("team-devops", "x".into()).await;
        assert!(store.recall("team-qa_eng", 5).await.is_empty());
    }
}
