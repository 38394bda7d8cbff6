//! Per-process memory tier: a bounded LRU over administrations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::PatternSet;
use crate::models::CacheTier;

#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    pub set: Arc<PatternSet>,
    /// Tier that produced the set
    pub tier: CacheTier,
    /// Last time the set's metadata version was compared against the database
    pub checked_at: Instant,
    last_used: u64,
}

impl MemoryEntry {
    pub fn new(set: Arc<PatternSet>, tier: CacheTier) -> Self {
        Self {
            set,
            tier,
            checked_at: Instant::now(),
            last_used: 0,
        }
    }
}

/// Least-recently-used map with a fixed capacity
#[derive(Debug)]
pub(crate) struct MemoryTier {
    capacity: usize,
    entries: HashMap<String, MemoryEntry>,
    tick: u64,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&mut self, administration: &str) -> Option<&mut MemoryEntry> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(administration).map(|entry| {
            entry.last_used = tick;
            entry
        })
    }

    /// Insert or replace an entry, returning the administration evicted to
    /// make room
    pub fn insert(&mut self, administration: &str, mut entry: MemoryEntry) -> Option<String> {
        self.tick += 1;
        entry.last_used = self.tick;

        let mut evicted = None;
        if !self.entries.contains_key(administration) && self.entries.len() >= self.capacity {
            evicted = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(ref key) = evicted {
                self.entries.remove(key);
            }
        }

        self.entries.insert(administration.to_string(), entry);
        evicted
    }

    pub fn remove(&mut self, administration: &str) -> bool {
        self.entries.remove(administration).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(admin: &str) -> MemoryEntry {
        MemoryEntry::new(Arc::new(PatternSet::empty(admin)), CacheTier::Database)
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut tier = MemoryTier::new(2);
        assert_eq!(tier.insert("a", entry("a")), None);
        assert_eq!(tier.insert("b", entry("b")), None);

        // Touch "a" so "b" becomes the eviction candidate
        assert!(tier.get("a").is_some());
        assert_eq!(tier.insert("c", entry("c")), Some("b".to_string()));

        assert!(tier.get("b").is_none());
        assert!(tier.get("a").is_some());
        assert!(tier.get("c").is_some());
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut tier = MemoryTier::new(1);
        tier.insert("a", entry("a"));
        assert_eq!(tier.insert("a", entry("a")), None);
        assert_eq!(tier.len(), 1);
        assert!(tier.remove("a"));
        assert!(!tier.remove("a"));
    }
}
