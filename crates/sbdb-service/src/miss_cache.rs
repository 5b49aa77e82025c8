//! Bounded set of prefixes the completion service had no full hash for

use std::collections::{HashSet, VecDeque};

use sbdb_core::Prefix;

/// FIFO-evicting miss cache. Cleared after every successful update, since
/// new chunks may turn a miss into a hit.
#[derive(Debug)]
pub struct MissCache {
    capacity: usize,
    members: HashSet<Prefix>,
    order: VecDeque<Prefix>,
}

impl MissCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, prefix: Prefix) -> bool {
        self.members.contains(&prefix)
    }

    pub fn insert(&mut self, prefix: Prefix) {
        if self.capacity == 0 || !self.members.insert(prefix) {
            return;
        }
        self.order.push_back(prefix);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    pub fn extend(&mut self, prefixes: impl IntoIterator<Item = Prefix>) {
        for prefix in prefixes {
            self.insert(prefix);
        }
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut cache = MissCache::new(2);
        cache.extend([Prefix::from(1), Prefix::from(2), Prefix::from(1), Prefix::from(3)]);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(Prefix::from(1)));
        assert!(cache.contains(Prefix::from(2)));
        assert!(cache.contains(Prefix::from(3)));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut cache = MissCache::new(0);
        cache.insert(Prefix::from(9));
        assert!(!cache.contains(Prefix::from(9)));
    }
}
