use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// Recently-seen signature set bounded by count and age.
#[derive(Debug)]
pub struct SignatureCache {
    capacity: usize,
    ttl: Duration,
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(String, DateTime<Utc>)>,
}

impl SignatureCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `signature` as seen at `now`. Returns false when it was already
    /// seen within the retention bounds.
    pub fn check_and_insert(&mut self, signature: &str, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);

        if self.seen.contains_key(signature) {
            return false;
        }

        while self.order.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(signature.to_string(), now);
        self.order.push_back((signature.to_string(), now));
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some((_, inserted)) = self.order.front() {
            if now - *inserted <= self.ttl {
                break;
            }
            if let Some((signature, _)) = self.order.pop_front() {
                self.seen.remove(&signature);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected_within_ttl() {
        let mut cache = SignatureCache::new(10, Duration::seconds(60));
        let now = Utc::now();
        assert!(cache.check_and_insert("sig1", now));
        assert!(!cache.check_and_insert("sig1", now + Duration::seconds(30)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_forgotten() {
        let mut cache = SignatureCache::new(10, Duration::seconds(60));
        let now = Utc::now();
        cache.check_and_insert("sig1", now);
        assert!(cache.check_and_insert("sig1", now + Duration::seconds(61)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = SignatureCache::new(2, Duration::seconds(600));
        let now = Utc::now();
        cache.check_and_insert("a", now);
        cache.check_and_insert("b", now);
        cache.check_and_insert("c", now);
        assert_eq!(cache.len(), 2);
        // "a" was evicted so it is accepted again
        assert!(cache.check_and_insert("a", now));
        assert!(!cache.check_and_insert("c", now));
    }
}
