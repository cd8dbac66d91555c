//! Predicates deciding which k-mers reach the table.

use crate::bloom::BloomCounter;
use std::fmt;
use std::sync::Arc;

pub type Predicate = Box<dyn Fn(u64) -> bool + Send + Sync>;

/// Ordered predicates combined with "all must pass". An empty chain accepts
/// every key.
#[derive(Default)]
pub struct FilterChain {
    predicates: Vec<Predicate>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.push(predicate);
        self
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    #[inline]
    pub fn accepts(&self, key: u64) -> bool {
        self.predicates.iter().all(|p| p(key))
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

/// Accepts keys whose Bloom estimate is strictly above `threshold`.
pub fn bloom_predicate(filter: Arc<BloomCounter>, threshold: u8) -> Predicate {
    Box::new(move |key| filter.check(key) > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_accepts_everything() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        assert!(chain.accepts(0));
        assert!(chain.accepts(u64::MAX >> 2));
    }

    #[test]
    fn test_all_predicates_must_pass() {
        let chain = FilterChain::new()
            .with(Box::new(|k| k % 2 == 0))
            .with(Box::new(|k| k > 10));
        assert_eq!(chain.len(), 2);
        assert!(chain.accepts(12));
        assert!(!chain.accepts(11));
        assert!(!chain.accepts(4));
    }

    #[test]
    fn test_bloom_predicate_threshold() {
        let mut rng = fastrand::Rng::with_seed(1);
        let bc = Arc::new(BloomCounter::new(4096, 2, 8, &mut rng).unwrap());
        bc.insert(5);
        bc.insert(9);
        bc.insert(9);
        let chain = FilterChain::new().with(bloom_predicate(Arc::clone(&bc), 1));
        assert!(chain.accepts(9));
        assert!(!chain.accepts(5));
    }
}
