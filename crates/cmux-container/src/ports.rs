//! Port lookup cache.

use std::time::{Duration, Instant};

use cmux_core::PortTriple;

const CACHE_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct PortCache {
    cached: Option<(PortTriple, Instant)>,
}

impl PortCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<PortTriple> {
        match self.cached {
            Some((ports, fetched_at)) if fetched_at.elapsed() < CACHE_TTL => Some(ports),
            _ => None,
        }
    }

    pub fn set(&mut self, ports: PortTriple) {
        self.cached = Some((ports, Instant::now()));
    }

    /// Invalidate on an observed "not running" state, per the design note.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_none_before_any_set() {
        let cache = PortCache::new();
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn cache_returns_value_immediately_after_set() {
        let mut cache = PortCache::new();
        let ports = PortTriple {
            ide: Some(1),
            worker: Some(2),
            extension: Some(3),
        };
        cache.set(ports);
        assert_eq!(cache.get(), Some(ports));
    }

    #[test]
    fn invalidate_clears_the_cache() {
        let mut cache = PortCache::new();
        cache.set(PortTriple::default());
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
