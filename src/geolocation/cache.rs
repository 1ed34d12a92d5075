//! In-memory TTL cache in front of another resolver

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{GeoError, GeoResolver, ResolvedLocation};

/// Caches successful lookups of an inner resolver for `ttl`
///
/// Failures are not cached, so a transient outage does not pin an address
/// to "unknown" for the whole TTL. Expired entries are swept on insert, at
/// most once per TTL, so the map only holds addresses seen within roughly
/// the last two TTLs.
pub struct CachedResolver<R> {
    inner: R,
    ttl: Duration,
    entries: Mutex<Entries>,
}

struct Entries {
    locations: HashMap<IpAddr, (Instant, ResolvedLocation)>,
    last_pruned: Instant,
}

impl Entries {
    fn prune(&mut self, ttl: Duration) {
        self.locations
            .retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        self.last_pruned = Instant::now();
    }
}

impl<R: GeoResolver> CachedResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        CachedResolver {
            inner,
            ttl,
            entries: Mutex::new(Entries {
                locations: HashMap::new(),
                last_pruned: Instant::now(),
            }),
        }
    }

    /// Number of cached addresses, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .locations
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries now
    pub fn prune_expired(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prune(self.ttl);
    }
}

impl<R: GeoResolver> GeoResolver for CachedResolver<R> {
    fn lookup(&self, ip: IpAddr) -> Result<ResolvedLocation, GeoError> {
        {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((stored_at, location)) = entries.locations.get(&ip) {
                if stored_at.elapsed() < self.ttl {
                    log::debug!("Geolocation cache hit for {}", ip);
                    return Ok(location.clone());
                }
            }
        }

        // Not held across the inner lookup, which may block on the network
        let location = self.inner.lookup(ip)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.last_pruned.elapsed() >= self.ttl {
            entries.prune(self.ttl);
        }
        entries.locations.insert(ip, (Instant::now(), location.clone()));
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlakyResolver {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl GeoResolver for FlakyResolver {
        fn lookup(&self, _ip: IpAddr) -> Result<ResolvedLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(GeoError::NotFound);
            }
            Ok(ResolvedLocation::new(Some("US".to_string()), Some("Denver".to_string())))
        }
    }

    fn flaky(failing: bool) -> FlakyResolver {
        FlakyResolver {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(failing),
        }
    }

    #[test]
    fn test_hits_are_served_from_cache() {
        let cached = CachedResolver::new(flaky(false), Duration::from_secs(60));

        let first = cached.resolve("8.8.8.8");
        let second = cached.resolve("8.8.8.8");

        assert_eq!(first, second);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cached = CachedResolver::new(flaky(true), Duration::from_secs(60));

        assert!(cached.resolve("8.8.8.8").is_unknown());
        assert!(cached.is_empty());

        cached.inner.failing.store(false, Ordering::SeqCst);
        assert_eq!(cached.resolve("8.8.8.8").country.as_deref(), Some("US"));
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expired_entries_are_refreshed() {
        let cached = CachedResolver::new(flaky(false), Duration::ZERO);

        cached.resolve("8.8.8.8");
        cached.resolve("8.8.8.8");
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);

        cached.prune_expired();
        assert!(cached.is_empty());
    }

    #[test]
    fn test_expired_entries_are_evicted_by_lookups() {
        let cached = CachedResolver::new(flaky(false), Duration::from_millis(50));

        cached.resolve("8.8.8.8");
        cached.resolve("8.8.4.4");
        assert_eq!(cached.len(), 2);

        std::thread::sleep(Duration::from_millis(80));
        cached.resolve("1.1.1.1");

        assert_eq!(cached.len(), 1);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
    }
}
