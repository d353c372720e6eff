use super::breaker::CircuitBreaker;
use super::types::{BreakerConfig, BreakerStatus};
use crate::clock::{Clock, SystemClock};
use crate::error::{BreakerError, Result};
use crate::notifier::{NoopNotifier, StateChangeNotifier};
use crate::persistence::PersistenceAdapter;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owner of every named breaker
///
/// Breakers are created lazily on first lookup and live until evicted
/// explicitly. Each breaker has its own lock; the map is sharded, so lookups
/// and calls for different names do not contend.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    /// Circuit breakers per resource name
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Configuration used by `get`, validated at construction
    default_config: BreakerConfig,
    notifier: Arc<dyn StateChangeNotifier>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    /// Create a registry whose lazily created breakers use `default_config`
    pub fn new(default_config: BreakerConfig) -> Result<Self> {
        default_config.validate()?;
        Ok(Self {
            breakers: Arc::new(DashMap::new()),
            default_config,
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
        })
    }

    /// Set the transition sink for breakers created from now on
    pub fn with_notifier(mut self, notifier: Arc<dyn StateChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn default_config(&self) -> &BreakerConfig {
        &self.default_config
    }

    /// Get or create the breaker for `name` with the default configuration
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return breaker.clone();
        }
        self.insert_with(name, self.default_config.clone())
    }

    /// Get or create the breaker for `name`
    ///
    /// `config` only applies when the breaker does not exist yet; an invalid
    /// config is rejected before anything is created.
    pub fn get_or_create(&self, name: &str, config: &BreakerConfig) -> Result<Arc<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.get(name) {
            if breaker.config() != config {
                debug!(
                    breaker = name,
                    "Breaker already exists, keeping its original configuration"
                );
            }
            return Ok(breaker.clone());
        }

        config
            .validate()
            .map_err(|e| BreakerError::Config(format!("breaker '{}': {}", name, e)))?;
        Ok(self.insert_with(name, config.clone()))
    }

    // The entry lock serializes racing creators; the loser gets the winner's breaker.
    fn insert_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Creating new circuit breaker");
                Arc::new(CircuitBreaker::from_validated(
                    name.to_string(),
                    config,
                    self.notifier.clone(),
                ))
            })
            .clone()
    }

    /// Existing breaker for `name`, without creating one
    pub fn lookup(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Get all breaker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Status of every breaker, sorted by name
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let now = self.clock.now();
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut statuses: Vec<BreakerStatus> =
            breakers.iter().map(|breaker| breaker.status(now)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Administrative reset of one breaker to closed
    pub fn reset(&self, name: &str) -> Result<()> {
        let breaker = self
            .lookup(name)
            .ok_or_else(|| BreakerError::UnknownBreaker(name.to_string()))?;
        info!(breaker = name, "Resetting circuit breaker");
        breaker.reset(self.clock.now());
        Ok(())
    }

    /// Administrative removal of one breaker
    ///
    /// Callers still holding the returned breaker keep using it; the next
    /// lookup creates a fresh one.
    pub fn evict(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let removed = self.breakers.remove(name).map(|(_, breaker)| breaker);
        if removed.is_some() {
            info!(breaker = name, "Evicted circuit breaker");
        }
        removed
    }

    /// Restore one breaker from `store`, replacing any in-memory instance
    ///
    /// Returns whether a snapshot existed.
    pub fn restore(&self, store: &dyn PersistenceAdapter, name: &str) -> Result<bool> {
        let Some(snapshot) = store.load(name)? else {
            return Ok(false);
        };
        if snapshot.name != name {
            return Err(BreakerError::InvalidSnapshot {
                name: name.to_string(),
                reason: format!("stored under a different name '{}'", snapshot.name),
            });
        }
        let breaker = CircuitBreaker::from_snapshot(snapshot, self.notifier.clone())?;
        self.breakers.insert(name.to_string(), Arc::new(breaker));
        Ok(true)
    }

    /// Restore every breaker in `store`; meant for startup, before traffic
    pub fn restore_all(&self, store: &dyn PersistenceAdapter) -> Result<usize> {
        let mut restored = 0;
        for name in store.names()? {
            match self.restore(store, &name) {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(breaker = %name, error = %e, "Skipping unreadable breaker snapshot");
                }
            }
        }
        info!(restored, "Restored circuit breakers from snapshot store");
        Ok(restored)
    }

    /// Save every breaker to `store`; meant for shutdown
    pub fn checkpoint(&self, store: &dyn PersistenceAdapter) -> Result<usize> {
        let now = self.clock.now();
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        for breaker in &breakers {
            store.save(breaker.name(), &breaker.snapshot(now))?;
        }
        info!(saved = breakers.len(), "Checkpointed circuit breakers");
        Ok(breakers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::types::{CircuitState, Decision, Outcome};
    use crate::persistence::PersistenceAdapter;
    use crate::clock::ManualClock;
    use crate::persistence::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Barrier;
    use std::time::Duration;

    fn registry(threshold: u32) -> (BreakerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ));
        let registry = BreakerRegistry::new(BreakerConfig::new(threshold, 60, 10))
            .unwrap()
            .with_clock(clock.clone());
        (registry, clock)
    }

    fn fail(registry: &BreakerRegistry, name: &str) {
        let breaker = registry.get(name);
        let now = registry.clock().now();
        assert!(breaker.evaluate(now).is_admitted());
        breaker.report_outcome(now, Outcome::Failure, false);
    }

    #[test]
    fn test_registry_rejects_invalid_default() {
        assert!(BreakerRegistry::new(BreakerConfig::new(0, 60, 10)).is_err());
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let (registry, _) = registry(2);
        let a = registry.get("agent");
        let b = registry.get("agent");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_create_validates_before_creating() {
        let (registry, _) = registry(2);
        let err = registry
            .get_or_create("agent", &BreakerConfig::new(3, 0, 10))
            .unwrap_err();
        assert!(matches!(err, BreakerError::Config(_)));
        assert!(registry.is_empty());

        let breaker = registry
            .get_or_create("agent", &BreakerConfig::new(5, 60, 10))
            .unwrap();
        assert_eq!(breaker.config().failure_threshold, 5);

        // Existing breakers keep their original configuration
        let again = registry
            .get_or_create("agent", &BreakerConfig::new(9, 60, 10))
            .unwrap();
        assert!(Arc::ptr_eq(&breaker, &again));
        assert_eq!(again.config().failure_threshold, 5);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_breaker() {
        let (registry, _) = registry(2);
        let threads = 32;
        let barrier = Barrier::new(threads);

        let breakers: Vec<Arc<CircuitBreaker>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get("shared-agent")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
    }

    #[test]
    fn test_registry_isolates_breakers() {
        let (registry, _) = registry(2);

        let healthy = registry.get("planner");
        let now = registry.clock().now();
        assert_eq!(healthy.evaluate(now), Decision::Allow);
        healthy.report_outcome(now, Outcome::Success, false);

        fail(&registry, "reviewer");
        fail(&registry, "reviewer");

        assert_eq!(registry.get("reviewer").state(), CircuitState::Open);
        assert_eq!(healthy.state(), CircuitState::Closed);
        assert_eq!(healthy.failure_count(), 0);
        assert_eq!(registry.names(), vec!["planner", "reviewer"]);
    }

    #[test]
    fn test_statuses_report_retry_after() {
        let (registry, clock) = registry(1);
        fail(&registry, "agent");
        clock.advance(Duration::from_secs(4));

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, CircuitState::Open);
        assert_eq!(statuses[0].retry_after, 6);
        assert_eq!(statuses[0].metrics.circuit_opened_count, 1);
    }

    #[test]
    fn test_statuses_count_only_failures_in_window() {
        let (registry, clock) = registry(3);
        fail(&registry, "agent");
        clock.advance(Duration::from_secs(30));
        fail(&registry, "agent");
        clock.advance(Duration::from_secs(40));

        let statuses = registry.statuses();
        assert_eq!(statuses[0].state, CircuitState::Closed);
        assert_eq!(statuses[0].failures, 1);
        assert_eq!(statuses[0].metrics.failed_requests, 2);
    }

    #[test]
    fn test_restore_all_skips_snapshot_with_unreachable_deadline() {
        let store = MemoryStore::new();
        let (registry, clock) = registry(1);
        fail(&registry, "agent");
        let mut snapshot = registry.get("agent").snapshot(clock.now());
        snapshot.trip_time = Some(DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(5));
        store.save("agent", &snapshot).unwrap();

        let (restarted, _) = self::registry(1);
        assert_eq!(restarted.restore_all(&store).unwrap(), 0);
        assert!(restarted.lookup("agent").is_none());
        assert!(restarted.statuses().is_empty());
    }

    #[test]
    fn test_reset_and_evict() {
        let (registry, _) = registry(1);
        fail(&registry, "agent");
        assert_eq!(registry.get("agent").state(), CircuitState::Open);

        registry.reset("agent").unwrap();
        assert_eq!(registry.get("agent").state(), CircuitState::Closed);
        assert!(matches!(
            registry.reset("unknown"),
            Err(BreakerError::UnknownBreaker(_))
        ));

        let evicted = registry.evict("agent").unwrap();
        assert_eq!(evicted.name(), "agent");
        assert!(registry.lookup("agent").is_none());
        assert!(registry.evict("agent").is_none());
    }

    #[test]
    fn test_checkpoint_and_restore() {
        let store = MemoryStore::new();
        let (registry, clock) = registry(1);
        fail(&registry, "reviewer");
        registry.get("planner");
        assert_eq!(registry.checkpoint(&store).unwrap(), 2);

        let (restarted, restarted_clock) = self::registry(1);
        restarted_clock.set(clock.now());
        assert_eq!(restarted.restore_all(&store).unwrap(), 2);

        let reviewer = restarted.lookup("reviewer").unwrap();
        assert_eq!(reviewer.state(), CircuitState::Open);
        assert_eq!(reviewer.evaluate(restarted_clock.now()), Decision::Deny);

        restarted_clock.advance(Duration::from_secs(10));
        assert_eq!(
            reviewer.evaluate(restarted_clock.now()),
            Decision::AllowTrial
        );
        assert!(!restarted.restore(&store, "missing").unwrap());
    }
}
