//! Per-fleet admission control against the `max_workers` ceiling.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CapacityState {
    /// Approximate number of workers in use.
    count: u32,
    /// Set only by the verification gate.
    configuration_valid: bool,
}

/// Best-effort gauge of in-use workers for one fleet.
///
/// Every operation is arithmetic under the fleet's own lock and never
/// blocks on anything else.
#[derive(Debug)]
pub struct CapacityTracker {
    fleet: String,
    max_workers: u32,
    state: Mutex<CapacityState>,
}

impl CapacityTracker {
    /// A new tracker starts empty and with an unverified configuration.
    pub fn new(fleet: impl Into<String>, max_workers: u32) -> Self {
        Self {
            fleet: fleet.into(),
            max_workers,
            state: Mutex::new(CapacityState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CapacityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_workers(&self) -> u32 {
        self.max_workers
    }

    /// Grant up to `desired` workers, never more than the remaining headroom.
    pub fn reserve(&self, desired: u32) -> u32 {
        if desired == 0 {
            return 0;
        }
        let mut st = self.lock();
        let headroom = self.max_workers.saturating_sub(st.count);
        let granted = desired.min(headroom);
        st.count += granted;

        if granted < desired {
            warn!(fleet = %self.fleet, desired, granted, count = st.count, max = self.max_workers, "capacity limited");
        } else {
            debug!(fleet = %self.fleet, granted, count = st.count, "capacity reserved");
        }
        granted
    }

    /// Return `n` workers' worth of capacity. The gauge never drops below zero.
    pub fn release(&self, n: u32) {
        let mut st = self.lock();
        st.count = st.count.saturating_sub(n);
        debug!(fleet = %self.fleet, released = n, count = st.count, "capacity released");
    }

    /// Overwrite the gauge with an authoritative count.
    pub fn set_count(&self, count: u32) {
        self.lock().count = count;
    }

    /// Overwrite the gauge and mark the configuration valid in one step.
    pub fn reconcile(&self, count: u32) {
        let mut st = self.lock();
        if st.count != count {
            info!(fleet = %self.fleet, previous = st.count, count, "worker count reconciled");
        }
        st.count = count;
        st.configuration_valid = true;
    }

    pub fn count(&self) -> u32 {
        self.lock().count
    }

    pub fn is_configuration_valid(&self) -> bool {
        self.lock().configuration_valid
    }

    pub fn set_configuration_valid(&self, valid: bool) {
        self.lock().configuration_valid = valid;
    }
}

/// Workers needed for `workload` concurrent jobs at `parallelism` jobs each.
pub fn number_of_agents(workload: u32, parallelism: u32) -> u32 {
    workload.div_ceil(parallelism.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reserve_is_bounded_by_headroom() {
        let c = CapacityTracker::new("f", 2);
        assert_eq!(c.reserve(3), 2);
        assert_eq!(c.count(), 2);
        assert_eq!(c.reserve(1), 0);
        assert_eq!(c.count(), 2);
    }

    #[test]
    fn zero_desired_grants_nothing() {
        let c = CapacityTracker::new("f", 5);
        assert_eq!(c.reserve(0), 0);
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn release_clamps_at_zero() {
        let c = CapacityTracker::new("f", 5);
        c.reserve(2);
        c.release(1);
        assert_eq!(c.count(), 1);
        c.release(10);
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn over_count_grants_nothing() {
        let c = CapacityTracker::new("f", 2);
        c.set_count(7);
        assert_eq!(c.reserve(1), 0);
        assert_eq!(c.count(), 7);
    }

    #[test]
    fn reconcile_sets_count_and_validity() {
        let c = CapacityTracker::new("f", 4);
        assert!(!c.is_configuration_valid());
        c.reconcile(3);
        assert_eq!(c.count(), 3);
        assert!(c.is_configuration_valid());
    }

    #[test]
    fn concurrent_reservations_never_exceed_ceiling() {
        let c = Arc::new(CapacityTracker::new("f", 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || (0..5).map(|_| c.reserve(1)).sum::<u32>())
            })
            .collect();
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10);
        assert_eq!(c.count(), 10);
    }

    #[test]
    fn agents_for_workload() {
        assert_eq!(number_of_agents(3, 1), 3);
        assert_eq!(number_of_agents(5, 2), 3);
        assert_eq!(number_of_agents(0, 4), 0);
        assert_eq!(number_of_agents(4, 0), 4);
    }
}
