//! Resource gauge for tracking concurrent uses of a shared resource
//!
//! The gauge counts active acquisitions and notifies a listener exactly when
//! the count moves from 0 to 1 ("became busy") and from 1 to 0 ("became
//! idle"). A bounded gauge additionally limits how many holders may be active
//! at once; `acquire` waits for capacity.
//!
//! Transitions are queued while the count is locked and delivered in that
//! order by one thread at a time, after the lock is released. A listener
//! therefore never observes two notifications with the same value in a row,
//! and it may read or acquire the gauge it is attached to.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Point-in-time view of a gauge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaugeMetrics {
    /// Number of guards currently held
    pub active: usize,
    /// Total number of successful acquisitions
    pub total_acquisitions: u64,
    /// Maximum concurrent holders, if bounded
    pub capacity: Option<usize>,
}

#[derive(Default)]
struct GaugeState {
    active: usize,
    total_acquisitions: u64,
    pending: VecDeque<bool>,
    delivering: bool,
}

struct GaugeInner {
    state: Mutex<GaugeState>,
    permits: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
    listener: Option<Listener>,
}

impl GaugeInner {
    fn state(&self) -> MutexGuard<'_, GaugeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) {
        let mut state = self.state();
        state.active += 1;
        state.total_acquisitions += 1;
        if state.active == 1 {
            trace!("resource gauge became busy");
            self.publish(state, true);
        }
    }

    fn exit(&self) {
        let mut state = self.state();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            trace!("resource gauge became idle");
            self.publish(state, false);
        }
    }

    /// Queue a transition and deliver the queue unless another thread already is.
    fn publish(&self, mut state: MutexGuard<'_, GaugeState>, busy: bool) {
        let Some(listener) = &self.listener else {
            return;
        };
        state.pending.push_back(busy);
        if state.delivering {
            return;
        }
        state.delivering = true;
        drop(state);

        let _delivery = Delivery { inner: self };
        loop {
            let mut state = self.state();
            match state.pending.pop_front() {
                Some(busy) => {
                    drop(state);
                    listener(busy);
                }
                None => {
                    state.delivering = false;
                    return;
                }
            }
        }
    }
}

/// Hands delivery back if a listener panics.
struct Delivery<'a> {
    inner: &'a GaugeInner,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.inner.state().delivering = false;
        }
    }
}

/// Shared counter of active resource uses. Clones share the same count.
#[derive(Clone)]
pub struct ResourceGauge {
    inner: Arc<GaugeInner>,
}

impl ResourceGauge {
    pub fn builder() -> ResourceGaugeBuilder {
        ResourceGaugeBuilder::default()
    }

    /// A gauge without a capacity limit or listener.
    pub fn unbounded() -> Self {
        Self::builder().build()
    }

    /// A gauge allowing at most `capacity` concurrent holders.
    pub fn bounded(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Wait for capacity, then register one active use.
    pub async fn acquire(&self) -> GaugeGuard {
        let permit = match &self.inner.permits {
            // The semaphore is never closed, so acquisition only fails if it were.
            Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
            None => None,
        };
        self.inner.enter();
        GaugeGuard {
            gauge: Some(Arc::clone(&self.inner)),
            _permit: permit,
        }
    }

    /// Register one active use if capacity is available right now.
    pub fn try_acquire(&self) -> Option<GaugeGuard> {
        let permit = match &self.inner.permits {
            Some(permits) => Some(Arc::clone(permits).try_acquire_owned().ok()?),
            None => None,
        };
        self.inner.enter();
        Some(GaugeGuard {
            gauge: Some(Arc::clone(&self.inner)),
            _permit: permit,
        })
    }

    pub fn active(&self) -> usize {
        self.inner.state().active
    }

    pub fn is_busy(&self) -> bool {
        self.active() > 0
    }

    pub fn metrics(&self) -> GaugeMetrics {
        let state = self.inner.state();
        GaugeMetrics {
            active: state.active,
            total_acquisitions: state.total_acquisitions,
            capacity: self.inner.capacity,
        }
    }
}

impl Default for ResourceGauge {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Debug for ResourceGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("ResourceGauge")
            .field("active", &metrics.active)
            .field("capacity", &metrics.capacity)
            .finish()
    }
}

/// Builder for [`ResourceGauge`]
#[derive(Default)]
pub struct ResourceGaugeBuilder {
    capacity: Option<usize>,
    listener: Option<Listener>,
}

impl ResourceGaugeBuilder {
    /// Limit concurrent holders. A capacity of 0 is treated as 1.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    /// Called with `true` on 0 to 1 and `false` on 1 to 0.
    pub fn on_transition<F>(mut self, listener: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn build(self) -> ResourceGauge {
        ResourceGauge {
            inner: Arc::new(GaugeInner {
                state: Mutex::new(GaugeState::default()),
                permits: self.capacity.map(|n| Arc::new(Semaphore::new(n))),
                capacity: self.capacity,
                listener: self.listener,
            }),
        }
    }
}

/// One active use of a [`ResourceGauge`].
///
/// Released exactly once, either by [`GaugeGuard::release`] or on drop.
#[must_use = "dropping the guard releases the gauge immediately"]
pub struct GaugeGuard {
    gauge: Option<Arc<GaugeInner>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl GaugeGuard {
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(gauge) = self.gauge.take() {
            gauge.exit();
        }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for GaugeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeGuard")
            .field("released", &self.gauge.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::time::Duration;

    fn recording_gauge() -> (ResourceGauge, Arc<Mutex<Vec<bool>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let gauge = ResourceGauge::builder()
            .on_transition(move |busy| sink.lock().unwrap().push(busy))
            .build();
        (gauge, events)
    }

    #[tokio::test]
    async fn test_overlapping_acquisitions_notify_once() {
        let (gauge, events) = recording_gauge();

        let first = gauge.acquire().await;
        let second = gauge.acquire().await;
        assert_eq!(gauge.active(), 2);
        assert_eq!(*events.lock().unwrap(), vec![true]);

        first.release();
        assert_eq!(*events.lock().unwrap(), vec![true]);
        drop(second);
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
        assert_eq!(gauge.active(), 0);
    }

    #[tokio::test]
    async fn test_busy_idle_cycles_alternate() {
        let (gauge, events) = recording_gauge();
        for _ in 0..3 {
            gauge.acquire().await.release();
        }
        assert_eq!(
            *events.lock().unwrap(),
            vec![true, false, true, false, true, false]
        );
        assert_eq!(gauge.metrics().total_acquisitions, 3);
    }

    #[tokio::test]
    async fn test_bounded_gauge_waits_for_capacity() {
        let gauge = ResourceGauge::bounded(1);
        let held = gauge.acquire().await;
        assert!(gauge.try_acquire().is_none());

        let waiter = {
            let gauge = gauge.clone();
            tokio::spawn(async move { gauge.acquire().await.release() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        held.release();
        waiter.await.unwrap();
        assert_eq!(gauge.active(), 0);
    }

    #[test]
    fn test_try_acquire_on_unbounded_gauge() {
        let gauge = ResourceGauge::unbounded();
        let guard = gauge.try_acquire().unwrap();
        assert!(gauge.is_busy());
        drop(guard);
        assert!(!gauge.is_busy());
        assert_eq!(gauge.metrics().capacity, None);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let gauge = ResourceGauge::builder().capacity(0).build();
        assert_eq!(gauge.metrics().capacity, Some(1));
        assert!(gauge.try_acquire().is_some());
    }

    #[test]
    fn test_listener_can_read_its_gauge() {
        let slot: Arc<OnceLock<ResourceGauge>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gauge = {
            let slot = slot.clone();
            let seen = seen.clone();
            ResourceGauge::builder()
                .on_transition(move |busy| {
                    let active = slot.get().map(ResourceGauge::active);
                    seen.lock().unwrap().push((busy, active));
                })
                .build()
        };
        slot.set(gauge.clone()).unwrap();

        drop(gauge.try_acquire().unwrap());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(true, Some(1)), (false, Some(0))]
        );
    }

    #[test]
    fn test_listener_can_acquire_its_gauge() {
        let slot: Arc<OnceLock<ResourceGauge>> = Arc::new(OnceLock::new());
        let extra: Arc<Mutex<Option<GaugeGuard>>> = Arc::new(Mutex::new(None));
        let events = Arc::new(Mutex::new(Vec::new()));
        let gauge = {
            let slot = slot.clone();
            let extra = extra.clone();
            let events = events.clone();
            ResourceGauge::builder()
                .on_transition(move |busy| {
                    events.lock().unwrap().push(busy);
                    if busy {
                        *extra.lock().unwrap() = slot.get().and_then(ResourceGauge::try_acquire);
                    }
                })
                .build()
        };
        slot.set(gauge.clone()).unwrap();

        drop(gauge.try_acquire().unwrap());
        assert_eq!(gauge.active(), 1);
        assert_eq!(*events.lock().unwrap(), vec![true]);

        let held = extra.lock().unwrap().take();
        drop(held);
        assert_eq!(gauge.active(), 0);
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
        assert_eq!(gauge.metrics().total_acquisitions, 2);
    }
}
