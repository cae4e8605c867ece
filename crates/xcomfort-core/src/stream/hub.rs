// ── State stream hub ──
//
// Per-device publish/subscribe. The run loop publishes onto a bounded
// queue; a dispatcher task delivers each update to that device's
// observers in subscription order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::queue::DispatchQueue;
use crate::model::{DeviceId, DeviceValue};

/// Callback invoked with each new value of one device.
pub type Observer = Arc<dyn Fn(&DeviceValue) + Send + Sync>;

#[derive(Clone)]
pub struct StateHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    observers: DashMap<DeviceId, Vec<(u64, Observer)>>,
    next_id: AtomicU64,
    queue: DispatchQueue,
    closed: AtomicBool,
}

impl StateHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                observers: DashMap::new(),
                next_id: AtomicU64::new(1),
                queue: DispatchQueue::new(capacity),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register `observer` for `device_id`. It sees updates published
    /// after this call, never past ones.
    pub fn subscribe(&self, device_id: DeviceId, observer: Observer) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .entry(device_id)
            .or_default()
            .push((id, observer));
        SubscriptionHandle {
            device_id,
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.inner.remove(handle.device_id, handle.id);
    }

    /// Queue `value` for delivery. No-op after [`close`](Self::close).
    pub fn publish(&self, device_id: DeviceId, value: DeviceValue) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner.queue.push(device_id, value);
    }

    pub fn observer_count(&self, device_id: DeviceId) -> usize {
        self.inner
            .observers
            .get(&device_id)
            .map_or(0, |observers| observers.len())
    }

    /// Deliver queued updates until the hub is closed and drained.
    pub async fn dispatch(self) {
        while let Some((device_id, value)) = self.inner.queue.pop().await {
            self.deliver(device_id, &value);
        }
        tracing::debug!("state dispatcher stopped");
    }

    /// Stop accepting updates. Updates already queued are still
    /// delivered; subscriptions stay registered.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.queue.close();
    }

    /// Updates discarded because the dispatch queue was full.
    pub fn dropped_updates(&self) -> u64 {
        self.inner.queue.dropped()
    }

    fn deliver(&self, device_id: DeviceId, value: &DeviceValue) {
        // Clone out of the map so observers may (un)subscribe re-entrantly.
        let observers: Vec<Observer> = match self.inner.observers.get(&device_id) {
            Some(entry) => entry.iter().map(|(_, o)| Arc::clone(o)).collect(),
            None => return,
        };
        tracing::trace!(device_id = %device_id, observers = observers.len(), "delivering update");
        for observer in observers {
            observer(value);
        }
    }
}

impl HubInner {
    fn remove(&self, device_id: DeviceId, id: u64) {
        if let Some(mut observers) = self.observers.get_mut(&device_id) {
            observers.retain(|(existing, _)| *existing != id);
        }
        self.observers
            .remove_if(&device_id, |_, observers| observers.is_empty());
    }
}

/// Ticket for one observer registration.
///
/// Dropping the handle keeps the observer registered; call
/// [`unsubscribe`](Self::unsubscribe) to stop delivery.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    device_id: DeviceId,
    id: u64,
    hub: Weak<HubInner>,
}

impl SubscriptionHandle {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Stop delivery to this observer. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.device_id, self.id);
        }
    }
}

impl std::fmt::Debug for HubInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubInner")
            .field("devices", &self.observers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<DeviceValue>>>, Observer) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Observer = Arc::new(move |value: &DeviceValue| sink.lock().push(*value));
        (seen, observer)
    }

    fn on(on: bool) -> DeviceValue {
        DeviceValue::Switch { on }
    }

    #[tokio::test]
    async fn delivers_to_observers_of_that_device_only() {
        let hub = StateHub::new(16);
        let (kitchen, observer) = recorder();
        hub.subscribe(DeviceId(1), observer);
        let (hall, observer) = recorder();
        hub.subscribe(DeviceId(2), observer);

        hub.publish(DeviceId(1), on(true));
        hub.close();
        hub.clone().dispatch().await;

        assert_eq!(*kitchen.lock(), vec![on(true)]);
        assert!(hall.lock().is_empty());
    }

    #[tokio::test]
    async fn observers_run_in_subscription_order() {
        let hub = StateHub::new(16);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            hub.subscribe(DeviceId(7), Arc::new(move |_: &DeviceValue| order.lock().push(tag)));
        }

        hub.publish(DeviceId(7), on(true));
        hub.close();
        hub.clone().dispatch().await;

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let hub = StateHub::new(16);
        let (seen, observer) = recorder();
        let handle = hub.subscribe(DeviceId(1), observer);

        handle.unsubscribe();
        handle.unsubscribe();
        hub.unsubscribe(&handle);
        assert_eq!(hub.observer_count(DeviceId(1)), 0);

        hub.publish(DeviceId(1), on(true));
        hub.close();
        hub.clone().dispatch().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn publish_after_close_is_ignored() {
        let hub = StateHub::new(16);
        let (seen, observer) = recorder();
        hub.subscribe(DeviceId(1), observer);

        hub.close();
        hub.publish(DeviceId(1), on(true));
        hub.clone().dispatch().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn observer_may_unsubscribe_itself() {
        let hub = StateHub::new(16);
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let observer: Observer = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &DeviceValue| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot.lock().as_ref() {
                    handle.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(hub.subscribe(DeviceId(3), observer));

        hub.publish(DeviceId(3), on(true));
        hub.publish(DeviceId(3), on(false));
        hub.close();
        hub.clone().dispatch().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
