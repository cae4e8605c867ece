// Bounded FIFO between the run loop and the dispatcher task.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::model::{DeviceId, DeviceValue};

pub(crate) type Update = (DeviceId, DeviceValue);

pub(crate) struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<Update>,
    closed: bool,
    dropped: u64,
}

impl DispatchQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue without blocking. When full, the oldest pending update for
    /// the same device is dropped, else the oldest overall.
    /// Returns `false` once closed.
    pub(crate) fn push(&self, id: DeviceId, value: DeviceValue) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.items.len() >= self.capacity {
                let victim = state.items.iter().position(|(queued, _)| *queued == id);
                let evicted = match victim {
                    Some(index) => state.items.remove(index),
                    None => state.items.pop_front(),
                };
                state.dropped += 1;
                if let Some((evicted_id, _)) = evicted {
                    tracing::debug!(
                        device_id = %evicted_id,
                        dropped = state.dropped,
                        "dispatch queue full, dropping stale update"
                    );
                }
            }
            state.items.push_back((id, value));
        }
        self.notify.notify_one();
        true
    }

    /// Next update, waiting if empty. `None` once closed and drained.
    pub(crate) async fn pop(&self) -> Option<Update> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(update) = state.items.pop_front() {
                    return Some(update);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn on(on: bool) -> DeviceValue {
        DeviceValue::Switch { on }
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = DispatchQueue::new(8);
        queue.push(DeviceId(1), on(true));
        queue.push(DeviceId(2), on(false));
        assert_eq!(queue.pop().await, Some((DeviceId(1), on(true))));
        assert_eq!(queue.pop().await, Some((DeviceId(2), on(false))));
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_for_same_device() {
        let queue = DispatchQueue::new(3);
        queue.push(DeviceId(1), on(true));
        queue.push(DeviceId(2), on(true));
        queue.push(DeviceId(3), on(true));
        queue.push(DeviceId(2), on(false));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some((DeviceId(1), on(true))));
        assert_eq!(queue.pop().await, Some((DeviceId(3), on(true))));
        assert_eq!(queue.pop().await, Some((DeviceId(2), on(false))));
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_overall() {
        let queue = DispatchQueue::new(2);
        queue.push(DeviceId(1), on(true));
        queue.push(DeviceId(2), on(true));
        queue.push(DeviceId(3), on(true));

        assert_eq!(queue.pop().await, Some((DeviceId(2), on(true))));
        assert_eq!(queue.pop().await, Some((DeviceId(3), on(true))));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = DispatchQueue::new(4);
        queue.push(DeviceId(1), on(true));
        queue.close();
        assert!(!queue.push(DeviceId(2), on(true)));
        assert_eq!(queue.pop().await, Some((DeviceId(1), on(true))));
        assert_eq!(queue.pop().await, None);
    }
}
