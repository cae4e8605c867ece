// ── Reactive streams ──
//
// Per-device value subscriptions (`StateHub`) and inventory streams
// backed by the registry's `watch` channel. Inventory streams can be
// narrowed to one `DeviceKind` and can yield individual changed devices
// instead of whole snapshots.

mod hub;
mod queue;

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub use hub::{Observer, StateHub, SubscriptionHandle};

use crate::model::{Device, DeviceKind};
use crate::store::DeviceSnapshot;

/// A subscription to the device inventory.
///
/// Provides point-in-time snapshot access and change notification via
/// [`changed`](Self::changed), [`changed_devices`](Self::changed_devices)
/// or by converting to a `Stream`.
pub struct DeviceStream {
    current: DeviceSnapshot,
    receiver: watch::Receiver<DeviceSnapshot>,
    kind: Option<DeviceKind>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<DeviceSnapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self {
            current,
            receiver,
            kind: None,
        }
    }

    /// Restrict [`devices`](Self::devices), [`changed_devices`](Self::changed_devices)
    /// and [`into_changes`](Self::into_changes) to devices of `kind`.
    #[must_use]
    pub fn of_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Snapshot captured at creation or at the last change seen.
    pub fn current(&self) -> &DeviceSnapshot {
        &self.current
    }

    pub fn latest(&self) -> DeviceSnapshot {
        self.receiver.borrow().clone()
    }

    /// Devices in the current snapshot that pass the kind filter.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.current
            .values()
            .filter(|device| matches_kind(self.kind, device))
            .cloned()
            .collect()
    }

    /// Wait for the next change. `None` once the session is dropped.
    pub async fn changed(&mut self) -> Option<DeviceSnapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Wait until at least one device passing the filter was added or
    /// updated, and return those devices. Removals are not reported.
    /// `None` once the session is dropped.
    pub async fn changed_devices(&mut self) -> Option<Vec<Arc<Device>>> {
        loop {
            let previous = Arc::clone(&self.current);
            let next = self.changed().await?;
            let changed = diff(&previous, &next, self.kind);
            if !changed.is_empty() {
                return Some(changed);
            }
        }
    }

    /// `Stream` of whole snapshots, starting with the current one.
    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }

    /// `Stream` of individual devices as they are added or updated,
    /// starting after the current snapshot.
    pub fn into_changes(self) -> DeviceChangeStream {
        DeviceChangeStream {
            previous: self.current,
            inner: WatchStream::from_changes(self.receiver),
            pending: VecDeque::new(),
            kind: self.kind,
        }
    }
}

fn matches_kind(kind: Option<DeviceKind>, device: &Device) -> bool {
    kind.is_none_or(|kind| device.kind == kind)
}

/// Devices present in `next` whose entry is new or was replaced since
/// `previous`. The registry swaps the `Arc` only on a real change.
fn diff(
    previous: &DeviceSnapshot,
    next: &DeviceSnapshot,
    kind: Option<DeviceKind>,
) -> Vec<Arc<Device>> {
    next.iter()
        .filter(|(id, device)| {
            previous
                .get(*id)
                .is_none_or(|before| !Arc::ptr_eq(before, *device))
        })
        .map(|(_, device)| device)
        .filter(|device| matches_kind(kind, device))
        .cloned()
        .collect()
}

/// `Stream` adapter yielding a snapshot each time the inventory changes.
pub struct DeviceWatchStream {
    inner: WatchStream<DeviceSnapshot>,
}

impl Stream for DeviceWatchStream {
    type Item = DeviceSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// `Stream` adapter yielding each added or updated device.
///
/// Snapshots that arrive in quick succession are coalesced by the
/// underlying `watch` channel; a device changed twice in between is
/// yielded once, in its latest state.
pub struct DeviceChangeStream {
    previous: DeviceSnapshot,
    inner: WatchStream<DeviceSnapshot>,
    pending: VecDeque<Arc<Device>>,
    kind: Option<DeviceKind>,
}

impl Stream for DeviceChangeStream {
    type Item = Arc<Device>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(device) = self.pending.pop_front() {
                return Poll::Ready(Some(device));
            }
            let Some(next) = ready!(Pin::new(&mut self.inner).poll_next(cx)) else {
                return Poll::Ready(None);
            };
            let changed = diff(&self.previous, &next, self.kind);
            self.pending.extend(changed);
            self.previous = next;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::model::{DeviceId, DeviceValue};
    use crate::store::{DevicePatch, DeviceRegistry};

    fn of_kind(kind: DeviceKind) -> DevicePatch {
        DevicePatch {
            kind: Some(kind),
            ..DevicePatch::default()
        }
    }

    #[tokio::test]
    async fn changed_yields_new_snapshot() {
        let registry = DeviceRegistry::new();
        let mut stream = DeviceStream::new(registry.subscribe());
        assert!(stream.current().is_empty());

        registry.upsert(DeviceId(1), of_kind(DeviceKind::Switch));
        let snap = stream.changed().await.unwrap();
        assert!(snap.contains_key(&DeviceId(1)));
        assert_eq!(stream.current().len(), 1);
    }

    #[tokio::test]
    async fn into_stream_starts_with_current_snapshot() {
        let registry = DeviceRegistry::new();
        registry.upsert(DeviceId(4), DevicePatch::default());
        let mut stream = DeviceStream::new(registry.subscribe()).into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn changed_devices_reports_only_touched_devices() {
        let registry = DeviceRegistry::new();
        registry.upsert(DeviceId(1), of_kind(DeviceKind::Switch));
        registry.upsert(DeviceId(2), of_kind(DeviceKind::Switch));
        let mut stream = DeviceStream::new(registry.subscribe());

        registry.upsert(DeviceId(2), DevicePatch::value(DeviceValue::Switch { on: true }));
        let changed = stream.changed_devices().await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, DeviceId(2));
    }

    #[tokio::test]
    async fn kind_filter_skips_other_devices() {
        let registry = DeviceRegistry::new();
        registry.upsert(DeviceId(1), of_kind(DeviceKind::Switch));
        registry.upsert(DeviceId(7), of_kind(DeviceKind::Shade));
        let mut stream = DeviceStream::new(registry.subscribe()).of_kind(DeviceKind::Shade);
        assert_eq!(stream.devices().len(), 1);

        registry.upsert(DeviceId(1), DevicePatch::value(DeviceValue::Switch { on: true }));
        registry.upsert(DeviceId(8), of_kind(DeviceKind::Shade));
        let changed = stream.changed_devices().await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, DeviceId(8));
    }

    #[tokio::test]
    async fn change_stream_yields_devices_one_by_one() {
        let registry = DeviceRegistry::new();
        registry.upsert(DeviceId(1), of_kind(DeviceKind::Switch));
        let mut changes = DeviceStream::new(registry.subscribe()).into_changes();

        registry.upsert(DeviceId(2), of_kind(DeviceKind::Dimmer));
        registry.upsert(DeviceId(3), of_kind(DeviceKind::Dimmer));
        let first = changes.next().await.unwrap();
        let second = changes.next().await.unwrap();
        assert_eq!((first.id, second.id), (DeviceId(2), DeviceId(3)));
    }
}
