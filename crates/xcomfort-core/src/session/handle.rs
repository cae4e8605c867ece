// ── Device handles ──

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use xcomfort_api::{Connector, ShadeAction};

use super::BridgeSession;
use crate::command::{CommandFuture, DeviceCommand};
use crate::model::{Device, DeviceValue};
use crate::stream::SubscriptionHandle;

/// A device as seen at lookup time, bound to the session that reported
/// it.
///
/// Dereferences to the [`Device`] snapshot. The snapshot does not
/// change; call [`latest`](Self::latest) for the current state or
/// [`observe`](Self::observe) to follow it.
pub struct DeviceHandle<C: Connector> {
    device: Arc<Device>,
    session: BridgeSession<C>,
}

impl<C: Connector> DeviceHandle<C> {
    pub(super) fn new(device: Arc<Device>, session: BridgeSession<C>) -> Self {
        Self { device, session }
    }

    /// The registry's current view of this device, or the snapshot if
    /// the registry no longer holds it.
    pub fn latest(&self) -> Arc<Device> {
        self.session
            .registry()
            .get(self.device.id)
            .unwrap_or_else(|| Arc::clone(&self.device))
    }

    /// Call `observer` with every state change of this device.
    pub fn observe<F>(&self, observer: F) -> SubscriptionHandle
    where
        F: Fn(&DeviceValue) + Send + Sync + 'static,
    {
        self.session.subscribe(self.device.id, observer)
    }

    /// Send `command` to this device.
    ///
    /// Commands the device cannot accept fail locally with
    /// [`CommandError::Invalid`](crate::CommandError::Invalid) and are
    /// never sent.
    pub fn send(&self, command: DeviceCommand) -> CommandFuture {
        match command.resolve(&self.latest()) {
            Ok(outbound) => self.session.send_command(outbound),
            Err(e) => {
                tracing::debug!(device_id = %self.device.id, error = %e, "command refused locally");
                CommandFuture::ready(Err(e))
            }
        }
    }

    pub fn switch(&self, on: bool) -> CommandFuture {
        self.send(DeviceCommand::Switch(on))
    }

    pub fn dim(&self, level: u8) -> CommandFuture {
        self.send(DeviceCommand::Dim(level))
    }

    pub fn shade(&self, action: ShadeAction) -> CommandFuture {
        self.send(DeviceCommand::Shade(action))
    }
}

impl<C: Connector> Deref for DeviceHandle<C> {
    type Target = Device;

    fn deref(&self) -> &Device {
        &self.device
    }
}

impl<C: Connector> Clone for DeviceHandle<C> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            session: self.session.clone(),
        }
    }
}

impl<C: Connector> fmt::Debug for DeviceHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.device, f)
    }
}
