// ── Command API ──
//
// Outbound commands flow through the session's FIFO queue to the run
// loop, which writes them and matches the bridge's acknowledgements back
// to the waiting caller.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use xcomfort_api::{MessageType, OutboundCommand, ShadeAction};

use crate::error::CommandError;
use crate::model::{Device, DeviceId, DeviceKind, RctMode, Room, SetpointRange};

pub(crate) type Reply = oneshot::Sender<Result<Ack, CommandError>>;

/// A command envelope sent through the command channel.
pub(crate) struct CommandEnvelope {
    pub command: OutboundCommand,
    pub response_tx: Reply,
}

/// The bridge accepted a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Message counter the command was sent under.
    pub mc: i64,
}

/// Device-scoped command, addressed through a
/// [`DeviceHandle`](crate::DeviceHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Switch(bool),
    /// Dim level 0–99; larger values are clamped.
    Dim(u8),
    Shade(ShadeAction),
}

impl DeviceCommand {
    /// Check the command against what is known about `device` and build
    /// the wire command.
    pub(crate) fn resolve(self, device: &Device) -> Result<OutboundCommand, CommandError> {
        let device_id = device.id;
        match self {
            Self::Switch(on) => {
                if !device.kind.accepts_switch() {
                    return Err(invalid(format!("{} cannot be switched", device.kind)));
                }
                Ok(OutboundCommand::SetSwitch { device_id, on })
            }
            Self::Dim(level) => {
                if device.kind != DeviceKind::Dimmer {
                    return Err(invalid(format!("{} is not dimmable", device.kind)));
                }
                Ok(OutboundCommand::SetDimLevel { device_id, level })
            }
            Self::Shade(action) => {
                if device.kind != DeviceKind::Shade {
                    return Err(invalid(format!("{} is not a shade", device.kind)));
                }
                if device.shade_safety_engaged() {
                    return Err(invalid("shade safety lock is engaged"));
                }
                if let ShadeAction::GoTo(position) = action {
                    if position > xcomfort_api::command::MAX_SHADE_POSITION {
                        return Err(invalid(format!("shade position {position} exceeds 100")));
                    }
                }
                Ok(OutboundCommand::SetShade { device_id, action })
            }
        }
    }
}

/// Room-scoped command, addressed through a
/// [`RoomHandle`](crate::RoomHandle).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoomCommand {
    /// Target temperature in °C for the active preset, clamped to the
    /// preset's [`SetpointRange`].
    TargetTemperature(f64),
    /// Switch preset; the preset's stored setpoint is sent along.
    Mode(RctMode),
}

impl RoomCommand {
    /// Build the heating-state command from what is known about `room`.
    /// Both need the controller's current state; a target temperature
    /// also needs the active preset.
    pub(crate) fn resolve(self, room: &Room) -> Result<OutboundCommand, CommandError> {
        let state = room
            .state
            .state
            .ok_or_else(|| invalid(format!("room {} has not reported its state", room.id)))?;

        match self {
            Self::TargetTemperature(requested) => {
                if !requested.is_finite() {
                    return Err(invalid(format!("setpoint {requested} is not a temperature")));
                }
                let mode = room.state.mode.ok_or_else(|| {
                    invalid(format!("room {} has not reported its mode", room.id))
                })?;
                let range = SetpointRange::for_mode(mode);
                let setpoint = range.clamp(requested);
                if (setpoint - requested).abs() > f64::EPSILON {
                    tracing::warn!(
                        room_id = %room.id,
                        %mode,
                        requested,
                        setpoint,
                        min = range.min,
                        max = range.max,
                        "setpoint outside the mode's range, clamped"
                    );
                }
                Ok(OutboundCommand::SetHeatingState {
                    room_id: room.id,
                    mode,
                    state,
                    setpoint: Some(setpoint),
                })
            }
            Self::Mode(mode) => Ok(OutboundCommand::SetHeatingState {
                room_id: room.id,
                mode,
                state,
                setpoint: room.setpoint_for(mode),
            }),
        }
    }
}

fn invalid(reason: impl Into<String>) -> CommandError {
    CommandError::Invalid {
        reason: reason.into(),
    }
}

// ── CommandFuture ────────────────────────────────────────────────────

/// Resolves once the bridge acknowledges (or rejects) the command, or
/// the connection is lost.
///
/// The command is already queued when this is returned; dropping the
/// future does not cancel it.
#[must_use = "the command is sent regardless; await to learn the outcome"]
pub struct CommandFuture {
    rx: oneshot::Receiver<Result<Ack, CommandError>>,
}

impl CommandFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Ack, CommandError>>) -> Self {
        Self { rx }
    }

    pub(crate) fn ready(result: Result<Ack, CommandError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for CommandFuture {
    type Output = Result<Ack, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CommandError::ConnectionLost)))
    }
}

// ── In-flight tracking ───────────────────────────────────────────────

struct Pending {
    mc: i64,
    kind: MessageType,
    device_id: Option<DeviceId>,
    reply: Reply,
}

/// Commands written to the current connection and not yet acknowledged,
/// oldest first.
#[derive(Default)]
pub(crate) struct InFlight {
    pending: VecDeque<Pending>,
}

impl InFlight {
    pub(crate) fn track(&mut self, mc: i64, command: &OutboundCommand, reply: Reply) {
        self.pending.push_back(Pending {
            mc,
            kind: command.message_type(),
            device_id: command.device_id(),
            reply,
        });
    }

    fn take(&mut self, reference: Option<i64>) -> Option<Pending> {
        let index = match reference {
            Some(mc) => self.pending.iter().position(|p| p.mc == mc)?,
            None => 0,
        };
        self.pending.remove(index)
    }

    /// Resolve the command the bridge acknowledged. Returns `false` if
    /// nothing matched.
    pub(crate) fn acknowledge(&mut self, reference: Option<i64>) -> bool {
        let Some(pending) = self.take(reference) else {
            return false;
        };
        tracing::debug!(mc = pending.mc, kind = %pending.kind, "command acknowledged");
        let _ = pending.reply.send(Ok(Ack { mc: pending.mc }));
        true
    }

    pub(crate) fn reject(&mut self, reference: Option<i64>, info: Option<String>) -> bool {
        let Some(pending) = self.take(reference) else {
            return false;
        };
        let reason = info.unwrap_or_else(|| "no reason given".into());
        tracing::warn!(
            mc = pending.mc,
            kind = %pending.kind,
            device_id = ?pending.device_id,
            reason = %reason,
            "command rejected by bridge"
        );
        let _ = pending.reply.send(Err(CommandError::Rejected { reason }));
        true
    }

    /// Fail everything still waiting; the connection carrying them is gone.
    pub(crate) fn fail_all(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(count = self.pending.len(), "failing unacknowledged commands");
        }
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(Err(CommandError::ConnectionLost));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_eq, task};
    use xcomfort_api::command::MAX_SHADE_POSITION;

    use super::*;
    use crate::model::{DeviceValue, RctState, RoomId, ShadeState};

    fn switch(id: u32) -> OutboundCommand {
        OutboundCommand::SetSwitch {
            device_id: DeviceId(id),
            on: true,
        }
    }

    fn tracked(in_flight: &mut InFlight, mc: i64) -> task::Spawn<CommandFuture> {
        let (tx, rx) = oneshot::channel();
        in_flight.track(mc, &switch(1), tx);
        task::spawn(CommandFuture::new(rx))
    }

    #[test]
    fn ack_with_ref_resolves_matching_command() {
        let mut in_flight = InFlight::default();
        let mut first = tracked(&mut in_flight, 4);
        let mut second = tracked(&mut in_flight, 5);

        assert!(in_flight.acknowledge(Some(5)));
        assert_pending!(first.poll());
        assert_ready_eq!(second.poll(), Ok(Ack { mc: 5 }));
        assert_eq!(in_flight.len(), 1);
    }

    #[test]
    fn ack_without_ref_resolves_oldest() {
        let mut in_flight = InFlight::default();
        let mut first = tracked(&mut in_flight, 4);
        let _second = tracked(&mut in_flight, 5);

        assert!(in_flight.acknowledge(None));
        assert_ready_eq!(first.poll(), Ok(Ack { mc: 4 }));
    }

    #[test]
    fn nack_rejects_with_reason() {
        let mut in_flight = InFlight::default();
        let mut cmd = tracked(&mut in_flight, 9);
        assert!(in_flight.reject(Some(9), Some("device offline".into())));
        assert_ready_eq!(
            cmd.poll(),
            Err(CommandError::Rejected {
                reason: "device offline".into()
            })
        );
    }

    #[test]
    fn unknown_ref_matches_nothing() {
        let mut in_flight = InFlight::default();
        let mut cmd = tracked(&mut in_flight, 2);
        assert!(!in_flight.acknowledge(Some(77)));
        assert_pending!(cmd.poll());
    }

    #[test]
    fn fail_all_reports_connection_lost() {
        let mut in_flight = InFlight::default();
        let mut a = tracked(&mut in_flight, 1);
        let mut b = tracked(&mut in_flight, 2);
        in_flight.fail_all();
        assert_ready_eq!(a.poll(), Err(CommandError::ConnectionLost));
        assert_ready_eq!(b.poll(), Err(CommandError::ConnectionLost));
    }

    #[test]
    fn dropped_sender_means_connection_lost() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let mut fut = task::spawn(CommandFuture::new(rx));
        assert_ready_eq!(fut.poll(), Err(CommandError::ConnectionLost));
    }

    fn device(kind: DeviceKind) -> Device {
        Device {
            kind,
            ..Device::new(DeviceId(12))
        }
    }

    #[test]
    fn shade_commands_refused_under_safety_lock() {
        let mut shade = device(DeviceKind::Shade);
        shade.value = Some(DeviceValue::Shade(ShadeState {
            safety: Some(true),
            ..ShadeState::default()
        }));
        let err = DeviceCommand::Shade(ShadeAction::Open).resolve(&shade).unwrap_err();
        assert!(matches!(err, CommandError::Invalid { .. }));
    }

    #[test]
    fn shade_position_must_be_a_percentage() {
        let shade = device(DeviceKind::Shade);
        assert!(
            DeviceCommand::Shade(ShadeAction::GoTo(MAX_SHADE_POSITION + 1))
                .resolve(&shade)
                .is_err()
        );
        assert_eq!(
            DeviceCommand::Shade(ShadeAction::GoTo(60)).resolve(&shade).unwrap(),
            OutboundCommand::SetShade {
                device_id: DeviceId(12),
                action: ShadeAction::GoTo(60)
            }
        );
    }

    #[test]
    fn dim_requires_a_dimmer() {
        assert!(DeviceCommand::Dim(50).resolve(&device(DeviceKind::Switch)).is_err());
        assert_eq!(
            DeviceCommand::Dim(50).resolve(&device(DeviceKind::Dimmer)).unwrap(),
            OutboundCommand::SetDimLevel {
                device_id: DeviceId(12),
                level: 50
            }
        );
    }

    fn heated_room(mode: RctMode) -> Room {
        let mut room = Room::new(RoomId(3));
        room.state.mode = Some(mode);
        room.state.state = Some(RctState::Auto);
        room.mode_setpoints.insert(RctMode::Eco, 17.5);
        room
    }

    #[test]
    fn target_temperature_is_clamped_to_the_active_mode() {
        let room = heated_room(RctMode::Cool);
        assert_eq!(
            RoomCommand::TargetTemperature(26.0).resolve(&room).unwrap(),
            OutboundCommand::SetHeatingState {
                room_id: RoomId(3),
                mode: RctMode::Cool,
                state: RctState::Auto,
                setpoint: Some(20.0),
            }
        );
        assert!(RoomCommand::TargetTemperature(f64::NAN).resolve(&room).is_err());
    }

    #[test]
    fn mode_change_sends_the_stored_setpoint() {
        let room = heated_room(RctMode::Comfort);
        let OutboundCommand::SetHeatingState { mode, setpoint, .. } =
            RoomCommand::Mode(RctMode::Eco).resolve(&room).unwrap()
        else {
            panic!("expected heating state");
        };
        assert_eq!((mode, setpoint), (RctMode::Eco, Some(17.5)));
    }

    #[test]
    fn room_commands_need_a_reported_state() {
        let room = Room::new(RoomId(8));
        let err = RoomCommand::Mode(RctMode::Eco).resolve(&room).unwrap_err();
        assert!(matches!(err, CommandError::Invalid { .. }));
    }

    #[test]
    fn sensors_cannot_be_switched() {
        let err = DeviceCommand::Switch(true)
            .resolve(&device(DeviceKind::WindowSensor))
            .unwrap_err();
        assert!(err.to_string().contains("window_sensor"));
    }
}
