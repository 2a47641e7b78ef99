//! Station handle: the public engine surface.
//!
//! A `Station` is a cheap, cloneable handle. Every operation takes the
//! session lock for the duration of its exchange, so callers on different
//! threads are serialised onto the single connection.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::BaseCommand;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::flashing::{UpdateContext, UpdateOptions, UpdateStatus};
use crate::format::FirmwareImage;
use crate::protocol::Message;
use crate::register::{Action, Counters, PedalMode, Pin, Register, Value};
use crate::session::{
    CancelToken, DeviceIdentity, LinkSession, LinkStats, Phase, expect_ack, expect_echo,
};
use crate::transport::Transport;

/// Snapshot returned by [`Station::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub phase: Phase,
    pub last_error: Option<String>,
    pub identity: Option<DeviceIdentity>,
    /// Latest known state of the current or last firmware update.
    pub update: Option<UpdateStatus>,
    pub stats: LinkStats,
}

struct Shared<T: Transport> {
    session: Mutex<LinkSession<T>>,
    update: Mutex<Option<UpdateContext>>,
    snapshot: Mutex<Option<UpdateStatus>>,
    cancel: CancelToken,
}

pub struct Station<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Station<T> {
    fn clone(&self) -> Self {
        Station {
            shared: self.shared.clone(),
        }
    }
}

pub(crate) fn read_register<T: Transport>(
    session: &mut LinkSession<T>,
    register: Register,
) -> Result<Value> {
    let command = register.read_command().ok_or(Error::UnsupportedAccess {
        register,
        access: "read",
    })?;
    let msg = Message::empty(command);
    let policy = session.config().register;
    let timeout = session.config().exchange_timeout;
    let mut echo = expect_echo(command);
    let value = session.request(&msg, timeout, policy, |reply| {
        let payload = echo(reply)?;
        register.decode(&payload)
    })?;
    log::debug!("{} = {}", register, value);
    Ok(value)
}

pub(crate) fn write_register<T: Transport>(
    session: &mut LinkSession<T>,
    register: Register,
    value: &Value,
) -> Result<()> {
    let command = register.write_command().ok_or(Error::UnsupportedAccess {
        register,
        access: "written",
    })?;
    let msg = Message::new(command, register.encode(value)?)?;
    let policy = session.config().register;
    let timeout = session.config().exchange_timeout;
    session.request(&msg, timeout, policy, expect_ack(command))?;
    log::debug!("{} <- {}", register, value);
    Ok(())
}

impl<T: Transport> Station<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let session = LinkSession::new(transport, config);
        let cancel = session.cancel_token();
        Station {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                update: Mutex::new(None),
                snapshot: Mutex::new(None),
                cancel,
            }),
        }
    }

    /// Handshake and synchronise. Also used to recover a faulted session.
    pub fn open(&self) -> Result<()> {
        self.shared.session.lock().open()
    }

    pub fn close(&self) -> Result<()> {
        self.shared.session.lock().close()
    }

    pub fn status(&self) -> Status {
        let update = *self.shared.snapshot.lock();
        let session = self.shared.session.lock();
        Status {
            phase: session.phase(),
            last_error: session.last_error().map(str::to_string),
            identity: session.identity().cloned(),
            update,
            stats: session.stats(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.session.lock().phase()
    }

    /// Cancels the pending operation at its next retry boundary. A running
    /// firmware update is aborted after its current chunk.
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut LinkSession<T>) -> Result<R>) -> Result<R> {
        let mut session = self.shared.session.lock();
        // a pending cancel belongs to the running update
        if session.phase() != Phase::UpdateInProgress {
            self.shared.cancel.reset();
        }
        f(&mut session)
    }

    pub fn read(&self, register: Register) -> Result<Value> {
        self.with_session(|s| read_register(s, register))
    }

    pub fn write(&self, register: Register, value: Value) -> Result<()> {
        self.with_session(|s| write_register(s, register, &value))
    }

    /// Run a fire-and-forget action; it counts as done once acknowledged.
    pub fn execute(&self, action: Action) -> Result<()> {
        self.with_session(|s| {
            let msg = Message::empty(action.command());
            let policy = s.config().register;
            let timeout = s.config().exchange_timeout;
            s.request(&msg, timeout, policy, expect_ack(msg.command()))?;
            log::info!("{} done", action.name());
            Ok(())
        })
    }

    /// Read device id and firmware version and remember them on the session.
    pub fn identify(&self) -> Result<DeviceIdentity> {
        self.with_session(|s| {
            let text = |v: Value| match v {
                Value::Text(t) => t,
                other => other.to_string(),
            };
            let identity = DeviceIdentity {
                device_id: text(read_register(s, Register::DeviceId)?),
                firmware: text(read_register(s, Register::FirmwareVersion)?),
            };
            log::info!("device {} firmware {}", identity.device_id, identity.firmware);
            s.set_identity(identity.clone());
            Ok(identity)
        })
    }

    /// Reboot the device. The session must be reopened afterwards.
    pub fn reset_device(&self) -> Result<()> {
        self.with_session(|s| {
            let msg = Message::empty(BaseCommand::Reset);
            let policy = s.config().register;
            let timeout = s.config().exchange_timeout;
            s.request(&msg, timeout, policy, expect_ack(msg.command()))?;
            s.device_reset();
            log::info!("device reset");
            Ok(())
        })
    }

    pub fn suction_level(&self) -> Result<u8> {
        match self.read(Register::SuctionLevel)? {
            Value::Byte(level) => Ok(level),
            other => Err(unexpected(Register::SuctionLevel, &other)),
        }
    }

    pub fn set_suction_level(&self, level: u8) -> Result<()> {
        self.write(Register::SuctionLevel, Value::Byte(level))
    }

    pub fn pedal_mode(&self) -> Result<PedalMode> {
        match self.read(Register::PedalMode)? {
            Value::PedalMode(mode) => Ok(mode),
            other => Err(unexpected(Register::PedalMode, &other)),
        }
    }

    pub fn set_pedal_mode(&self, mode: PedalMode) -> Result<()> {
        self.write(Register::PedalMode, Value::PedalMode(mode))
    }

    pub fn device_name(&self) -> Result<String> {
        match self.read(Register::DeviceName)? {
            Value::Text(name) => Ok(name),
            other => Err(unexpected(Register::DeviceName, &other)),
        }
    }

    pub fn set_device_name(&self, name: &str) -> Result<()> {
        self.write(Register::DeviceName, Value::Text(name.to_string()))
    }

    pub fn set_pin(&self, pin: Pin) -> Result<()> {
        self.write(Register::Pin, Value::Pin(pin))
    }

    pub fn counters(&self, partial: bool) -> Result<Counters> {
        let register = if partial {
            Register::PartialCounters
        } else {
            Register::Counters
        };
        match self.read(register)? {
            Value::Counters(c) => Ok(c),
            other => Err(unexpected(register, &other)),
        }
    }

    fn publish(&self, status: Option<UpdateStatus>) {
        *self.shared.snapshot.lock() = status;
    }

    /// Check the device, erase its flash and enter update mode.
    pub fn begin_firmware_update(
        &self,
        image: FirmwareImage,
        options: UpdateOptions,
    ) -> Result<UpdateStatus> {
        let mut slot = self.shared.update.try_lock().ok_or(Error::BusyUpdating)?;
        if slot.is_some() {
            return Err(Error::BusyUpdating);
        }
        self.shared.cancel.reset();
        self.publish(None);
        let ctx = {
            let mut session = self.shared.session.lock();
            UpdateContext::begin(&mut *session, image, options)?
        };
        let status = ctx.status();
        self.publish(Some(status));
        *slot = Some(ctx);
        Ok(status)
    }

    /// Transfer the rest of the image. `progress` gets `(done, total)` bytes
    /// after every acknowledged step.
    ///
    /// The session lock is released between steps; other callers see
    /// `BusyUpdating` meanwhile.
    pub fn continue_firmware_update(
        &self,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<UpdateStatus> {
        let mut slot = self.shared.update.try_lock().ok_or(Error::BusyUpdating)?;
        let ctx = slot.as_mut().ok_or(Error::NoUpdateInProgress)?;

        let result = loop {
            if self.shared.cancel.is_cancelled() {
                self.shared.cancel.reset();
                let err = ctx.fail(&mut *self.shared.session.lock(), Error::Cancelled);
                self.publish(Some(ctx.status()));
                break Err(err);
            }
            let step = ctx.step(&mut *self.shared.session.lock());
            let status = ctx.status();
            self.publish(Some(status));
            match step {
                Ok(done) => {
                    progress(status.bytes_done, status.bytes_total);
                    if done {
                        break Ok(status);
                    }
                }
                Err(e) => break Err(e),
            }
        };
        *slot = None;
        result
    }

    /// [`begin`](Self::begin_firmware_update) and
    /// [`continue`](Self::continue_firmware_update) in one go.
    pub fn flash_firmware(
        &self,
        image: FirmwareImage,
        options: UpdateOptions,
        progress: impl FnMut(usize, usize),
    ) -> Result<UpdateStatus> {
        self.begin_firmware_update(image, options)?;
        self.continue_firmware_update(progress)
    }

    /// Abandon the update. Nothing is sent; if a transfer is running on
    /// another thread it stops after its current chunk.
    pub fn abort_firmware_update(&self) -> Result<UpdateStatus> {
        let Some(mut slot) = self.shared.update.try_lock() else {
            self.shared.cancel.cancel();
            return (*self.shared.snapshot.lock()).ok_or(Error::NoUpdateInProgress);
        };
        let mut ctx = slot.take().ok_or(Error::NoUpdateInProgress)?;
        let status = ctx.abort(&mut *self.shared.session.lock());
        self.publish(Some(status));
        Ok(status)
    }
}

fn unexpected(register: Register, value: &Value) -> Error {
    Error::InvalidValue {
        register,
        reason: format!("unexpected value {}", value),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::command::{Command, Fe02Command};
    use crate::config::RetryPolicy;
    use crate::error::ProtocolError;
    use crate::flashing::{FlashState, UpdatePhase};
    use crate::transport::mock::{PeerReply, ScriptedPeer, SentLog, SimulatedStation};

    fn config() -> SessionConfig {
        SessionConfig {
            handshake: RetryPolicy::new(3, Duration::ZERO),
            register: RetryPolicy::new(4, Duration::ZERO),
            chunk_size: 4,
            ..SessionConfig::default()
        }
    }

    fn station(
        handler: impl FnMut(&Message) -> Vec<PeerReply> + Send + 'static,
    ) -> (Station<ScriptedPeer>, SentLog) {
        let peer = ScriptedPeer::new(handler);
        let sent = peer.sent();
        (Station::new(peer, config()), sent)
    }

    fn simulated() -> (Station<ScriptedPeer>, SentLog) {
        let mut sim = SimulatedStation::new();
        let (station, sent) = station(move |msg: &Message| sim.handle(msg));
        station.open().unwrap();
        (station, sent)
    }

    fn count(sent: &SentLog, command: impl Into<Command>) -> usize {
        let command = command.into();
        sent.lock().iter().filter(|m| m.command() == command).count()
    }

    #[test]
    fn open_then_read_suction_level() {
        let (station, sent) = simulated();
        assert_eq!(station.phase(), Phase::Ready);
        assert_eq!(station.read(Register::SuctionLevel).unwrap(), Value::Byte(5));
        assert_eq!(station.suction_level().unwrap(), 5);
        assert_eq!(count(&sent, Fe02Command::ReadSuctionLevel), 2);
    }

    #[test]
    fn reads_are_stable_until_written() {
        let (station, _sent) = simulated();
        assert_eq!(station.device_name().unwrap(), station.device_name().unwrap());
        station.set_device_name("fume-left").unwrap();
        assert_eq!(station.device_name().unwrap(), "fume-left");
        station.set_pedal_mode(PedalMode::Hold).unwrap();
        assert_eq!(station.pedal_mode().unwrap(), PedalMode::Hold);
    }

    #[test]
    fn nacked_write_is_rejected_after_exact_budget() {
        let mut sim = SimulatedStation::new();
        let (station, sent) = station(move |msg: &Message| {
            if msg.is(Fe02Command::WriteSuctionLevel) {
                return vec![PeerReply::Message(Message::nack(0x07))];
            }
            sim.handle(msg)
        });
        station.open().unwrap();
        let err = station.set_suction_level(3).unwrap_err();
        assert!(matches!(
            err,
            Error::OperationRejected { reason: 0x07, attempts: 4, .. }
        ));
        assert_eq!(count(&sent, Fe02Command::WriteSuctionLevel), 4);
        assert_eq!(station.phase(), Phase::Ready);
    }

    #[test]
    fn silent_register_times_out_but_stays_ready() {
        let mut sim = SimulatedStation::new();
        let (station, sent) = station(move |msg: &Message| {
            if msg.is(Fe02Command::ReadFlow) {
                return vec![PeerReply::Silence];
            }
            sim.handle(msg)
        });
        station.open().unwrap();
        assert!(matches!(station.read(Register::Flow), Err(Error::Timeout)));
        assert_eq!(count(&sent, Fe02Command::ReadFlow), 4);
        assert_eq!(station.phase(), Phase::Ready);
        assert!(station.status().last_error.is_some());
    }

    #[test]
    fn mismatched_reply_is_never_coerced() {
        let mut sim = SimulatedStation::new();
        let (station, _sent) = station(move |msg: &Message| {
            if msg.is(Fe02Command::ReadSuctionLevel) {
                // well formed, but for another register
                return vec![PeerReply::Message(
                    Message::new(Fe02Command::ReadStationError, vec![5, 0]).unwrap(),
                )];
            }
            sim.handle(msg)
        });
        station.open().unwrap();
        let err = station.read(Register::SuctionLevel).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MalformedResponse { .. })
        ));
        assert_eq!(station.phase(), Phase::Faulted);
    }

    #[test]
    fn requires_ready_session() {
        let mut sim = SimulatedStation::new();
        let (station, sent) = station(move |msg: &Message| sim.handle(msg));
        assert!(matches!(
            station.read(Register::Beep),
            Err(Error::SessionNotReady { phase: Phase::Disconnected })
        ));
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn access_direction_is_enforced() {
        let (station, _sent) = simulated();
        assert!(matches!(
            station.write(Register::Flow, Value::Word(1)),
            Err(Error::UnsupportedAccess { register: Register::Flow, .. })
        ));
        assert!(matches!(
            station.read(Register::WorkIntakes),
            Err(Error::UnsupportedAccess { register: Register::WorkIntakes, .. })
        ));
        station.write(Register::WorkIntakes, Value::Byte(2)).unwrap();
    }

    #[test]
    fn actions_need_an_ack() {
        let mut sim = SimulatedStation::new();
        let (station, sent) = station(move |msg: &Message| {
            if msg.is(Fe02Command::ResetFilter) {
                return vec![PeerReply::Message(Message::nack(1))];
            }
            sim.handle(msg)
        });
        station.open().unwrap();
        station.execute(Action::ResetCounters).unwrap();
        assert!(matches!(
            station.execute(Action::ResetFilter),
            Err(Error::OperationRejected { .. })
        ));
        assert_eq!(count(&sent, Fe02Command::ResetCounters), 1);
    }

    #[test]
    fn identify_and_reset() {
        let (station, _sent) = simulated();
        let identity = station.identify().unwrap();
        assert_eq!(identity.device_id, "FAE-2C");
        assert_eq!(identity.firmware, "FE-2.04");
        assert_eq!(station.status().identity, Some(identity));

        station.reset_device().unwrap();
        assert_eq!(station.phase(), Phase::Disconnected);
        assert_eq!(station.status().identity, None);
        station.open().unwrap();
    }

    #[test]
    fn line_noise_before_reply() {
        let mut sim = SimulatedStation::new();
        let (station, _sent) = station(move |msg: &Message| {
            let mut replies = vec![
                PeerReply::Raw(vec![0xff, 0x00, 0x13]),
                PeerReply::Raw(vec![0x13, 0x02]),
            ];
            replies.extend(sim.handle(msg));
            replies
        });
        station.open().unwrap();
        assert_eq!(station.suction_level().unwrap(), 5);
    }

    #[test]
    fn register_traffic_is_refused_during_update() {
        let (station, sent) = simulated();
        let image = FirmwareImage::from_binary(0x4000, (0u8..10).collect()).unwrap();
        station.begin_firmware_update(image, UpdateOptions::default()).unwrap();
        assert_eq!(station.phase(), Phase::UpdateInProgress);
        assert!(matches!(station.read(Register::SuctionLevel), Err(Error::BusyUpdating)));
        assert_eq!(station.read(Register::StationError).unwrap(), Value::Word(0));
        assert!(matches!(
            station.begin_firmware_update(
                FirmwareImage::from_binary(0, vec![1]).unwrap(),
                UpdateOptions::default()
            ),
            Err(Error::BusyUpdating)
        ));

        let mut reports = vec![];
        let status = station
            .continue_firmware_update(|done, total| reports.push((done, total)))
            .unwrap();
        assert_eq!(status.flash, FlashState::Complete);
        assert_eq!(reports.first(), Some(&(0, 10)));
        assert_eq!(reports.last(), Some(&(10, 10)));
        assert_eq!(count(&sent, Fe02Command::SendMemData), 3);
        assert_eq!(station.phase(), Phase::Ready);
        assert_eq!(station.suction_level().unwrap(), 5);
        assert!(matches!(
            station.abort_firmware_update(),
            Err(Error::NoUpdateInProgress)
        ));
    }

    #[test]
    fn cancelled_transfer_stops_between_chunks() {
        let (station, sent) = simulated();
        let image = FirmwareImage::from_binary(0, vec![0x11; 12]).unwrap();
        station.begin_firmware_update(image, UpdateOptions::default()).unwrap();
        let cancel = station.cancel_token();
        let err = station
            .continue_firmware_update(|done, _| {
                if done == 4 {
                    cancel.cancel();
                }
            })
            .unwrap_err();
        match err {
            Error::UpdateFailed { phase, flash, source } => {
                assert_eq!(phase, UpdatePhase::Transferring);
                assert_eq!(flash, FlashState::PossiblyPartial);
                assert!(matches!(*source, Error::Cancelled));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(count(&sent, Fe02Command::SendMemData), 1);
        assert_eq!(station.phase(), Phase::Faulted);
        assert_eq!(station.status().update.map(|u| u.phase), Some(UpdatePhase::Aborted));

        station.open().unwrap();
        assert_eq!(station.phase(), Phase::Ready);
    }

    #[test]
    fn explicit_abort() {
        let (station, sent) = simulated();
        let image = FirmwareImage::from_binary(0, vec![1, 2, 3]).unwrap();
        station.begin_firmware_update(image, UpdateOptions::default()).unwrap();
        let before = sent.lock().len();
        let status = station.abort_firmware_update().unwrap();
        assert_eq!(status.phase, UpdatePhase::Aborted);
        assert_eq!(sent.lock().len(), before);
        assert_eq!(station.phase(), Phase::Faulted);
        assert!(matches!(
            station.continue_firmware_update(|_, _| {}),
            Err(Error::NoUpdateInProgress)
        ));
    }

    #[test]
    fn concurrent_callers_share_one_link() {
        let (station, sent) = simulated();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let station = station.clone();
                scope.spawn(move || {
                    for _ in 0..5 {
                        assert_eq!(station.suction_level().unwrap(), 5);
                        assert_eq!(station.pedal_mode().unwrap(), PedalMode::Pulse);
                    }
                });
            }
        });
        assert_eq!(count(&sent, Fe02Command::ReadSuctionLevel), 20);
        assert_eq!(count(&sent, Fe02Command::ReadPedalMode), 20);
        assert_eq!(station.status().stats.retries, 0);
    }
}
