//! Link session: handshake, synchronisation and the request/response
//! primitive every higher layer is built on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::command::{BaseCommand, Command, CommandClass, Family, Fe02Command};
use crate::config::{RetryPolicy, SessionConfig};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{Frame, FrameDecoder, Message};
use crate::transport::Transport;

/// Lifecycle of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Disconnected,
    Handshaking,
    Syncing,
    /// The only phase accepting register traffic or an update entry command.
    Ready,
    UpdateInProgress,
    /// Terminal until the session is reopened.
    Faulted,
}

/// What came back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(Message),
    /// `M_NACK` with the device supplied reason (0 when absent).
    Nack(u8),
}

/// Identity read from the device once the link is up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub firmware: String,
}

/// Cooperative cancellation, observed between retry attempts only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Wire activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub retries: u64,
    pub discarded: u64,
}

pub struct LinkSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    phase: Phase,
    family: Family,
    seq: u8,
    decoder: FrameDecoder,
    identity: Option<DeviceIdentity>,
    last_error: Option<String>,
    stats: LinkStats,
    cancel: CancelToken,
}

impl<T: Transport> LinkSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        LinkSession {
            transport,
            config,
            phase: Phase::Disconnected,
            family: Family::Base,
            seq: 0,
            decoder: FrameDecoder::new(),
            identity: None,
            last_error: None,
            stats: LinkStats::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub(crate) fn set_identity(&mut self, identity: DeviceIdentity) {
        self.identity = Some(identity);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("session: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Record `err`, move to `Faulted` and hand the error back.
    pub(crate) fn fault(&mut self, err: Error) -> Error {
        log::warn!("session faulted: {}", err);
        self.last_error = Some(err.to_string());
        self.set_phase(Phase::Faulted);
        err
    }

    pub(crate) fn note_error(&mut self, err: &Error) {
        self.last_error = Some(err.to_string());
    }

    /// Handshake and synchronise. Starts from scratch in every phase except
    /// during an update.
    pub fn open(&mut self) -> Result<()> {
        if self.phase == Phase::UpdateInProgress {
            return Err(Error::BusyUpdating);
        }
        self.decoder.clear();
        self.cancel.reset();
        self.identity = None;
        self.last_error = None;
        self.family = Family::Base;
        self.set_phase(Phase::Handshaking);
        if let Err(e) = self.transport.clear() {
            return Err(self.fault(e));
        }

        let policy = self.config.handshake;
        let timeout = self.config.handshake_timeout;

        let handshake = Message::empty(BaseCommand::Handshake);
        if !self.link_step(&handshake, policy, timeout, |m| m.is(BaseCommand::Ack))? {
            return Err(self.fault(Error::HandshakeFailed {
                attempts: policy.attempts,
            }));
        }

        self.set_phase(Phase::Syncing);
        let syn = Message::empty(BaseCommand::Syn);
        let synced = self.link_step(&syn, policy, timeout, |m| {
            m.is(BaseCommand::Syn) || m.is(BaseCommand::Ack)
        })?;
        if !synced {
            return Err(self.fault(Error::SyncFailed {
                attempts: policy.attempts,
            }));
        }

        self.family = self.config.family;
        self.set_phase(Phase::Ready);
        log::info!("link ready ({:?})", self.family);
        Ok(())
    }

    /// One handshake or sync step with its retry budget. `Ok(false)` when
    /// the budget ran out.
    fn link_step(
        &mut self,
        msg: &Message,
        policy: RetryPolicy,
        timeout: Duration,
        accept: impl Fn(&Message) -> bool,
    ) -> Result<bool> {
        for attempt in 1..=policy.attempts {
            if attempt > 1 {
                self.stats.retries += 1;
                sleep(policy.delay_before(attempt));
            }
            match self.transact(msg, timeout) {
                Ok(Reply::Message(reply)) if accept(&reply) => return Ok(true),
                Ok(reply) => {
                    log::warn!(
                        "{} attempt {}/{}: unexpected reply {:?}",
                        msg.command(),
                        attempt,
                        policy.attempts,
                        reply
                    );
                }
                Err(e) if e.is_fatal() => return Err(self.fault(e)),
                Err(e) => {
                    log::warn!(
                        "{} attempt {}/{}: {}",
                        msg.command(),
                        attempt,
                        policy.attempts,
                        e
                    );
                }
            }
        }
        Ok(false)
    }

    /// Say goodbye with `M_EOT` and drop to `Disconnected`.
    pub fn close(&mut self) -> Result<()> {
        match self.phase {
            Phase::UpdateInProgress => return Err(Error::BusyUpdating),
            Phase::Ready if self.family.recognizes(Fe02Command::EndOfTransmission.into()) => {
                let frame = Frame::new(self.next_seq(), Message::empty(Fe02Command::EndOfTransmission));
                if let Err(e) = self.write_frame(&frame) {
                    log::warn!("sending EOT failed: {}", e);
                }
            }
            _ => {}
        }
        self.decoder.clear();
        self.set_phase(Phase::Disconnected);
        Ok(())
    }

    /// Whether `command` may be sent in the current phase.
    pub fn check_legal(&self, command: Command) -> Result<()> {
        match (self.phase, command.class()) {
            (Phase::Ready, CommandClass::Update) if !command.enters_update() => {
                Err(Error::SessionNotReady { phase: self.phase })
            }
            (Phase::Ready, _) => Ok(()),
            (Phase::UpdateInProgress, CommandClass::Update) => Ok(()),
            (Phase::UpdateInProgress, _) if command.is_status_query() => Ok(()),
            (Phase::UpdateInProgress, _) => Err(Error::BusyUpdating),
            (phase, _) => Err(Error::SessionNotReady { phase }),
        }
    }

    /// Send one message and wait for the reply to it.
    ///
    /// One attempt, no retries. An acknowledged update entry command moves
    /// the session into `UpdateInProgress`.
    pub fn exchange(&mut self, msg: &Message, timeout: Duration) -> Result<Reply> {
        self.check_legal(msg.command())?;
        let reply = self.transact(msg, timeout);
        match &reply {
            Ok(Reply::Message(m)) if msg.command().enters_update() && m.is(BaseCommand::Ack) => {
                self.set_phase(Phase::UpdateInProgress);
            }
            Err(e) if e.is_fatal() && self.phase != Phase::Disconnected => {
                self.last_error = Some(e.to_string());
                self.set_phase(Phase::Faulted);
            }
            _ => {}
        }
        reply
    }

    /// [`exchange`](Self::exchange) under a retry policy.
    ///
    /// `accept` turns a reply into the caller's value or rejects it as
    /// malformed. NACKs and timeouts are retried and then surface as
    /// `OperationRejected`/`Timeout`; protocol errors that exhaust the budget
    /// fault the session. Cancellation is honoured between attempts, except
    /// for update steps.
    pub fn request<R>(
        &mut self,
        msg: &Message,
        timeout: Duration,
        policy: RetryPolicy,
        accept: impl FnMut(Message) -> std::result::Result<R, ProtocolError>,
    ) -> Result<R> {
        self.attempt(msg, timeout, policy, true, accept)
    }

    /// Like [`request`](Self::request), but the first NACK ends it with
    /// [`Error::Nack`]. Timeouts and malformed replies are still retried.
    pub fn request_strict<R>(
        &mut self,
        msg: &Message,
        timeout: Duration,
        policy: RetryPolicy,
        accept: impl FnMut(Message) -> std::result::Result<R, ProtocolError>,
    ) -> Result<R> {
        self.attempt(msg, timeout, policy, false, accept)
    }

    fn attempt<R>(
        &mut self,
        msg: &Message,
        timeout: Duration,
        policy: RetryPolicy,
        retry_nack: bool,
        mut accept: impl FnMut(Message) -> std::result::Result<R, ProtocolError>,
    ) -> Result<R> {
        let mut last = Error::Timeout;
        for attempt in 1..=policy.attempts {
            if attempt > 1 {
                // update steps run to completion, the orchestrator cancels between steps
                if self.cancel.is_cancelled() && msg.command().class() != CommandClass::Update {
                    log::warn!("{} abandoned after {} attempts", msg.command(), attempt - 1);
                    self.resync();
                    return Err(Error::Cancelled);
                }
                self.stats.retries += 1;
                sleep(policy.delay_before(attempt));
            }

            let err = match self.exchange(msg, timeout) {
                Ok(Reply::Message(reply)) => match accept(reply) {
                    Ok(value) => return Ok(value),
                    Err(e) => Error::Protocol(e),
                },
                Ok(Reply::Nack(reason)) if !retry_nack => {
                    let err = Error::Nack {
                        command: msg.command(),
                        reason,
                    };
                    self.note_error(&err);
                    return Err(err);
                }
                Ok(Reply::Nack(reason)) => Error::Nack {
                    command: msg.command(),
                    reason,
                },
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            log::warn!(
                "{} attempt {}/{}: {}",
                msg.command(),
                attempt,
                policy.attempts,
                err
            );
            last = err;
        }

        let err = match last {
            Error::Nack { command, reason } => Error::OperationRejected {
                command,
                reason,
                attempts: policy.attempts,
            },
            Error::Protocol(e) => return Err(self.fault(Error::Protocol(e))),
            other => other,
        };
        self.note_error(&err);
        Err(err)
    }

    /// Leave update mode after the final housekeeping step or an abort.
    pub(crate) fn end_update(&mut self, faulted: bool) {
        if faulted {
            self.set_phase(Phase::Faulted);
        } else if self.phase == Phase::UpdateInProgress {
            self.set_phase(Phase::Ready);
        }
    }

    /// Device acknowledged `M_RESET` and is rebooting.
    pub(crate) fn device_reset(&mut self) {
        self.decoder.clear();
        self.identity = None;
        self.set_phase(Phase::Disconnected);
    }

    /// Forget partial input; the next reply is matched from a clean slate.
    pub fn resync(&mut self) {
        self.stats.discarded += self.decoder.buffered_len() as u64;
        self.decoder.clear();
        if let Err(e) = self.transport.clear() {
            log::warn!("clearing transport failed: {}", e);
        }
    }

    fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let raw = frame.encode();
        log::debug!("=> {}", hex::encode(&raw));
        self.transport.send_raw(&raw)?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Raw request/response cycle, no phase gating.
    fn transact(&mut self, msg: &Message, timeout: Duration) -> Result<Reply> {
        self.decoder.clear();
        let seq = self.next_seq();
        self.write_frame(&Frame::new(seq, msg.clone()))?;

        let deadline = Instant::now() + timeout;
        loop {
            while let Some(decoded) = self.decoder.next_frame(self.family) {
                let frame = decoded?;
                self.stats.frames_received += 1;
                if frame.message.is(Fe02Command::EndOfTransmission) {
                    log::info!("peer sent EOT");
                    self.last_error = Some(Error::PeerClosed.to_string());
                    self.set_phase(Phase::Disconnected);
                    return Err(Error::PeerClosed);
                }
                if frame.seq != seq {
                    log::warn!("discarding stale reply #{} (waiting for #{})", frame.seq, seq);
                    self.stats.discarded += 1;
                    continue;
                }
                if frame.message.is(BaseCommand::Nack) {
                    let reason = frame.message.payload().first().copied().unwrap_or(0);
                    return Ok(Reply::Nack(reason));
                }
                return Ok(Reply::Message(frame.message));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let data = self.transport.recv_raw(remaining)?;
            log::debug!("<= {}", hex::encode(&data));
            self.decoder.push(&data);
        }
    }
}

/// Reply must be a bare `M_ACK`.
pub fn expect_ack(command: Command) -> impl FnMut(Message) -> std::result::Result<(), ProtocolError> {
    move |reply| {
        if reply.is(BaseCommand::Ack) {
            Ok(())
        } else {
            Err(ProtocolError::malformed(
                command,
                format!("expected ACK, got {}", reply.command()),
            ))
        }
    }
}

/// Reply must echo `command` with a well formed payload.
pub fn expect_echo(command: Command) -> impl FnMut(Message) -> std::result::Result<Vec<u8>, ProtocolError> {
    move |reply| {
        if reply.command() != command {
            return Err(ProtocolError::malformed(
                command,
                format!("reply carries {}", reply.command()),
            ));
        }
        let len = reply.payload().len();
        if !command.payload_len().accepts(len) {
            return Err(ProtocolError::malformed(
                command,
                format!("unexpected payload length {}", len),
            ));
        }
        Ok(reply.into_payload())
    }
}
