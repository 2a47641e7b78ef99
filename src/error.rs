//! Error taxonomy of the protocol engine.

use std::io;

use thiserror::Error;

use crate::command::Command;
use crate::flashing::{FlashState, UpdatePhase};
use crate::register::Register;
use crate::session::Phase;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a received frame was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFault {
    /// First byte is not STX.
    BadStart,
    /// Byte after the checksum is not ETX.
    BadTrailer,
    Checksum { expected: u8, actual: u8 },
    /// LEN exceeds the command's payload limit.
    Oversized { len: usize, max: usize },
}

/// Recoverable wire-level errors. The session resynchronises and retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("corrupt frame: {0:?}")]
    CorruptFrame(FrameFault),

    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("malformed response to {command}: {reason}")]
    MalformedResponse { command: Command, reason: String },
}

impl ProtocolError {
    pub(crate) fn malformed(command: Command, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse {
            command,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Connection level, fatal to the session
    // -------------------------------------------------------------------------
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("peer closed the link")]
    PeerClosed,

    #[error("handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    #[error("synchronisation failed after {attempts} attempts")]
    SyncFailed { attempts: u32 },

    // -------------------------------------------------------------------------
    // Exchange level
    // -------------------------------------------------------------------------
    #[error("timed out waiting for a reply")]
    Timeout,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{command} rejected by device (reason 0x{reason:02x})")]
    Nack { command: Command, reason: u8 },

    #[error("{command} rejected after {attempts} attempts (last reason 0x{reason:02x})")]
    OperationRejected {
        command: Command,
        reason: u8,
        attempts: u32,
    },

    #[error("operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Caller usage, never retried
    // -------------------------------------------------------------------------
    #[error("session not ready (phase: {phase:?})")]
    SessionNotReady { phase: Phase },

    #[error("firmware update in progress")]
    BusyUpdating,

    #[error("no firmware update in progress")]
    NoUpdateInProgress,

    #[error("payload of {len} bytes too large for {command} (max {max})")]
    PayloadTooLarge {
        command: Command,
        len: usize,
        max: usize,
    },

    #[error("invalid value for {register}: {reason}")]
    InvalidValue { register: Register, reason: String },

    #[error("{register} cannot be {access}")]
    UnsupportedAccess {
        register: Register,
        access: &'static str,
    },

    // -------------------------------------------------------------------------
    // Firmware update
    // -------------------------------------------------------------------------
    #[error("device refuses update, station error 0x{code:04x}")]
    DeviceNotUpdatable { code: u16 },

    #[error("firmware update failed in {phase:?} phase (flash {flash:?}): {source}")]
    UpdateFailed {
        phase: UpdatePhase,
        flash: FlashState,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Errors after which the session is unusable until reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::PeerClosed
                | Error::HandshakeFailed { .. }
                | Error::SyncFailed { .. }
        )
    }

    /// Errors that consume a retry attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Protocol(_) | Error::Nack { .. })
    }
}
