//! JBC P02 fume extractor protocol engine.
//!
//! Frames, the FE_02 command registry, the link session, typed register
//! access and the firmware update sequence, on top of any byte-stream
//! [`Transport`].

pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod flashing;
pub mod format;
pub mod protocol;
pub mod register;
pub mod session;
pub mod station;
pub mod transport;

pub use self::command::{Command, Family};
pub use self::config::{RetryPolicy, SessionConfig};
pub use self::error::{Error, ProtocolError, Result};
pub use self::flashing::{FlashState, UpdateOptions, UpdatePhase, UpdateStatus};
pub use self::format::FirmwareImage;
pub use self::protocol::Message;
pub use self::register::{Action, Register, Value};
pub use self::session::{CancelToken, LinkSession, Phase};
pub use self::station::{Station, Status};
pub use self::transport::Transport;
