//! Abstract device transport interface.
use std::time::Duration;

use crate::error::Result;

pub use self::serial::{Baudrate, SerialTransport};

mod serial;

#[cfg(test)]
pub(crate) mod mock;

/// Abstraction of the byte stream below the protocol.
/// Might be a USB CDC port, a plain serial port, or a network bridge.
///
/// Delivery is ordered but may be truncated or delayed; framing is the
/// session's job.
pub trait Transport {
    /// Write all of `raw`. Any error is fatal to the session.
    fn send_raw(&mut self, raw: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for at least one byte.
    ///
    /// Returns [`crate::Error::Timeout`] when nothing arrived and
    /// [`crate::Error::Transport`] when the link is gone.
    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Drop anything the transport has buffered.
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        (**self).send_raw(raw)
    }

    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        (**self).recv_raw(timeout)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}
