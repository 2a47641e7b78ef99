//! Serial Transportation.
use std::{fmt::Display, io, io::Read, io::Write, time::Duration};

use clap::{ValueEnum, builder::PossibleValue};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use super::Transport;
use crate::error::{Error, Result};

const SERIAL_TIMEOUT_MS: u64 = 500;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Baudrate {
    Baud115200,
    Baud250k,
    #[default]
    Baud500k,
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        match value {
            Baudrate::Baud115200 => 115200,
            Baudrate::Baud250k => 250000,
            Baudrate::Baud500k => 500000,
        }
    }
}

impl Display for Baudrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl ValueEnum for Baudrate {
    fn value_variants<'a>() -> &'a [Self] {
        &[Baudrate::Baud115200, Baudrate::Baud250k, Baudrate::Baud500k]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self {
            Baudrate::Baud115200 => Some(PossibleValue::new("Baud115200").aliases(["115200"])),
            Baudrate::Baud250k => {
                Some(PossibleValue::new("Baud250k").aliases(["250000", "250_000", "250k"]))
            }
            Baudrate::Baud500k => {
                Some(PossibleValue::new("Baud500k").aliases(["500000", "500_000", "500k"]))
            }
        }
    }
}

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn scan_ports() -> anyhow::Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: Baudrate) -> anyhow::Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let port = serialport::new(port, baudrate.into())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }

    pub fn open_nth(nth: usize, baudrate: Baudrate) -> anyhow::Result<Self> {
        let ports = serialport::available_ports()?;

        match ports.get(nth) {
            Some(port) => Self::open(&port.port_name, baudrate),
            None => anyhow::bail!("No serial ports found!"),
        }
    }

    pub fn open_any(baudrate: Baudrate) -> anyhow::Result<Self> {
        Self::open_nth(0, baudrate)
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.serial_port.write_all(raw)?;
        self.serial_port.flush()?;
        Ok(())
    }

    fn recv_raw(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.serial_port
            .set_timeout(timeout)
            .map_err(|e| Error::Transport(io::Error::other(e)))?;

        let mut buf = [0u8; 256];
        match self.serial_port.read(&mut buf) {
            Ok(0) => Err(Error::Transport(io::ErrorKind::UnexpectedEof.into())),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::Timeout),
            Err(e) => Err(Error::Transport(e)),
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.serial_port
            .clear(ClearBuffer::All)
            .map_err(|e| Error::Transport(io::Error::other(e)))
    }
}
