//! Station registers: named settings and telemetry addressed by paired
//! read/write command ids, plus their typed payload encodings.

use std::fmt;
use std::str::FromStr;

use scroll::{LE, Pread, Pwrite};

use crate::command::{
    BaseCommand, COUNTERS_LEN, Command, Fe02Command, MAX_TEXT_LEN, PIN_LEN, ROBOT_CONFIG_LEN,
};
use crate::error::{Error, ProtocolError, Result};

/// How a register may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Shape of a register's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Byte,
    /// Little-endian u16.
    Word,
    /// 0 or 1.
    Flag,
    /// UTF-8, trailing NULs trimmed.
    Text,
    Bytes,
    Pin,
    PedalMode,
    Counters,
    RobotConfig,
}

const fn fe(c: Fe02Command) -> Option<Command> {
    Some(Command::Fe02(c))
}

macro_rules! registers {
    ( $( $variant:ident, $name:literal, $read:expr, $write:expr, $kind:ident; )+ ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Register {
            $( $variant ),+
        }

        impl Register {
            pub const ALL: &'static [Register] = &[$( Register::$variant ),+];

            pub const fn name(self) -> &'static str {
                match self {
                    $( Register::$variant => $name, )+
                }
            }

            pub const fn read_command(self) -> Option<Command> {
                match self {
                    $( Register::$variant => $read, )+
                }
            }

            pub const fn write_command(self) -> Option<Command> {
                match self {
                    $( Register::$variant => $write, )+
                }
            }

            pub const fn kind(self) -> ValueKind {
                match self {
                    $( Register::$variant => ValueKind::$kind, )+
                }
            }
        }
    };
}

use crate::command::Fe02Command::*;

registers! {
    DeviceId, "device-id", fe(ReadDeviceId), fe(WriteDeviceId), Text;
    DeviceIdOriginal, "device-id-original", fe(ReadDeviceIdOriginal), None, Text;
    Discover, "discover", fe(ReadDiscover), None, Bytes;
    FirmwareVersion, "firmware", Some(Command::Base(BaseCommand::Firmware)), None, Text;
    SuctionLevel, "suction-level", fe(ReadSuctionLevel), fe(WriteSuctionLevel), Byte;
    Flow, "flow", fe(ReadFlow), None, Word;
    Speed, "speed", fe(ReadSpeed), None, Word;
    SelectedFlow, "selected-flow", fe(ReadSelectFlow), fe(WriteSelectFlow), Byte;
    StandIntakes, "stand-intakes", fe(ReadStandIntakes), fe(WriteStandIntakes), Byte;
    IntakeActivation, "intake-activation", fe(ReadIntakeActivation), fe(WriteIntakeActivation), Flag;
    SuctionDelay, "suction-delay", fe(ReadSuctionDelay), fe(WriteSuctionDelay), Word;
    DelayTime, "delay-time", fe(ReadDelayTime), None, Word;
    ActivationPedal, "activation-pedal", fe(ReadActivationPedal), fe(WriteActivationPedal), Flag;
    PedalMode, "pedal-mode", fe(ReadPedalMode), fe(WritePedalMode), PedalMode;
    FilterStatus, "filter-status", fe(ReadFilterStatus), None, Byte;
    ConnectedPedal, "connected-pedal", fe(ReadConnectedPedal), None, Flag;
    FilterSaturation, "filter-saturation", fe(ReadFilterSaturation), None, Byte;
    Pin, "pin", fe(ReadPin), fe(WritePin), Pin;
    StationLocked, "station-locked", fe(ReadStationLocked), fe(WriteStationLocked), Flag;
    Beep, "beep", fe(ReadBeep), fe(WriteBeep), Flag;
    ContinuousSuction, "continuous-suction", fe(ReadContinuousSuction), fe(WriteContinuousSuction), Flag;
    StationError, "station-error", fe(ReadStationError), None, Word;
    DeviceName, "device-name", fe(ReadDeviceName), fe(WriteDeviceName), Text;
    PinEnabled, "pin-enabled", fe(ReadPinEnabled), fe(WritePinEnabled), Flag;
    WorkIntakes, "work-intakes", None, fe(WriteWorkIntakes), Byte;
    Counters, "counters", fe(ReadCounters), None, Counters;
    PartialCounters, "partial-counters", fe(ReadPartialCounters), None, Counters;
    UsbConnectStatus, "usb-connect-status", fe(ReadUsbConnectStatus), fe(WriteUsbConnectStatus), Byte;
    RobotConfig, "robot-config", fe(ReadRobotConfig), fe(WriteRobotConfig), RobotConfig;
    RobotConnectStatus, "robot-connect-status", fe(ReadRobotConnectStatus), fe(WriteRobotConnectStatus), Flag;
}

impl Register {
    pub const fn access(self) -> Access {
        match (self.read_command(), self.write_command()) {
            (Some(_), Some(_)) => Access::ReadWrite,
            (None, Some(_)) => Access::WriteOnly,
            _ => Access::ReadOnly,
        }
    }

    /// Decode a read reply. Length is checked before any byte is used.
    pub fn decode(self, payload: &[u8]) -> std::result::Result<Value, ProtocolError> {
        let command = self
            .read_command()
            .or(self.write_command())
            .unwrap_or(Command::Base(BaseCommand::Ack));
        let bad = |reason: String| ProtocolError::malformed(command, reason);
        let exact = |n: usize| {
            if payload.len() == n {
                Ok(())
            } else {
                Err(bad(format!("expected {} bytes, got {}", n, payload.len())))
            }
        };

        let value = match self.kind() {
            ValueKind::Byte => {
                exact(1)?;
                Value::Byte(payload[0])
            }
            ValueKind::Word => {
                exact(2)?;
                Value::Word(read_le(payload, 0, command)?)
            }
            ValueKind::Flag => {
                exact(1)?;
                match payload[0] {
                    0 => Value::Flag(false),
                    1 => Value::Flag(true),
                    other => return Err(bad(format!("flag byte 0x{:02x}", other))),
                }
            }
            ValueKind::Text => {
                if payload.len() > MAX_TEXT_LEN {
                    return Err(bad(format!("text of {} bytes", payload.len())));
                }
                let end = payload
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |pos| pos + 1);
                let text = std::str::from_utf8(&payload[..end])
                    .map_err(|_| bad("text is not UTF-8".to_string()))?;
                Value::Text(text.to_string())
            }
            ValueKind::Bytes => {
                if payload.len() > MAX_TEXT_LEN {
                    return Err(bad(format!("{} bytes", payload.len())));
                }
                Value::Bytes(payload.to_vec())
            }
            ValueKind::Pin => {
                exact(PIN_LEN)?;
                let pin = Pin::from_bytes(payload).ok_or_else(|| bad("PIN is not 4 digits".into()))?;
                Value::Pin(pin)
            }
            ValueKind::PedalMode => {
                exact(1)?;
                let mode = PedalMode::from_u8(payload[0])
                    .ok_or_else(|| bad(format!("pedal mode 0x{:02x}", payload[0])))?;
                Value::PedalMode(mode)
            }
            ValueKind::Counters => {
                exact(COUNTERS_LEN)?;
                Value::Counters(Counters {
                    plugged_minutes: read_le(payload, 0, command)?,
                    working_minutes: read_le(payload, 4, command)?,
                    suction_minutes: read_le(payload, 8, command)?,
                    idle_minutes: read_le(payload, 12, command)?,
                })
            }
            ValueKind::RobotConfig => {
                exact(ROBOT_CONFIG_LEN)?;
                Value::RobotConfig(RobotConfig {
                    speed: payload[0],
                    parity: payload[1],
                    stop_bits: payload[2],
                    address: payload[3],
                })
            }
        };
        Ok(value)
    }

    /// Encode a value for the write command.
    pub fn encode(self, value: &Value) -> Result<Vec<u8>> {
        let invalid = |reason: String| Error::InvalidValue {
            register: self,
            reason,
        };
        let raw = match (self.kind(), value) {
            (ValueKind::Byte, Value::Byte(v)) => vec![*v],
            (ValueKind::Word, Value::Word(v)) => v.to_le_bytes().to_vec(),
            (ValueKind::Flag, Value::Flag(v)) => vec![u8::from(*v)],
            (ValueKind::Text, Value::Text(s)) => {
                if s.is_empty() || s.len() > MAX_TEXT_LEN {
                    return Err(invalid(format!("text must be 1..={} bytes", MAX_TEXT_LEN)));
                }
                s.as_bytes().to_vec()
            }
            (ValueKind::Bytes, Value::Bytes(b)) => {
                if b.len() > MAX_TEXT_LEN {
                    return Err(invalid(format!("at most {} bytes", MAX_TEXT_LEN)));
                }
                b.clone()
            }
            (ValueKind::Pin, Value::Pin(pin)) => pin.0.to_vec(),
            (ValueKind::PedalMode, Value::PedalMode(mode)) => vec![*mode as u8],
            (ValueKind::Counters, Value::Counters(c)) => {
                let mut buf = vec![0u8; COUNTERS_LEN];
                for (i, v) in [
                    c.plugged_minutes,
                    c.working_minutes,
                    c.suction_minutes,
                    c.idle_minutes,
                ]
                .into_iter()
                .enumerate()
                {
                    buf.pwrite_with(v, i * 4, LE)
                        .map_err(|e| invalid(e.to_string()))?;
                }
                buf
            }
            (ValueKind::RobotConfig, Value::RobotConfig(c)) => {
                vec![c.speed, c.parity, c.stop_bits, c.address]
            }
            (kind, value) => {
                return Err(invalid(format!("expected a {:?} value, got {}", kind, value)));
            }
        };
        Ok(raw)
    }
}

fn read_le<N>(payload: &[u8], offset: usize, command: Command) -> std::result::Result<N, ProtocolError>
where
    N: for<'a> scroll::ctx::TryFromCtx<'a, scroll::Endian, Error = scroll::Error>,
{
    payload
        .pread_with::<N>(offset, LE)
        .map_err(|e| ProtocolError::malformed(command, e.to_string()))
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Register::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::format_err!("unknown register {:?}", s))
    }
}

/// Fire-and-forget writes. Success still needs an `M_ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ResetStation,
    ResetFilter,
    ResetCounters,
    ResetPartialCounters,
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Action::ResetStation,
        Action::ResetFilter,
        Action::ResetCounters,
        Action::ResetPartialCounters,
    ];

    pub const fn command(self) -> Command {
        Command::Fe02(match self {
            Action::ResetStation => Fe02Command::ResetStation,
            Action::ResetFilter => Fe02Command::ResetFilter,
            Action::ResetCounters => Fe02Command::ResetCounters,
            Action::ResetPartialCounters => Fe02Command::ResetPartialCounters,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Action::ResetStation => "reset-station",
            Action::ResetFilter => "reset-filter",
            Action::ResetCounters => "reset-counters",
            Action::ResetPartialCounters => "reset-partial-counters",
        }
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::format_err!("unknown action {:?}", s))
    }
}

/// Four ASCII digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin([u8; PIN_LEN]);

impl Pin {
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let digits: [u8; PIN_LEN] = raw.try_into().ok()?;
        digits.iter().all(u8::is_ascii_digit).then_some(Pin(digits))
    }

    pub fn as_str(&self) -> &str {
        // only ASCII digits are ever stored
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for Pin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Pin::from_bytes(s.as_bytes()).ok_or_else(|| anyhow::format_err!("PIN must be 4 digits"))
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PedalMode {
    Pulse = 0,
    Hold = 1,
}

impl PedalMode {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PedalMode::Pulse),
            1 => Some(PedalMode::Hold),
            _ => None,
        }
    }
}

/// Usage counters, in minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Counters {
    pub plugged_minutes: u32,
    pub working_minutes: u32,
    pub suction_minutes: u32,
    pub idle_minutes: u32,
}

/// Serial link settings towards a robot controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RobotConfig {
    pub speed: u8,
    pub parity: u8,
    pub stop_bits: u8,
    pub address: u8,
}

/// A typed register value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Byte(u8),
    Word(u16),
    Flag(bool),
    Text(String),
    Bytes(Vec<u8>),
    Pin(Pin),
    PedalMode(PedalMode),
    Counters(Counters),
    RobotConfig(RobotConfig),
}

impl Value {
    /// Parse command-line text as a value of `kind`.
    pub fn parse(kind: ValueKind, s: &str) -> anyhow::Result<Value> {
        let s = s.trim();
        let value = match kind {
            ValueKind::Byte => Value::Byte(s.parse()?),
            ValueKind::Word => Value::Word(s.parse()?),
            ValueKind::Flag => match s.to_ascii_lowercase().as_str() {
                "1" | "on" | "true" | "yes" => Value::Flag(true),
                "0" | "off" | "false" | "no" => Value::Flag(false),
                _ => anyhow::bail!("expected on/off, got {:?}", s),
            },
            ValueKind::Text => Value::Text(s.to_string()),
            ValueKind::Bytes => Value::Bytes(hex::decode(s)?),
            ValueKind::Pin => Value::Pin(s.parse()?),
            ValueKind::PedalMode => match s.to_ascii_lowercase().as_str() {
                "pulse" => Value::PedalMode(PedalMode::Pulse),
                "hold" => Value::PedalMode(PedalMode::Hold),
                _ => anyhow::bail!("expected pulse or hold, got {:?}", s),
            },
            ValueKind::Counters => anyhow::bail!("counters are read-only"),
            ValueKind::RobotConfig => {
                let fields = s
                    .split(',')
                    .map(|f| f.trim().parse::<u8>())
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let [speed, parity, stop_bits, address] = fields[..] else {
                    anyhow::bail!("expected speed,parity,stop_bits,address");
                };
                Value::RobotConfig(RobotConfig {
                    speed,
                    parity,
                    stop_bits,
                    address,
                })
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Byte(v) => write!(f, "{}", v),
            Value::Word(v) => write!(f, "{}", v),
            Value::Flag(v) => write!(f, "{}", if *v { "on" } else { "off" }),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "{}", hex::encode(b)),
            Value::Pin(_) => write!(f, "****"),
            Value::PedalMode(m) => write!(f, "{:?}", m),
            Value::Counters(c) => write!(
                f,
                "plugged {}min, working {}min, suction {}min, idle {}min",
                c.plugged_minutes, c.working_minutes, c.suction_minutes, c.idle_minutes
            ),
            Value::RobotConfig(c) => write!(
                f,
                "speed {} parity {} stop bits {} address {}",
                c.speed, c.parity, c.stop_bits, c.address
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_map_one_to_one() {
        let mut seen = std::collections::HashSet::new();
        for reg in Register::ALL {
            for cmd in [reg.read_command(), reg.write_command()].into_iter().flatten() {
                assert!(seen.insert(cmd), "{cmd} used twice");
            }
        }
        for action in Action::ALL {
            assert!(seen.insert(action.command()));
        }
    }

    #[test]
    fn kinds_agree_with_registry_lengths() {
        for reg in Register::ALL {
            for cmd in [reg.read_command(), reg.write_command()].into_iter().flatten() {
                let max = cmd.max_payload_len();
                let expected = match reg.kind() {
                    ValueKind::Byte | ValueKind::Flag | ValueKind::PedalMode => 1,
                    ValueKind::Word => 2,
                    ValueKind::Text | ValueKind::Bytes => MAX_TEXT_LEN,
                    ValueKind::Pin => PIN_LEN,
                    ValueKind::Counters => COUNTERS_LEN,
                    ValueKind::RobotConfig => ROBOT_CONFIG_LEN,
                };
                assert_eq!(max, expected, "{reg}");
            }
        }
    }

    #[test]
    fn access_modes() {
        assert_eq!(Register::SuctionLevel.access(), Access::ReadWrite);
        assert_eq!(Register::Flow.access(), Access::ReadOnly);
        assert_eq!(Register::WorkIntakes.access(), Access::WriteOnly);
    }

    #[test]
    fn decode_validates_length() {
        assert_eq!(Register::SuctionLevel.decode(&[5]).unwrap(), Value::Byte(5));
        assert!(Register::SuctionLevel.decode(&[]).is_err());
        assert!(Register::SuctionLevel.decode(&[5, 0]).is_err());
        assert_eq!(Register::Speed.decode(&[0x10, 0x27]).unwrap(), Value::Word(10000));
        assert!(Register::Speed.decode(&[0x10]).is_err());
        assert!(Register::Beep.decode(&[2]).is_err());
        assert!(Register::PedalMode.decode(&[7]).is_err());
        assert!(Register::Pin.decode(b"12a4").is_err());
    }

    #[test]
    fn decode_composites() {
        let mut raw = vec![0u8; COUNTERS_LEN];
        raw[0] = 10;
        raw[4] = 20;
        raw[13] = 1;
        assert_eq!(
            Register::Counters.decode(&raw).unwrap(),
            Value::Counters(Counters {
                plugged_minutes: 10,
                working_minutes: 20,
                suction_minutes: 0,
                idle_minutes: 256,
            })
        );
        assert_eq!(
            Register::DeviceName.decode(b"bench\0\0").unwrap(),
            Value::Text("bench".into())
        );
        assert_eq!(
            Register::Pin.decode(b"0420").unwrap(),
            Value::Pin("0420".parse().unwrap())
        );
    }

    #[test]
    fn encode_checks_kind_and_size() {
        assert_eq!(Register::SuctionDelay.encode(&Value::Word(300)).unwrap(), vec![44, 1]);
        assert_eq!(Register::Beep.encode(&Value::Flag(true)).unwrap(), vec![1]);
        assert!(matches!(
            Register::Beep.encode(&Value::Byte(1)),
            Err(Error::InvalidValue { register: Register::Beep, .. })
        ));
        assert!(Register::DeviceName.encode(&Value::Text("x".repeat(33))).is_err());
        assert!(Register::DeviceName.encode(&Value::Text(String::new())).is_err());
    }

    #[test]
    fn parse_from_text() {
        assert_eq!("suction-level".parse::<Register>().unwrap(), Register::SuctionLevel);
        assert!("nope".parse::<Register>().is_err());
        assert_eq!("reset-counters".parse::<Action>().unwrap(), Action::ResetCounters);
        assert_eq!(Value::parse(ValueKind::Flag, "on").unwrap(), Value::Flag(true));
        assert_eq!(
            Value::parse(ValueKind::PedalMode, "hold").unwrap(),
            Value::PedalMode(PedalMode::Hold)
        );
        assert_eq!(
            Value::parse(ValueKind::RobotConfig, "3, 0, 1, 7").unwrap(),
            Value::RobotConfig(RobotConfig {
                speed: 3,
                parity: 0,
                stop_bits: 1,
                address: 7
            })
        );
        assert!(Value::parse(ValueKind::Pin, "123").is_err());
    }
}
