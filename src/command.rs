//! Command registry: the closed vocabulary of the P02 protocol.
//!
//! Wire ids are classified into the BASE namespace (link control shared by all
//! device families) or the FE_02 namespace (fume extractor registers and
//! firmware update opcodes). FE_02 re-declares the BASE link-control ids with
//! identical values; those always classify as BASE.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{base, fe02};
use crate::error::ProtocolError;

/// Longest text payload (device name, device id, firmware version).
pub const MAX_TEXT_LEN: usize = 32;
/// Largest `M_SENDMEMDATA` chunk.
pub const MAX_DATA_CHUNK: usize = 128;
/// Four little-endian u32 counters.
pub const COUNTERS_LEN: usize = 16;
pub const PIN_LEN: usize = 4;
pub const ROBOT_CONFIG_LEN: usize = 4;

macro_rules! command_set {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:path => $len:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Every member of the namespace.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            pub const fn from_u8(raw: u8) -> Option<Self> {
                match raw {
                    $( v if v == $value => Some($name::$variant), )+
                    _ => None,
                }
            }

            pub const fn id(self) -> u8 {
                self as u8
            }

            /// Payload carried by the data-bearing direction of this command.
            pub const fn payload_len(self) -> PayloadLen {
                match self {
                    $( $name::$variant => $len, )+
                }
            }
        }
    };
}

command_set! {
    /// Link-control commands shared by every device family.
    BaseCommand {
        Handshake = base::M_HS => PayloadLen::Empty,
        Ack = base::M_ACK => PayloadLen::Empty,
        /// Optional one byte reason code.
        Nack = base::M_NACK => PayloadLen::UpTo(1),
        Syn = base::M_SYN => PayloadLen::Empty,
        Reset = base::M_RESET => PayloadLen::Empty,
        /// Firmware version text in the reply.
        Firmware = base::M_FIRMWARE => PayloadLen::UpTo(MAX_TEXT_LEN),
    }
}

command_set! {
    /// Fume extractor (FE_02) commands that are not BASE re-declarations.
    Fe02Command {
        EndOfTransmission = fe02::M_EOT => PayloadLen::Empty,
        ReadDeviceIdOriginal = fe02::M_R_DEVICEIDORIGINAL => PayloadLen::UpTo(MAX_TEXT_LEN),
        ReadDiscover = fe02::M_R_DISCOVER => PayloadLen::UpTo(MAX_TEXT_LEN),
        ReadDeviceId = fe02::M_R_DEVICEID => PayloadLen::UpTo(MAX_TEXT_LEN),
        WriteDeviceId = fe02::M_W_DEVICEID => PayloadLen::UpTo(MAX_TEXT_LEN),
        ClearMemFlash = fe02::M_CLEARMEMFLASH => PayloadLen::Empty,
        /// Little-endian u32 flash address.
        SendMemAddress = fe02::M_SENDMEMADDRESS => PayloadLen::Exact(4),
        SendMemData = fe02::M_SENDMEMDATA => PayloadLen::UpTo(MAX_DATA_CHUNK),
        EndProgramming = fe02::M_ENDPROGR => PayloadLen::Empty,
        EndUpdate = fe02::M_ENDUPD => PayloadLen::Empty,
        ContinueUpdate = fe02::M_CONTINUEUPD => PayloadLen::Empty,
        Clearing = fe02::M_CLEARING => PayloadLen::Empty,
        ForceUpdate = fe02::M_FORCEUPDATE => PayloadLen::Empty,
        ReadSuctionLevel = fe02::M_R_SUCTIONLEVEL => PayloadLen::Exact(1),
        WriteSuctionLevel = fe02::M_W_SUCTIONLEVEL => PayloadLen::Exact(1),
        ReadFlow = fe02::M_R_FLOW => PayloadLen::Exact(2),
        ReadSpeed = fe02::M_R_SPEED => PayloadLen::Exact(2),
        ReadSelectFlow = fe02::M_R_SELECTFLOW => PayloadLen::Exact(1),
        WriteSelectFlow = fe02::M_W_SELECTFLOW => PayloadLen::Exact(1),
        ReadStandIntakes = fe02::M_R_STANDINTAKES => PayloadLen::Exact(1),
        WriteStandIntakes = fe02::M_W_STANDINTAKES => PayloadLen::Exact(1),
        ReadIntakeActivation = fe02::M_R_INTAKEACTIVATION => PayloadLen::Exact(1),
        WriteIntakeActivation = fe02::M_W_INTAKEACTIVATION => PayloadLen::Exact(1),
        ReadSuctionDelay = fe02::M_R_SUCTIONDELAY => PayloadLen::Exact(2),
        WriteSuctionDelay = fe02::M_W_SUCTIONDELAY => PayloadLen::Exact(2),
        ReadDelayTime = fe02::M_R_DELAYTIME => PayloadLen::Exact(2),
        ReadActivationPedal = fe02::M_R_ACTIVATIONPEDAL => PayloadLen::Exact(1),
        WriteActivationPedal = fe02::M_W_ACTIVATIONPEDAL => PayloadLen::Exact(1),
        ReadPedalMode = fe02::M_R_PEDALMODE => PayloadLen::Exact(1),
        WritePedalMode = fe02::M_W_PEDALMODE => PayloadLen::Exact(1),
        ReadFilterStatus = fe02::M_R_FILTERSTATUS => PayloadLen::Exact(1),
        ResetFilter = fe02::M_R_RESETFILTER => PayloadLen::Empty,
        ReadConnectedPedal = fe02::M_R_CONNECTEDPEDAL => PayloadLen::Exact(1),
        ReadFilterSaturation = fe02::M_R_FILTERSAT => PayloadLen::Exact(1),
        ResetStation = fe02::M_RESETSTATION => PayloadLen::Empty,
        ReadPin = fe02::M_R_PIN => PayloadLen::Exact(PIN_LEN),
        WritePin = fe02::M_W_PIN => PayloadLen::Exact(PIN_LEN),
        ReadStationLocked = fe02::M_R_STATIONLOCKED => PayloadLen::Exact(1),
        WriteStationLocked = fe02::M_W_STATIONLOCKED => PayloadLen::Exact(1),
        ReadBeep = fe02::M_R_BEEP => PayloadLen::Exact(1),
        WriteBeep = fe02::M_W_BEEP => PayloadLen::Exact(1),
        ReadContinuousSuction = fe02::M_R_CONTINUOUSSUCTION => PayloadLen::Exact(1),
        WriteContinuousSuction = fe02::M_W_CONTINUOUSSUCTION => PayloadLen::Exact(1),
        ReadStationError = fe02::M_R_STATERROR => PayloadLen::Exact(2),
        ReadDeviceName = fe02::M_R_DEVICENAME => PayloadLen::UpTo(MAX_TEXT_LEN),
        WriteDeviceName = fe02::M_W_DEVICENAME => PayloadLen::UpTo(MAX_TEXT_LEN),
        ReadPinEnabled = fe02::M_R_PINENABLED => PayloadLen::Exact(1),
        WritePinEnabled = fe02::M_W_PINENABLED => PayloadLen::Exact(1),
        WriteWorkIntakes = fe02::M_W_WORKINTAKES => PayloadLen::Exact(1),
        ReadCounters = fe02::M_R_COUNTERS => PayloadLen::Exact(COUNTERS_LEN),
        ResetCounters = fe02::M_R_RESETCOUNTERS => PayloadLen::Empty,
        ReadPartialCounters = fe02::M_R_COUNTERSP => PayloadLen::Exact(COUNTERS_LEN),
        ResetPartialCounters = fe02::M_R_RESETCOUNTERSP => PayloadLen::Empty,
        ReadUsbConnectStatus = fe02::M_R_USB_CONNECTSTATUS => PayloadLen::Exact(1),
        WriteUsbConnectStatus = fe02::M_W_USB_CONNECTSTATUS => PayloadLen::Exact(1),
        ReadRobotConfig = fe02::M_R_RBT_CONNCONFIG => PayloadLen::Exact(ROBOT_CONFIG_LEN),
        WriteRobotConfig = fe02::M_W_RBT_CONNCONFIG => PayloadLen::Exact(ROBOT_CONFIG_LEN),
        ReadRobotConnectStatus = fe02::M_R_RBT_CONNECTSTATUS => PayloadLen::Exact(1),
        WriteRobotConnectStatus = fe02::M_W_RBT_CONNECTSTATUS => PayloadLen::Exact(1),
    }
}

/// Size of a command's payload on the wire.
///
/// Read requests always go out empty; the length describes the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadLen {
    Empty,
    Exact(usize),
    UpTo(usize),
}

impl PayloadLen {
    pub const fn max(self) -> usize {
        match self {
            PayloadLen::Empty => 0,
            PayloadLen::Exact(n) | PayloadLen::UpTo(n) => n,
        }
    }

    /// Whether a data-bearing payload of `len` bytes is well formed.
    pub const fn accepts(self, len: usize) -> bool {
        match self {
            PayloadLen::Empty => len == 0,
            PayloadLen::Exact(n) => len == n,
            PayloadLen::UpTo(n) => len <= n,
        }
    }
}

/// A command id that is valid on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    Base(BaseCommand),
    Fe02(Fe02Command),
}

/// What the session does with a command when the device rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Handshake, sync, acknowledgements, end of transmission.
    Link,
    /// Register reads/writes, actions, identity and reset.
    Register,
    /// Firmware update steps.
    Update,
}

impl Command {
    pub const fn id(self) -> u8 {
        match self {
            Command::Base(c) => c.id(),
            Command::Fe02(c) => c.id(),
        }
    }

    pub const fn payload_len(self) -> PayloadLen {
        match self {
            Command::Base(c) => c.payload_len(),
            Command::Fe02(c) => c.payload_len(),
        }
    }

    pub const fn max_payload_len(self) -> usize {
        self.payload_len().max()
    }

    pub const fn class(self) -> CommandClass {
        use Fe02Command::*;
        match self {
            Command::Base(BaseCommand::Reset | BaseCommand::Firmware) => CommandClass::Register,
            Command::Base(_) | Command::Fe02(EndOfTransmission) => CommandClass::Link,
            Command::Fe02(
                ClearMemFlash | SendMemAddress | SendMemData | EndProgramming | EndUpdate
                | ContinueUpdate | Clearing | ForceUpdate,
            ) => CommandClass::Update,
            Command::Fe02(_) => CommandClass::Register,
        }
    }

    /// Commands that move a `Ready` session into update mode.
    pub const fn enters_update(self) -> bool {
        matches!(
            self,
            Command::Fe02(Fe02Command::ClearMemFlash | Fe02Command::ForceUpdate)
        )
    }

    /// Status queries that stay legal while an update is in progress.
    pub const fn is_status_query(self) -> bool {
        matches!(self, Command::Fe02(Fe02Command::ReadStationError))
    }
}

impl From<BaseCommand> for Command {
    fn from(c: BaseCommand) -> Self {
        Command::Base(c)
    }
}

impl From<Fe02Command> for Command {
    fn from(c: Fe02Command) -> Self {
        Command::Fe02(c)
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        classify(raw)
            .command()
            .ok_or(ProtocolError::UnknownCommand(raw))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Base(c) => write!(f, "BASE::{:?}(0x{:02x})", c, c.id()),
            Command::Fe02(c) => write!(f, "FE_02::{:?}(0x{:02x})", c, c.id()),
        }
    }
}

/// Result of classifying a raw wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Base(BaseCommand),
    Fe02(Fe02Command),
    Unknown(u8),
}

impl Classification {
    pub fn command(self) -> Option<Command> {
        match self {
            Classification::Base(c) => Some(Command::Base(c)),
            Classification::Fe02(c) => Some(Command::Fe02(c)),
            Classification::Unknown(_) => None,
        }
    }
}

/// Total classification of a wire byte. BASE wins for shared ids.
pub fn classify(raw: u8) -> Classification {
    if let Some(c) = BaseCommand::from_u8(raw) {
        Classification::Base(c)
    } else if let Some(c) = Fe02Command::from_u8(raw) {
        Classification::Fe02(c)
    } else {
        Classification::Unknown(raw)
    }
}

/// Payload size for a raw id, `None` for unknown ids.
pub fn expected_payload_len(raw: u8) -> Option<PayloadLen> {
    classify(raw).command().map(Command::payload_len)
}

/// Protocol family a session speaks.
///
/// Before the handshake completes only BASE link control is recognised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Base,
    #[default]
    #[serde(alias = "FE_02")]
    Fe02,
}

impl Family {
    pub const fn recognizes(self, command: Command) -> bool {
        match (self, command) {
            (_, Command::Base(_)) => true,
            (Family::Fe02, Command::Fe02(_)) => true,
            (Family::Base, Command::Fe02(_)) => false,
        }
    }
}
