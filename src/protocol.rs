//! Frame codec of the P02 link.
//!
//! ```text
//! +-----+-----+-----+-----+-------------+-----+-----+
//! | STX | SEQ | CMD | LEN | payload ... | BCC | ETX |
//! +-----+-----+-----+-----+-------------+-----+-----+
//! ```
//!
//! BCC is the XOR of SEQ, CMD, LEN and the payload. Replies echo the SEQ of
//! the request they answer.

use std::fmt;

use crate::command::{BaseCommand, Command, Family, classify};
use crate::error::{Error, FrameFault, ProtocolError, Result};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
/// STX, SEQ, CMD, LEN, BCC, ETX
pub const FRAME_OVERHEAD: usize = 6;
const HEADER_LEN: usize = 4;

/// One protocol message: a command id plus its payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Message {
    command: Command,
    payload: Vec<u8>,
}

impl Message {
    /// Build a message, rejecting payloads over the command's limit.
    pub fn new(command: impl Into<Command>, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let command = command.into();
        let payload = payload.into();
        let max = command.max_payload_len();
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                command,
                len: payload.len(),
                max,
            });
        }
        Ok(Message { command, payload })
    }

    pub fn empty(command: impl Into<Command>) -> Self {
        Message {
            command: command.into(),
            payload: Vec::new(),
        }
    }

    pub fn ack() -> Self {
        Message::empty(BaseCommand::Ack)
    }

    pub fn nack(reason: u8) -> Self {
        Message {
            command: BaseCommand::Nack.into(),
            payload: vec![reason],
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is(&self, command: impl Into<Command>) -> bool {
        self.command == command.into()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.command, hex::encode(&self.payload))
    }
}

/// A message bound to a sequence number, as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    pub seq: u8,
    pub message: Message,
}

impl Frame {
    pub fn new(seq: u8, message: Message) -> Self {
        Frame { seq, message }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.seq, &self.message)
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Encode a message. Total, since [`Message`] already bounds its payload.
pub fn encode(seq: u8, message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + message.payload.len());
    buf.push(STX);
    buf.push(seq);
    buf.push(message.command.id());
    buf.push(message.payload.len() as u8);
    buf.extend_from_slice(&message.payload);
    buf.push(checksum(&buf[1..]));
    buf.push(ETX);
    buf
}

/// Outcome of decoding the front of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A valid frame and the number of bytes it occupied.
    Frame { frame: Frame, consumed: usize },
    /// Buffer holds a frame prefix; nothing may be consumed yet.
    Incomplete,
    /// The front of the buffer is unusable; drop `discard` bytes and retry.
    Invalid {
        error: ProtocolError,
        discard: usize,
    },
}

/// Offset of the next plausible frame start after the current one.
fn resync_point(buf: &[u8]) -> usize {
    buf.iter()
        .skip(1)
        .position(|&b| b == STX)
        .map_or(buf.len(), |pos| pos + 1)
}

fn fault(buf: &[u8], fault: FrameFault) -> Decoded {
    Decoded::Invalid {
        error: ProtocolError::CorruptFrame(fault),
        discard: resync_point(buf),
    }
}

/// Decode the frame at the front of `buf`, checking ids against `family`.
pub fn decode(buf: &[u8], family: Family) -> Decoded {
    let Some(&start) = buf.first() else {
        return Decoded::Incomplete;
    };
    if start != STX {
        return fault(buf, FrameFault::BadStart);
    }
    if buf.len() < HEADER_LEN {
        return Decoded::Incomplete;
    }

    let seq = buf[1];
    let raw_cmd = buf[2];
    let len = buf[3] as usize;
    let command = classify(raw_cmd).command();
    if let Some(cmd) = command {
        let max = cmd.max_payload_len();
        if len > max {
            return fault(buf, FrameFault::Oversized { len, max });
        }
    }

    let total = FRAME_OVERHEAD + len;
    if buf.len() < total {
        return Decoded::Incomplete;
    }
    let expected = checksum(&buf[1..HEADER_LEN + len]);
    let actual = buf[HEADER_LEN + len];
    if buf[total - 1] != ETX {
        return fault(buf, FrameFault::BadTrailer);
    }
    if expected != actual {
        return fault(buf, FrameFault::Checksum { expected, actual });
    }

    match command {
        Some(cmd) if family.recognizes(cmd) => Decoded::Frame {
            frame: Frame {
                seq,
                message: Message {
                    command: cmd,
                    payload: buf[HEADER_LEN..HEADER_LEN + len].to_vec(),
                },
            },
            consumed: total,
        },
        _ => Decoded::Invalid {
            error: ProtocolError::UnknownCommand(raw_cmd),
            discard: total,
        },
    }
}

/// Incremental decoder over a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next frame, `None` if more bytes are needed.
    ///
    /// Line noise before a start byte is dropped silently; faulty frames are
    /// reported once and skipped.
    pub fn next_frame(&mut self, family: Family) -> Option<std::result::Result<Frame, ProtocolError>> {
        let noise = self
            .buffer
            .iter()
            .position(|&b| b == STX)
            .unwrap_or(self.buffer.len());
        if noise > 0 {
            log::trace!("dropping {} bytes of line noise", noise);
            self.buffer.drain(..noise);
        }

        match decode(&self.buffer, family) {
            Decoded::Frame { frame, consumed } => {
                self.buffer.drain(..consumed);
                Some(Ok(frame))
            }
            Decoded::Incomplete => {
                // a stray STX can shadow a complete frame behind it
                let skip = self
                    .buffer
                    .iter()
                    .enumerate()
                    .skip(1)
                    .filter(|&(_, &b)| b == STX)
                    .map(|(i, _)| i)
                    .find(|&i| matches!(decode(&self.buffer[i..], family), Decoded::Frame { .. }))?;
                log::trace!("dropping {} bytes before a complete frame", skip);
                self.buffer.drain(..skip);
                self.next_frame(family)
            }
            Decoded::Invalid { error, discard } => {
                log::warn!("discarding {} bytes: {}", discard, error);
                self.buffer.drain(..discard);
                Some(Err(error))
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
