//! Scripted in-memory peer for tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Transport;
use crate::command::{BaseCommand, Command, Family};
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameDecoder, Message, encode};
use crate::register::{Access, Register};

/// What the peer answers to one request.
#[derive(Debug, Clone)]
pub(crate) enum PeerReply {
    /// A valid frame echoing the request's sequence number.
    Message(Message),
    /// A valid frame carrying the previous sequence number.
    Stale(Message),
    /// A frame with a broken checksum.
    Corrupt(Message),
    Raw(Vec<u8>),
    /// Nothing at all, the host times out.
    Silence,
    /// The link drops.
    Disconnect,
}

pub(crate) type SentLog = Arc<Mutex<Vec<Message>>>;

type Handler = Box<dyn FnMut(&Message) -> Vec<PeerReply> + Send>;

pub(crate) struct ScriptedPeer {
    decoder: FrameDecoder,
    handler: Handler,
    pending: VecDeque<Option<Vec<u8>>>,
    sent: SentLog,
}

impl ScriptedPeer {
    pub fn new(handler: impl FnMut(&Message) -> Vec<PeerReply> + Send + 'static) -> Self {
        ScriptedPeer {
            decoder: FrameDecoder::new(),
            handler: Box::new(handler),
            pending: VecDeque::new(),
            sent: SentLog::default(),
        }
    }

    /// Every message the host sent, shared with the peer.
    pub fn sent(&self) -> SentLog {
        self.sent.clone()
    }

    fn respond(&mut self, frame: Frame) {
        self.sent.lock().push(frame.message.clone());
        for reply in (self.handler)(&frame.message) {
            match reply {
                PeerReply::Message(msg) => self.pending.push_back(Some(encode(frame.seq, &msg))),
                PeerReply::Stale(msg) => {
                    self.pending
                        .push_back(Some(encode(frame.seq.wrapping_sub(1), &msg)));
                }
                PeerReply::Corrupt(msg) => {
                    let mut raw = encode(frame.seq, &msg);
                    let bcc = raw.len() - 2;
                    raw[bcc] ^= 0x5a;
                    self.pending.push_back(Some(raw));
                }
                PeerReply::Raw(raw) => self.pending.push_back(Some(raw)),
                PeerReply::Silence => {}
                PeerReply::Disconnect => self.pending.push_back(None),
            }
        }
    }
}

impl Transport for ScriptedPeer {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.decoder.push(raw);
        while let Some(frame) = self.decoder.next_frame(Family::Fe02) {
            let frame = frame.map_err(|e| Error::Transport(io::Error::other(e)))?;
            self.respond(frame);
        }
        Ok(())
    }

    fn recv_raw(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        match self.pending.pop_front() {
            Some(Some(raw)) => Ok(raw),
            Some(None) => Err(Error::Transport(io::ErrorKind::ConnectionReset.into())),
            None => Err(Error::Timeout),
        }
    }
}

/// A well behaved station: answers the handshake, keeps register values,
/// acknowledges actions and every update step.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimulatedStation {
    pub registers: HashMap<Register, Vec<u8>>,
}

impl SimulatedStation {
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        registers.insert(Register::SuctionLevel, vec![5]);
        registers.insert(Register::FirmwareVersion, b"FE-2.04".to_vec());
        registers.insert(Register::DeviceId, b"FAE-2C".to_vec());
        registers.insert(Register::StationError, vec![0, 0]);
        registers.insert(Register::DeviceName, b"bench-3".to_vec());
        registers.insert(Register::PedalMode, vec![0]);
        SimulatedStation { registers }
    }

    pub fn handle(&mut self, msg: &Message) -> Vec<PeerReply> {
        let cmd = msg.command();
        if cmd == Command::Base(BaseCommand::Handshake) {
            return vec![PeerReply::Message(Message::ack())];
        }
        if cmd == Command::Base(BaseCommand::Syn) {
            return vec![PeerReply::Message(Message::empty(BaseCommand::Syn))];
        }
        if let Some(reg) = Register::ALL.iter().find(|r| r.read_command() == Some(cmd)) {
            return match self.registers.get(reg) {
                Some(value) => vec![PeerReply::Message(
                    Message::new(cmd, value.clone()).expect("stored value fits"),
                )],
                None => vec![PeerReply::Message(Message::nack(0x01))],
            };
        }
        if let Some(reg) = Register::ALL.iter().find(|r| r.write_command() == Some(cmd)) {
            if reg.access() != Access::WriteOnly {
                self.registers.insert(*reg, msg.payload().to_vec());
            }
            return vec![PeerReply::Message(Message::ack())];
        }
        // actions, reset and every update step
        vec![PeerReply::Message(Message::ack())]
    }
}
