//! Firmware update orchestration.
//!
//! `M_CLEARMEMFLASH`, then per block `M_SENDMEMADDRESS` followed by
//! `M_SENDMEMDATA` chunks and `M_ENDPROGR`. Blocks are chained with
//! `M_CONTINUEUPD`; the last one is closed with `M_ENDUPD` and `M_CLEARING`.

use crate::command::Fe02Command;
use crate::error::{Error, Result};
use crate::format::FirmwareImage;
use crate::protocol::Message;
use crate::register::{Register, Value};
use crate::session::{LinkSession, expect_ack};
use crate::station::read_register;
use crate::transport::Transport;

/// Where an update stands. Failures report the phase they happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdatePhase {
    /// Before the erase, and again once the update has completed.
    Idle,
    /// Flash erased, first address pending.
    Cleared,
    /// Next block's address pending.
    Addressing,
    Transferring,
    /// Block programmed, closing it and then the update.
    Ending,
    Aborted,
}

/// What the device flash may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashState {
    Untouched,
    /// Erase acknowledged, image not complete. Only a fresh update helps.
    PossiblyPartial,
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Skip the station error check and enter update mode with
    /// `M_FORCEUPDATE`. For devices in a degraded state.
    pub force: bool,
}

/// Snapshot of an update for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStatus {
    pub phase: UpdatePhase,
    pub flash: FlashState,
    /// Next flash address to be written.
    pub cursor: u32,
    pub bytes_done: usize,
    pub bytes_total: usize,
}

/// State of one running firmware update.
#[derive(Debug)]
pub struct UpdateContext {
    image: FirmwareImage,
    phase: UpdatePhase,
    flash: FlashState,
    block: usize,
    /// Acknowledged bytes within the current block.
    offset: usize,
    bytes_done: usize,
}

impl UpdateContext {
    /// Run the entry checks and erase the flash.
    ///
    /// On failure nothing was written and the session is back to `Ready`.
    pub fn begin<T: Transport>(
        session: &mut LinkSession<T>,
        image: FirmwareImage,
        options: UpdateOptions,
    ) -> Result<Self> {
        let mut ctx = UpdateContext {
            image,
            phase: UpdatePhase::Idle,
            flash: FlashState::Untouched,
            block: 0,
            offset: 0,
            bytes_done: 0,
        };
        log::info!(
            "firmware update: {} bytes in {} block(s){}",
            ctx.image.len(),
            ctx.image.blocks().len(),
            if options.force { ", forced" } else { "" }
        );
        if let Err(e) = ctx.enter(session, options) {
            return Err(ctx.fail(session, e));
        }
        Ok(ctx)
    }

    fn enter<T: Transport>(&mut self, session: &mut LinkSession<T>, options: UpdateOptions) -> Result<()> {
        session.check_legal(Fe02Command::ClearMemFlash.into())?;
        if options.force {
            log::warn!("forcing update mode");
            self.strict_step(session, Message::empty(Fe02Command::ForceUpdate))?;
        } else if let Value::Word(code) = read_register(session, Register::StationError)? {
            if code != 0 {
                return Err(Error::DeviceNotUpdatable { code });
            }
        }

        let policy = session.config().chunk;
        let timeout = session.config().erase_timeout;
        let clear = Message::empty(Fe02Command::ClearMemFlash);
        session.request(&clear, timeout, policy, expect_ack(clear.command()))?;
        self.flash = FlashState::PossiblyPartial;
        self.set_phase(UpdatePhase::Cleared);
        Ok(())
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn flash(&self) -> FlashState {
        self.flash
    }

    pub fn is_done(&self) -> bool {
        self.flash == FlashState::Complete
    }

    pub fn cursor(&self) -> u32 {
        self.image
            .blocks()
            .get(self.block)
            .map_or(0, |b| b.address.wrapping_add(self.offset as u32))
    }

    pub fn status(&self) -> UpdateStatus {
        UpdateStatus {
            phase: self.phase,
            flash: self.flash,
            cursor: self.cursor(),
            bytes_done: self.bytes_done,
            bytes_total: self.image.len(),
        }
    }

    fn set_phase(&mut self, phase: UpdatePhase) {
        if self.phase != phase {
            log::debug!("update: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Perform the next wire step: an address, one chunk, or a block/update
    /// closing sequence. Returns `true` once the update is complete.
    ///
    /// Any failure aborts the update.
    pub fn step<T: Transport>(&mut self, session: &mut LinkSession<T>) -> Result<bool> {
        if self.phase == UpdatePhase::Aborted {
            return Err(Error::NoUpdateInProgress);
        }
        if self.is_done() {
            return Ok(true);
        }
        match self.advance(session) {
            Ok(()) => Ok(self.is_done()),
            Err(e) => Err(self.fail(session, e)),
        }
    }

    fn advance<T: Transport>(&mut self, session: &mut LinkSession<T>) -> Result<()> {
        let chunk_size = session.config().chunk_size;
        let block_count = self.image.blocks().len();
        let block = &self.image.blocks()[self.block];

        match self.phase {
            UpdatePhase::Cleared | UpdatePhase::Addressing => {
                let address = block.address.to_le_bytes().to_vec();
                log::debug!("block {} at {:#010x}", self.block, block.address);
                self.set_phase(UpdatePhase::Addressing);
                self.strict_step(session, Message::new(Fe02Command::SendMemAddress, address)?)?;
                self.set_phase(UpdatePhase::Transferring);
            }
            UpdatePhase::Transferring if self.offset < block.data.len() => {
                let end = (self.offset + chunk_size).min(block.data.len());
                let chunk = block.data[self.offset..end].to_vec();
                let len = chunk.len();
                self.chunk_step(session, Message::new(Fe02Command::SendMemData, chunk)?)?;
                self.offset += len;
                self.bytes_done += len;
            }
            UpdatePhase::Transferring => {
                self.set_phase(UpdatePhase::Ending);
                self.strict_step(session, Message::empty(Fe02Command::EndProgramming))?;
                if self.block + 1 < block_count {
                    self.strict_step(session, Message::empty(Fe02Command::ContinueUpdate))?;
                    self.block += 1;
                    self.offset = 0;
                    self.set_phase(UpdatePhase::Addressing);
                }
            }
            UpdatePhase::Ending => {
                self.strict_step(session, Message::empty(Fe02Command::EndUpdate))?;
                self.flash = FlashState::Complete;
                // housekeeping only, the image is already in place
                if let Err(e) = self.strict_step(session, Message::empty(Fe02Command::Clearing)) {
                    log::warn!("clearing after update failed: {}", e);
                    session.note_error(&e);
                }
                session.end_update(false);
                self.set_phase(UpdatePhase::Idle);
                log::info!("firmware update complete, {} bytes", self.bytes_done);
            }
            UpdatePhase::Idle | UpdatePhase::Aborted => return Err(Error::NoUpdateInProgress),
        }
        Ok(())
    }

    /// One data chunk with the per-chunk retry budget. A NACK is retried in
    /// place; the cursor only moves on ACK.
    fn chunk_step<T: Transport>(&self, session: &mut LinkSession<T>, msg: Message) -> Result<()> {
        let policy = session.config().chunk;
        let timeout = session.config().exchange_timeout;
        session.request(&msg, timeout, policy, expect_ack(msg.command()))
    }

    /// Any other update command. A NACK aborts the update at once.
    fn strict_step<T: Transport>(&self, session: &mut LinkSession<T>, msg: Message) -> Result<()> {
        let policy = session.config().chunk;
        let timeout = session.config().exchange_timeout;
        session.request_strict(&msg, timeout, policy, expect_ack(msg.command()))
    }

    /// Abort without touching the wire. The session falls back to `Ready`
    /// if the flash was never erased, otherwise it is faulted.
    pub fn abort<T: Transport>(&mut self, session: &mut LinkSession<T>) -> UpdateStatus {
        log::warn!(
            "firmware update aborted in {:?} phase, flash {:?}",
            self.phase,
            self.flash
        );
        session.end_update(self.flash != FlashState::Untouched);
        self.set_phase(UpdatePhase::Aborted);
        self.status()
    }

    pub(crate) fn fail<T: Transport>(&mut self, session: &mut LinkSession<T>, source: Error) -> Error {
        let phase = self.phase;
        let flash = self.flash;
        self.abort(session);
        let err = Error::UpdateFailed {
            phase,
            flash,
            source: Box::new(source),
        };
        session.note_error(&err);
        err
    }
}
