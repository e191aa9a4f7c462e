//! Disassembly navigation.
//!
//! A [`DisassemblyView`] keeps an anchor address and the instructions
//! decoded from it. It is either FOLLOWING the program counter or MANUAL
//! after the user moved it:
//!
//! ```text
//!              navigate(cmd)
//!   FOLLOWING ───────────────▶ MANUAL
//!       ▲                         │
//!       └──── set_follow(true) ───┘
//!             toggle_follow()
//! ```
//!
//! Navigation commands are queued (one slot, last wins) and applied on the
//! next [`DisassemblyView::refresh`]. Every step re-reads memory; nothing is
//! trusted from the previous frame because the machine may have changed it.
//! A failed step leaves the view exactly as it was.

mod resync;

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::client::RpcClient;
use crate::disasm::{DecodedInstruction, Decoder, MAX_INSTRUCTION_SIZE};
use crate::error::Result;
use crate::transport::{BoxFuture, Transport};

pub use resync::{
    find_end_start, find_prev_start, find_prev_start_n, find_start_with_pc_on_bottom,
    MIN_LOOKBACK,
};

/// Anything that can read emulator memory.
///
/// Reads wrap at 0x10000.
pub trait MemorySource: Send + Sync {
    fn read_memory(&self, addr: u16, len: usize) -> BoxFuture<'_, Result<Bytes>>;
}

impl<T: Transport> MemorySource for RpcClient<T> {
    fn read_memory(&self, addr: u16, len: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(RpcClient::read_memory(self, addr, len))
    }
}

impl<M: MemorySource + ?Sized> MemorySource for Arc<M> {
    fn read_memory(&self, addr: u16, len: usize) -> BoxFuture<'_, Result<Bytes>> {
        (**self).read_memory(addr, len)
    }
}

/// User navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavCommand {
    LineUp,
    LineDown,
    PageUp,
    PageDown,
    /// Jump to address 0.
    Home,
    /// Show the last instructions before 0x10000.
    End,
    Goto(u16),
}

/// Who drives the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewMode {
    Following,
    Manual,
}

/// Scrollable disassembly of emulator memory.
#[derive(Debug)]
pub struct DisassemblyView {
    decoder: Arc<Decoder>,
    height: usize,
    mode: ViewMode,
    anchor: Option<u16>,
    lines: Vec<DecodedInstruction>,
    pending: Option<NavCommand>,
    last_error: Option<String>,
}

impl DisassemblyView {
    /// New view in FOLLOWING mode. `height` is clamped to at least 1.
    pub fn new(decoder: Arc<Decoder>, height: usize) -> Self {
        Self {
            decoder,
            height: height.max(1),
            mode: ViewMode::Following,
            anchor: None,
            lines: Vec::new(),
            pending: None,
            last_error: None,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Takes effect on the next refresh.
    pub fn set_height(&mut self, height: usize) {
        self.height = height.max(1);
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn is_following(&self) -> bool {
        self.mode == ViewMode::Following
    }

    pub fn anchor(&self) -> Option<u16> {
        self.anchor
    }

    pub fn lines(&self) -> &[DecodedInstruction] {
        &self.lines
    }

    pub fn pending(&self) -> Option<NavCommand> {
        self.pending
    }

    /// Error from the last failed refresh, cleared by a successful one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Queue a navigation step and switch to MANUAL.
    ///
    /// Replaces any step still waiting for a refresh.
    pub fn navigate(&mut self, command: NavCommand) {
        self.mode = ViewMode::Manual;
        self.pending = Some(command);
    }

    pub fn set_follow(&mut self, follow: bool) {
        self.mode = if follow {
            ViewMode::Following
        } else {
            ViewMode::Manual
        };
    }

    pub fn toggle_follow(&mut self) {
        self.set_follow(!self.is_following());
    }

    /// First `height` decoded rows.
    pub fn visible_rows(&self, height: usize) -> &[DecodedInstruction] {
        &self.lines[..height.min(self.lines.len())]
    }

    /// Apply the pending step, track `pc` when following, and re-decode.
    ///
    /// Returns false when a read failed; the anchor and lines are then left
    /// untouched and the error is kept in [`last_error`](Self::last_error).
    /// The pending step is consumed either way.
    pub async fn refresh<M>(&mut self, mem: &M, pc: Option<u16>) -> bool
    where
        M: MemorySource + ?Sized,
    {
        let pending = self.pending.take();
        match self.resolve(mem, pending, pc).await {
            Ok((anchor, lines)) => {
                self.anchor = Some(anchor);
                self.lines = lines;
                self.last_error = None;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, ?pending, "disassembly refresh aborted");
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    async fn resolve<M>(
        &self,
        mem: &M,
        pending: Option<NavCommand>,
        pc: Option<u16>,
    ) -> Result<(u16, Vec<DecodedInstruction>)>
    where
        M: MemorySource + ?Sized,
    {
        let mut anchor = self.anchor.or(pc).unwrap_or(0);
        if let Some(command) = pending {
            anchor = self.apply(mem, anchor, command).await?;
        }
        let mut lines = self.fetch(mem, anchor).await?;

        let Some(pc) = pc.filter(|_| self.is_following()) else {
            return Ok((anchor, lines));
        };

        let target = if pc < anchor {
            Some(pc)
        } else {
            match lines.iter().position(|ins| ins.address == pc) {
                Some(idx) if idx < self.height => None,
                Some(_) => Some(find_start_with_pc_on_bottom(mem, pc, self.height).await?),
                None => {
                    let past_end = lines.last().map_or(true, |last| {
                        pc as usize >= last.address as usize + last.size
                    });
                    if past_end {
                        Some(find_start_with_pc_on_bottom(mem, pc, self.height).await?)
                    } else {
                        // pc points inside a decoded instruction
                        Some(pc)
                    }
                }
            }
        };

        if let Some(new_anchor) = target {
            tracing::debug!(pc, old = anchor, new = new_anchor, "following pc");
            anchor = new_anchor;
            lines = self.fetch(mem, anchor).await?;
        }
        Ok((anchor, lines))
    }

    async fn fetch<M>(&self, mem: &M, anchor: u16) -> Result<Vec<DecodedInstruction>>
    where
        M: MemorySource + ?Sized,
    {
        let len = (self.height * MAX_INSTRUCTION_SIZE).max(MAX_INSTRUCTION_SIZE);
        let bytes = mem.read_memory(anchor, len).await?;
        Ok(self.decoder.decode(anchor, &bytes))
    }

    async fn apply<M>(&self, mem: &M, anchor: u16, command: NavCommand) -> Result<u16>
    where
        M: MemorySource + ?Sized,
    {
        let page = self.height.saturating_sub(1).max(1);
        let next = match command {
            NavCommand::Goto(addr) => addr,
            NavCommand::Home => 0,
            NavCommand::End => find_end_start(mem, self.height).await?,
            NavCommand::LineUp => find_prev_start(mem, anchor).await?,
            NavCommand::PageUp => find_prev_start_n(mem, anchor, page).await?,
            NavCommand::LineDown => self.step_down(mem, anchor, 1).await?,
            NavCommand::PageDown => self.step_down(mem, anchor, page).await?,
        };
        tracing::debug!(?command, from = anchor, to = next, "navigation step");
        Ok(next)
    }

    async fn step_down<M>(&self, mem: &M, anchor: u16, steps: usize) -> Result<u16>
    where
        M: MemorySource + ?Sized,
    {
        let len = (steps + 1) * MAX_INSTRUCTION_SIZE;
        let bytes = mem.read_memory(anchor, len).await?;
        let lines = crate::disasm::decode(anchor, &bytes);
        let Some(last) = lines.len().checked_sub(1) else {
            return Ok(anchor);
        };
        let candidate = lines[steps.min(last)].address;

        // only near the top of memory can a view run out of rows
        if candidate as usize + self.height * MAX_INSTRUCTION_SIZE <= 0xFFFF {
            return Ok(candidate);
        }
        let end = find_end_start(mem, self.height).await?;
        Ok(if candidate > end { end.max(anchor) } else { candidate })
    }
}
