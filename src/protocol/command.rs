//! Logical commands and their binding to transport opcodes.
//!
//! Callers speak in [`Command`]s. The [`CommandTable`] built from the
//! peer's capability reply decides which of them have an opcode on this
//! connection; a command without an entry fails before any I/O.
//!
//! # Example
//!
//! ```
//! use a800mon_client::protocol::{capability, Command, CommandTable};
//!
//! let table = CommandTable::from_capabilities(&[capability::MONITOR_BREAK]);
//! assert_eq!(table.translate(Command::Step).unwrap(), 8);
//! assert!(table.translate(Command::BpList).is_err());
//! ```

use std::collections::HashMap;

use crate::error::{MonitorError, Result};

/// Capability identifiers reported by the build-features query.
pub mod capability {
    /// Emulator can break into the monitor (history, jumps, break-on-BRK/line).
    pub const MONITOR_BREAK: u16 = 1;
    /// Emulator supports the conditional breakpoint table.
    pub const MONITOR_BREAKPOINTS: u16 = 2;
    /// Emulator was built with Atari 400/800 emulation.
    pub const EMULATION_ATARI_800: u16 = 3;
    /// Emulator was built with XL/XE emulation.
    pub const EMULATION_XL_XE: u16 = 4;
    /// Emulator was built with 5200 emulation.
    pub const EMULATION_ATARI_5200: u16 = 5;

    /// Human-readable name of a capability ID. Unknown IDs are tolerated.
    pub fn name(id: u16) -> &'static str {
        match id {
            MONITOR_BREAK => "monitor_break",
            MONITOR_BREAKPOINTS => "monitor_breakpoints",
            EMULATION_ATARI_800 => "emulation_atari_800",
            EMULATION_XL_XE => "emulation_xl_xe",
            EMULATION_ATARI_5200 => "emulation_atari_5200",
            _ => "unknown",
        }
    }
}

/// A logical monitor operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    DlistAddr,
    MemRead,
    DlistDump,
    CpuState,
    Pause,
    Continue,
    Step,
    StepVblank,
    Status,
    MemReadv,
    Run,
    Coldstart,
    Warmstart,
    RemoveCartridge,
    StopEmulator,
    RemoveTape,
    RemoveDisks,
    History,
    BuiltinMonitor,
    WriteMemory,
    BpClear,
    BpAddClause,
    BpDeleteClause,
    BpSetEnabled,
    BpList,
    BuildFeatures,
    RestartEmulator,
    GtiaState,
    AnticState,
    CartState,
    Jumps,
    PiaState,
    PokeyState,
    Stack,
    StepOver,
    RunUntilReturn,
    Bbrk,
    Bline,
    Sysinfo,
    Search,
    SetReg,
    /// Keyboard injection. No opcode exists on the socket transport.
    InputKey,
}

impl Command {
    /// Every command, in opcode order.
    pub const ALL: [Command; 43] = [
        Command::Ping,
        Command::DlistAddr,
        Command::MemRead,
        Command::DlistDump,
        Command::CpuState,
        Command::Pause,
        Command::Continue,
        Command::Step,
        Command::StepVblank,
        Command::Status,
        Command::MemReadv,
        Command::Run,
        Command::Coldstart,
        Command::Warmstart,
        Command::RemoveCartridge,
        Command::StopEmulator,
        Command::RemoveTape,
        Command::RemoveDisks,
        Command::History,
        Command::BuiltinMonitor,
        Command::WriteMemory,
        Command::BpClear,
        Command::BpAddClause,
        Command::BpDeleteClause,
        Command::BpSetEnabled,
        Command::BpList,
        Command::BuildFeatures,
        Command::RestartEmulator,
        Command::GtiaState,
        Command::AnticState,
        Command::CartState,
        Command::Jumps,
        Command::PiaState,
        Command::PokeyState,
        Command::Stack,
        Command::StepOver,
        Command::RunUntilReturn,
        Command::Bbrk,
        Command::Bline,
        Command::Sysinfo,
        Command::Search,
        Command::SetReg,
        Command::InputKey,
    ];

    /// Opcode used by the socket transport, if the command exists there.
    pub fn socket_opcode(self) -> Option<u8> {
        let op = match self {
            Command::Ping => 1,
            Command::DlistAddr => 2,
            Command::MemRead => 3,
            Command::DlistDump => 4,
            Command::CpuState => 5,
            Command::Pause => 6,
            Command::Continue => 7,
            Command::Step => 8,
            Command::StepVblank => 9,
            Command::Status => 10,
            Command::MemReadv => 11,
            Command::Run => 12,
            Command::Coldstart => 13,
            Command::Warmstart => 14,
            Command::RemoveCartridge => 15,
            Command::StopEmulator => 16,
            Command::RemoveTape => 17,
            Command::RemoveDisks => 18,
            Command::History => 19,
            Command::BuiltinMonitor => 20,
            Command::WriteMemory => 21,
            Command::BpClear => 22,
            Command::BpAddClause => 23,
            Command::BpDeleteClause => 24,
            Command::BpSetEnabled => 25,
            Command::BpList => 26,
            Command::BuildFeatures => 27,
            Command::RestartEmulator => 28,
            Command::GtiaState => 29,
            Command::AnticState => 30,
            Command::CartState => 31,
            Command::Jumps => 32,
            Command::PiaState => 33,
            Command::PokeyState => 34,
            Command::Stack => 35,
            Command::StepOver => 36,
            Command::RunUntilReturn => 37,
            Command::Bbrk => 38,
            Command::Bline => 39,
            Command::Sysinfo => 40,
            Command::Search => 41,
            Command::SetReg => 42,
            Command::InputKey => return None,
        };
        Some(op)
    }

    /// Capability the peer must advertise before the command is usable.
    pub fn required_capability(self) -> Option<u16> {
        match self {
            Command::BpClear
            | Command::BpAddClause
            | Command::BpDeleteClause
            | Command::BpSetEnabled
            | Command::BpList => Some(capability::MONITOR_BREAKPOINTS),
            Command::History | Command::Jumps | Command::Bbrk | Command::Bline => {
                Some(capability::MONITOR_BREAK)
            }
            _ => None,
        }
    }

    /// Commands usable before (and regardless of) the capability probe.
    #[inline]
    pub fn is_static(self) -> bool {
        matches!(self, Command::Ping | Command::MemRead | Command::BuildFeatures)
    }

    /// Commands that change emulator state. These are never retried.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Command::Pause
                | Command::Continue
                | Command::Step
                | Command::StepVblank
                | Command::StepOver
                | Command::RunUntilReturn
                | Command::Run
                | Command::Coldstart
                | Command::Warmstart
                | Command::RemoveCartridge
                | Command::StopEmulator
                | Command::RestartEmulator
                | Command::RemoveTape
                | Command::RemoveDisks
                | Command::BuiltinMonitor
                | Command::WriteMemory
                | Command::SetReg
                | Command::BpClear
                | Command::BpAddClause
                | Command::BpDeleteClause
                | Command::BpSetEnabled
                | Command::InputKey
        )
    }
}

/// Mapping from logical command to transport opcode.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<Command, u8>,
}

impl CommandTable {
    /// Empty table: every command is unsupported.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding only the always-available commands.
    pub fn static_subset() -> Self {
        let mut table = Self::new();
        for cmd in Command::ALL.iter().copied().filter(|c| c.is_static()) {
            if let Some(op) = cmd.socket_opcode() {
                table.entries.insert(cmd, op);
            }
        }
        table
    }

    /// Table for a peer that advertised `caps`.
    ///
    /// Unknown capability IDs are ignored. Commands that require a
    /// capability are only bound when it is present.
    pub fn from_capabilities(caps: &[u16]) -> Self {
        let mut table = Self::new();
        for cmd in Command::ALL {
            let Some(op) = cmd.socket_opcode() else {
                continue;
            };
            let allowed = match cmd.required_capability() {
                Some(cap) => caps.contains(&cap),
                None => true,
            };
            if allowed {
                table.entries.insert(cmd, op);
            }
        }
        table
    }

    /// Add or replace a single binding.
    pub fn with_entry(mut self, command: Command, opcode: u8) -> Self {
        self.entries.insert(command, opcode);
        self
    }

    /// Resolve a command to its opcode, failing before any I/O if absent.
    pub fn translate(&self, command: Command) -> Result<u8> {
        self.entries
            .get(&command)
            .copied()
            .ok_or(MonitorError::UnsupportedCommand(command))
    }

    /// Check whether a command has an opcode.
    pub fn supports(&self, command: Command) -> bool {
        self.entries.contains_key(&command)
    }

    /// Number of bound commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no command is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
