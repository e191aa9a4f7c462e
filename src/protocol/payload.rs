//! Typed reply decoders and request encoders.
//!
//! All layouts are little-endian and fixed-size (or count-prefixed). A reply
//! shorter than its layout is a protocol error; missing bytes are never
//! zero-filled.

use serde::Serialize;

use crate::error::{MonitorError, Result};

/// Largest data block a single memory write can carry.
pub const MAX_WRITE_SIZE: usize = 0xFFFF;

/// Maximum number of conditions in one breakpoint clause.
pub const MAX_CLAUSE_CONDITIONS: usize = 20;

/// Bounds-checked little-endian cursor over a reply payload.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], what: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            what,
        }
    }

    /// Fail unless at least `n` bytes remain.
    fn require(&self, n: usize) -> Result<()> {
        if self.data.len() - self.offset < n {
            return Err(MonitorError::short(self.what));
        }
        Ok(())
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes()?))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.bytes()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Decode a build-features reply: `count:u16` then `count` capability IDs.
///
/// A count larger than the payload is truncated to the complete IDs present.
pub fn decode_capabilities(data: &[u8]) -> Result<Vec<u16>> {
    let mut r = Reader::new(data, "BUILD_FEATURES");
    let count = (r.u16()? as usize).min(r.remaining() / 2);
    (0..count).map(|_| r.u16()).collect()
}

// ============================================================================
// CPU and machine status
// ============================================================================

/// 6502 register file plus the beam position at which it was sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuState {
    pub ypos: u16,
    pub xpos: u16,
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
}

impl CpuState {
    /// Wire size of the register block.
    pub const SIZE: usize = 11;

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "CPU_STATE");
        r.require(Self::SIZE)?;
        Ok(Self {
            ypos: r.u16()?,
            xpos: r.u16()?,
            pc: r.u16()?,
            a: r.u8()?,
            x: r.u8()?,
            y: r.u8()?,
            s: r.u8()?,
            p: r.u8()?,
        })
    }

    /// Processor flags as `NV-BDIZC`, with `.` for cleared bits.
    pub fn flags_text(&self) -> String {
        const NAMES: &[u8; 8] = b"NV-BDIZC";
        NAMES
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                if self.p & (0x80 >> i) != 0 {
                    c as char
                } else {
                    '.'
                }
            })
            .collect()
    }
}

/// Emulator run state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub paused: bool,
    pub crashed: bool,
    /// Emulated milliseconds since power-on.
    pub emu_ms: u64,
    /// Emulated milliseconds since the last reset.
    pub reset_ms: u64,
    /// Bumped by the emulator whenever machine state changes.
    pub state_seq: u32,
    /// Absent on older emulator builds.
    pub machine_type: Option<u8>,
}

impl Status {
    /// Minimum wire size (without the machine type byte).
    pub const MIN_SIZE: usize = 21;

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "STATUS");
        r.require(Self::MIN_SIZE)?;
        let flags = r.u8()?;
        let emu_ms = r.u64()?;
        let reset_ms = r.u64()?;
        let state_seq = r.u32()?;
        let machine_type = if r.remaining() > 0 { Some(r.u8()?) } else { None };
        Ok(Self {
            paused: flags & 0x01 != 0,
            crashed: flags & 0x80 != 0,
            emu_ms,
            reset_ms,
            state_seq,
            machine_type,
        })
    }

    /// Name of the emulated machine, `"unknown"` if not reported.
    pub fn machine_name(&self) -> &'static str {
        self.machine_type.map(machine_type_name).unwrap_or("unknown")
    }
}

/// Name of an emulator machine type code.
pub fn machine_type_name(code: u8) -> &'static str {
    match code {
        0 => "atari800",
        1 => "xl_xe",
        2 => "atari5200",
        3 => "atari1200xl",
        4 => "atari800xl",
        5 => "atari130xe",
        6 => "atari320xe_compy_shop",
        7 => "atari320xe_rambo",
        8 => "atari576xe",
        9 => "atari1088xe",
        10 => "atarixegs",
        11 => "atari400",
        12 => "atari600xl",
        _ => "unknown",
    }
}

/// Static machine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Sysinfo {
    pub basic_enabled: bool,
    pub tv_pal: bool,
    pub machine_family: u8,
    pub os_revision: u8,
    pub basic_revision: u8,
    pub builtin_game_revision: u8,
}

impl Sysinfo {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "SYSINFO");
        r.require(5)?;
        let flags = r.u8()?;
        Ok(Self {
            basic_enabled: flags & 0x01 != 0,
            tv_pal: flags & 0x02 != 0,
            machine_family: r.u8()?,
            os_revision: r.u8()?,
            basic_revision: r.u8()?,
            builtin_game_revision: r.u8()?,
        })
    }
}

/// One executed instruction from the CPU trace ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub y: u8,
    pub x: u8,
    pub pc: u16,
    /// Opcode and up to two operand bytes.
    pub bytes: [u8; 3],
}

/// Decode `count:u8` then `count` 7-byte history entries.
pub fn decode_history(data: &[u8]) -> Result<Vec<HistoryEntry>> {
    let mut r = Reader::new(data, "HISTORY");
    let count = r.u8()? as usize;
    r.require(count * 7)?;
    (0..count)
        .map(|_| {
            Ok(HistoryEntry {
                y: r.u8()?,
                x: r.u8()?,
                pc: r.u16()?,
                bytes: r.bytes()?,
            })
        })
        .collect()
}

/// Decode `count:u8` then `count` jump source addresses.
pub fn decode_jumps(data: &[u8]) -> Result<Vec<u16>> {
    let mut r = Reader::new(data, "JUMPS");
    let count = r.u8()? as usize;
    r.require(count * 2)?;
    (0..count).map(|_| r.u16()).collect()
}

/// One byte of the hardware stack page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackEntry {
    /// Offset within page 1.
    pub stack_off: u8,
    pub value: u8,
}

/// Stack pointer and the live part of page 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackState {
    pub s: u8,
    pub entries: Vec<StackEntry>,
}

impl StackState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "STACK");
        let s = r.u8()?;
        let count = r.u8()? as usize;
        r.require(count * 2)?;
        let entries = (0..count)
            .map(|_| {
                Ok(StackEntry {
                    stack_off: r.u8()?,
                    value: r.u8()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { s, entries })
    }
}

// ============================================================================
// Hardware blocks
// ============================================================================

/// GTIA register snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GtiaState {
    pub hposp: [u8; 4],
    pub hposm: [u8; 4],
    pub sizep: [u8; 4],
    pub sizem: u8,
    pub grafp: [u8; 4],
    pub grafm: u8,
    pub colpm: [u8; 4],
    pub colpf: [u8; 4],
    pub colbk: u8,
    pub prior: u8,
    pub vdelay: u8,
    pub gractl: u8,
}

impl GtiaState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "GTIA_STATE");
        r.require(30)?;
        Ok(Self {
            hposp: r.bytes()?,
            hposm: r.bytes()?,
            sizep: r.bytes()?,
            sizem: r.u8()?,
            grafp: r.bytes()?,
            grafm: r.u8()?,
            colpm: r.bytes()?,
            colpf: r.bytes()?,
            colbk: r.u8()?,
            prior: r.u8()?,
            vdelay: r.u8()?,
            gractl: r.u8()?,
        })
    }
}

/// ANTIC register snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnticState {
    pub dmactl: u8,
    pub chactl: u8,
    pub dlist: u16,
    pub hscrol: u8,
    pub vscrol: u8,
    pub pmbase: u8,
    pub chbase: u8,
    pub vcount: u8,
    pub nmien: u8,
    pub ypos: u16,
}

impl AnticState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "ANTIC_STATE");
        r.require(12)?;
        Ok(Self {
            dmactl: r.u8()?,
            chactl: r.u8()?,
            dlist: r.u16()?,
            hscrol: r.u8()?,
            vscrol: r.u8()?,
            pmbase: r.u8()?,
            chbase: r.u8()?,
            vcount: r.u8()?,
            nmien: r.u8()?,
            ypos: r.u16()?,
        })
    }
}

/// PIA port and control registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PiaState {
    pub pactl: u8,
    pub pbctl: u8,
    pub porta: u8,
    pub portb: u8,
}

impl PiaState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "PIA_STATE");
        r.require(4)?;
        Ok(Self {
            pactl: r.u8()?,
            pbctl: r.u8()?,
            porta: r.u8()?,
            portb: r.u8()?,
        })
    }
}

/// Audio registers of the second POKEY in stereo builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PokeyChannels {
    pub audf: [u8; 4],
    pub audc: [u8; 4],
    pub audctl: u8,
}

/// POKEY register snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PokeyState {
    pub audf1: [u8; 4],
    pub audc1: [u8; 4],
    pub audctl1: u8,
    pub kbcode: u8,
    pub irqen: u8,
    pub irqst: u8,
    pub skstat: u8,
    pub skctl: u8,
    /// Present only when stereo emulation is enabled.
    pub second: Option<PokeyChannels>,
}

impl PokeyState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "POKEY_STATE");
        r.require(15)?;
        let stereo = r.u8()? != 0;
        let mut state = Self {
            audf1: r.bytes()?,
            audc1: r.bytes()?,
            audctl1: r.u8()?,
            kbcode: r.u8()?,
            irqen: r.u8()?,
            irqst: r.u8()?,
            skstat: r.u8()?,
            skctl: r.u8()?,
            second: None,
        };
        if stereo {
            r.require(9)?;
            state.second = Some(PokeyChannels {
                audf: r.bytes()?,
                audc: r.bytes()?,
                audctl: r.u8()?,
            });
        }
        Ok(state)
    }
}

/// One cartridge slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CartSlot {
    pub present: bool,
    pub cart_type: i16,
    pub state: u32,
    pub size_kb: u32,
    pub raw: bool,
}

/// Cartridge slots (main and piggyback).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CartState {
    pub autoreboot: bool,
    pub main: CartSlot,
    pub piggy: CartSlot,
}

impl CartState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        fn slot(r: &mut Reader<'_>) -> Result<CartSlot> {
            Ok(CartSlot {
                present: r.u8()? != 0,
                cart_type: r.i16()?,
                state: r.u32()?,
                size_kb: r.u32()?,
                raw: r.u8()? != 0,
            })
        }

        let mut r = Reader::new(data, "CART_STATE");
        r.require(25)?;
        Ok(Self {
            autoreboot: r.u8()? != 0,
            main: slot(&mut r)?,
            piggy: slot(&mut r)?,
        })
    }
}

// ============================================================================
// Breakpoints
// ============================================================================

/// One comparison inside a breakpoint clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakpointCondition {
    /// What is compared (register, memory, ...), emulator defined.
    pub cond_type: u8,
    /// Comparison operator, emulator defined.
    pub op: u8,
    pub addr: u16,
    pub value: u16,
}

/// Conditions joined by AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakpointClause {
    pub conditions: Vec<BreakpointCondition>,
}

/// The emulator's breakpoint table. Clauses are joined by OR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakpointList {
    pub enabled: bool,
    pub clauses: Vec<BreakpointClause>,
}

impl BreakpointList {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "BP_LIST");
        r.require(3)?;
        let enabled = r.u8()? != 0;
        let clause_count = r.u16()?;
        let mut clauses = Vec::with_capacity(clause_count as usize);
        for _ in 0..clause_count {
            let cond_count = r.u8()?;
            let _reserved = r.u8()?;
            let conditions = (0..cond_count)
                .map(|_| {
                    Ok(BreakpointCondition {
                        cond_type: r.u8()?,
                        op: r.u8()?,
                        addr: r.u16()?,
                        value: r.u16()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            clauses.push(BreakpointClause { conditions });
        }
        Ok(Self { enabled, clauses })
    }
}

/// Encode a new clause: `0xFFFF:u16, count:u8, 0:u8` then 6-byte conditions.
pub fn encode_breakpoint_clause(conditions: &[BreakpointCondition]) -> Result<Vec<u8>> {
    if conditions.is_empty() {
        return Err(MonitorError::Protocol(
            "Breakpoint clause must have at least one condition".to_string(),
        ));
    }
    if conditions.len() > MAX_CLAUSE_CONDITIONS {
        return Err(MonitorError::Protocol(format!(
            "Breakpoint clause exceeds maximum of {} conditions",
            MAX_CLAUSE_CONDITIONS
        )));
    }
    let mut buf = Vec::with_capacity(4 + conditions.len() * 6);
    buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
    buf.push(conditions.len() as u8);
    buf.push(0);
    for cond in conditions {
        buf.push(cond.cond_type);
        buf.push(cond.op);
        buf.extend_from_slice(&cond.addr.to_le_bytes());
        buf.extend_from_slice(&cond.value.to_le_bytes());
    }
    Ok(buf)
}

/// Decode a reply that starts with a `u16` (clause index and similar).
pub fn decode_u16(data: &[u8], what: &'static str) -> Result<u16> {
    Reader::new(data, what).u16()
}

/// Decode a reply that starts with a boolean byte.
pub fn decode_flag(data: &[u8], what: &'static str) -> Result<bool> {
    Ok(Reader::new(data, what).u8()? != 0)
}

/// How the emulator reacts when the beam reaches the break line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakLineMode {
    Disabled,
    Break,
    Blink,
    Other(u8),
}

impl From<u8> for BreakLineMode {
    fn from(v: u8) -> Self {
        match v {
            0 => BreakLineMode::Disabled,
            1 => BreakLineMode::Break,
            2 => BreakLineMode::Blink,
            other => BreakLineMode::Other(other),
        }
    }
}

/// Break-on-scanline setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakLine {
    pub scanline: u16,
    pub mode: BreakLineMode,
}

impl BreakLine {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "BLINE");
        r.require(3)?;
        Ok(Self {
            scanline: r.u16()?,
            mode: BreakLineMode::from(r.u8()?),
        })
    }
}

// ============================================================================
// Memory and registers
// ============================================================================

/// Encode a memory read request: `addr:u16, len:u16`.
#[inline]
pub fn encode_mem_read(addr: u16, len: u16) -> [u8; 4] {
    let mut buf = [0u8; 4];
    buf[0..2].copy_from_slice(&addr.to_le_bytes());
    buf[2..4].copy_from_slice(&len.to_le_bytes());
    buf
}

/// Encode a vectored read: `count:u16` then `(addr:u16, len:u16)` pairs.
pub fn encode_mem_readv(ranges: &[(u16, u16)]) -> Result<Vec<u8>> {
    let count = u16::try_from(ranges.len())
        .map_err(|_| MonitorError::Protocol(format!("Too many ranges: {}", ranges.len())))?;
    let mut buf = Vec::with_capacity(2 + ranges.len() * 4);
    buf.extend_from_slice(&count.to_le_bytes());
    for &(addr, len) in ranges {
        buf.extend_from_slice(&encode_mem_read(addr, len));
    }
    Ok(buf)
}

/// Encode a memory write: `addr:u16, len:u16, data`.
pub fn encode_write_memory(addr: u16, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_WRITE_SIZE {
        return Err(MonitorError::Protocol(format!(
            "WRITE_MEMORY payload too long: {} bytes (max {})",
            data.len(),
            MAX_WRITE_SIZE
        )));
    }
    let mut buf = Vec::with_capacity(4 + data.len());
    buf.extend_from_slice(&encode_mem_read(addr, data.len() as u16));
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Register (or single flag) addressed by the set-register command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Register {
    Pc,
    A,
    X,
    Y,
    S,
    FlagN,
    FlagV,
    FlagD,
    FlagI,
    FlagZ,
    FlagC,
}

impl Register {
    /// Wire code of the register.
    pub fn code(self) -> u8 {
        match self {
            Register::Pc => 1,
            Register::A => 2,
            Register::X => 3,
            Register::Y => 4,
            Register::S => 5,
            Register::FlagN => 6,
            Register::FlagV => 7,
            Register::FlagD => 8,
            Register::FlagI => 9,
            Register::FlagZ => 10,
            Register::FlagC => 11,
        }
    }

    /// Parse a register name as typed by an operator (`pc`, `a`, `n`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        let reg = match name.to_ascii_lowercase().as_str() {
            "pc" => Register::Pc,
            "a" => Register::A,
            "x" => Register::X,
            "y" => Register::Y,
            "s" | "sp" => Register::S,
            "n" => Register::FlagN,
            "v" => Register::FlagV,
            "d" => Register::FlagD,
            "i" => Register::FlagI,
            "z" => Register::FlagZ,
            "c" => Register::FlagC,
            _ => return None,
        };
        Some(reg)
    }
}

/// Encode a set-register request: `target:u8, value:u16`.
pub fn encode_set_reg(register: Register, value: u16) -> [u8; 3] {
    let v = value.to_le_bytes();
    [register.code(), v[0], v[1]]
}

// ============================================================================
// Search and input
// ============================================================================

/// Search mode byte for a raw byte pattern.
const SEARCH_MODE_BYTES: u8 = 1;

/// Encode a memory search: `mode:u8, start:u16, end:u16, len:u8, pattern`.
pub fn encode_search(start: u16, end: u16, pattern: &[u8]) -> Result<Vec<u8>> {
    if pattern.is_empty() || pattern.len() > 0xFF {
        return Err(MonitorError::Protocol(
            "Pattern length must be in range 1..255".to_string(),
        ));
    }
    let mut buf = Vec::with_capacity(6 + pattern.len());
    buf.push(SEARCH_MODE_BYTES);
    buf.extend_from_slice(&start.to_le_bytes());
    buf.extend_from_slice(&end.to_le_bytes());
    buf.push(pattern.len() as u8);
    buf.extend_from_slice(pattern);
    Ok(buf)
}

/// Matches reported by the emulator-side search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Total number of matches, possibly more than returned.
    pub total: u32,
    pub addresses: Vec<u16>,
}

impl SearchResult {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "SEARCH");
        r.require(6)?;
        let total = r.u32()?;
        let returned = r.u16()? as usize;
        r.require(returned * 2)?;
        let addresses = (0..returned).map(|_| r.u16()).collect::<Result<Vec<_>>>()?;
        Ok(Self { total, addresses })
    }
}

/// One keyboard event for the input-key command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyInput {
    pub action: u8,
    pub keyspace: u8,
    pub mods: u8,
    pub consol: u8,
    pub keycode: u16,
}

impl KeyInput {
    /// Encode as `action:u8, keyspace:u8, mods:u8, consol:u8, keycode:u16`.
    pub fn encode(&self) -> [u8; 6] {
        let code = self.keycode.to_le_bytes();
        [self.action, self.keyspace, self.mods, self.consol, code[0], code[1]]
    }
}
