//! 6502 instruction decoder.
//!
//! Decoding is forward-only and pure: the same `(address, bytes)` always
//! yields the same instructions, and nothing past the supplied buffer is
//! ever read.
//!
//! ```text
//!  address 0x1000, bytes  4C 00 80 A9 ...
//!                         └──┬───┘ └─ next instruction
//!                      JMP $8000        flow_target = 0x8000
//!                          ^^^^^        addr_span   = 0..5
//! ```
//!
//! # Example
//!
//! ```
//! use a800mon_client::disasm::decode;
//!
//! let lines = decode(0x1000, &[0x4C, 0x00, 0x80]);
//! assert_eq!(lines[0].mnemonic, "JMP");
//! assert_eq!(lines[0].operand, "$8000");
//! assert_eq!(lines[0].flow_target, Some(0x8000));
//! ```

mod opcodes;
mod symbols;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use serde::Serialize;

pub use opcodes::{lookup, AddressingMode};
pub use symbols::{find_by_name, AtariSymbols, NoSymbols, SymbolLookup, SymbolTable};

/// Width the assembly text is padded to before a trailing comment.
pub const COMMENT_COLUMN: usize = 18;

/// Largest instruction, in bytes.
pub const MAX_INSTRUCTION_SIZE: usize = 3;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedInstruction {
    pub address: u16,
    /// 1..=3, possibly clamped by the end of the buffer.
    pub size: usize,
    pub raw: Vec<u8>,
    pub mnemonic: &'static str,
    /// `None` for bytes that are not a documented opcode.
    pub mode: Option<AddressingMode>,
    pub operand: String,
    /// Destination of a jump, call or branch.
    pub flow_target: Option<u16>,
    /// Character range of the address token inside `operand`.
    pub addr_span: Option<Range<usize>>,
    /// `;NAME` when the operand address has a symbol.
    pub comment: Option<String>,
}

impl DecodedInstruction {
    /// Address right after this instruction (wraps at 64 KB).
    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.size as u16)
    }

    /// Raw bytes as space-separated hex, e.g. `"4C 00 80"`.
    pub fn raw_text(&self) -> String {
        self.raw
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mnemonic, operand and the padded comment column.
    pub fn asm_text(&self) -> String {
        let base = if self.operand.is_empty() {
            self.mnemonic.to_string()
        } else {
            format!("{} {}", self.mnemonic, self.operand)
        };
        match &self.comment {
            Some(comment) => format!("{base:<width$} {comment}", width = COMMENT_COLUMN),
            None => base,
        }
    }

    /// `raw  asm` without the address column.
    pub fn short_text(&self) -> String {
        format!("{:<8} {}", self.raw_text(), self.asm_text())
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}: {}", self.address, self.short_text())
    }
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_at(pc: u16, bytes: &[u8], symbols: &dyn SymbolLookup) -> DecodedInstruction {
    let opcode = bytes[0];
    let Some((mnemonic, mode)) = opcodes::lookup(opcode) else {
        return DecodedInstruction {
            address: pc,
            size: 1,
            raw: vec![opcode],
            mnemonic: ".DB",
            mode: None,
            operand: format!("${opcode:02X}"),
            flow_target: None,
            addr_span: None,
            comment: None,
        };
    };

    let size = mode.size().min(bytes.len());
    let operand_bytes = [
        bytes.get(1).copied().unwrap_or(0),
        bytes.get(2).copied().unwrap_or(0),
    ];
    let (operand, target, addr_span) = mode.format(pc, operand_bytes);

    let comment = target
        .and_then(|addr| symbols.lookup(addr))
        .map(|name| format!(";{name}"));
    let flow_target = target.filter(|_| opcodes::is_flow_mnemonic(mnemonic));

    DecodedInstruction {
        address: pc,
        size,
        raw: bytes[..size].to_vec(),
        mnemonic,
        mode: Some(mode),
        operand,
        flow_target,
        addr_span,
        comment,
    }
}

/// Decode `bytes` starting at `address`, resolving comments with `symbols`.
///
/// Stops at the end of the buffer or at the first address that does not
/// increase (the buffer ran past 0xFFFF).
pub fn decode_with(
    address: u16,
    bytes: &[u8],
    symbols: &dyn SymbolLookup,
) -> Vec<DecodedInstruction> {
    let mut out = Vec::with_capacity(bytes.len() / 2 + 1);
    let mut offset = 0usize;
    let mut prev: Option<u16> = None;

    while offset < bytes.len() {
        let pc = address.wrapping_add(offset as u16);
        if prev.is_some_and(|p| pc <= p) {
            break;
        }
        let ins = decode_at(pc, &bytes[offset..], symbols);
        offset += ins.size;
        prev = Some(pc);
        out.push(ins);
    }
    out
}

/// Decode without symbol comments.
pub fn decode(address: u16, bytes: &[u8]) -> Vec<DecodedInstruction> {
    decode_with(address, bytes, &NoSymbols)
}

/// Decode only the first instruction of `bytes`.
pub fn decode_one(
    address: u16,
    bytes: &[u8],
    symbols: &dyn SymbolLookup,
) -> Option<DecodedInstruction> {
    if bytes.is_empty() {
        return None;
    }
    Some(decode_at(address, bytes, symbols))
}

/// One-line rendering of the first instruction, e.g. `"A9 00    LDA #$00"`.
pub fn disasm_line(address: u16, bytes: &[u8], symbols: &dyn SymbolLookup) -> Option<String> {
    decode_one(address, bytes, symbols).map(|ins| ins.short_text())
}

// ============================================================================
// Cache
// ============================================================================

type CacheKey = (u16, Vec<u8>);

/// Bounded `(address, bytes)` → decode result cache with FIFO eviction.
#[derive(Debug)]
pub struct DecodeCache {
    capacity: usize,
    entries: HashMap<CacheKey, Arc<Vec<DecodedInstruction>>>,
    order: VecDeque<CacheKey>,
}

impl DecodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, address: u16, bytes: &[u8]) -> Option<Arc<Vec<DecodedInstruction>>> {
        // Keyed by owned bytes; lookups allocate once per probe.
        self.entries.get(&(address, bytes.to_vec())).cloned()
    }

    pub fn insert(&mut self, address: u16, bytes: &[u8], lines: Arc<Vec<DecodedInstruction>>) {
        if self.capacity == 0 {
            return;
        }
        let key = (address, bytes.to_vec());
        if self.entries.contains_key(&key) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.entries.remove(&old);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, lines);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Decoder with a symbol source and an optional result cache.
///
/// Cheap to share behind an `Arc`; the cache uses interior locking.
pub struct Decoder {
    symbols: Arc<dyn SymbolLookup>,
    cache: Option<Mutex<DecodeCache>>,
}

impl Decoder {
    /// No symbols, no cache.
    pub fn new() -> Self {
        Self {
            symbols: Arc::new(NoSymbols),
            cache: None,
        }
    }

    pub fn with_symbols(mut self, symbols: impl SymbolLookup + 'static) -> Self {
        self.symbols = Arc::new(symbols);
        self.clear_cache();
        self
    }

    /// Enable a cache holding up to `capacity` decode results (0 disables).
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = (capacity > 0).then(|| Mutex::new(DecodeCache::new(capacity)));
        self
    }

    pub fn symbols(&self) -> &dyn SymbolLookup {
        self.symbols.as_ref()
    }

    pub fn decode(&self, address: u16, bytes: &[u8]) -> Vec<DecodedInstruction> {
        let Some(cache) = &self.cache else {
            return decode_with(address, bytes, self.symbols.as_ref());
        };

        if let Some(hit) = lock(cache).get(address, bytes) {
            return hit.as_ref().clone();
        }
        let lines = Arc::new(decode_with(address, bytes, self.symbols.as_ref()));
        lock(cache).insert(address, bytes, Arc::clone(&lines));
        lines.as_ref().clone()
    }

    pub fn decode_one(&self, address: u16, bytes: &[u8]) -> Option<DecodedInstruction> {
        decode_one(address, bytes, self.symbols.as_ref())
    }

    pub fn disasm_line(&self, address: u16, bytes: &[u8]) -> Option<String> {
        disasm_line(address, bytes, self.symbols.as_ref())
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| lock(c).len())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            lock(cache).clear();
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("cached_entries", &self.cached_entries())
            .finish()
    }
}

fn lock(cache: &Mutex<DecodeCache>) -> std::sync::MutexGuard<'_, DecodeCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(address: u16, bytes: &[u8]) -> DecodedInstruction {
        decode(address, bytes).remove(0)
    }

    #[test]
    fn test_absolute_jump() {
        let ins = one(0x1000, &[0x4C, 0x00, 0x80]);
        assert_eq!(ins.mnemonic, "JMP");
        assert_eq!(ins.operand, "$8000");
        assert_eq!(ins.flow_target, Some(0x8000));
        assert_eq!(ins.addr_span, Some(0..5));
        assert_eq!(ins.size, 3);
        assert_eq!(ins.raw_text(), "4C 00 80");
    }

    #[test]
    fn test_each_addressing_mode() {
        // (bytes, mnemonic, operand, span)
        let cases: &[(&[u8], &str, &str, Option<Range<usize>>)] = &[
            (&[0xEA], "NOP", "", None),
            (&[0x0A], "ASL", "A", None),
            (&[0xA9, 0x10], "LDA", "#$10", None),
            (&[0xA5, 0x80], "LDA", "$80", Some(0..3)),
            (&[0xB5, 0x80], "LDA", "$80,X", Some(0..3)),
            (&[0xB6, 0x80], "LDX", "$80,Y", Some(0..3)),
            (&[0xAD, 0x34, 0x12], "LDA", "$1234", Some(0..5)),
            (&[0xBD, 0x34, 0x12], "LDA", "$1234,X", Some(0..5)),
            (&[0xB9, 0x34, 0x12], "LDA", "$1234,Y", Some(0..5)),
            (&[0x6C, 0xFC, 0xFF], "JMP", "($FFFC)", Some(1..6)),
            (&[0xA1, 0x40], "LDA", "($40,X)", Some(1..4)),
            (&[0xB1, 0x40], "LDA", "($40),Y", Some(1..4)),
            (&[0xD0, 0xFE], "BNE", "$2000", Some(0..5)),
        ];
        for (bytes, mnemonic, operand, span) in cases {
            let ins = one(0x2000, bytes);
            assert_eq!(ins.mnemonic, *mnemonic, "{bytes:02X?}");
            assert_eq!(ins.operand, *operand, "{bytes:02X?}");
            assert_eq!(ins.addr_span, *span, "{bytes:02X?}");
            assert_eq!(ins.size, bytes.len(), "{bytes:02X?}");
        }
    }

    #[test]
    fn test_branch_targets() {
        let fwd = one(0x1000, &[0x90, 0x10]);
        assert_eq!(fwd.flow_target, Some(0x1012));
        let back = one(0x1000, &[0xF0, 0x80]);
        assert_eq!(back.flow_target, Some(0x0F82));
    }

    #[test]
    fn test_indirect_jump_flow_target_is_pointer() {
        let ins = one(0x1000, &[0x6C, 0x00, 0x02]);
        assert_eq!(ins.flow_target, Some(0x0200));
    }

    #[test]
    fn test_non_flow_has_no_flow_target() {
        let ins = one(0x1000, &[0xAD, 0x0A, 0xD4]);
        assert_eq!(ins.flow_target, None);
    }

    #[test]
    fn test_unknown_opcode() {
        let ins = one(0x3000, &[0x02, 0xEA]);
        assert_eq!(ins.mnemonic, ".DB");
        assert_eq!(ins.operand, "$02");
        assert_eq!(ins.size, 1);
        assert_eq!(ins.mode, None);
        assert_eq!(ins.addr_span, None);
        assert_eq!(ins.flow_target, None);
    }

    #[test]
    fn test_truncated_instruction_is_clamped() {
        let lines = decode(0x1000, &[0xEA, 0xAD, 0x34]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].size, 2);
        assert_eq!(lines[1].raw, vec![0xAD, 0x34]);
        assert_eq!(lines[1].operand, "$0034");
    }

    #[test]
    fn test_size_bound_and_monotonic() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let lines = decode(0x4000, &bytes);
        let total: usize = lines.iter().map(|l| l.size).sum();
        assert_eq!(total, bytes.len());
        assert!(lines.iter().all(|l| (1..=3).contains(&l.size)));
        assert!(lines.windows(2).all(|w| w[0].address < w[1].address));
    }

    #[test]
    fn test_stops_at_wrap() {
        let lines = decode(0xFFFE, &[0xEA, 0xEA, 0xEA, 0xEA]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].address, 0xFFFF);
    }

    #[test]
    fn test_purity() {
        let bytes = [0xA9, 0x00, 0x8D, 0x0A, 0xD4, 0x4C, 0x00, 0x20, 0xFF];
        assert_eq!(decode(0x2000, &bytes), decode(0x2000, &bytes));
    }

    #[test]
    fn test_symbol_comment_and_padding() {
        let ins = decode_with(0x2000, &[0x8D, 0x0A, 0xD4], &AtariSymbols).remove(0);
        assert_eq!(ins.comment.as_deref(), Some(";WSYNC"));
        assert_eq!(ins.asm_text(), "STA $D40A          ;WSYNC");
        assert_eq!(ins.to_string(), "2000: 8D 0A D4 STA $D40A          ;WSYNC");
    }

    #[test]
    fn test_immediate_never_gets_comment() {
        let ins = decode_with(0x2000, &[0xA9, 0x00], &AtariSymbols).remove(0);
        assert_eq!(ins.comment, None);
    }

    #[test]
    fn test_disasm_line() {
        assert_eq!(
            disasm_line(0x2000, &[0xA9, 0x00, 0xFF], &NoSymbols).as_deref(),
            Some("A9 00    LDA #$00")
        );
        assert_eq!(disasm_line(0x2000, &[], &NoSymbols), None);
    }

    #[test]
    fn test_decoder_cache_is_transparent() {
        let decoder = Decoder::new().with_symbols(AtariSymbols).with_cache(2);
        let bytes = [0x20, 0x56, 0xE4, 0x60];

        let first = decoder.decode(0x2000, &bytes);
        let second = decoder.decode(0x2000, &bytes);
        assert_eq!(first, second);
        assert_eq!(first, decode_with(0x2000, &bytes, &AtariSymbols));
        assert_eq!(decoder.cached_entries(), 1);

        decoder.decode(0x3000, &bytes);
        decoder.decode(0x4000, &bytes);
        assert_eq!(decoder.cached_entries(), 2);
    }

    #[test]
    fn test_cache_zero_capacity() {
        let decoder = Decoder::new().with_cache(0);
        decoder.decode(0x2000, &[0xEA]);
        assert_eq!(decoder.cached_entries(), 0);
    }
}
