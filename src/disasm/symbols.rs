//! Address-to-name lookup used to decorate disassembly comments.
//!
//! Symbols are cosmetic: a missing name only suppresses the `;NAME` comment,
//! it never changes how bytes decode.

use std::collections::HashMap;

/// Resolves an address to a symbolic name.
pub trait SymbolLookup: Send + Sync {
    fn lookup(&self, addr: u16) -> Option<&str>;
}

/// Lookup that knows no names.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolLookup for NoSymbols {
    fn lookup(&self, _addr: u16) -> Option<&str> {
        None
    }
}

/// Standard Atari 8-bit equates: OS page zero, pages 2 and 3 shadows, the
/// ROM jump vectors and the ANTIC, GTIA, POKEY and PIA registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtariSymbols;

// Sorted by address for binary search.
static ATARI_EQUATES: &[(u16, &str)] = &[
    (0x0000, "LINZBS"),
    (0x0002, "CASINI"),
    (0x0004, "RAMLO"),
    (0x0008, "WARMST"),
    (0x0009, "BOOT"),
    (0x000A, "DOSVEC"),
    (0x000C, "DOSINI"),
    (0x000E, "APPMHI"),
    (0x0010, "POKMSK"),
    (0x0011, "BRKKEY"),
    (0x0012, "RTCLOK"),
    (0x004D, "ATRACT"),
    (0x0052, "LMARGN"),
    (0x0053, "RMARGN"),
    (0x0054, "ROWCRS"),
    (0x0055, "COLCRS"),
    (0x0058, "SAVMSC"),
    (0x006A, "RAMTOP"),
    (0x0200, "VDSLST"),
    (0x0202, "VPRCED"),
    (0x0204, "VINTER"),
    (0x0206, "VBREAK"),
    (0x0208, "VKEYBD"),
    (0x020A, "VSERIN"),
    (0x020C, "VSEROR"),
    (0x020E, "VSEROC"),
    (0x0210, "VTIMR1"),
    (0x0212, "VTIMR2"),
    (0x0214, "VTIMR4"),
    (0x0216, "VIMIRQ"),
    (0x0218, "CDTMV1"),
    (0x0222, "VVBLKI"),
    (0x0224, "VVBLKD"),
    (0x0226, "CDTMA1"),
    (0x0228, "CDTMA2"),
    (0x022F, "SDMCTL"),
    (0x0230, "SDLSTL"),
    (0x0231, "SDLSTH"),
    (0x026F, "GPRIOR"),
    (0x0270, "PADDL0"),
    (0x0278, "STICK0"),
    (0x0284, "STRIG0"),
    (0x02C0, "PCOLR0"),
    (0x02C1, "PCOLR1"),
    (0x02C2, "PCOLR2"),
    (0x02C3, "PCOLR3"),
    (0x02C4, "COLOR0"),
    (0x02C5, "COLOR1"),
    (0x02C6, "COLOR2"),
    (0x02C7, "COLOR3"),
    (0x02C8, "COLOR4"),
    (0x02E0, "RUNAD"),
    (0x02E2, "INITAD"),
    (0x02E5, "MEMTOP"),
    (0x02E7, "MEMLO"),
    (0x02F0, "CRSINH"),
    (0x02F3, "CHACT"),
    (0x02F4, "CHBAS"),
    (0x02FC, "CH"),
    (0x0300, "DDEVIC"),
    (0x0301, "DUNIT"),
    (0x0302, "DCOMND"),
    (0x0303, "DSTATS"),
    (0x0304, "DBUFLO"),
    (0x0306, "DTIMLO"),
    (0x0308, "DBYTLO"),
    (0x030A, "DAUX1"),
    (0x030B, "DAUX2"),
    (0x0340, "ICHID"),
    (0x0341, "ICDNO"),
    (0x0342, "ICCOM"),
    (0x0343, "ICSTA"),
    (0x0344, "ICBAL"),
    (0x0345, "ICBAH"),
    (0x0348, "ICBLL"),
    (0x0349, "ICBLH"),
    (0x034A, "ICAX1"),
    (0x034B, "ICAX2"),
    // GTIA
    (0xD000, "HPOSP0"),
    (0xD001, "HPOSP1"),
    (0xD002, "HPOSP2"),
    (0xD003, "HPOSP3"),
    (0xD004, "HPOSM0"),
    (0xD005, "HPOSM1"),
    (0xD006, "HPOSM2"),
    (0xD007, "HPOSM3"),
    (0xD008, "SIZEP0"),
    (0xD009, "SIZEP1"),
    (0xD00A, "SIZEP2"),
    (0xD00B, "SIZEP3"),
    (0xD00C, "SIZEM"),
    (0xD00D, "GRAFP0"),
    (0xD00E, "GRAFP1"),
    (0xD00F, "GRAFP2"),
    (0xD010, "GRAFP3"),
    (0xD011, "GRAFM"),
    (0xD012, "COLPM0"),
    (0xD013, "COLPM1"),
    (0xD014, "COLPM2"),
    (0xD015, "COLPM3"),
    (0xD016, "COLPF0"),
    (0xD017, "COLPF1"),
    (0xD018, "COLPF2"),
    (0xD019, "COLPF3"),
    (0xD01A, "COLBK"),
    (0xD01B, "PRIOR"),
    (0xD01C, "VDELAY"),
    (0xD01D, "GRACTL"),
    (0xD01E, "HITCLR"),
    (0xD01F, "CONSOL"),
    // POKEY
    (0xD200, "AUDF1"),
    (0xD201, "AUDC1"),
    (0xD202, "AUDF2"),
    (0xD203, "AUDC2"),
    (0xD204, "AUDF3"),
    (0xD205, "AUDC3"),
    (0xD206, "AUDF4"),
    (0xD207, "AUDC4"),
    (0xD208, "AUDCTL"),
    (0xD209, "STIMER"),
    (0xD20A, "RANDOM"),
    (0xD20B, "POTGO"),
    (0xD20D, "SEROUT"),
    (0xD20E, "IRQEN"),
    (0xD20F, "SKCTL"),
    // PIA
    (0xD300, "PORTA"),
    (0xD301, "PORTB"),
    (0xD302, "PACTL"),
    (0xD303, "PBCTL"),
    // ANTIC
    (0xD400, "DMACTL"),
    (0xD401, "CHACTL"),
    (0xD402, "DLISTL"),
    (0xD403, "DLISTH"),
    (0xD404, "HSCROL"),
    (0xD405, "VSCROL"),
    (0xD407, "PMBASE"),
    (0xD409, "CHBASE"),
    (0xD40A, "WSYNC"),
    (0xD40B, "VCOUNT"),
    (0xD40C, "PENH"),
    (0xD40D, "PENV"),
    (0xD40E, "NMIEN"),
    (0xD40F, "NMIRES"),
    // OS ROM vectors
    (0xE450, "DISKIV"),
    (0xE453, "DSKINV"),
    (0xE456, "CIOV"),
    (0xE459, "SIOV"),
    (0xE45C, "SETVBV"),
    (0xE45F, "SYSVBV"),
    (0xE462, "XITVBV"),
    (0xE465, "SIOINV"),
    (0xE468, "SENDEV"),
    (0xE46B, "INTINV"),
    (0xE46E, "CIOINV"),
    (0xE471, "BLKBDV"),
    (0xE474, "WARMSV"),
    (0xE477, "COLDSV"),
    (0xE47A, "RBLOKV"),
    (0xE47D, "CSOPIV"),
    (0xFFFA, "NMIVEC"),
    (0xFFFC, "RESVEC"),
    (0xFFFE, "IRQVEC"),
];

impl AtariSymbols {
    /// Every built-in `(address, name)` pair, ascending by address.
    pub fn entries() -> &'static [(u16, &'static str)] {
        ATARI_EQUATES
    }
}

impl SymbolLookup for AtariSymbols {
    fn lookup(&self, addr: u16) -> Option<&str> {
        ATARI_EQUATES
            .binary_search_by_key(&addr, |&(a, _)| a)
            .ok()
            .map(|i| ATARI_EQUATES[i].1)
    }
}

/// User-supplied symbol table, optionally layered over another lookup.
///
/// # Example
///
/// ```
/// use a800mon_client::disasm::{AtariSymbols, SymbolLookup, SymbolTable};
///
/// let mut table = SymbolTable::with_fallback(AtariSymbols);
/// table.insert(0x2000, "MAIN");
/// assert_eq!(table.lookup(0x2000), Some("MAIN"));
/// assert_eq!(table.lookup(0xD40A), Some("WSYNC"));
/// ```
#[derive(Default)]
pub struct SymbolTable {
    names: HashMap<u16, String>,
    fallback: Option<Box<dyn SymbolLookup>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names not found in this table are resolved by `fallback`.
    pub fn with_fallback(fallback: impl SymbolLookup + 'static) -> Self {
        Self {
            names: HashMap::new(),
            fallback: Some(Box::new(fallback)),
        }
    }

    /// Add or replace a name.
    pub fn insert(&mut self, addr: u16, name: impl Into<String>) {
        self.names.insert(addr, name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a name back to its address.
    ///
    /// Matching is case-insensitive and prefers, in order, an exact match,
    /// a prefix match, then a substring match. Ties go to the lowest address.
    pub fn find_by_name(&self, query: &str) -> Option<u16> {
        find_by_name(
            self.names.iter().map(|(&addr, name)| (addr, name.as_str())),
            query,
        )
    }
}

impl SymbolLookup for SymbolTable {
    fn lookup(&self, addr: u16) -> Option<&str> {
        match self.names.get(&addr) {
            Some(name) => Some(name.as_str()),
            None => self.fallback.as_ref().and_then(|f| f.lookup(addr)),
        }
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("names", &self.names.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Search `(address, name)` pairs by name. See [`SymbolTable::find_by_name`].
pub fn find_by_name<'a>(
    entries: impl IntoIterator<Item = (u16, &'a str)>,
    query: &str,
) -> Option<u16> {
    let query = query.trim().to_ascii_uppercase();
    if query.is_empty() {
        return None;
    }

    // rank 0 = exact, 1 = prefix, 2 = substring
    let mut best: Option<(u8, u16)> = None;
    for (addr, name) in entries {
        let name = name.to_ascii_uppercase();
        let rank = if name == query {
            0
        } else if name.starts_with(&query) {
            1
        } else if name.contains(&query) {
            2
        } else {
            continue;
        };
        if best.map_or(true, |b| (rank, addr) < b) {
            best = Some((rank, addr));
        }
    }
    best.map(|(_, addr)| addr)
}
