//! RPC client: typed monitor operations over a [`Transport`].
//!
//! The [`RpcClient`] serializes every call through one async mutex (the
//! wire protocol has no request IDs, so only one exchange may be in flight),
//! maps logical commands to opcodes before doing any I/O, and decodes
//! replies into typed structs.
//!
//! # Example
//!
//! ```ignore
//! use a800mon_client::RpcClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RpcClient::builder()
//!         .socket("/tmp/atari.sock")
//!         .build()?;
//!
//!     client.pause().await?;
//!     let cpu = client.cpu_state().await?;
//!     let code = client.read_memory(cpu.pc, 16).await?;
//!     println!("{:04X}: {:02X?}", cpu.pc, &code[..]);
//!     Ok(())
//! }
//! ```

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use crate::error::{MonitorError, Result};
use crate::protocol::payload::{
    self, AnticState, BreakLine, BreakpointCondition, BreakpointList, CartState, CpuState,
    GtiaState, HistoryEntry, KeyInput, PiaState, PokeyState, Register, SearchResult, StackState,
    Status, Sysinfo,
};
use crate::protocol::{Command, STATUS_OK};
use crate::transport::{Endpoint, SocketTransport, Transport, TransportConfig};

/// Default per-call cap for memory reads.
pub const DEFAULT_MAX_READ_CHUNK: usize = 0x400;

/// Size of the 6502 address space.
const ADDRESS_SPACE: usize = 0x10000;

/// Builder for a socket-backed [`RpcClient`].
pub struct ClientBuilder {
    endpoint: Option<Endpoint>,
    transport_config: TransportConfig,
    max_read_chunk: usize,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            transport_config: TransportConfig::default(),
            max_read_chunk: DEFAULT_MAX_READ_CHUNK,
        }
    }

    /// Set the endpoint.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the endpoint from a string (`tcp:HOST:PORT` or a socket path).
    pub fn socket(self, endpoint: &str) -> Self {
        self.endpoint(Endpoint::parse(endpoint))
    }

    /// Set the connect deadline.
    ///
    /// Default: 500 ms
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport_config.connect_timeout = timeout;
        self
    }

    /// Set the write and read deadlines.
    ///
    /// Default: 500 ms
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.transport_config.write_timeout = timeout;
        self.transport_config.read_timeout = timeout;
        self
    }

    /// Set the per-call memory read cap.
    ///
    /// Default: 1024
    pub fn max_read_chunk(mut self, chunk: usize) -> Self {
        self.max_read_chunk = chunk;
        self
    }

    /// Build the client. Does not connect; the first call does.
    pub fn build(self) -> Result<RpcClient<SocketTransport>> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| MonitorError::Config("No endpoint configured".to_string()))?;
        let transport = SocketTransport::with_config(endpoint, self.transport_config);
        RpcClient::new(transport).with_max_read_chunk(self.max_read_chunk)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed, serialized access to the emulator monitor.
pub struct RpcClient<T> {
    transport: Mutex<T>,
    last_error: StdMutex<Option<String>>,
    max_read_chunk: usize,
}

impl RpcClient<SocketTransport> {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<T: Transport> RpcClient<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            last_error: StdMutex::new(None),
            max_read_chunk: DEFAULT_MAX_READ_CHUNK,
        }
    }

    /// Override the per-call memory read cap (1..=65535).
    pub fn with_max_read_chunk(mut self, chunk: usize) -> Result<Self> {
        if chunk == 0 || chunk > 0xFFFF {
            return Err(MonitorError::Config(format!(
                "max_read_chunk must be in 1..=65535, got {chunk}"
            )));
        }
        self.max_read_chunk = chunk;
        Ok(self)
    }

    /// Message of the last connection-level failure, cleared by the next
    /// successful exchange.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Connect (or reconnect) and refresh the capability table.
    pub async fn connect(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        let result = transport.connect().await;
        match &result {
            Ok(()) => self.set_last_error(None),
            Err(e) => self.set_last_error(Some(e.to_string())),
        }
        result
    }

    /// Drop the connection. The next call reconnects.
    pub async fn disconnect(&self) {
        self.transport.lock().await.disconnect().await;
    }

    /// Capability IDs advertised by the peer on the current connection.
    pub async fn capabilities(&self) -> Vec<u16> {
        self.transport.lock().await.capabilities().to_vec()
    }

    /// Check whether a command is usable right now, without I/O.
    pub async fn supports(&self, command: Command) -> bool {
        self.transport.lock().await.translate(command).is_ok()
    }

    /// Issue one command and return its reply payload.
    ///
    /// Exactly one exchange happens per call: failures are reported, never
    /// retried here.
    pub async fn call(&self, command: Command, body: &[u8]) -> Result<Bytes> {
        let mut transport = self.transport.lock().await;

        if !command.is_static() && !transport.is_connected() {
            // bind the capability table before translating
            let result = transport.connect().await;
            let connected = match result {
                Ok(()) if transport.is_connected() => Ok(()),
                Ok(()) => Err(MonitorError::Connection(
                    "Connection lost during capability probe".to_string(),
                )),
                Err(e) => Err(e),
            };
            if let Err(e) = connected {
                self.set_last_error(Some(e.to_string()));
                return Err(e);
            }
        }

        let opcode = transport.translate(command)?;
        match transport.send(opcode, body).await {
            Ok((status, data)) => {
                self.set_last_error(None);
                if status == STATUS_OK {
                    Ok(data)
                } else {
                    tracing::debug!("{:?} failed with status {}", command, status);
                    Err(MonitorError::command(status, &data))
                }
            }
            Err(e) => {
                if e.is_connection() {
                    tracing::debug!("{:?} lost the connection: {}", command, e);
                    self.set_last_error(Some(e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn call_empty(&self, command: Command) -> Result<()> {
        self.call(command, &[]).await.map(|_| ())
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Read `length` bytes starting at `addr`, wrapping at 0x10000.
    ///
    /// Requests larger than the chunk cap, or crossing the top of memory,
    /// are split into sequential calls.
    pub async fn read_memory(&self, addr: u16, length: usize) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let mut out = BytesMut::with_capacity(length);
        let mut cur = addr as usize;
        let mut remaining = length;
        while remaining > 0 {
            let take = remaining.min(self.max_read_chunk).min(ADDRESS_SPACE - cur);
            let body = payload::encode_mem_read(cur as u16, take as u16);
            let data = self.call(Command::MemRead, &body).await?;
            if data.len() < take {
                return Err(MonitorError::short("MEM_READ"));
            }
            out.extend_from_slice(&data[..take]);
            cur = (cur + take) % ADDRESS_SPACE;
            remaining -= take;
        }
        Ok(out.freeze())
    }

    /// Read one byte.
    pub async fn read_byte(&self, addr: u16) -> Result<u8> {
        let data = self.read_memory(addr, 1).await?;
        Ok(data[0])
    }

    /// Read a little-endian pointer.
    pub async fn read_vector(&self, addr: u16) -> Result<u16> {
        let data = self.read_memory(addr, 2).await?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    /// Read several ranges in one exchange. Results are concatenated.
    pub async fn read_memory_multiple(&self, ranges: &[(u16, u16)]) -> Result<Bytes> {
        let body = payload::encode_mem_readv(ranges)?;
        self.call(Command::MemReadv, &body).await
    }

    /// Write a block of memory.
    pub async fn write_memory(&self, addr: u16, data: &[u8]) -> Result<()> {
        let body = payload::encode_write_memory(addr, data)?;
        self.call(Command::WriteMemory, &body).await.map(|_| ())
    }

    /// Search memory between `start` and `end` for a byte pattern.
    pub async fn search(&self, start: u16, end: u16, pattern: &[u8]) -> Result<SearchResult> {
        let body = payload::encode_search(start, end, pattern)?;
        SearchResult::decode(&self.call(Command::Search, &body).await?)
    }

    // ========================================================================
    // CPU and machine state
    // ========================================================================

    /// Round-trip an empty request to check the link.
    pub async fn ping(&self) -> Result<()> {
        self.call_empty(Command::Ping).await
    }

    /// Registers and beam position.
    pub async fn cpu_state(&self) -> Result<CpuState> {
        CpuState::decode(&self.call(Command::CpuState, &[]).await?)
    }

    /// Emulator run state and counters.
    pub async fn status(&self) -> Result<Status> {
        Status::decode(&self.call(Command::Status, &[]).await?)
    }

    /// Static machine configuration.
    pub async fn sysinfo(&self) -> Result<Sysinfo> {
        Sysinfo::decode(&self.call(Command::Sysinfo, &[]).await?)
    }

    /// Capability IDs, queried explicitly (the transport caches its own copy).
    pub async fn build_features(&self) -> Result<Vec<u16>> {
        payload::decode_capabilities(&self.call(Command::BuildFeatures, &[]).await?)
    }

    /// Recently executed instructions.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        payload::decode_history(&self.call(Command::History, &[]).await?)
    }

    /// Source addresses of recent jumps.
    pub async fn jumps(&self) -> Result<Vec<u16>> {
        payload::decode_jumps(&self.call(Command::Jumps, &[]).await?)
    }

    /// Stack pointer and the live part of page 1.
    pub async fn stack(&self) -> Result<StackState> {
        StackState::decode(&self.call(Command::Stack, &[]).await?)
    }

    /// Set a register or a single status flag.
    pub async fn set_register(&self, register: Register, value: u16) -> Result<()> {
        let body = payload::encode_set_reg(register, value);
        self.call(Command::SetReg, &body).await.map(|_| ())
    }

    /// GTIA register snapshot.
    pub async fn gtia_state(&self) -> Result<GtiaState> {
        GtiaState::decode(&self.call(Command::GtiaState, &[]).await?)
    }

    /// ANTIC register snapshot.
    pub async fn antic_state(&self) -> Result<AnticState> {
        AnticState::decode(&self.call(Command::AnticState, &[]).await?)
    }

    /// PIA register snapshot.
    pub async fn pia_state(&self) -> Result<PiaState> {
        PiaState::decode(&self.call(Command::PiaState, &[]).await?)
    }

    /// POKEY register snapshot.
    pub async fn pokey_state(&self) -> Result<PokeyState> {
        PokeyState::decode(&self.call(Command::PokeyState, &[]).await?)
    }

    /// Main and piggyback cartridge slots.
    pub async fn cart_state(&self) -> Result<CartState> {
        CartState::decode(&self.call(Command::CartState, &[]).await?)
    }

    /// Address of the active display list.
    pub async fn dlist_addr(&self) -> Result<u16> {
        payload::decode_u16(&self.call(Command::DlistAddr, &[]).await?, "DLIST_ADDR")
    }

    /// Raw display list bytes, from `start` or the active list.
    pub async fn dlist_dump(&self, start: Option<u16>) -> Result<Bytes> {
        match start {
            Some(addr) => self.call(Command::DlistDump, &addr.to_le_bytes()).await,
            None => self.call(Command::DlistDump, &[]).await,
        }
    }

    // ========================================================================
    // Execution control (never retried)
    // ========================================================================

    /// Stop the CPU.
    pub async fn pause(&self) -> Result<()> {
        self.call_empty(Command::Pause).await
    }

    /// Resume a paused CPU.
    pub async fn continue_run(&self) -> Result<()> {
        self.call_empty(Command::Continue).await
    }

    /// Execute one instruction.
    pub async fn step(&self) -> Result<()> {
        self.call_empty(Command::Step).await
    }

    /// Run until the next vertical blank.
    pub async fn step_vblank(&self) -> Result<()> {
        self.call_empty(Command::StepVblank).await
    }

    /// Step over a `JSR`, running the subroutine to completion.
    pub async fn step_over(&self) -> Result<()> {
        self.call_empty(Command::StepOver).await
    }

    /// Run until the current subroutine returns.
    pub async fn run_until_return(&self) -> Result<()> {
        self.call_empty(Command::RunUntilReturn).await
    }

    /// Power-cycle the emulated machine.
    pub async fn coldstart(&self) -> Result<()> {
        self.call_empty(Command::Coldstart).await
    }

    /// Press the emulated RESET key.
    pub async fn warmstart(&self) -> Result<()> {
        self.call_empty(Command::Warmstart).await
    }

    /// Load and run an image file on the emulator host.
    pub async fn run(&self, path: &str) -> Result<()> {
        self.call(Command::Run, path.as_bytes()).await.map(|_| ())
    }

    /// Eject the cartridge.
    pub async fn remove_cartridge(&self) -> Result<()> {
        self.call_empty(Command::RemoveCartridge).await
    }

    /// Eject the cassette.
    pub async fn remove_tape(&self) -> Result<()> {
        self.call_empty(Command::RemoveTape).await
    }

    /// Eject every mounted disk.
    pub async fn remove_disks(&self) -> Result<()> {
        self.call_empty(Command::RemoveDisks).await
    }

    /// Ask the emulator process to exit.
    pub async fn stop_emulator(&self) -> Result<()> {
        self.call_empty(Command::StopEmulator).await
    }

    /// Restart the emulator process.
    pub async fn restart_emulator(&self) -> Result<()> {
        self.call_empty(Command::RestartEmulator).await
    }

    /// Drop into the emulator's own built-in monitor.
    pub async fn builtin_monitor(&self) -> Result<()> {
        self.call_empty(Command::BuiltinMonitor).await
    }

    /// Inject a key event. Not available on the socket transport.
    pub async fn input_key(&self, key: KeyInput) -> Result<()> {
        self.call(Command::InputKey, &key.encode()).await.map(|_| ())
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    /// The breakpoint table.
    pub async fn breakpoint_list(&self) -> Result<BreakpointList> {
        BreakpointList::decode(&self.call(Command::BpList, &[]).await?)
    }

    /// Append a clause; returns its zero-based index.
    pub async fn breakpoint_add_clause(&self, conditions: &[BreakpointCondition]) -> Result<u16> {
        let body = payload::encode_breakpoint_clause(conditions)?;
        payload::decode_u16(&self.call(Command::BpAddClause, &body).await?, "BP_ADD_CLAUSE")
    }

    /// Remove the clause at `index`.
    pub async fn breakpoint_delete_clause(&self, index: u16) -> Result<()> {
        self.call(Command::BpDeleteClause, &index.to_le_bytes())
            .await
            .map(|_| ())
    }

    /// Remove every breakpoint clause.
    pub async fn breakpoint_clear(&self) -> Result<()> {
        self.call_empty(Command::BpClear).await
    }

    /// Enable or disable the whole table; returns the resulting state.
    pub async fn breakpoint_set_enabled(&self, enabled: bool) -> Result<bool> {
        let data = self.call(Command::BpSetEnabled, &[enabled as u8]).await?;
        payload::decode_flag(&data, "BP_SET_ENABLED")
    }

    /// Query (`None`) or set break-on-BRK; returns the resulting state.
    pub async fn break_on_brk(&self, enabled: Option<bool>) -> Result<bool> {
        let data = match enabled {
            Some(on) => self.call(Command::Bbrk, &[on as u8]).await?,
            None => self.call(Command::Bbrk, &[]).await?,
        };
        payload::decode_flag(&data, "BBRK")
    }

    /// Query (`None`) or set the break scanline.
    pub async fn break_line(&self, scanline: Option<u16>) -> Result<BreakLine> {
        let data = match scanline {
            Some(line) => self.call(Command::Bline, &line.to_le_bytes()).await?,
            None => self.call(Command::Bline, &[]).await?,
        };
        BreakLine::decode(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{capability, CommandTable};
    use crate::transport::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum WireEvent {
        Write(u8, Vec<u8>),
        Read(u8),
    }

    /// In-memory peer: 64 KB of memory, fixed CPU state, recorded wire log.
    struct FakeTransport {
        memory: Vec<u8>,
        caps: Vec<u16>,
        table: CommandTable,
        connected: bool,
        log: Arc<StdMutex<Vec<WireEvent>>>,
        busy: Arc<AtomicBool>,
        sends: Arc<AtomicUsize>,
        fail_next: Arc<AtomicBool>,
    }

    impl FakeTransport {
        fn new(caps: &[u16]) -> Self {
            let memory = (0..0x10000).map(|i| (i & 0xFF) as u8).collect();
            Self {
                memory,
                caps: caps.to_vec(),
                table: CommandTable::static_subset(),
                connected: false,
                log: Arc::default(),
                busy: Arc::default(),
                sends: Arc::default(),
                fail_next: Arc::default(),
            }
        }

        fn reply(&self, opcode: u8, body: &[u8]) -> (u8, Bytes) {
            match opcode {
                1 => (0, Bytes::new()),
                3 => {
                    let addr = u16::from_le_bytes([body[0], body[1]]) as usize;
                    let len = u16::from_le_bytes([body[2], body[3]]) as usize;
                    // this peer refuses reads that cross the top of memory
                    if addr + len > 0x10000 {
                        return (1, Bytes::from_static(b"range"));
                    }
                    (0, Bytes::copy_from_slice(&self.memory[addr..addr + len]))
                }
                5 => (0, Bytes::from_static(&[0, 0, 0, 0, 0x00, 0x20, 1, 2, 3, 0xFF, 0x30])),
                8 => (0, Bytes::new()),
                26 => (0, Bytes::from_static(&[1, 0, 0])),
                _ => (4, Bytes::from_static(b"unknown command")),
            }
        }
    }

    impl Transport for FakeTransport {
        fn translate(&self, command: Command) -> Result<u8> {
            self.table.translate(command)
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn capabilities(&self) -> &[u16] {
            &self.caps
        }

        fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.connected = true;
                self.table = CommandTable::from_capabilities(&self.caps);
                Ok(())
            })
        }

        fn send<'a>(&'a mut self, opcode: u8, body: &'a [u8]) -> BoxFuture<'a, Result<(u8, Bytes)>> {
            Box::pin(async move {
                self.sends.fetch_add(1, Ordering::SeqCst);
                assert!(!self.busy.swap(true, Ordering::SeqCst), "frames interleaved");
                self.log.lock().unwrap().push(WireEvent::Write(opcode, body.to_vec()));
                tokio::time::sleep(Duration::from_millis(2)).await;
                let result = if self.fail_next.swap(false, Ordering::SeqCst) {
                    self.connected = false;
                    self.table = CommandTable::static_subset();
                    Err(MonitorError::Timeout("Packet"))
                } else {
                    if !self.connected {
                        self.connected = true;
                        self.table = CommandTable::from_capabilities(&self.caps);
                    }
                    Ok(self.reply(opcode, body))
                };
                self.log.lock().unwrap().push(WireEvent::Read(opcode));
                self.busy.store(false, Ordering::SeqCst);
                result
            })
        }

        fn disconnect(&mut self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.connected = false;
                self.table = CommandTable::static_subset();
            })
        }
    }

    #[tokio::test]
    async fn test_unsupported_command_does_no_io() {
        let fake = FakeTransport::new(&[]);
        let sends = fake.sends.clone();
        let client = RpcClient::new(fake);

        let err = client.breakpoint_list().await.unwrap_err();
        assert!(matches!(err, MonitorError::UnsupportedCommand(Command::BpList)));

        let err = client.input_key(KeyInput::default()).await.unwrap_err();
        assert!(matches!(err, MonitorError::UnsupportedCommand(Command::InputKey)));
        assert_eq!(sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capability_table_enables_breakpoints() {
        let client = RpcClient::new(FakeTransport::new(&[capability::MONITOR_BREAKPOINTS]));
        let list = client.breakpoint_list().await.unwrap();
        assert!(list.enabled);
        assert!(list.clauses.is_empty());
        assert_eq!(client.capabilities().await, vec![capability::MONITOR_BREAKPOINTS]);
    }

    #[tokio::test]
    async fn test_read_memory_wraps_top_of_memory() {
        let fake = FakeTransport::new(&[]);
        let log = fake.log.clone();
        let client = RpcClient::new(fake);

        let data = client.read_memory(0xFFFE, 4).await.unwrap();
        assert_eq!(&data[..], &[0xFE, 0xFF, 0x00, 0x01]);

        let writes: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                WireEvent::Write(op, body) => Some((*op, body.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![(3, vec![0xFE, 0xFF, 2, 0]), (3, vec![0x00, 0x00, 2, 0])]
        );
    }

    #[tokio::test]
    async fn test_read_memory_chunks_large_requests() {
        let fake = FakeTransport::new(&[]);
        let sends = fake.sends.clone();
        let client = RpcClient::new(fake).with_max_read_chunk(0x100).unwrap();

        let data = client.read_memory(0x2000, 0x250).await.unwrap();
        assert_eq!(data.len(), 0x250);
        assert_eq!(data[0x100], 0x00);
        assert_eq!(data[0x24F], 0x4F);
        assert_eq!(sends.load(Ordering::SeqCst), 3);

        assert!(client.read_memory(0x2000, 0).await.unwrap().is_empty());
        assert_eq!(sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_calls_never_interleave() {
        let fake = FakeTransport::new(&[]);
        let log = fake.log.clone();
        let client = Arc::new(RpcClient::new(fake));

        let mut tasks = Vec::new();
        for i in 0..8u16 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                client.read_memory(i * 0x100, 8).await.unwrap();
                client.cpu_state().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len() % 2, 0);
        for pair in log.chunks(2) {
            match (&pair[0], &pair[1]) {
                (WireEvent::Write(a, _), WireEvent::Read(b)) => assert_eq!(a, b),
                other => panic!("interleaved exchange: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_command_error_carries_status_and_message() {
        let client = RpcClient::new(FakeTransport::new(&[]));
        let err = client.sysinfo().await.unwrap_err();
        match err {
            MonitorError::Command { status, message } => {
                assert_eq!(status, 4);
                assert_eq!(message.as_deref(), Some("unknown command"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(client.last_error().is_none());
    }

    #[tokio::test]
    async fn test_connection_error_sets_last_error_and_recovers() {
        let fake = FakeTransport::new(&[]);
        let fail = fake.fail_next.clone();
        let sends = fake.sends.clone();
        let client = RpcClient::new(fake);

        client.step().await.unwrap();
        fail.store(true, Ordering::SeqCst);
        let err = client.step().await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(client.last_error().as_deref(), Some("Packet timeout"));
        // the failed step is not retried
        assert_eq!(sends.load(Ordering::SeqCst), 2);

        let cpu = client.cpu_state().await.unwrap();
        assert_eq!(cpu.pc, 0x2000);
        assert!(client.last_error().is_none());
    }

    #[tokio::test]
    async fn test_read_vector_and_byte() {
        let client = RpcClient::new(FakeTransport::new(&[]));
        assert_eq!(client.read_byte(0x1234).await.unwrap(), 0x34);
        assert_eq!(client.read_vector(0x02FE).await.unwrap(), 0xFFFE);
    }

    #[test]
    fn test_builder_requires_endpoint() {
        assert!(matches!(ClientBuilder::new().build(), Err(MonitorError::Config(_))));
        assert!(RpcClient::builder()
            .socket("tcp:127.0.0.1:1")
            .max_read_chunk(0)
            .build()
            .is_err());
        assert!(RpcClient::builder()
            .socket("tcp:127.0.0.1:1")
            .io_timeout(Duration::from_millis(100))
            .build()
            .is_ok());
    }
}
