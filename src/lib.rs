//! # a800mon-client
//!
//! Client for the Atari800 emulator's binary monitor socket.
//!
//! The crate talks to a running emulator over a Unix or TCP socket and
//! gives typed access to memory, CPU registers, breakpoints and execution
//! control. On top of that it decodes 6502 machine code and keeps a
//! scrollable disassembly view in step with the program counter.
//!
//! ## Architecture
//!
//! - **Transport** (`transport`): one length-prefixed request in, one reply
//!   out, with per-operation deadlines and silent reconnect
//! - **RPC client** (`client`): capability-gated commands, serialized calls,
//!   chunked memory reads, typed replies
//! - **Decoder** (`disasm`): pure forward 6502 decoding with symbol comments
//! - **Navigation** (`navigation`): finds instruction boundaries backward by
//!   forward decoding and verification
//! - **Application core** (`monitor`): state store, status and input pumps,
//!   event loop
//!
//! ## Example
//!
//! ```ignore
//! use a800mon_client::{disasm, RpcClient};
//!
//! #[tokio::main]
//! async fn main() -> a800mon_client::Result<()> {
//!     let client = RpcClient::builder().socket("/tmp/atari.sock").build()?;
//!
//!     let cpu = client.cpu_state().await?;
//!     let code = client.read_memory(cpu.pc, 32).await?;
//!     for ins in disasm::decode(cpu.pc, &code) {
//!         println!("{ins}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod disasm;
pub mod error;
pub mod monitor;
pub mod navigation;
pub mod protocol;
pub mod transport;

pub use client::{ClientBuilder, RpcClient};
pub use config::MonitorConfig;
pub use disasm::{DecodedInstruction, Decoder};
pub use error::{MonitorError, Result};
pub use monitor::Monitor;
pub use navigation::{DisassemblyView, MemorySource, NavCommand};
pub use protocol::Command;
pub use transport::{Endpoint, SocketTransport, Transport};
