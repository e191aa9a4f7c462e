//! Disassembler - dump code from a running emulator.
//!
//! This example demonstrates:
//! - Building a client from a `MonitorConfig`
//! - Reading memory across the top of the address space
//! - Decoding with Atari symbol comments
//!
//! # Running
//!
//! ```text
//! cargo run --example disasm -- [SOCKET] [ADDR] [COUNT]
//! cargo run --example disasm -- /tmp/atari.sock E477 16
//! RUST_LOG=a800mon_client=debug cargo run --example disasm
//! ```
//!
//! Without ADDR the listing starts at the program counter.

use a800mon_client::disasm::{AtariSymbols, Decoder};
use a800mon_client::MonitorConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = MonitorConfig::default();
    if let Some(socket) = args.next() {
        config.socket = socket;
    }
    let addr = args
        .next()
        .map(|a| u16::from_str_radix(a.trim_start_matches('$'), 16))
        .transpose()?;
    let count: usize = args.next().map(|c| c.parse()).transpose()?.unwrap_or(20);

    let client = config.build_client()?;
    let start = match addr {
        Some(addr) => addr,
        None => client.cpu_state().await?.pc,
    };

    let decoder = Decoder::new().with_symbols(AtariSymbols);
    let code = client.read_memory(start, count * 3).await?;
    for ins in decoder.decode(start, &code).iter().take(count) {
        println!("{ins}");
    }
    Ok(())
}
