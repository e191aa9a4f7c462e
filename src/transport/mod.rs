//! Transport module - one request frame in, one reply frame out.
//!
//! A [`Transport`] owns the connection to the emulator. It frames a request,
//! reads exactly one reply, and silently re-establishes the connection on
//! the next exchange after any failure.
//!
//! ```text
//!  RpcClient ──lock──▶ Transport::send(opcode, payload)
//!                          │  connect + capability probe (lazy)
//!                          │  write  [op][len LE][payload]      (write deadline)
//!                          │  read   [status][len LE]           (read deadline)
//!                          │  read   [payload; len]             (read deadline)
//!                          ▼
//!                     (status, payload)   any error ⇒ disconnect
//! ```
//!
//! The trait is object safe (boxed futures) so the client can be driven by
//! the socket implementation or by an in-memory fake in tests.

mod socket;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::Command;

pub use socket::{Endpoint, SocketTransport, TransportConfig, DEFAULT_IO_TIMEOUT};

/// Boxed future returned by transport methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A half-duplex request/response channel to the emulator.
///
/// Methods take `&mut self`: holding the transport exclusively is what
/// guarantees a single exchange in flight.
pub trait Transport: Send + 'static {
    /// Resolve a logical command to this transport's opcode.
    ///
    /// Must fail with `UnsupportedCommand` without doing any I/O.
    fn translate(&self, command: Command) -> Result<u8>;

    /// True while a connection is established.
    fn is_connected(&self) -> bool;

    /// Capability IDs cached from the last successful probe.
    fn capabilities(&self) -> &[u16];

    /// (Re)open the connection and refresh the capability table.
    ///
    /// A failing capability probe leaves the table empty but does not fail
    /// the connect.
    fn connect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Exchange one frame. Connects first if needed.
    fn send<'a>(&'a mut self, opcode: u8, payload: &'a [u8]) -> BoxFuture<'a, Result<(u8, Bytes)>>;

    /// Drop the connection. Never fails.
    fn disconnect(&mut self) -> BoxFuture<'_, ()>;
}
