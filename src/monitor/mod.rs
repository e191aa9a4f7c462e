//! Application core: state store, background pumps and the event loop.
//!
//! ```text
//!   InputSource ──spawn_blocking──▶ input pump ──┐
//!                                                ├──▶ mpsc<Event> ──▶ Monitor::run
//!   EmulatorLink ◀── status pump (interval/wake) ┘        │  Store::dispatch
//!        ▲                                                │  Store::flush (once)
//!        └────────── DisassemblyView::refresh ◀───────────┘  Renderer::render
//! ```
//!
//! All emulator calls go through one [`EmulatorLink`], which serializes
//! them. Shutdown is cooperative: the pumps watch a channel and exit at
//! their next suspension point; a call already on the wire is allowed to
//! finish.

mod app;
mod state;
mod status;

use std::time::Duration;

use serde::Serialize;

use crate::client::RpcClient;
use crate::disasm::DecodedInstruction;
use crate::error::Result;
use crate::navigation::{MemorySource, NavCommand};
use crate::protocol::payload::{CpuState, Status};
use crate::protocol::Command;
use crate::transport::{BoxFuture, Transport};

pub use app::{Monitor, EVENT_QUEUE_CAPACITY};
pub use state::{Action, AppMode, AppState, Store};
pub use status::{StatusIntervals, StatusPump, CAPABILITY_RETRY_INTERVAL};

/// The emulator operations the application core needs.
pub trait EmulatorLink: MemorySource {
    fn status(&self) -> BoxFuture<'_, Result<Status>>;

    fn cpu_state(&self) -> BoxFuture<'_, Result<CpuState>>;

    /// Capability IDs reported by the emulator.
    fn build_features(&self) -> BoxFuture<'_, Result<Vec<u16>>>;

    /// Issue an argument-less control command.
    fn execute(&self, command: Command) -> BoxFuture<'_, Result<()>>;

    /// Last connection-level failure, if the link is currently broken.
    fn last_error(&self) -> Option<String>;
}

impl<T: Transport> EmulatorLink for RpcClient<T> {
    fn status(&self) -> BoxFuture<'_, Result<Status>> {
        Box::pin(RpcClient::status(self))
    }

    fn cpu_state(&self) -> BoxFuture<'_, Result<CpuState>> {
        Box::pin(RpcClient::cpu_state(self))
    }

    fn build_features(&self) -> BoxFuture<'_, Result<Vec<u16>>> {
        Box::pin(RpcClient::build_features(self))
    }

    fn execute(&self, command: Command) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.call(command, &[]).await.map(|_| ()) })
    }

    fn last_error(&self) -> Option<String> {
        RpcClient::last_error(self)
    }
}

/// Input decoded by an [`InputSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Nav(NavCommand),
    ToggleFollow,
    Action(Action),
    /// New disassembly viewport height.
    Resize(usize),
    Quit,
}

/// Blocking source of operator input (a terminal, a script).
pub trait InputSource: Send + 'static {
    /// Wait up to `timeout` for the next event. `None` on timeout.
    fn poll_input(&mut self, timeout: Duration) -> Option<InputEvent>;
}

/// Draws the current state.
pub trait Renderer {
    fn render(&mut self, state: &AppState, rows: &[DecodedInstruction]);
}

/// Item on the main event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Input(InputEvent),
    /// Actions produced by one status poll.
    Status(Vec<Action>),
}

/// Counters kept by [`Monitor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub events: u64,
    pub renders: u64,
    pub flushes: u64,
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::error::MonitorError;
    use crate::navigation::testing::FakeMemory;

    /// In-memory emulator with call accounting.
    pub struct FakeEmulator {
        pub memory: FakeMemory,
        status: Mutex<Status>,
        cpu: Mutex<CpuState>,
        caps: Mutex<Vec<u16>>,
        executed: Mutex<Vec<Command>>,
        status_calls: AtomicUsize,
        cpu_calls: AtomicUsize,
        caps_calls: AtomicUsize,
        fail_execute: AtomicBool,
        offline: AtomicBool,
    }

    impl FakeEmulator {
        pub fn new() -> Self {
            Self {
                memory: FakeMemory::with_program(),
                status: Mutex::new(Status::default()),
                cpu: Mutex::new(CpuState {
                    pc: 0x2000,
                    ..CpuState::default()
                }),
                caps: Mutex::new(vec![1, 2]),
                executed: Mutex::new(Vec::new()),
                status_calls: AtomicUsize::new(0),
                cpu_calls: AtomicUsize::new(0),
                caps_calls: AtomicUsize::new(0),
                fail_execute: AtomicBool::new(false),
                offline: AtomicBool::new(false),
            }
        }

        pub fn set_status(&self, status: Status) {
            *self.status.lock().unwrap() = status;
        }

        pub fn set_pc(&self, pc: u16) {
            self.cpu.lock().unwrap().pc = pc;
        }

        pub fn set_caps(&self, caps: Vec<u16>) {
            *self.caps.lock().unwrap() = caps;
        }

        pub fn fail_execute(&self, fail: bool) {
            self.fail_execute.store(fail, Ordering::SeqCst);
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
            self.memory.set_failing(offline);
        }

        pub fn executed(&self) -> Vec<Command> {
            self.executed.lock().unwrap().clone()
        }

        pub fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }

        pub fn cpu_calls(&self) -> usize {
            self.cpu_calls.load(Ordering::SeqCst)
        }

        pub fn caps_calls(&self) -> usize {
            self.caps_calls.load(Ordering::SeqCst)
        }

        fn check_online(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                Err(MonitorError::Connection("emulator offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl MemorySource for FakeEmulator {
        fn read_memory(&self, addr: u16, len: usize) -> BoxFuture<'_, Result<Bytes>> {
            self.memory.read_memory(addr, len)
        }
    }

    impl EmulatorLink for FakeEmulator {
        fn status(&self) -> BoxFuture<'_, Result<Status>> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let result = self.check_online().map(|()| *self.status.lock().unwrap());
            Box::pin(async move { result })
        }

        fn cpu_state(&self) -> BoxFuture<'_, Result<CpuState>> {
            self.cpu_calls.fetch_add(1, Ordering::SeqCst);
            let result = self.check_online().map(|()| *self.cpu.lock().unwrap());
            Box::pin(async move { result })
        }

        fn build_features(&self) -> BoxFuture<'_, Result<Vec<u16>>> {
            self.caps_calls.fetch_add(1, Ordering::SeqCst);
            let result = self.check_online().map(|()| self.caps.lock().unwrap().clone());
            Box::pin(async move { result })
        }

        fn execute(&self, command: Command) -> BoxFuture<'_, Result<()>> {
            self.executed.lock().unwrap().push(command);
            let result = if self.fail_execute.load(Ordering::SeqCst) {
                Err(MonitorError::Command {
                    status: 1,
                    message: None,
                })
            } else {
                self.check_online()
            };
            Box::pin(async move { result })
        }

        fn last_error(&self) -> Option<String> {
            self.check_online().err().map(|e| e.to_string())
        }
    }

    /// Replays a fixed list of events, then reports timeouts.
    pub struct ScriptedInput {
        events: VecDeque<InputEvent>,
        delay: Duration,
    }

    impl ScriptedInput {
        pub fn new(events: impl IntoIterator<Item = InputEvent>) -> Self {
            Self {
                events: events.into_iter().collect(),
                delay: Duration::from_millis(5),
            }
        }
    }

    impl InputSource for ScriptedInput {
        fn poll_input(&mut self, timeout: Duration) -> Option<InputEvent> {
            std::thread::sleep(self.delay.min(timeout));
            self.events.pop_front()
        }
    }

    /// Records what would have been drawn.
    #[derive(Default)]
    pub struct RecordingRenderer {
        pub frames: Vec<(AppState, Vec<u16>)>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&mut self, state: &AppState, rows: &[DecodedInstruction]) {
            self.frames
                .push((state.clone(), rows.iter().map(|r| r.address).collect()));
        }
    }
}
