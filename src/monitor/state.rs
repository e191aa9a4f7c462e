//! Application state and its single writer.
//!
//! [`AppState`] is plain data. Every change goes through
//! [`Store::dispatch`], which bumps [`AppState::revision`] so observers can
//! tell states apart and order them.

use serde::Serialize;

use crate::protocol::payload::{CpuState, Status};
use crate::protocol::Command;

use super::EmulatorLink;

/// What the operator is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AppMode {
    /// Emulator running.
    #[default]
    Normal,
    /// Emulator paused for inspection.
    Debug,
    /// Reset/terminate prompt is open.
    Shutdown,
}

/// Everything the monitor knows about the emulator and the session.
#[derive(Debug, Clone, Serialize)]
pub struct AppState {
    pub revision: u64,
    pub cpu: Option<CpuState>,
    /// One-line disassembly at the program counter.
    pub cpu_disasm: String,
    pub paused: bool,
    pub crashed: bool,
    pub emu_ms: u64,
    pub reset_ms: u64,
    pub state_seq: u32,
    pub machine_type: Option<u8>,
    pub last_rpc_error: Option<String>,
    /// Why the disassembly view could not be refreshed; rows shown are stale.
    pub view_error: Option<String>,
    pub active_mode: AppMode,
    pub ui_frozen: bool,
    pub disassembly_enabled: bool,
    pub disassembly_addr: Option<u16>,
    pub breakpoints_supported: bool,
    pub frame_time_ms: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            revision: 0,
            cpu: None,
            cpu_disasm: String::new(),
            paused: false,
            crashed: false,
            emu_ms: 0,
            reset_ms: 0,
            state_seq: 0,
            machine_type: None,
            last_rpc_error: None,
            view_error: None,
            active_mode: AppMode::Normal,
            ui_frozen: false,
            disassembly_enabled: true,
            disassembly_addr: None,
            breakpoints_supported: false,
            frame_time_ms: 0,
        }
    }
}

/// State change request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // emulator control, queued and sent once
    Step,
    StepVblank,
    StepOver,
    RunUntilReturn,
    Pause,
    Continue,
    Coldstart,
    Warmstart,
    /// Stop the emulator process.
    Terminate,

    // local state
    SyncMode,
    EnterShutdown,
    ExitShutdown,
    ToggleFreeze,
    SetDisassembly(bool),
    SetDisassemblyAddr(u16),
    SetBreakpointsSupported(bool),
    SetStatus(Status),
    SetLastRpcError(Option<String>),
    SetViewError(Option<String>),
    SetCpu(CpuState, String),
    SetFrameTimeMs(u64),
    Quit,
}

/// Owner of [`AppState`] plus the queue of emulator commands.
#[derive(Debug, Default)]
pub struct Store {
    state: AppState,
    queue: Vec<Command>,
    quit: bool,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Emulator commands waiting for [`flush`](Self::flush).
    pub fn queued(&self) -> &[Command] {
        &self.queue
    }

    /// Apply one action.
    pub fn dispatch(&mut self, action: Action) {
        let s = &mut self.state;
        s.revision += 1;
        match action {
            Action::Step => self.queue.push(Command::Step),
            Action::StepVblank => self.queue.push(Command::StepVblank),
            Action::StepOver => self.queue.push(Command::StepOver),
            Action::RunUntilReturn => self.queue.push(Command::RunUntilReturn),
            Action::Pause => {
                self.queue.push(Command::Pause);
                s.active_mode = AppMode::Debug;
            }
            Action::Continue => {
                self.queue.push(Command::Continue);
                s.active_mode = AppMode::Normal;
            }
            Action::Coldstart => {
                self.queue.push(Command::Coldstart);
                s.active_mode = mode_for(s.paused);
            }
            Action::Warmstart => {
                self.queue.push(Command::Warmstart);
                s.active_mode = mode_for(s.paused);
            }
            Action::Terminate => {
                self.queue.push(Command::StopEmulator);
                s.active_mode = mode_for(s.paused);
            }
            Action::SyncMode => {
                if s.active_mode != AppMode::Shutdown {
                    s.active_mode = mode_for(s.paused);
                }
            }
            Action::EnterShutdown => s.active_mode = AppMode::Shutdown,
            Action::ExitShutdown => s.active_mode = mode_for(s.paused),
            Action::ToggleFreeze => s.ui_frozen = !s.ui_frozen,
            Action::SetDisassembly(enabled) => s.disassembly_enabled = enabled,
            Action::SetDisassemblyAddr(addr) => s.disassembly_addr = Some(addr),
            Action::SetBreakpointsSupported(supported) => s.breakpoints_supported = supported,
            Action::SetStatus(status) => {
                s.paused = status.paused;
                s.crashed = status.crashed;
                s.emu_ms = status.emu_ms;
                s.reset_ms = status.reset_ms;
                s.state_seq = status.state_seq;
                s.machine_type = status.machine_type;
            }
            Action::SetLastRpcError(error) => s.last_rpc_error = error,
            Action::SetViewError(error) => s.view_error = error,
            Action::SetCpu(cpu, disasm) => {
                s.cpu = Some(cpu);
                s.cpu_disasm = disasm;
            }
            Action::SetFrameTimeMs(ms) => s.frame_time_ms = ms,
            Action::Quit => self.quit = true,
        }
    }

    /// Send every queued emulator command once, in order.
    ///
    /// Failures are logged and dropped; a step is never repeated behind the
    /// operator's back. Returns true if anything was sent.
    pub async fn flush<E>(&mut self, link: &E) -> bool
    where
        E: EmulatorLink + ?Sized,
    {
        if self.queue.is_empty() {
            return false;
        }
        for command in std::mem::take(&mut self.queue) {
            match link.execute(command).await {
                Ok(()) => tracing::debug!(?command, "emulator command sent"),
                Err(e) => tracing::warn!(?command, error = %e, "emulator command failed"),
            }
        }
        true
    }
}

fn mode_for(paused: bool) -> AppMode {
    if paused {
        AppMode::Debug
    } else {
        AppMode::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::FakeEmulator;

    fn paused_status() -> Status {
        Status {
            paused: true,
            emu_ms: 1000,
            reset_ms: 500,
            state_seq: 7,
            ..Status::default()
        }
    }

    #[test]
    fn test_every_dispatch_bumps_revision() {
        let mut store = Store::new();
        store.dispatch(Action::ToggleFreeze);
        store.dispatch(Action::ToggleFreeze);
        assert_eq!(store.state().revision, 2);
        assert!(!store.state().ui_frozen);
    }

    #[test]
    fn test_status_and_mode_sync() {
        let mut store = Store::new();
        store.dispatch(Action::SetStatus(paused_status()));
        assert!(store.state().paused);
        assert_eq!(store.state().state_seq, 7);
        assert_eq!(store.state().active_mode, AppMode::Normal);

        store.dispatch(Action::SyncMode);
        assert_eq!(store.state().active_mode, AppMode::Debug);

        store.dispatch(Action::EnterShutdown);
        store.dispatch(Action::SyncMode);
        assert_eq!(store.state().active_mode, AppMode::Shutdown);
        store.dispatch(Action::ExitShutdown);
        assert_eq!(store.state().active_mode, AppMode::Debug);
    }

    #[test]
    fn test_emulator_actions_are_queued() {
        let mut store = Store::new();
        store.dispatch(Action::Pause);
        store.dispatch(Action::Step);
        store.dispatch(Action::Warmstart);
        assert_eq!(
            store.queued(),
            &[Command::Pause, Command::Step, Command::Warmstart]
        );
        assert_eq!(store.state().active_mode, AppMode::Normal);
    }

    #[test]
    fn test_quit() {
        let mut store = Store::new();
        assert!(!store.quit_requested());
        store.dispatch(Action::Quit);
        assert!(store.quit_requested());
    }

    #[tokio::test]
    async fn test_flush_sends_once_even_on_failure() {
        let link = FakeEmulator::new();
        link.fail_execute(true);
        let mut store = Store::new();
        store.dispatch(Action::Step);
        store.dispatch(Action::Continue);

        assert!(store.flush(&link).await);
        assert_eq!(link.executed(), vec![Command::Step, Command::Continue]);
        assert!(store.queued().is_empty());

        assert!(!store.flush(&link).await);
        assert_eq!(link.executed().len(), 2);
    }
}
