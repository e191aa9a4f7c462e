//! Background status polling.
//!
//! The pump asks the emulator for its status on a timer whose period
//! depends on what it saw last: short while the machine runs, long while it
//! is paused or unreachable. A [`wake`](StatusPump::waker) notification
//! cuts the wait short and forces a CPU refresh, which is how a step or a
//! continue shows up without waiting for the next tick.
//!
//! The pump never touches [`AppState`](super::AppState) directly. It keeps
//! a mirror of what it last reported and sends the differences as
//! [`Action`]s over the event queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

use crate::disasm::{Decoder, MAX_INSTRUCTION_SIZE};
use crate::protocol::capability;
use crate::protocol::payload::Status;

use super::{Action, EmulatorLink, Event};

/// Minimum spacing of capability re-sync attempts.
pub const CAPABILITY_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Poll periods per emulator condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusIntervals {
    pub paused: Duration,
    pub running: Duration,
    /// Used while the last call failed.
    pub error: Duration,
}

impl Default for StatusIntervals {
    fn default() -> Self {
        Self {
            paused: Duration::from_secs(1),
            running: Duration::from_millis(50),
            error: Duration::from_secs(1),
        }
    }
}

/// Status poller. Run it with [`StatusPump::run`] on its own task.
pub struct StatusPump<E: ?Sized> {
    link: Arc<E>,
    decoder: Arc<Decoder>,
    intervals: StatusIntervals,
    wake: Arc<Notify>,

    // mirror of what has been reported
    seen: Option<Status>,
    last_error: Option<String>,
    breakpoints_supported: Option<bool>,

    caps_synced: bool,
    last_caps_attempt: Option<Instant>,
}

impl<E> StatusPump<E>
where
    E: EmulatorLink + ?Sized + 'static,
{
    pub fn new(link: Arc<E>, decoder: Arc<Decoder>, intervals: StatusIntervals) -> Self {
        Self {
            link,
            decoder,
            intervals,
            wake: Arc::new(Notify::new()),
            seen: None,
            last_error: None,
            breakpoints_supported: None,
            caps_synced: false,
            last_caps_attempt: None,
        }
    }

    /// Handle that wakes the pump early. A wake sent while the pump is busy
    /// is kept and ends the next wait immediately.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Period before the next poll.
    pub fn interval(&self) -> Duration {
        if self.last_error.is_some() {
            self.intervals.error
        } else if self.seen.is_some_and(|s| s.paused) {
            self.intervals.paused
        } else {
            self.intervals.running
        }
    }

    /// Poll once and return the state changes to apply.
    ///
    /// `force_cpu` refreshes registers even when the status did not change.
    pub async fn poll_once(&mut self, force_cpu: bool) -> Vec<Action> {
        let mut actions = Vec::new();
        let had_error = self.last_error.is_some();

        let status = match self.link.status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::trace!(error = %e, "status poll failed");
                self.sync_error(&mut actions);
                return actions;
            }
        };

        let changed = self.seen != Some(status);
        if changed {
            self.seen = Some(status);
            actions.push(Action::SetStatus(status));
        }
        if changed || force_cpu {
            if let Some(action) = self.fetch_cpu().await {
                actions.push(action);
            }
        }

        let caps_due = self
            .last_caps_attempt
            .map_or(true, |at| at.elapsed() >= CAPABILITY_RETRY_INTERVAL);
        if (had_error || !self.caps_synced) && caps_due {
            self.last_caps_attempt = Some(Instant::now());
            self.sync_capabilities(&mut actions).await;
        }

        self.sync_error(&mut actions);
        actions
    }

    async fn fetch_cpu(&self) -> Option<Action> {
        let cpu = self.link.cpu_state().await.ok()?;
        let disasm = match self.link.read_memory(cpu.pc, MAX_INSTRUCTION_SIZE).await {
            Ok(code) => self.decoder.disasm_line(cpu.pc, &code).unwrap_or_default(),
            Err(_) => String::new(),
        };
        Some(Action::SetCpu(cpu, disasm))
    }

    async fn sync_capabilities(&mut self, actions: &mut Vec<Action>) {
        let caps = match self.link.build_features().await {
            Ok(caps) => caps,
            Err(e) => {
                tracing::debug!(error = %e, "capability re-sync failed");
                return;
            }
        };
        self.caps_synced = true;
        let supported = caps.contains(&capability::MONITOR_BREAKPOINTS);
        if self.breakpoints_supported != Some(supported) {
            tracing::debug!(?caps, supported, "breakpoint support changed");
            self.breakpoints_supported = Some(supported);
            actions.push(Action::SetBreakpointsSupported(supported));
        }
    }

    fn sync_error(&mut self, actions: &mut Vec<Action>) {
        let error = self.link.last_error();
        if error != self.last_error {
            self.last_error = error.clone();
            actions.push(Action::SetLastRpcError(error));
        }
    }

    /// Poll until `shutdown` flips or the event queue closes.
    ///
    /// A poll in progress is always completed before the shutdown signal is
    /// looked at, so no exchange is abandoned halfway.
    pub async fn run(mut self, events: mpsc::Sender<Event>, mut shutdown: watch::Receiver<bool>) {
        let mut force_cpu = false;
        loop {
            let actions = self.poll_once(force_cpu).await;
            force_cpu = false;
            if events.send(Event::Status(actions)).await.is_err() {
                break;
            }

            let interval = self.interval();
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.wake.notified() => force_cpu = true,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::debug!("status pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::AtariSymbols;
    use crate::monitor::testing::FakeEmulator;
    use crate::protocol::payload::CpuState;

    fn pump(link: &Arc<FakeEmulator>) -> StatusPump<FakeEmulator> {
        StatusPump::new(
            Arc::clone(link),
            Arc::new(Decoder::new().with_symbols(AtariSymbols)),
            StatusIntervals::default(),
        )
    }

    fn paused() -> Status {
        Status {
            paused: true,
            state_seq: 1,
            ..Status::default()
        }
    }

    #[tokio::test]
    async fn test_first_poll_reports_everything() {
        let link = Arc::new(FakeEmulator::new());
        link.set_status(paused());
        let mut pump = pump(&link);

        let actions = pump.poll_once(false).await;
        let cpu = CpuState {
            pc: 0x2000,
            ..CpuState::default()
        };
        assert_eq!(
            actions,
            vec![
                Action::SetStatus(paused()),
                Action::SetCpu(cpu, "A9 E8    LDA #$E8".to_string()),
                Action::SetBreakpointsSupported(true),
            ]
        );
        assert_eq!(pump.interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unchanged_status_is_quiet() {
        let link = Arc::new(FakeEmulator::new());
        let mut pump = pump(&link);
        pump.poll_once(false).await;

        assert!(pump.poll_once(false).await.is_empty());
        assert_eq!(link.status_calls(), 2);
        assert_eq!(link.cpu_calls(), 1);
        assert_eq!(link.caps_calls(), 1);
        assert_eq!(pump.interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_forced_poll_refreshes_cpu() {
        let link = Arc::new(FakeEmulator::new());
        let mut pump = pump(&link);
        pump.poll_once(false).await;

        link.set_pc(0x2002);
        let actions = pump.poll_once(true).await;
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::SetCpu(cpu, text) => {
                assert_eq!(cpu.pc, 0x2002);
                assert_eq!(text, "8D EA C8 STA $C8EA");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_recovery() {
        let link = Arc::new(FakeEmulator::new());
        let mut pump = pump(&link);
        pump.poll_once(false).await;

        link.set_offline(true);
        let actions = pump.poll_once(false).await;
        assert!(matches!(actions.as_slice(), [Action::SetLastRpcError(Some(_))]));
        assert_eq!(pump.interval(), Duration::from_secs(1));

        link.set_offline(false);
        link.set_caps(vec![1]);
        tokio::time::advance(CAPABILITY_RETRY_INTERVAL).await;
        let actions = pump.poll_once(false).await;
        assert_eq!(
            actions,
            vec![
                Action::SetBreakpointsSupported(false),
                Action::SetLastRpcError(None),
            ]
        );
        assert_eq!(link.caps_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_retry_is_rate_limited() {
        let link = Arc::new(FakeEmulator::new());
        let mut pump = pump(&link);
        pump.poll_once(false).await;

        // recovers within a second of the first attempt
        link.set_offline(true);
        pump.poll_once(false).await;
        link.set_offline(false);
        pump.poll_once(false).await;
        assert_eq!(link.caps_calls(), 1);

        link.set_offline(true);
        pump.poll_once(false).await;
        link.set_offline(false);
        tokio::time::advance(CAPABILITY_RETRY_INTERVAL).await;
        pump.poll_once(false).await;
        assert_eq!(link.caps_calls(), 2);
    }

    #[tokio::test]
    async fn test_wake_and_shutdown() {
        let link = Arc::new(FakeEmulator::new());
        link.set_status(paused());
        let pump = pump(&link);
        let waker = pump.waker();
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(pump.run(tx, shutdown_rx));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Event::Status(ref a) if !a.is_empty()));

        // paused interval is 1s; the wake must beat it
        waker.notify_one();
        let second = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match second {
            Event::Status(actions) => {
                assert!(actions.iter().any(|a| matches!(a, Action::SetCpu(..))))
            }
            other => panic!("unexpected event {other:?}"),
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
