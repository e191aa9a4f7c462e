//! The monitor event loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::disasm::{AtariSymbols, Decoder};
use crate::error::Result;
use crate::navigation::DisassemblyView;

use super::{
    Action, AppState, EmulatorLink, Event, InputEvent, InputSource, LoopStats, Renderer,
    StatusIntervals, StatusPump, Store,
};

/// Capacity of the main event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Application core: owns the state store and the disassembly view and
/// drives them from the event queue.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use a800mon_client::{Monitor, MonitorConfig};
///
/// let config = MonitorConfig::from_file("monitor.json")?;
/// let client = Arc::new(config.build_client()?);
/// let mut monitor = Monitor::new(client, &config);
/// monitor.run(terminal_input, &mut terminal_renderer).await?;
/// ```
pub struct Monitor<E: ?Sized> {
    link: Arc<E>,
    decoder: Arc<Decoder>,
    store: Store,
    view: DisassemblyView,
    intervals: StatusIntervals,
    input_timeout: Duration,
    stats: LoopStats,
}

impl<E> Monitor<E>
where
    E: EmulatorLink + ?Sized + 'static,
{
    /// Monitor with Atari symbol names in the disassembly.
    pub fn new(link: Arc<E>, config: &MonitorConfig) -> Self {
        let decoder = Arc::new(
            Decoder::new()
                .with_symbols(AtariSymbols)
                .with_cache(config.decode_cache_capacity),
        );
        Self {
            link,
            view: DisassemblyView::new(Arc::clone(&decoder), config.viewport_height),
            decoder,
            store: Store::new(),
            intervals: config.status_intervals(),
            input_timeout: config.input_timeout(),
            stats: LoopStats::default(),
        }
    }

    /// Replace the decoder (and with it the symbol source).
    pub fn with_decoder(mut self, decoder: Arc<Decoder>) -> Self {
        self.view = DisassemblyView::new(Arc::clone(&decoder), self.view.height());
        self.decoder = decoder;
        self
    }

    pub fn state(&self) -> &AppState {
        self.store.state()
    }

    pub fn view(&self) -> &DisassemblyView {
        &self.view
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Apply one action directly, bypassing the queue.
    pub fn dispatch(&mut self, action: Action) {
        self.store.dispatch(action);
    }

    /// Run until the operator quits or the input source goes away.
    ///
    /// Spawns the input and status pumps, drains their events, and stops
    /// both cooperatively before returning.
    pub async fn run<I, R>(&mut self, input: I, renderer: &mut R) -> Result<()>
    where
        I: InputSource,
        R: Renderer,
    {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = StatusPump::new(Arc::clone(&self.link), Arc::clone(&self.decoder), self.intervals);
        let wake = pump.waker();
        let status_task = tokio::spawn(pump.run(tx.clone(), shutdown_rx.clone()));
        let input_task = spawn_input_pump(input, self.input_timeout, tx, shutdown_rx);
        tracing::info!("monitor started");

        self.refresh_view().await;
        self.render(renderer);

        while let Some(event) = rx.recv().await {
            let started = Instant::now();
            self.stats.events += 1;

            let was_frozen = self.store.state().ui_frozen;
            let had_input = matches!(event, Event::Input(_));
            match event {
                Event::Input(input) => self.handle_input(input),
                Event::Status(actions) => {
                    for action in actions {
                        self.store.dispatch(action);
                    }
                }
            }
            if self.store.quit_requested() {
                break;
            }

            if self.store.flush(self.link.as_ref()).await {
                self.stats.flushes += 1;
                wake.notify_one();
            }

            let frozen = self.store.state().ui_frozen;
            if !frozen || (had_input && !was_frozen) {
                if !frozen {
                    self.refresh_view().await;
                }
                self.render(renderer);
            }
            let elapsed = started.elapsed().as_millis() as u64;
            self.store.dispatch(Action::SetFrameTimeMs(elapsed));
        }

        let _ = shutdown_tx.send(true);
        drop(rx);
        join("status pump", status_task).await;
        join("input pump", input_task).await;
        tracing::info!(
            events = self.stats.events,
            renders = self.stats.renders,
            "monitor stopped"
        );
        Ok(())
    }

    fn handle_input(&mut self, input: InputEvent) {
        tracing::debug!(?input, "input");
        match input {
            InputEvent::Nav(command) => self.view.navigate(command),
            InputEvent::ToggleFollow => self.view.toggle_follow(),
            InputEvent::Action(action) => self.store.dispatch(action),
            InputEvent::Resize(height) => self.view.set_height(height),
            InputEvent::Quit => self.store.dispatch(Action::Quit),
        }
    }

    /// Re-decode the view around the current program counter.
    pub async fn refresh_view(&mut self) {
        if !self.store.state().disassembly_enabled {
            return;
        }
        let pc = self.store.state().cpu.map(|cpu| cpu.pc);
        if pc.is_none() && self.view.anchor().is_none() && self.view.pending().is_none() {
            // nothing to anchor on until the first CPU state arrives
            return;
        }
        let error = if self.view.refresh(self.link.as_ref(), pc).await {
            None
        } else {
            self.view.last_error().map(str::to_string)
        };
        if self.store.state().view_error != error {
            if let Some(e) = &error {
                tracing::debug!(error = %e, "disassembly refresh failed");
            }
            self.store.dispatch(Action::SetViewError(error));
        }
        if let Some(anchor) = self.view.anchor() {
            if self.store.state().disassembly_addr != Some(anchor) {
                self.store.dispatch(Action::SetDisassemblyAddr(anchor));
            }
        }
    }

    fn render<R: Renderer>(&mut self, renderer: &mut R) {
        self.stats.renders += 1;
        renderer.render(
            self.store.state(),
            self.view.visible_rows(self.view.height()),
        );
    }
}

fn spawn_input_pump<I: InputSource>(
    mut source: I,
    timeout: Duration,
    events: mpsc::Sender<Event>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            // the blocking read runs on a worker thread and hands the source back
            let polled = tokio::task::spawn_blocking(move || {
                let event = source.poll_input(timeout);
                (source, event)
            })
            .await;
            let event = match polled {
                Ok((returned, event)) => {
                    source = returned;
                    event
                }
                Err(e) => {
                    tracing::error!(error = %e, "input source panicked");
                    break;
                }
            };
            if let Some(event) = event {
                if events.send(Event::Input(event)).await.is_err() {
                    break;
                }
            }
        }
        tracing::debug!("input pump stopped");
    })
}

async fn join(name: &str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        tracing::error!(task = name, error = %e, "background task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::{FakeEmulator, RecordingRenderer, ScriptedInput};
    use crate::navigation::NavCommand;
    use crate::protocol::payload::{CpuState, Status};
    use crate::protocol::Command;

    fn config() -> MonitorConfig {
        MonitorConfig {
            viewport_height: 4,
            input_timeout_ms: 20,
            paused_interval_ms: 20,
            ..MonitorConfig::default()
        }
    }

    fn paused_link() -> Arc<FakeEmulator> {
        let link = Arc::new(FakeEmulator::new());
        link.set_status(Status {
            paused: true,
            ..Status::default()
        });
        link
    }

    #[tokio::test]
    async fn test_quit_stops_both_pumps() {
        let link = paused_link();
        let mut monitor = Monitor::new(Arc::clone(&link), &config());
        let mut renderer = RecordingRenderer::default();

        let input = ScriptedInput::new([InputEvent::Quit]);
        tokio::time::timeout(Duration::from_secs(2), monitor.run(input, &mut renderer))
            .await
            .unwrap()
            .unwrap();

        assert!(monitor.stats().events >= 1);
        assert!(!renderer.frames.is_empty());
    }

    #[tokio::test]
    async fn test_actions_flush_once_and_view_follows_pc() {
        let link = paused_link();
        let mut monitor = Monitor::new(Arc::clone(&link), &config());
        let mut renderer = RecordingRenderer::default();

        let input = ScriptedInput::new([
            InputEvent::Action(Action::Step),
            InputEvent::Action(Action::Step),
            InputEvent::Quit,
        ]);
        tokio::time::timeout(Duration::from_secs(2), monitor.run(input, &mut renderer))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(link.executed(), vec![Command::Step, Command::Step]);
        assert_eq!(monitor.state().cpu.map(|c| c.pc), Some(0x2000));
        assert!(monitor.view().is_following());
        assert_eq!(monitor.view().anchor(), Some(0x2000));
        assert_eq!(monitor.state().disassembly_addr, Some(0x2000));
    }

    #[tokio::test]
    async fn test_navigation_input_reaches_view() {
        let link = paused_link();
        let mut monitor = Monitor::new(Arc::clone(&link), &config());
        let mut renderer = RecordingRenderer::default();

        let input = ScriptedInput::new([
            InputEvent::Nav(NavCommand::Goto(0x4000)),
            InputEvent::Nav(NavCommand::LineDown),
            InputEvent::Quit,
        ]);
        tokio::time::timeout(Duration::from_secs(2), monitor.run(input, &mut renderer))
            .await
            .unwrap()
            .unwrap();

        assert!(!monitor.view().is_following());
        assert_eq!(monitor.view().anchor(), Some(0x4001));
        let (_, rows) = renderer.frames.last().unwrap();
        assert_eq!(rows, &vec![0x4001, 0x4002, 0x4003, 0x4004]);
    }

    #[tokio::test]
    async fn test_frozen_ui_skips_redraw() {
        let link = paused_link();
        let mut monitor = Monitor::new(Arc::clone(&link), &config());
        monitor.dispatch(Action::ToggleFreeze);
        let mut renderer = RecordingRenderer::default();

        let input = ScriptedInput::new([InputEvent::Nav(NavCommand::Home), InputEvent::Quit]);
        tokio::time::timeout(Duration::from_secs(2), monitor.run(input, &mut renderer))
            .await
            .unwrap()
            .unwrap();

        // only the initial frame
        assert_eq!(renderer.frames.len(), 1);
        assert_eq!(monitor.view().pending(), Some(NavCommand::Home));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_shown_then_cleared() {
        let link = paused_link();
        link.memory.set_failing(true);
        let mut monitor = Monitor::new(Arc::clone(&link), &config());
        let mut renderer = RecordingRenderer::default();

        let input = ScriptedInput::new([InputEvent::Nav(NavCommand::Goto(0x4000)), InputEvent::Quit]);
        tokio::time::timeout(Duration::from_secs(2), monitor.run(input, &mut renderer))
            .await
            .unwrap()
            .unwrap();

        let shown = renderer
            .frames
            .iter()
            .filter_map(|(state, _)| state.view_error.clone())
            .last();
        assert_eq!(shown.as_deref(), monitor.view().last_error());
        assert!(shown.is_some());
        assert_eq!(monitor.view().anchor(), None);

        link.memory.set_failing(false);
        let cpu = CpuState {
            pc: 0x2000,
            ..CpuState::default()
        };
        monitor.dispatch(Action::SetCpu(cpu, String::new()));
        monitor.refresh_view().await;
        assert_eq!(monitor.state().view_error, None);
        assert!(monitor.view().anchor().is_some());
    }
}
