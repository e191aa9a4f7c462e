//! Line-mode monitor - the application core on a plain terminal.
//!
//! This example demonstrates:
//! - Implementing `InputSource` over a blocking reader
//! - Implementing `Renderer` with `println!`
//! - Running `Monitor` until the operator quits
//!
//! # Running
//!
//! ```text
//! cargo run --example monitor -- [CONFIG.json]
//! ```
//!
//! Commands, one per line:
//!
//! ```text
//! p pause      c continue   s step       o step over   r run to RTS
//! k line up    j line down  K page up    J page down
//! home / end   g ADDR       f follow pc  z freeze      q quit
//! ```

use std::io::BufRead;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use a800mon_client::monitor::{Action, AppState, InputEvent, InputSource, Renderer};
use a800mon_client::{DecodedInstruction, Monitor, MonitorConfig, NavCommand};
use tracing_subscriber::EnvFilter;

/// Reads stdin on its own thread so polls can time out.
struct LineInput {
    lines: mpsc::Receiver<String>,
}

impl LineInput {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }
}

fn parse(line: &str) -> Option<InputEvent> {
    let mut words = line.split_whitespace();
    let event = match words.next()? {
        "p" => InputEvent::Action(Action::Pause),
        "c" => InputEvent::Action(Action::Continue),
        "s" => InputEvent::Action(Action::Step),
        "o" => InputEvent::Action(Action::StepOver),
        "r" => InputEvent::Action(Action::RunUntilReturn),
        "k" => InputEvent::Nav(NavCommand::LineUp),
        "j" => InputEvent::Nav(NavCommand::LineDown),
        "K" => InputEvent::Nav(NavCommand::PageUp),
        "J" => InputEvent::Nav(NavCommand::PageDown),
        "home" => InputEvent::Nav(NavCommand::Home),
        "end" => InputEvent::Nav(NavCommand::End),
        "g" => {
            let addr = u16::from_str_radix(words.next()?.trim_start_matches('$'), 16).ok()?;
            InputEvent::Nav(NavCommand::Goto(addr))
        }
        "f" => InputEvent::ToggleFollow,
        "z" => InputEvent::Action(Action::ToggleFreeze),
        "q" => InputEvent::Quit,
        _ => return None,
    };
    Some(event)
}

impl InputSource for LineInput {
    fn poll_input(&mut self, timeout: Duration) -> Option<InputEvent> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => parse(&line),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            // stdin closed
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(InputEvent::Quit),
        }
    }
}

/// Prints a frame whenever something visible changed.
#[derive(Default)]
struct PrintRenderer {
    last: Option<(Option<u16>, u32, bool, Option<u16>, bool)>,
}

impl Renderer for PrintRenderer {
    fn render(&mut self, state: &AppState, rows: &[DecodedInstruction]) {
        let key = (
            state.cpu.map(|c| c.pc),
            state.state_seq,
            state.paused,
            rows.first().map(|r| r.address),
            state.view_error.is_some(),
        );
        if self.last == Some(key) {
            return;
        }
        self.last = Some(key);

        println!("----");
        if let Some(error) = &state.last_rpc_error {
            println!("! {error}");
        }
        if let Some(error) = &state.view_error {
            println!("! disassembly stale: {error}");
        }
        if let Some(cpu) = state.cpu {
            println!(
                "{:?} PC={:04X} A={:02X} X={:02X} Y={:02X} S={:02X} P={}  {}",
                state.active_mode,
                cpu.pc,
                cpu.a,
                cpu.x,
                cpu.y,
                cpu.s,
                cpu.flags_text(),
                state.cpu_disasm
            );
        }
        let pc = state.cpu.map(|c| c.pc);
        for row in rows {
            let marker = if Some(row.address) == pc { '>' } else { ' ' };
            println!("{marker}{row}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    let client = Arc::new(config.build_client()?);

    let mut monitor = Monitor::new(client, &config);
    let mut renderer = PrintRenderer::default();
    monitor.run(LineInput::spawn(), &mut renderer).await?;
    Ok(())
}
