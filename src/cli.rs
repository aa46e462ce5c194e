//! Stdin REPL (§4.L): runs on its own OS thread so it never blocks the
//! Tokio reactor driving the UDP multiplexer and JF plate links.

use std::io::{self, BufRead, Write};

use tokio::runtime::Handle;
use tracing::info;

use crate::state::SharedState;

pub enum CliOutcome {
    Continue,
    Quit,
}

fn handle_line(line: &str, state: &SharedState, handle: &Handle) -> CliOutcome {
    match line.trim() {
        "quit" | "exit" => CliOutcome::Quit,
        "status" => {
            handle.block_on(state.log_state("cli status"));
            println!("nenet-core running");
            CliOutcome::Continue
        }
        "help" => {
            println!("commands: quit, exit, status, help");
            CliOutcome::Continue
        }
        "" => CliOutcome::Continue,
        other => {
            println!("unrecognized command: {other}");
            CliOutcome::Continue
        }
    }
}

/// Spawns the blocking read loop. Returns the thread handle and a
/// `crossbeam_channel` receiver that yields once when `quit`/`exit` is
/// entered, letting `main` drive a coordinated async shutdown.
pub fn spawn(state: SharedState) -> (std::thread::JoinHandle<()>, crossbeam_channel::Receiver<()>) {
    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    let handle = Handle::current();
    let join = std::thread::Builder::new()
        .name("cli-repl".into())
        .spawn(move || {
            let stdin = io::stdin();
            print!("> ");
            let _ = io::stdout().flush();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match handle_line(&line, &state, &handle) {
                    CliOutcome::Continue => {
                        print!("> ");
                        let _ = io::stdout().flush();
                    }
                    CliOutcome::Quit => {
                        info!("cli requested shutdown");
                        let _ = quit_tx.send(());
                        return;
                    }
                }
            }
        })
        .expect("spawning cli thread");
    (join, quit_rx)
}
