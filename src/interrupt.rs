//! Ctrl+C watcher for running queries.
//!
//! While a query runs the terminal is put in raw mode and a background thread
//! polls key events; Ctrl+C cancels the session's token instead of killing the
//! process. The watcher only starts when stdin is a terminal.

use crate::core::CancellationToken;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const EVENT_POLL: Duration = Duration::from_millis(50);

/// Watches the terminal for Ctrl+C until dropped.
pub struct InterruptWatcher {
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl InterruptWatcher {
    /// Starts watching if stdin is a terminal; returns `None` otherwise.
    pub fn spawn(token: &CancellationToken) -> Option<Self> {
        if !io::stdin().is_terminal() {
            return None;
        }
        if let Err(e) = terminal::enable_raw_mode() {
            warn!(error = %e, "could not enable raw mode; Ctrl+C will not cancel queries");
            return None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let token = token.clone();
        let spawned = thread::Builder::new()
            .name("sqlcell-interrupt".to_string())
            .spawn(move || watch(&token, &stop_flag));

        match spawned {
            Ok(worker) => Some(InterruptWatcher {
                stop,
                worker: Some(worker),
            }),
            Err(e) => {
                let _ = terminal::disable_raw_mode();
                warn!(error = %e, "could not start interrupt watcher");
                None
            }
        }
    }
}

fn watch(token: &CancellationToken, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match event::poll(EVENT_POLL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!(error = %e, "terminal event poll failed");
                return;
            }
        }
        match event::read() {
            Ok(Event::Key(key)) if is_ctrl_c(key.code, key.modifiers, key.kind) => {
                debug!("Ctrl+C received");
                token.cancel();
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "terminal event read failed");
                return;
            }
        }
    }
}

fn is_ctrl_c(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> bool {
    kind == KeyEventKind::Press
        && modifiers.contains(KeyModifiers::CONTROL)
        && matches!(code, KeyCode::Char('c') | KeyCode::Char('C'))
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "could not restore terminal mode");
        }
    }
}
