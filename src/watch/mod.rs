//! Watch loop: rebuild the document whenever a source file changes.
//!
//! The loop is a small state machine driven by one event queue:
//!
//! ```text
//!            Changed                 quiet for `debounce`
//!   Idle ───────────────▶ Debouncing ─────────────────────▶ Building
//!    ▲                      ▲    │ Changed (restart window)    │
//!    │                      │    └──────┘                      │
//!    │   nothing queued     │   changes queued during build    │
//!    └──────────────────────┴──────────────────────────────────┘
//!
//!   Stop (or all senders gone) from any state ─▶ Stopped
//! ```
//!
//! Builds run on the loop's own thread, so at most one is ever active.
//! Events that arrive while building wait in the queue; afterwards they are
//! drained together and feed a single debounce window, so a burst of N
//! changes causes one follow-up build, never N. A `Stop` that arrives during
//! a build takes effect once the build has finished; changes still waiting
//! in a debounce window are dropped.
//!
//! [`run`] is the pure loop, fed by any `Receiver`. [`watch`] wires it to the
//! filesystem ([`fs::FsWatcher`]), Ctrl-C and a real [`Builder`].

pub mod fs;

use crate::build::{BuildRequest, BuildResult, Builder, CancelToken};
use crate::config::ProjectConfig;
use crate::output;
use fs::{FsWatcher, WatchSet};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Input to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(PathBuf),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Debouncing,
    Building,
    Stopped,
}

/// What a finished loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub builds: usize,
    pub failures: usize,
    /// Every state change, in order, starting from `Idle`.
    pub transitions: Vec<(WatchState, WatchState)>,
}

struct Machine {
    state: WatchState,
    summary: WatchSummary,
}

impl Machine {
    fn enter(&mut self, next: WatchState) {
        if next != self.state {
            tracing::debug!("watch: {:?} -> {:?}", self.state, next);
            self.summary.transitions.push((self.state, next));
            self.state = next;
        }
    }
}

/// Run the loop until `Stop` or until every sender is dropped.
///
/// `build` is called once per debounced batch of changes.
pub fn run(
    events: &Receiver<WatchEvent>,
    debounce: Duration,
    mut build: impl FnMut() -> BuildResult,
) -> WatchSummary {
    let mut m = Machine {
        state: WatchState::Idle,
        summary: WatchSummary::default(),
    };

    loop {
        match m.state {
            WatchState::Idle => match events.recv() {
                Ok(WatchEvent::Changed(path)) => {
                    tracing::debug!("changed: {}", path.display());
                    m.enter(WatchState::Debouncing);
                }
                Ok(WatchEvent::Stop) | Err(_) => m.enter(WatchState::Stopped),
            },
            WatchState::Debouncing => match events.recv_timeout(debounce) {
                Ok(WatchEvent::Changed(path)) => {
                    tracing::debug!("changed: {}", path.display());
                }
                Err(RecvTimeoutError::Timeout) => m.enter(WatchState::Building),
                Ok(WatchEvent::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    m.enter(WatchState::Stopped)
                }
            },
            WatchState::Building => {
                let result = build();
                m.summary.builds += 1;
                if !result.is_success() {
                    m.summary.failures += 1;
                }
                let next = match drain(events) {
                    Drained::Stop => WatchState::Stopped,
                    Drained::Changes(0) => WatchState::Idle,
                    Drained::Changes(n) => {
                        tracing::debug!("{n} change(s) queued during build");
                        WatchState::Debouncing
                    }
                };
                m.enter(next);
            }
            WatchState::Stopped => break,
        }
    }
    m.summary
}

enum Drained {
    Changes(usize),
    Stop,
}

/// Take everything queued right now without blocking.
fn drain(events: &Receiver<WatchEvent>) -> Drained {
    let mut changes = 0;
    loop {
        match events.try_recv() {
            Ok(WatchEvent::Changed(_)) => changes += 1,
            Ok(WatchEvent::Stop) | Err(TryRecvError::Disconnected) => return Drained::Stop,
            Err(TryRecvError::Empty) => return Drained::Changes(changes),
        }
    }
}

/// Build once, then rebuild on every relevant change until Ctrl-C.
pub fn watch(request: &BuildRequest, config: ProjectConfig) -> Result<WatchSummary, WatchError> {
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();

    let mut watcher = FsWatcher::new(tx.clone(), cancel.clone())?;
    watcher.update(WatchSet::for_request(request, &config))?;

    let stop = tx;
    ctrlc::set_handler(move || {
        let _ = stop.send(WatchEvent::Stop);
    })?;

    let debounce = Duration::from_millis(config.watch.debounce_ms);
    let mut builder = Builder::new(config);

    let initial = builder.build(request, &cancel);
    output::print_build_result(&initial);
    println!("Watching for changes (Ctrl-C to stop)");

    let summary = run(&rx, debounce, || {
        cancel.reset();
        let result = builder.build(request, &cancel);
        output::print_build_result(&result);
        if let Err(e) = watcher.update(WatchSet::for_request(request, builder.config())) {
            tracing::warn!("could not extend watched paths: {e}");
        }
        result
    });
    Ok(summary)
}
