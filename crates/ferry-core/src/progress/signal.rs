//! Flush progress when the process is interrupted or terminated.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::MigrationProgressManager;

/// Exit status used after a flush triggered by Ctrl-C.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Exit status used after a flush triggered by SIGTERM.
pub const TERMINATED_EXIT_CODE: i32 = 143;

/// The signal that ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// SIGTERM, e.g. `kill` or a container stop.
    Terminate,
}

impl Termination {
    /// Conventional exit status for the signal.
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Interrupt => INTERRUPTED_EXIT_CODE,
            Termination::Terminate => TERMINATED_EXIT_CODE,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Interrupt => write!(f, "SIGINT"),
            Termination::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for a termination signal on a dedicated thread, checkpoint, then exit.
///
/// The pipeline itself stays synchronous; a current-thread runtime owned by
/// the watcher thread drives the signal streams. Handlers are registered
/// before this returns.
pub fn install_termination_flush(manager: Arc<MigrationProgressManager>) -> io::Result<JoinHandle<()>> {
    spawn_flush_watcher(manager, |signal| std::process::exit(signal.exit_code()))
}

fn spawn_flush_watcher<F>(manager: Arc<MigrationProgressManager>, after_flush: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(Termination) + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let signals = {
        let _guard = runtime.enter();
        TerminationSignals::register()?
    };

    thread::Builder::new()
        .name("ferry-termination-flush".to_string())
        .spawn(move || {
            let signal = match runtime.block_on(signals.recv()) {
                Some(signal) => signal,
                None => return,
            };

            tracing::warn!(%signal, "Termination signal received, flushing migration progress");
            let persisted = manager.checkpoint();
            tracing::info!(callbacks = persisted, "Migration progress flushed");
            after_flush(signal);
        })
}

#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> Option<Termination> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|_| Termination::Interrupt),
            received = self.terminate.recv() => received.map(|_| Termination::Terminate),
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> Option<Termination> {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(Termination::Interrupt),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for termination signal");
                None
            }
        }
    }
}
