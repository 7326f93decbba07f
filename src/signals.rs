/// Termination-signal handling for the monitoring loop.
///
/// SIGTERM, SIGINT, and SIGQUIT all mean "stop monitoring and exit
/// cleanly" (remove the pidfile and status file, log, exit 0). These are
/// only consulted while monitoring: once the shutdown sequence has
/// begun, nothing cancels it.
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct Termination {
    term: Signal,
    int: Signal,
    quit: Signal,
}

impl Termination {
    /// Register the handlers. Must happen before the monitoring loop
    /// starts so no signal is lost to the default disposition.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Resolve when any termination signal arrives; returns its name
    /// for the exit log line.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.term.recv() => "SIGTERM",
            _ = self.int.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}
