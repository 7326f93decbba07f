/// The monitoring loop: sample the lines every 2 seconds, debounce,
/// evaluate the shutdown policy, and report why the loop stopped.
///
/// All mutable state (accepted pair, debounce streak, countdown) lives
/// in this struct and is touched only by the loop itself.
use crate::lines::{HardwareError, UpsLines};
use crate::policy::{PolicyAction, ShutdownPolicy, ShutdownReason, TICK_SECS};
use crate::signals::Termination;
use crate::statusfile::StatusSink;
use crate::tracker::{DebouncedTracker, Observation, UpsState};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sampling period of the loop.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(TICK_SECS);

/// Why the monitoring loop stopped.
#[derive(Debug)]
pub enum MonitorExit {
    /// The policy fired; the caller runs the shutdown sequence.
    Shutdown(ShutdownReason),
    /// A termination signal arrived; the caller cleans up and exits.
    Terminated(&'static str),
}

pub struct Monitor<L> {
    lines: L,
    tracker: DebouncedTracker,
    policy: ShutdownPolicy,
    sink: Option<StatusSink>,
}

impl<L: UpsLines> Monitor<L> {
    pub fn new(lines: L, wait_secs: u64, sink: Option<StatusSink>) -> Self {
        Self {
            lines,
            tracker: DebouncedTracker::new(),
            policy: ShutdownPolicy::new(wait_secs),
            sink,
        }
    }

    /// The pair the tracker currently trusts.
    pub fn accepted_state(&self) -> UpsState {
        self.tracker.accepted()
    }

    /// Give the serial handle back for the power-kill path.
    pub fn into_lines(self) -> L {
        self.lines
    }

    /// Remove the status file on clean exit, if one is configured.
    pub fn remove_status(&self) {
        if let Some(sink) = &self.sink {
            sink.remove();
        }
    }

    /// One sampling tick: read, debounce, evaluate. `Some(reason)`
    /// means the policy fired and the sequencer must run.
    pub fn tick(&mut self) -> Result<Option<ShutdownReason>, HardwareError> {
        let snapshot = self.lines.read_lines()?;
        let seen = UpsState::from_snapshot(snapshot);

        let state = match self.tracker.observe(seen) {
            Observation::Pending { samples } => {
                debug!(samples, "line change pending debounce");
                return Ok(None);
            }
            Observation::Accepted(state) => {
                info!(
                    power = ?state.power,
                    battery = ?state.battery,
                    "line status change confirmed"
                );
                self.report(state);
                state
            }
            Observation::Stable(state) => state,
        };

        match self.policy.evaluate(state) {
            PolicyAction::Idle | PolicyAction::CountingDown => Ok(None),
            PolicyAction::Warn { seconds_remaining } => {
                error!(seconds_remaining, "power failed, counting down to shutdown");
                Ok(None)
            }
            PolicyAction::PowerRestored => {
                warn!("power restored");
                Ok(None)
            }
            PolicyAction::Shutdown(reason) => Ok(Some(reason)),
        }
    }

    /// Run until the policy fires or a termination signal arrives.
    /// Hardware errors abort the loop: a monitor that cannot read its
    /// lines must not pretend to monitor.
    pub async fn run(&mut self, termination: &mut Termination) -> Result<MonitorExit, HardwareError> {
        self.report(self.tracker.accepted());

        let mut ticker = tokio::time::interval(SAMPLE_PERIOD);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(reason) = self.tick()? {
                        return Ok(MonitorExit::Shutdown(reason));
                    }
                }
                name = termination.recv() => {
                    return Ok(MonitorExit::Terminated(name));
                }
            }
        }
    }

    fn report(&self, state: UpsState) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.write(state) {
                warn!(error = %e, "failed to write status file");
            }
        }
    }
}
