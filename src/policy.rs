/// Shutdown decision policy, evaluated once per confirmed sample.
///
/// A three-state decision table on the accepted (power, battery) pair.
/// Battery-low bypasses the countdown entirely; power-fail alone is
/// deadline-based with periodic warnings. The asymmetry is deliberate:
/// the deadline is a conservative safety margin that does not depend on
/// the UPS ever raising its low-battery line.
use crate::tracker::{BatteryStatus, PowerStatus, UpsState};

/// Tick period of the sampling loop, in seconds. The operator-facing
/// wait is halved into tick units against this.
pub const TICK_SECS: u64 = 2;

/// Outage warnings repeat every this many ticks (~once per minute).
pub const WARN_INTERVAL_TICKS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The UPS reports the battery is nearly exhausted. No countdown.
    BatteryLow,
    /// Power stayed out past the configured deadline.
    DeadlineExpired,
}

/// What the monitoring loop should do after a confirmed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Power is good and no outage is in progress.
    Idle,
    /// Power is out; warn the operator with the projected time left.
    Warn { seconds_remaining: u64 },
    /// Power is out, between warning ticks.
    CountingDown,
    /// Power came back mid-countdown.
    PowerRestored,
    /// Take the system down.
    Shutdown(ShutdownReason),
}

pub struct ShutdownPolicy {
    deadline_ticks: u64,
    countdown: u64,
}

impl ShutdownPolicy {
    /// `wait_secs` is the outage duration the operator is willing to
    /// ride out on battery.
    pub fn new(wait_secs: u64) -> Self {
        Self {
            deadline_ticks: wait_secs / TICK_SECS,
            countdown: 0,
        }
    }

    /// Elapsed outage ticks. Nonzero only while an outage is in progress.
    pub fn countdown(&self) -> u64 {
        self.countdown
    }

    pub fn evaluate(&mut self, state: UpsState) -> PolicyAction {
        match (state.power, state.battery) {
            (PowerStatus::Failed, BatteryStatus::Low) => {
                PolicyAction::Shutdown(ShutdownReason::BatteryLow)
            }
            (PowerStatus::Failed, BatteryStatus::Ok) => {
                // Deadline first, so a coincident warning tick can never
                // report a negative remainder.
                if self.countdown > self.deadline_ticks {
                    return PolicyAction::Shutdown(ShutdownReason::DeadlineExpired);
                }
                let warn = self.countdown == 0 || self.countdown % WARN_INTERVAL_TICKS == 0;
                let seconds_remaining = (self.deadline_ticks - self.countdown) * TICK_SECS;
                self.countdown += 1;
                if warn {
                    PolicyAction::Warn { seconds_remaining }
                } else {
                    PolicyAction::CountingDown
                }
            }
            (PowerStatus::Ok, _) => {
                if self.countdown != 0 {
                    self.countdown = 0;
                    PolicyAction::PowerRestored
                } else {
                    PolicyAction::Idle
                }
            }
        }
    }
}
