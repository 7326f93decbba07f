/// Out-of-band UPS power-cut command: hold a break on TX, release it,
/// then re-read the lines to see whether the UPS reacted.
///
/// There is no line that confirms power was actually cut, so the command
/// can only ever report failure modes. Both outcomes are advisory,
/// printed for operator visibility, and never retried automatically.
use crate::lines::{HardwareError, UpsLines};
use std::time::Duration;

/// Advisory outcome of a power-kill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Fail-Sense went inactive on the re-read: the UPS likely ignored
    /// or does not support the command, or did not act yet.
    PowerReportsOk,
    /// Fail-Sense still asserted: the UPS did not react. Bad cable?
    NoResponse,
}

impl std::fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillOutcome::PowerReportsOk => write!(f, "kill failed - power reports ok"),
            KillOutcome::NoResponse => {
                write!(f, "kill failed - ups did not respond, bad cable?")
            }
        }
    }
}

/// Assert the break for `hold`, clear it, and re-read the line status.
///
/// Used by the shutdown sequencer and by the operator `--kill` mode.
pub fn cut_ups_power<L: UpsLines>(
    lines: &mut L,
    hold: Duration,
) -> Result<KillOutcome, HardwareError> {
    lines.assert_break()?;
    std::thread::sleep(hold);
    lines.clear_break()?;

    let snapshot = lines.read_lines()?;
    Ok(if snapshot.power_failed() {
        KillOutcome::NoResponse
    } else {
        KillOutcome::PowerReportsOk
    })
}
