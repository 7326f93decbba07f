/// The irreversible shutdown sequence: quiesce the system, command the
/// UPS to cut power, and fall back to a reboot in case it never does.
///
/// Entered at most once per process lifetime. Once begun it is not
/// cancellable: the battery may die before the sequence completes, so
/// every step either succeeds or is logged and skipped. Nothing here
/// waits on a response that may never come.
///
/// Step order follows the classic reboot(8) rundown: sync, stop logins,
/// SIGTERM everyone, drain-wait for I/O, SIGKILL stragglers, sync, cut
/// UPS power, reboot.
use crate::lines::UpsLines;
use crate::powerkill;
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tracing::{error, warn};

/// Drain-wait rounds before giving up on I/O quiescing (~60s worst case).
const DRAIN_MAX_ROUNDS: u32 = 20;
/// Sleep between drain-wait samples.
const DRAIN_ROUND_SLEEP: Duration = Duration::from_secs(3);
/// Grace period after the SIGTERM broadcast before watching I/O.
const TERM_GRACE: Duration = Duration::from_secs(2);
/// SIGKILL broadcast attempts before proceeding regardless.
const KILL_MAX_ATTEMPTS: u32 = 5;

/// Host-side effects the sequencer performs, broken out as a capability
/// so the ordering and escalation logic is testable without taking the
/// test host down. Production implementation: [`Host`].
pub trait HostControl {
    /// Flush filesystem buffers.
    fn sync_disks(&mut self);
    /// Tell the init/supervisor process to stop accepting logins.
    fn stop_logins(&mut self) -> Result<(), Errno>;
    /// Keep a dying controlling terminal from interrupting the sequence.
    fn ignore_hangup(&mut self);
    /// Send `sig` to every process we are allowed to signal. Err means
    /// none remain (or the broadcast was refused).
    fn broadcast(&mut self, sig: Signal) -> Result<(), Errno>;
    /// Kernel count of pages brought in from swap; the heuristic for
    /// "system still busy with I/O".
    fn pageins(&mut self) -> u64;
    fn sleep(&mut self, duration: Duration);
    /// Reboot the host. Returns only on failure.
    fn reboot(&mut self) -> Errno;
}

/// Production [`HostControl`] backed by nix and /proc.
pub struct Host;

impl HostControl for Host {
    fn sync_disks(&mut self) {
        nix::unistd::sync();
    }

    fn stop_logins(&mut self) -> Result<(), Errno> {
        signal::kill(Pid::from_raw(1), Signal::SIGTSTP)
    }

    fn ignore_hangup(&mut self) {
        // SAFETY: SIG_IGN installs no handler code, so no Rust state is
        // touched from signal context.
        if let Err(e) = unsafe { signal::signal(Signal::SIGHUP, SigHandler::SigIgn) } {
            warn!(error = %e, "failed to ignore SIGHUP");
        }
    }

    fn broadcast(&mut self, sig: Signal) -> Result<(), Errno> {
        signal::kill(Pid::from_raw(-1), sig)
    }

    fn pageins(&mut self) -> u64 {
        read_pageins().unwrap_or(0)
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn reboot(&mut self) -> Errno {
        match nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT) {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }
}

/// `pswpin` from /proc/vmstat: cumulative count of pages swapped in.
fn read_pageins() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/vmstat").ok()?;
    contents.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("pswpin"), Some(count)) => count.parse().ok(),
            _ => None,
        }
    })
}

/// Run the full rundown. Returns only if the final reboot was refused;
/// the caller should then exit nonzero.
pub fn run_shutdown_sequence<H, L>(host: &mut H, lines: &mut L, kill_hold: Duration)
where
    H: HostControl,
    L: UpsLines,
{
    error!("power failed, system is going down now");

    host.sync_disks();

    if let Err(e) = host.stop_logins() {
        warn!(error = %e, "stop-logins signal to init failed");
    }

    host.ignore_hangup();

    if let Err(e) = host.broadcast(Signal::SIGTERM) {
        warn!(error = %e, "SIGTERM broadcast failed");
    }

    host.sleep(TERM_GRACE);
    drain_wait(host);

    let attempts = kill_remaining(host);
    host.sleep(Duration::from_secs(2 * u64::from(attempts)));
    host.sync_disks();

    match powerkill::cut_ups_power(lines, kill_hold) {
        Ok(outcome) => error!(%outcome, "ups power cut not confirmed"),
        Err(e) => error!(error = %e, "ups power cut command failed"),
    }

    // Covers both a UPS that never cut power and power that returned
    // before the cutoff.
    error!("forcing reboot");
    let errno = host.reboot();
    error!(error = %errno, "reboot refused");
}

/// Bounded wait for outstanding disk I/O: sample the paging counter,
/// sync, sleep, and stop early once two consecutive samples match.
fn drain_wait<H: HostControl>(host: &mut H) {
    for _ in 0..DRAIN_MAX_ROUNDS {
        let before = host.pageins();
        host.sync_disks();
        host.sleep(DRAIN_ROUND_SLEEP);
        if host.pageins() == before {
            break;
        }
    }
}

/// Escalate to SIGKILL until the broadcast fails (nothing left to
/// signal) or the attempt budget runs out. Returns the attempts made.
fn kill_remaining<H: HostControl>(host: &mut H) -> u32 {
    let mut attempts = 0;
    loop {
        attempts += 1;
        if host.broadcast(Signal::SIGKILL).is_err() {
            break;
        }
        if attempts >= KILL_MAX_ATTEMPTS {
            warn!("some processes would not die");
            break;
        }
    }
    attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::{HardwareError, Line, LineSnapshot};
    use nix::libc;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Sync,
        StopLogins,
        IgnoreHangup,
        Broadcast(Signal),
        Pageins,
        Sleep(Duration),
        Reboot,
    }

    /// Scripted host recording everything the sequencer does to it.
    struct ScriptedHost {
        ops: Vec<Op>,
        pageins: VecDeque<u64>,
        term_result: Result<(), Errno>,
        kill_results: VecDeque<Result<(), Errno>>,
        stop_logins_result: Result<(), Errno>,
    }

    impl ScriptedHost {
        fn new() -> Self {
            Self {
                ops: Vec::new(),
                pageins: VecDeque::new(),
                term_result: Ok(()),
                kill_results: VecDeque::new(),
                stop_logins_result: Ok(()),
            }
        }

        fn drain_rounds(&self) -> usize {
            self.ops.iter().filter(|op| **op == Op::Pageins).count() / 2
        }
    }

    impl HostControl for ScriptedHost {
        fn sync_disks(&mut self) {
            self.ops.push(Op::Sync);
        }

        fn stop_logins(&mut self) -> Result<(), Errno> {
            self.ops.push(Op::StopLogins);
            self.stop_logins_result
        }

        fn ignore_hangup(&mut self) {
            self.ops.push(Op::IgnoreHangup);
        }

        fn broadcast(&mut self, sig: Signal) -> Result<(), Errno> {
            self.ops.push(Op::Broadcast(sig));
            match sig {
                Signal::SIGTERM => self.term_result,
                _ => self.kill_results.pop_front().unwrap_or(Err(Errno::ESRCH)),
            }
        }

        fn pageins(&mut self) -> u64 {
            self.ops.push(Op::Pageins);
            self.pageins.pop_front().unwrap_or(0)
        }

        fn sleep(&mut self, duration: Duration) {
            self.ops.push(Op::Sleep(duration));
        }

        fn reboot(&mut self) -> Errno {
            self.ops.push(Op::Reboot);
            Errno::EPERM
        }
    }

    struct QuietLines {
        ops: Vec<&'static str>,
    }

    impl UpsLines for QuietLines {
        fn read_lines(&mut self) -> Result<LineSnapshot, HardwareError> {
            self.ops.push("read");
            Ok(LineSnapshot::from_bits(libc::TIOCM_CAR))
        }

        fn assert_break(&mut self) -> Result<(), HardwareError> {
            self.ops.push("assert_break");
            Ok(())
        }

        fn clear_break(&mut self) -> Result<(), HardwareError> {
            self.ops.push("clear_break");
            Ok(())
        }

        fn set_line(&mut self, _line: Line) -> Result<(), HardwareError> {
            Ok(())
        }

        fn clear_line(&mut self, _line: Line) -> Result<(), HardwareError> {
            Ok(())
        }
    }

    #[test]
    fn test_sequence_runs_every_step_in_order() {
        let mut host = ScriptedHost::new();
        // One drain round: counter unchanged across the first sample.
        host.pageins = VecDeque::from([7, 7]);
        let mut lines = QuietLines { ops: Vec::new() };

        run_shutdown_sequence(&mut host, &mut lines, Duration::ZERO);

        assert_eq!(
            host.ops,
            vec![
                Op::Sync,
                Op::StopLogins,
                Op::IgnoreHangup,
                Op::Broadcast(Signal::SIGTERM),
                Op::Sleep(TERM_GRACE),
                Op::Pageins,
                Op::Sync,
                Op::Sleep(DRAIN_ROUND_SLEEP),
                Op::Pageins,
                // SIGKILL refused on the first try: nothing left alive.
                Op::Broadcast(Signal::SIGKILL),
                Op::Sleep(Duration::from_secs(2)),
                Op::Sync,
                Op::Reboot,
            ]
        );
        assert_eq!(lines.ops, vec!["assert_break", "clear_break", "read"]);
    }

    #[test]
    fn test_best_effort_failures_do_not_stall_sequence() {
        let mut host = ScriptedHost::new();
        host.pageins = VecDeque::from([3, 3]);
        host.stop_logins_result = Err(Errno::EPERM);
        host.term_result = Err(Errno::EPERM);
        let mut lines = QuietLines { ops: Vec::new() };

        run_shutdown_sequence(&mut host, &mut lines, Duration::ZERO);

        // Failed signals are logged and skipped; the reboot still runs.
        assert_eq!(host.ops.last(), Some(&Op::Reboot));
    }

    #[test]
    fn test_drain_wait_exits_early_when_paging_settles() {
        let mut host = ScriptedHost::new();
        // Round 1: 10 -> 12 (busy). Round 2: 12 -> 12 (settled).
        host.pageins = VecDeque::from([10, 12, 12, 12]);

        drain_wait(&mut host);

        assert_eq!(host.drain_rounds(), 2);
    }

    #[test]
    fn test_drain_wait_runs_all_rounds_when_paging_never_settles() {
        let mut host = ScriptedHost::new();
        host.pageins = (0u64..80).collect();

        drain_wait(&mut host);

        assert_eq!(host.drain_rounds(), DRAIN_MAX_ROUNDS as usize);
    }

    #[test]
    fn test_kill_escalation_stops_when_broadcast_fails() {
        let mut host = ScriptedHost::new();
        // Two sweeps reach processes, the third finds none left.
        host.kill_results = VecDeque::from([Ok(()), Ok(()), Err(Errno::ESRCH)]);

        let attempts = kill_remaining(&mut host);

        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_kill_escalation_gives_up_after_budget() {
        let mut host = ScriptedHost::new();
        host.kill_results = VecDeque::from(vec![Ok(()); 10]);

        let attempts = kill_remaining(&mut host);

        assert_eq!(attempts, KILL_MAX_ATTEMPTS);
        let kills = host
            .ops
            .iter()
            .filter(|op| **op == Op::Broadcast(Signal::SIGKILL))
            .count();
        assert_eq!(kills, KILL_MAX_ATTEMPTS as usize);
    }

    #[test]
    fn test_post_kill_sleep_scales_with_attempts() {
        let mut host = ScriptedHost::new();
        host.pageins = VecDeque::from([1, 1]);
        host.kill_results = VecDeque::from(vec![Ok(()); 10]);
        let mut lines = QuietLines { ops: Vec::new() };

        run_shutdown_sequence(&mut host, &mut lines, Duration::ZERO);

        assert!(host
            .ops
            .contains(&Op::Sleep(Duration::from_secs(2 * u64::from(KILL_MAX_ATTEMPTS)))));
    }
}
