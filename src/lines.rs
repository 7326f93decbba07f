/// RS-232 control-line access for the UPS signaling cable.
///
/// The UPS speaks no data protocol. Everything is voltage levels on the
/// modem-control lines, plus a break condition on TX as the out-of-band
/// power-cut command. Cable pinout (9-pin):
///
/// ```text
///   Shutdown UPS <-> TX   (break held = kill power)
///   Line Fail    <-> DCD  (high = power fail)
///   Low Battery  <-> DSR  (low  = battery low)
///   Cable power  <-> DTR  (held high for the run)
/// ```
use nix::libc;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

nix::ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
nix::ioctl_write_ptr_bad!(tiocmbis, libc::TIOCMBIS, libc::c_int);
nix::ioctl_write_ptr_bad!(tiocmbic, libc::TIOCMBIC, libc::c_int);
nix::ioctl_none_bad!(tiocsbrk, libc::TIOCSBRK);
nix::ioctl_none_bad!(tioccbrk, libc::TIOCCBRK);

/// Output lines the daemon drives directly (inputs are only ever read
/// through [`LineSnapshot`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// DTR — applies power to the signaling cable.
    CablePower,
    /// RTS — normalized to a known-clear state at startup.
    ReadyToSend,
}

impl Line {
    fn bit(self) -> libc::c_int {
        match self {
            Line::CablePower => libc::TIOCM_DTR,
            Line::ReadyToSend => libc::TIOCM_RTS,
        }
    }
}

/// Raw control-line bitmask captured at one sampling instant.
///
/// Ephemeral: owned by the current loop iteration, decoded and dropped.
#[derive(Debug, Clone, Copy)]
pub struct LineSnapshot(libc::c_int);

impl LineSnapshot {
    pub fn from_bits(bits: libc::c_int) -> Self {
        Self(bits)
    }

    /// DCD asserted means utility power has failed.
    pub fn power_failed(self) -> bool {
        self.0 & libc::TIOCM_CAR != 0
    }

    /// DSR is active-low: bit clear means the battery is low.
    pub fn battery_low(self) -> bool {
        self.0 & libc::TIOCM_DSR == 0
    }
}

/// Errors from the monitor device. Always fatal to the caller: a monitor
/// that cannot read its lines is flying blind and must not keep running.
#[derive(Debug)]
pub enum HardwareError {
    Open {
        device: PathBuf,
        source: std::io::Error,
    },
    Ioctl {
        op: &'static str,
        source: nix::Error,
    },
}

impl std::fmt::Display for HardwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareError::Open { device, source } => {
                write!(f, "cannot open {}: {source}", device.display())
            }
            HardwareError::Ioctl { op, source } => {
                write!(f, "{op} failed: {source}")
            }
        }
    }
}

impl std::error::Error for HardwareError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HardwareError::Open { source, .. } => Some(source),
            HardwareError::Ioctl { source, .. } => Some(source),
        }
    }
}

/// Control-line operations the monitoring and power-kill paths need.
///
/// The production implementation is [`SerialLines`]; tests substitute
/// scripted fakes.
pub trait UpsLines {
    fn read_lines(&mut self) -> Result<LineSnapshot, HardwareError>;
    /// Start a break condition on TX. The caller owns the hold time and
    /// the matching [`clear_break`](UpsLines::clear_break).
    fn assert_break(&mut self) -> Result<(), HardwareError>;
    fn clear_break(&mut self) -> Result<(), HardwareError>;
    fn set_line(&mut self, line: Line) -> Result<(), HardwareError>;
    fn clear_line(&mut self, line: Line) -> Result<(), HardwareError>;
}

/// The open serial device. Exclusively owned by this process for its
/// entire lifetime; all operations are synchronous ioctls.
#[derive(Debug)]
pub struct SerialLines {
    file: File,
}

impl SerialLines {
    /// Open the monitor device non-blocking, so a quiet modem line does
    /// not wedge the open.
    pub fn open(device: &Path) -> Result<Self, HardwareError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .map_err(|e| HardwareError::Open {
                device: device.to_path_buf(),
                source: e,
            })?;
        Ok(Self { file })
    }

    /// Normalize RTS and DTR to clear, then assert DTR to power the
    /// signaling cable. Done once at startup.
    pub fn power_cable(&mut self) -> Result<(), HardwareError> {
        self.clear_line(Line::ReadyToSend)?;
        self.clear_line(Line::CablePower)?;
        self.set_line(Line::CablePower)
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }
}

impl UpsLines for SerialLines {
    fn read_lines(&mut self) -> Result<LineSnapshot, HardwareError> {
        let mut bits: libc::c_int = 0;
        // SAFETY: fd is a valid open tty for the lifetime of self.
        unsafe { tiocmget(self.fd(), &mut bits) }.map_err(|e| HardwareError::Ioctl {
            op: "TIOCMGET",
            source: e,
        })?;
        Ok(LineSnapshot(bits))
    }

    fn assert_break(&mut self) -> Result<(), HardwareError> {
        // SAFETY: fd is a valid open tty for the lifetime of self.
        unsafe { tiocsbrk(self.fd()) }
            .map(drop)
            .map_err(|e| HardwareError::Ioctl {
                op: "TIOCSBRK",
                source: e,
            })
    }

    fn clear_break(&mut self) -> Result<(), HardwareError> {
        // SAFETY: fd is a valid open tty for the lifetime of self.
        unsafe { tioccbrk(self.fd()) }
            .map(drop)
            .map_err(|e| HardwareError::Ioctl {
                op: "TIOCCBRK",
                source: e,
            })
    }

    fn set_line(&mut self, line: Line) -> Result<(), HardwareError> {
        let bits = line.bit();
        // SAFETY: fd is a valid open tty; bits points at a live c_int.
        unsafe { tiocmbis(self.fd(), &bits) }
            .map(drop)
            .map_err(|e| HardwareError::Ioctl {
                op: "TIOCMBIS",
                source: e,
            })
    }

    fn clear_line(&mut self, line: Line) -> Result<(), HardwareError> {
        let bits = line.bit();
        // SAFETY: fd is a valid open tty; bits points at a live c_int.
        unsafe { tiocmbic(self.fd(), &bits) }
            .map(drop)
            .map_err(|e| HardwareError::Ioctl {
                op: "TIOCMBIC",
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_failed_when_dcd_high() {
        let snap = LineSnapshot::from_bits(libc::TIOCM_CAR | libc::TIOCM_DSR);
        assert!(snap.power_failed());
    }

    #[test]
    fn test_power_ok_when_dcd_low() {
        let snap = LineSnapshot::from_bits(libc::TIOCM_DSR);
        assert!(!snap.power_failed());
    }

    #[test]
    fn test_battery_low_when_dsr_low() {
        // DSR is active-low: a cleared bit means the battery is low.
        let snap = LineSnapshot::from_bits(0);
        assert!(snap.battery_low());
    }

    #[test]
    fn test_battery_ok_when_dsr_high() {
        let snap = LineSnapshot::from_bits(libc::TIOCM_DSR);
        assert!(!snap.battery_low());
    }

    #[test]
    fn test_unrelated_bits_ignored() {
        let snap = LineSnapshot::from_bits(libc::TIOCM_DSR | libc::TIOCM_RTS | libc::TIOCM_CTS);
        assert!(!snap.power_failed());
        assert!(!snap.battery_low());
    }

    #[test]
    fn test_open_missing_device_fails() {
        let err = SerialLines::open(Path::new("/nonexistent/ttyUPS")).unwrap_err();
        assert!(matches!(err, HardwareError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/ttyUPS"));
    }
}
