/// Optional status-file sink: mirrors the accepted power state to a file
/// for powerfail scripts to read.
///
/// This is a notification sink only — it sits beside the countdown
/// logic, never inside it, and the daemon runs fine without it.
///
/// Uses the atomic write pattern: write to a temp file in the same
/// directory, then rename, so readers never see a partial document.
use crate::tracker::{BatteryStatus, PowerStatus, UpsState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Condensed state written for external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    /// Utility power present.
    Ok,
    /// On battery, counting down.
    Fail,
    /// On battery and the battery is nearly gone.
    Scram,
}

impl From<UpsState> for ReportedState {
    fn from(state: UpsState) -> Self {
        match (state.power, state.battery) {
            (PowerStatus::Ok, _) => ReportedState::Ok,
            (PowerStatus::Failed, BatteryStatus::Ok) => ReportedState::Fail,
            (PowerStatus::Failed, BatteryStatus::Low) => ReportedState::Scram,
        }
    }
}

/// The JSON payload written to the status file.
#[derive(Debug, Serialize)]
struct StatusPayload {
    state: ReportedState,
    pid: u32,
    updated_at: DateTime<Utc>,
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}

/// Manages the status file lifecycle.
pub struct StatusSink {
    path: PathBuf,
}

impl StatusSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write the current accepted state.
    pub fn write(&self, state: UpsState) -> Result<(), StatusError> {
        let payload = StatusPayload {
            state: state.into(),
            pid: std::process::id(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&payload)
            .map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".upswatch.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
