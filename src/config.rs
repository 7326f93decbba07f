use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from upswatch.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct UpswatchConfig {
    pub monitor: MonitorConfig,
    pub ups: UpsConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serial device wired to the UPS signal cable.
    pub device: PathBuf,
    /// Seconds of continuous outage (battery still ok) tolerated before
    /// the shutdown sequence runs.
    pub wait_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpsConfig {
    /// Seconds the TX break is held to command the UPS to cut power.
    pub kill_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub pidfile: PathBuf,
    /// When set, every accepted transition is mirrored to this file for
    /// powerfail scripts to read.
    pub status_file: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyS0"),
            wait_secs: 240,
        }
    }
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self { kill_secs: 5 }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pidfile: PathBuf::from("/run/upswatch.pid"),
            status_file: None,
        }
    }
}

impl UpswatchConfig {
    /// CLI flags take precedence over file values.
    pub fn apply_overrides(&mut self, device: Option<PathBuf>, wait_secs: Option<u64>) {
        if let Some(device) = device {
            self.monitor.device = device;
        }
        if let Some(wait_secs) = wait_secs {
            self.monitor.wait_secs = wait_secs;
        }
    }
}

/// Errors from config loading.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`. A missing file yields defaults; a file that
/// exists but does not parse is an error.
pub fn load(path: &Path) -> Result<UpswatchConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(UpswatchConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
