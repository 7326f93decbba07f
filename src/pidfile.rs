/// Single-instance guard: an exclusively locked pidfile.
///
/// The lock, not the file's existence, is the guard — a stale file left
/// behind by a crash does not wedge the next start. The lock is held for
/// the process lifetime and the file is removed on clean exit.
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct PidFile {
    file: File,
    path: PathBuf,
}

#[derive(Debug)]
pub enum PidFileError {
    /// Another instance holds the lock. Fatal at startup: two monitors
    /// must never share the same device.
    AlreadyRunning { path: PathBuf },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for PidFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PidFileError::AlreadyRunning { path } => {
                write!(f, "another instance is running (pidfile {})", path.display())
            }
            PidFileError::Io { path, source } => {
                write!(f, "pidfile {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for PidFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PidFileError::AlreadyRunning { .. } => None,
            PidFileError::Io { source, .. } => Some(source),
        }
    }
}

impl PidFile {
    /// Take the lock and record our pid, replacing whatever a previous
    /// crashed instance left behind.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        let io_err = |source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            return Err(if e.kind() == fs2::lock_contended_error().kind() {
                PidFileError::AlreadyRunning {
                    path: path.to_path_buf(),
                }
            } else {
                io_err(e)
            });
        }

        file.set_len(0).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Drop the lock and remove the file on clean exit.
    pub fn release(self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upswatch.pid");

        let pidfile = PidFile::acquire(&path).unwrap();
        assert_eq!(pidfile.path(), path);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_rejected_while_lock_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upswatch.pid");

        let _held = PidFile::acquire(&path).unwrap();
        let err = PidFile::acquire(&path).unwrap_err();
        assert!(matches!(err, PidFileError::AlreadyRunning { .. }));
        assert!(err.to_string().contains("another instance"));
    }

    #[test]
    fn test_release_removes_file_and_frees_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upswatch.pid");

        let pidfile = PidFile::acquire(&path).unwrap();
        pidfile.release();
        assert!(!path.exists());

        // A fresh acquire succeeds after release.
        let again = PidFile::acquire(&path).unwrap();
        again.release();
    }

    #[test]
    fn test_stale_file_without_lock_does_not_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upswatch.pid");

        // Simulate a crashed instance: file present, no lock held.
        std::fs::write(&path, "99999\n").unwrap();

        let pidfile = PidFile::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        pidfile.release();
    }

    #[test]
    fn test_unwritable_directory_is_io_error() {
        let err = PidFile::acquire(Path::new("/nonexistent-dir/upswatch.pid")).unwrap_err();
        assert!(matches!(err, PidFileError::Io { .. }));
    }
}
