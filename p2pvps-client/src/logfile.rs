//! Size-capped log file sink.
//!
//! When a write would take the file past its cap, the current file is moved
//! to `<name>.1` (replacing any older one) and a fresh file is started. At
//! most two files exist on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cap used for `--log-file` when none is given.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 1_000_000;

struct Active {
    file: File,
    written: u64,
}

pub struct CappedLogFile {
    path: PathBuf,
    max_bytes: u64,
    active: Mutex<Active>,
}

impl CappedLogFile {
    /// Open `path` for appending, picking up its current size.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self { path, max_bytes, active: Mutex::new(Active { file, written }) })
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&self, active: &mut Active) -> io::Result<()> {
        active.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        active.file = open_append(&self.path)?;
        active.written = 0;
        Ok(())
    }
}

impl Write for &CappedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        if active.written > 0 && active.written + buf.len() as u64 > self.max_bytes {
            self.rotate(&mut active)?;
        }
        let n = active.file.write(buf)?;
        active.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        active.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
