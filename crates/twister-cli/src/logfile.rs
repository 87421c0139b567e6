//! Log file writer that can be reopened in place.
//!
//! External log rotation moves the file away and sends SIGUSR2; reopening
//! creates a fresh file at the configured path without restarting the
//! process or re-initializing the subscriber.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

struct Inner {
    path: PathBuf,
    file: Mutex<File>,
}

/// Shared handle to a reopenable append-only log file.
#[derive(Clone)]
pub struct ReopenableFile {
    inner: Arc<Inner>,
}

/// Per-write guard handed out to the subscriber.
pub struct FileGuard {
    inner: Arc<Inner>,
}

impl ReopenableFile {
    /// Open the log file for appending, creating it if needed.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                file: Mutex::new(file),
            }),
        })
    }

    /// Swap the underlying handle for a freshly opened one.
    pub fn reopen(&self) -> io::Result<()> {
        let file = open_append(&self.inner.path)?;
        *self.inner.file.lock().expect("log writer poisoned") = file;
        Ok(())
    }

    /// Path the writer appends to.
    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }
}

fn open_append(path: &std::path::Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for FileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.file.lock().expect("log writer poisoned").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.file.lock().expect("log writer poisoned").flush()
    }
}

impl<'a> MakeWriter<'a> for ReopenableFile {
    type Writer = FileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileGuard {
            inner: self.inner.clone(),
        }
    }
}
