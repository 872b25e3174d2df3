//! Per-cluster log files.
//!
//! Each lifecycle operation runs under its own [`Dispatch`] that writes to
//! `<log_dir>/<context>.log` and echoes to stderr. The file is opened in
//! append mode so create, join and delete of one cluster share a history.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

/// Cloneable handle to an append-mode log file.
#[derive(Clone)]
struct SharedLog(Arc<Mutex<File>>);

impl SharedLog {
    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut file = self
            .0
            .lock()
            .map_err(|_| io::Error::other("cluster log lock poisoned"))?;
        f(&mut file)
    }
}

impl Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> MakeWriter<'a> for SharedLog {
    type Writer = SharedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Log sink for one cluster.
pub struct ClusterLog {
    path: PathBuf,
    dispatch: Dispatch,
}

impl ClusterLog {
    /// Open `<log_dir>/<context>.log`, creating the directory if needed.
    ///
    /// `level` is an EnvFilter directive; an unparsable one falls back to
    /// `info`.
    pub fn open(log_dir: &Path, context: &str, level: &str) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{}.log", context));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let shared = SharedLog(Arc::new(Mutex::new(file)));

        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(shared)
            .with_filter(filter);

        let stderr_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_filter(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")));

        let subscriber = tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer);

        Ok(Self {
            path,
            dispatch: Dispatch::new(subscriber),
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
