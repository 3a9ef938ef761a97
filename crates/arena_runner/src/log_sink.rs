//! Per-submission log sinks.
//!
//! A [`LogSink`] receives everything a submission produces: image pull
//! progress, container output and the runner's own markers. Writers that
//! must not end the log (the container output pump) get a [`LogPipe`], which
//! can write but never close.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use flate2::Compression;
use flate2::write::GzEncoder;

/// Marker written when an image pull fails.
pub const FAILED_PULL_MARKER: &str = "<<<<<<FAILED PULL>>>>>>";

/// Marker written when a container fails to run.
pub const FAILED_RUN_MARKER: &str = "<<<<<<FAILED RUN>>>>>>";

/// Marker written when a container is stopped for exceeding its timeout.
pub const KILLED_MARKER: &str = "<<<<<<KILLED>>>>>>";

/// Text written after [`KILLED_MARKER`].
pub const TIMEOUT_REACHED: &str = "timeout reached";

/// A log destination that must be finished explicitly.
pub trait LogWriter: Write + Send {
    /// Flush and finalise the underlying stream.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl LogWriter for GzEncoder<BufWriter<File>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let mut file = (*self).finish()?;
        file.flush()
    }
}

/// A closable, shareable log for one submission.
///
/// Clones share the same destination. After [`LogSink::close`] every write
/// fails with [`io::ErrorKind::BrokenPipe`].
#[derive(Clone)]
pub struct LogSink {
    writer: Arc<Mutex<Option<Box<dyn LogWriter>>>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LogSink {
    /// Wrap any log writer.
    #[must_use]
    pub fn new(writer: Box<dyn LogWriter>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Create (or truncate) a gzip-compressed log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be created.
    pub fn create_gzip(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(Self::new(Box::new(encoder)))
    }

    /// [`LogSink::create_gzip`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be created, or an
    /// [`io::ErrorKind::Other`] error if the blocking task is lost.
    pub async fn open_gzip(path: PathBuf) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::create_gzip(&path))
            .await
            .map_err(io::Error::other)?
    }

    /// Append raw bytes.
    ///
    /// # Errors
    ///
    /// Returns the writer's error, or `BrokenPipe` once the sink is closed.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(writer) => writer.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "log sink closed")),
        }
    }

    /// Append a runner marker, set apart from the surrounding output.
    ///
    /// # Errors
    ///
    /// See [`LogSink::write`].
    pub fn write_marker(&self, marker: &str, detail: &str) -> io::Result<()> {
        self.write(format!("\n\n{marker}\n\n{detail}").as_bytes())
    }

    /// Finish the log. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error raised while finalising the stream.
    pub fn close(&self) -> io::Result<()> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match writer {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }

    /// Returns `true` once the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// A write-only handle on this log.
    #[must_use]
    pub fn pipe(&self) -> LogPipe {
        LogPipe { sink: self.clone() }
    }
}

/// Write-only handle on a [`LogSink`].
///
/// Handed to code that streams output into the log but does not own its
/// lifetime, so finishing that stream never ends the log.
#[derive(Debug, Clone)]
pub struct LogPipe {
    sink: LogSink,
}

impl LogPipe {
    /// Append raw bytes to the underlying log.
    ///
    /// # Errors
    ///
    /// See [`LogSink::write`].
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.sink.write(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;
    use crate::testing::MemoryLog;

    #[test]
    fn test_gzip_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team_1_v1_1.log.gz");
        let sink = LogSink::create_gzip(&path).unwrap();
        sink.write(b"pulling\n").unwrap();
        sink.pipe().write(b"hello from the bot\n").unwrap();
        sink.close().unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "pulling\nhello from the bot\n");
    }

    #[tokio::test]
    async fn test_open_gzip_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team_2_v3_4.log.gz");
        let sink = LogSink::open_gzip(path.clone()).await.unwrap();
        sink.write(b"ready\n").unwrap();
        sink.close().unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "ready\n");

        let missing = dir.path().join("missing").join("x.log.gz");
        let err = LogSink::open_gzip(missing).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_writes_after_close_fail() {
        let (sink, log) = MemoryLog::sink();
        sink.write(b"a").unwrap();
        sink.close().unwrap();
        sink.close().unwrap();

        let err = sink.pipe().write(b"b").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(log.text(), "a");
        assert!(log.is_finished());
    }

    #[test]
    fn test_marker_layout() {
        let (sink, log) = MemoryLog::sink();
        sink.write_marker(KILLED_MARKER, TIMEOUT_REACHED).unwrap();
        assert_eq!(log.text(), "\n\n<<<<<<KILLED>>>>>>\n\ntimeout reached");
    }
}
