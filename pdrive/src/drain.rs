//! Output drain: copies a child's stdout and stderr into its diagnostic file.
//!
//! The drain runs as its own task while the attempt waits for the child to
//! exit, so the child never stalls on a full pipe. Chunks from both streams
//! are written in arrival order and flushed one by one, which keeps the file
//! useful even if the driver itself is killed mid-run.
//!
//! Sink errors stop writing but not reading: both pipes are still consumed
//! to end-of-stream and the bytes discarded, so a full disk never changes
//! how the child exits. Errors are reported through [`DrainReport`] and never
//! propagate into the attempt's control flow.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 8192;

/// What a finished drain observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Body bytes copied, excluding the header line.
    pub bytes: u64,
    /// Chunks written (one flush each).
    pub chunks: u64,
    /// Bytes read from the child but dropped after a sink error.
    pub discarded: u64,
    /// First I/O error, if any.
    pub error: Option<String>,
}

impl DrainReport {
    /// True when everything the child wrote reached the sink.
    pub fn completed(&self) -> bool {
        self.error.is_none()
    }

    fn record_error(&mut self, error: String) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// A running drain. Dropping it aborts the task.
pub struct DrainHandle {
    label: String,
    task: Option<JoinHandle<DrainReport>>,
}

impl DrainHandle {
    /// Wait up to `limit` for the drain to reach end-of-stream on both pipes.
    ///
    /// On timeout the task is aborted; a grandchild may still hold the pipes.
    pub async fn join(mut self, limit: Duration) -> DrainReport {
        let Some(task) = self.task.as_mut() else {
            return DrainReport::default();
        };
        match timeout(limit, task).await {
            Ok(Ok(report)) => {
                self.task = None;
                report
            }
            Ok(Err(join_err)) => {
                self.task = None;
                warn!(label = %self.label, error = %join_err, "Drain task failed");
                DrainReport {
                    error: Some(join_err.to_string()),
                    ..DrainReport::default()
                }
            }
            Err(_) => {
                warn!(label = %self.label, "Drain did not reach end-of-stream, abandoning it");
                DrainReport {
                    error: Some("drain join timed out".to_string()),
                    ..DrainReport::default()
                }
            }
        }
    }
}

impl Drop for DrainHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start draining `stdout` and `stderr` into `sink` on a new task.
///
/// `header` is written as the first line before any stream bytes.
pub fn spawn_drain<O, E, W>(
    label: String,
    header: String,
    stdout: Option<O>,
    stderr: Option<E>,
    sink: W,
) -> DrainHandle
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let task = tokio::spawn(drain(label.clone(), header, stdout, stderr, sink));
    DrainHandle {
        label,
        task: Some(task),
    }
}

/// Copy both streams into `sink` until each reaches end-of-stream.
pub async fn drain<O, E, W>(
    label: String,
    header: String,
    mut stdout: Option<O>,
    mut stderr: Option<E>,
    mut sink: W,
) -> DrainReport
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut report = DrainReport::default();

    let mut header_line = header.into_bytes();
    header_line.push(b'\n');
    let mut sink_ok = match write_chunk(&mut sink, &header_line).await {
        Ok(()) => true,
        Err(e) => {
            warn!(%label, error = %e, "Failed to write diagnostic header, discarding output");
            report.record_error(format!("header: {e}"));
            false
        }
    };

    let mut out_buf = vec![0u8; CHUNK_SIZE];
    let mut err_buf = vec![0u8; CHUNK_SIZE];

    while stdout.is_some() || stderr.is_some() {
        let (stream, result) = tokio::select! {
            r = read_some(&mut stdout, &mut out_buf) => (Stream::Stdout, r),
            r = read_some(&mut stderr, &mut err_buf) => (Stream::Stderr, r),
        };

        let n = match result {
            Ok(0) => {
                debug!(%label, stream = stream.name(), "Stream reached end");
                close(stream, &mut stdout, &mut stderr);
                continue;
            }
            Ok(n) => n,
            Err(e) => {
                // The other stream keeps draining.
                warn!(%label, stream = stream.name(), error = %e, "Failed to read child output");
                report.record_error(format!("read {}: {e}", stream.name()));
                close(stream, &mut stdout, &mut stderr);
                continue;
            }
        };

        if !sink_ok {
            report.discarded += n as u64;
            continue;
        }

        let chunk = match stream {
            Stream::Stdout => &out_buf[..n],
            Stream::Stderr => &err_buf[..n],
        };
        if let Err(e) = write_chunk(&mut sink, chunk).await {
            warn!(%label, error = %e, "Failed to write diagnostic output, discarding the rest");
            report.record_error(format!("write: {e}"));
            report.discarded += n as u64;
            sink_ok = false;
            continue;
        }
        report.bytes += n as u64;
        report.chunks += 1;
    }

    debug!(
        %label,
        bytes = report.bytes,
        chunks = report.chunks,
        discarded = report.discarded,
        "Drain finished"
    );
    report
}

fn close<O, E>(stream: Stream, stdout: &mut Option<O>, stderr: &mut Option<E>) {
    match stream {
        Stream::Stdout => *stdout = None,
        Stream::Stderr => *stderr = None,
    }
}

async fn read_some<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(sink: &mut W, chunk: &[u8]) -> io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}
