//! Supervising one engine process: line-by-line output streaming, exit
//! status mapping and cancellation.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{LogBroadcaster, LogStream};
use crate::db::{task_repo, Database, DatabaseError};
use crate::error::ExecutionError;

/// Lines buffered between the output readers and the log writer.
const LOG_BUFFER: usize = 4096;
/// Most lines written in one transaction.
const LOG_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { code: Option<i32> },
    Cancelled,
}

/// Receives engine output as it is produced. Called from the process loop,
/// so it must not block.
pub trait LogSink: Send + Sync {
    fn line(&self, stream: LogStream, line: &str);
}

/// Forwards every line to live subscribers and queues it for the task log.
///
/// Persistence happens on a blocking writer that drains the queue in
/// batches. Call [`TaskLogSink::finish`] once the process is done so every
/// queued line is stored before the task status changes.
pub struct TaskLogSink {
    task_id: String,
    broadcaster: LogBroadcaster,
    tx: mpsc::Sender<(LogStream, String)>,
    writer: JoinHandle<()>,
    dropped: AtomicU64,
}

impl TaskLogSink {
    /// Starts the writer. Must be called inside a tokio runtime.
    pub fn spawn(db: Database, task_row_id: i64, task_id: impl Into<String>, broadcaster: LogBroadcaster) -> Self {
        let task_id = task_id.into();
        let (tx, rx) = mpsc::channel(LOG_BUFFER);
        let writer = {
            let task_id = task_id.clone();
            tokio::task::spawn_blocking(move || write_log(db, task_row_id, &task_id, rx))
        };
        Self {
            task_id,
            broadcaster,
            tx,
            writer,
            dropped: AtomicU64::new(0),
        }
    }

    /// Closes the queue and waits until the writer has stored everything.
    pub async fn finish(self) {
        let Self {
            task_id,
            tx,
            writer,
            dropped,
            ..
        } = self;
        drop(tx);
        if let Err(e) = writer.await {
            warn!("Log writer for task {} failed: {}", task_id, e);
        }
        let dropped = dropped.into_inner();
        if dropped > 0 {
            warn!("{} log line(s) of task {} were not stored", dropped, task_id);
        }
    }
}

impl LogSink for TaskLogSink {
    fn line(&self, stream: LogStream, line: &str) {
        self.broadcaster.line(&self.task_id, stream, line);
        if self.tx.try_send((stream, line.to_string())).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn write_log(db: Database, task_row_id: i64, task_id: &str, mut rx: mpsc::Receiver<(LogStream, String)>) {
    while let Some(first) = rx.blocking_recv() {
        let mut batch = vec![first];
        while batch.len() < LOG_BATCH {
            match rx.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }

        let stored = db.transaction(|conn| -> Result<(), DatabaseError> {
            for (stream, line) in &batch {
                task_repo::append_log_line(conn, task_row_id, stream.as_str(), line)?;
            }
            Ok(())
        });
        if let Err(e) = stored {
            warn!("Failed to persist {} log line(s) for task {}: {}", batch.len(), task_id, e);
        }
    }
}

/// Runs `argv[0]` with `argv[1..]` until it exits or `cancel` fires.
pub async fn execute(
    argv: &[String],
    sink: &dyn LogSink,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, ExecutionError> {
    let (program, args) = argv.split_first().ok_or(ExecutionError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecutionError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    info!("Started {} (pid {:?})", program, child.id());

    let wait_error = |source: std::io::Error| ExecutionError::Wait {
        program: program.clone(),
        source,
    };
    let missing_pipe = || wait_error(std::io::Error::other("output pipe not captured"));

    let mut stdout = BufReader::new(child.stdout.take().ok_or_else(missing_pipe)?).lines();
    let mut stderr = BufReader::new(child.stderr.take().ok_or_else(missing_pipe)?).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    loop {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    debug!(target: "engine", "{}", line);
                    sink.line(LogStream::Stdout, &line);
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!("Stopped reading stdout of {}: {}", program, e);
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    warn!(target: "engine", "{}", line);
                    sink.line(LogStream::Stderr, &line);
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    warn!("Stopped reading stderr of {}: {}", program, e);
                    stderr_open = false;
                }
            },
            status = child.wait(), if !stdout_open && !stderr_open => {
                let status = status.map_err(wait_error)?;
                return Ok(if status.success() {
                    info!("{} exited successfully", program);
                    ExecutionOutcome::Succeeded
                } else {
                    warn!("{} exited with {}", program, status);
                    ExecutionOutcome::Failed { code: status.code() }
                });
            },
            _ = cancel.cancelled() => {
                warn!("Cancelling {}", program);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                return Ok(ExecutionOutcome::Cancelled);
            },
        }
    }
}
