//! Child process supervision for the media tool
//!
//! A run ends in exactly one of four ways: the process exits (success or
//! failure), the task's token fires, the watchdog expires, or reading its
//! output fails. In every case except a clean exit the child is killed before
//! returning.

use super::progress::FfmpegProgress;
use crate::error::MediaError;
use crate::progress::ProgressSink;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Bytes of stderr kept for diagnostics
pub const STDERR_TAIL_BYTES: usize = 4096;

enum Stop {
    Eof,
    Cancelled,
    TimedOut,
    Read(std::io::Error),
}

/// Run `binary` with `args`, streaming frame progress to `progress`
///
/// `total_frames` is forwarded with each tick (zero when unknown).
pub async fn run_with_progress(
    binary: &Path,
    args: &[OsString],
    operation: &str,
    total_frames: u64,
    cancel: &CancellationToken,
    limit: Duration,
    progress: &dyn ProgressSink,
) -> Result<(), MediaError> {
    if cancel.is_cancelled() {
        return Err(MediaError::Cancelled);
    }

    tracing::debug!(
        binary = %binary.display(),
        operation,
        args = ?args,
        "Spawning media tool"
    );

    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MediaError::Spawn {
            binary: binary.display().to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::Io(std::io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| MediaError::Io(std::io::Error::other("stderr not captured")))?;
    let stderr_task = tokio::spawn(collect_tail(stderr, STDERR_TAIL_BYTES));

    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let mut lines = BufReader::new(stdout).lines();
    let mut state = FfmpegProgress::default();

    let stop = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Stop::Cancelled,
            _ = &mut deadline => break Stop::TimedOut,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    // A slow sink must not hold off cancellation or the watchdog
                    if let Some(frame) = state.apply_line(&line) {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break Stop::Cancelled,
                            _ = &mut deadline => break Stop::TimedOut,
                            _ = progress.report(frame, total_frames) => {}
                        }
                    }
                }
                Ok(None) => break Stop::Eof,
                Err(e) => break Stop::Read(e),
            },
        }
    };

    let status = match stop {
        Stop::Eof => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Stop::Cancelled),
                _ = &mut deadline => Err(Stop::TimedOut),
                status = child.wait() => status.map_err(Stop::Read),
            }
        }
        other => Err(other),
    };

    match status {
        Ok(status) => {
            let stderr = stderr_task.await.unwrap_or_default();
            if status.success() {
                tracing::debug!(operation, "Media tool finished");
                Ok(())
            } else {
                Err(MediaError::Failed {
                    operation: operation.to_string(),
                    code: status.code(),
                    stderr,
                })
            }
        }
        Err(stop) => {
            terminate(&mut child, operation).await;
            stderr_task.abort();
            Err(match stop {
                Stop::Cancelled => MediaError::Cancelled,
                Stop::TimedOut => MediaError::Timeout {
                    operation: operation.to_string(),
                    limit,
                },
                Stop::Read(e) => MediaError::Io(e),
                Stop::Eof => MediaError::Io(std::io::Error::other("unexpected end of output")),
            })
        }
    }
}

/// Run `binary` to completion and return its stdout
///
/// Used for short probes; the child is killed if `limit` expires.
pub async fn run_capture(
    binary: &Path,
    args: &[OsString],
    operation: &str,
    limit: Duration,
) -> Result<Vec<u8>, MediaError> {
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MediaError::Spawn {
            binary: binary.display().to_string(),
            source,
        })?;

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| MediaError::Timeout {
            operation: operation.to_string(),
            limit,
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::Failed {
            operation: operation.to_string(),
            code: output.status.code(),
            stderr: tail(&stderr, STDERR_TAIL_BYTES),
        });
    }
    Ok(output.stdout)
}

async fn terminate(child: &mut Child, operation: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(operation, error = %e, "Failed to kill media tool");
    } else {
        tracing::debug!(operation, "Media tool killed");
    }
}

/// Keep roughly the last `limit` bytes of a stream, line by line
async fn collect_tail<R: AsyncRead + Unpin>(reader: R, limit: usize) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut kept: VecDeque<String> = VecDeque::new();
    let mut size = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        size += line.len() + 1;
        kept.push_back(line);
        while size > limit && kept.len() > 1 {
            if let Some(dropped) = kept.pop_front() {
                size -= dropped.len() + 1;
            }
        }
    }

    let joined = Vec::from(kept).join("\n");
    tail(&joined, limit)
}

fn tail(text: &str, limit: usize) -> String {
    let text = text.trim_end();
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
