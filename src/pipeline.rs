//! Streaming between container commands and compressed files.
//!
//! Every dump and restore runs two tasks joined by a bounded channel: the
//! container exec on the async runtime and the (blocking) compressor on a
//! blocking thread. Memory use is bounded by the channel capacity no matter
//! how large the dataset is.

use crate::compress::{CompressReader, CompressWriter, FileDigest, TempFile, CHUNK_SIZE};
use crate::error::SnapshotError;
use crate::runtime::{ContainerRuntime, ExecOutput};
use crate::types::{Compression, SnapshotConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Streaming knobs taken from [`SnapshotConfig`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub channel_capacity: usize,
    pub show_progress: bool,
}

impl From<&SnapshotConfig> for StreamSettings {
    fn from(config: &SnapshotConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity.max(1),
            show_progress: config.show_progress,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&SnapshotConfig::default())
    }
}

fn progress_bar(settings: &StreamSettings, message: String) -> ProgressBar {
    if !settings.show_progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg} | {bytes} ({bytes_per_sec}) | {elapsed_precise} elapsed")
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Runs `command` in `container` and stores its compressed stdout at `final_path`.
///
/// Failures are reported against `engine`.
///
/// The data is written to `<final_path>.tmp` and renamed only after the command
/// succeeded and the compressor flushed. On any failure, or if the returned
/// future is dropped, the temporary file is removed and `final_path` is never
/// created.
pub(crate) async fn dump_to_file(
    runtime: &dyn ContainerRuntime,
    engine: &str,
    container: &str,
    command: &[String],
    final_path: &Path,
    compression: Compression,
    settings: &StreamSettings,
) -> Result<FileDigest, SnapshotError> {
    let temp = TempFile::for_target(final_path);
    let writer = CompressWriter::create(temp.path(), compression)?;
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(settings.channel_capacity);

    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("dump")
        .to_string();
    let pb = progress_bar(settings, format!("📦 Dumping {}", file_name));
    let pb_writer = pb.clone();

    let consumer = tokio::task::spawn_blocking(move || -> Result<(FileDigest, u64), SnapshotError> {
        let mut writer = writer;
        let mut logical = 0u64;
        while let Some(chunk) = rx.blocking_recv() {
            writer.write_all(&chunk)?;
            logical += chunk.len() as u64;
            pb_writer.inc(chunk.len() as u64);
        }
        Ok((writer.finish()?, logical))
    });

    let produced = runtime.exec_stream_out(container, command, tx).await;
    let written = consumer.await.map_err(SnapshotError::task_join)?;

    let (output, (digest, logical)) = match (produced, written) {
        (_, Err(e)) => {
            pb.abandon_with_message(format!("❌ Dump of {} failed", file_name));
            return Err(e);
        }
        (Err(e), _) => {
            pb.abandon_with_message(format!("❌ Dump of {} failed", file_name));
            return Err(e);
        }
        (Ok(output), Ok(done)) => (output, done),
    };

    if !output.success() {
        pb.abandon_with_message(format!("❌ Dump of {} failed", file_name));
        return Err(SnapshotError::engine(
            engine,
            format!("exit code {}: {}", output.exit_code, output.combined()),
        ));
    }
    if logical == 0 {
        pb.abandon_with_message(format!("❌ Dump of {} was empty", file_name));
        return Err(SnapshotError::engine(engine, "command produced no output"));
    }
    if !output.stderr.trim().is_empty() {
        warn!("{}: {}", file_name, output.stderr.trim());
    }

    temp.commit(final_path)?;
    pb.finish_with_message(format!("✅ Stored {}", file_name));
    info!(
        "Stored {} ({} bytes streamed, {} bytes on disk)",
        final_path.display(),
        logical,
        digest.size
    );
    Ok(digest)
}

/// Decompresses `path` and streams it into `command`'s stdin.
///
/// Returns the command's output for the caller to classify. A decompression
/// failure is reported as [`SnapshotError::CompressionError`] unless the
/// command itself failed first, in which case its output is returned.
pub(crate) async fn restore_from_file(
    runtime: &dyn ContainerRuntime,
    container: &str,
    command: &[String],
    path: &Path,
    compression: Compression,
    settings: &StreamSettings,
) -> Result<ExecOutput, SnapshotError> {
    let reader = CompressReader::open(path, compression)?;
    let (tx, rx) = mpsc::channel::<Vec<u8>>(settings.channel_capacity);

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data")
        .to_string();
    let pb = progress_bar(settings, format!("♻️  Restoring {}", file_name));
    let pb_reader = pb.clone();

    let producer = tokio::task::spawn_blocking(move || -> Result<u64, SnapshotError> {
        let mut reader = reader;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| SnapshotError::CompressionError(e.to_string()))?;
            if n == 0 {
                break;
            }
            if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                return Err(SnapshotError::engine(
                    "restore",
                    "command stopped reading its input",
                ));
            }
            total += n as u64;
            pb_reader.inc(n as u64);
        }
        Ok(total)
    });

    let consumed = runtime.exec_stream_in(container, command, rx).await;
    let read = producer.await.map_err(SnapshotError::task_join)?;

    let output = match consumed {
        Ok(output) => output,
        Err(e) => {
            pb.abandon_with_message(format!("❌ Restore of {} failed", file_name));
            return Err(e);
        }
    };

    match read {
        Ok(total) => {
            pb.finish_with_message(format!("✅ Streamed {}", file_name));
            info!("Streamed {} bytes from {}", total, path.display());
            Ok(output)
        }
        Err(_) if !output.success() => {
            pb.abandon_with_message(format!("❌ Restore of {} failed", file_name));
            Ok(output)
        }
        Err(e) => {
            pb.abandon_with_message(format!("❌ Restore of {} failed", file_name));
            Err(e)
        }
    }
}

/// Bounds `operation` by `limit`, reporting expiry as a cancellation.
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    what: &str,
    operation: F,
) -> Result<T, SnapshotError>
where
    F: Future<Output = Result<T, SnapshotError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(SnapshotError::CancelledOrTimedOut(format!(
            "{} did not finish within {}",
            what,
            humantime::format_duration(limit)
        ))),
    }
}
