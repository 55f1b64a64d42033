//! Container execution interface consumed by the database engines.

use crate::error::SnapshotError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Captured result of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for marker scanning and error messages.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Short-lived command execution inside an already running container.
///
/// Streaming methods move data in chunks over bounded channels; an
/// implementation must stop reading (or writing) as soon as the other side of
/// the channel is dropped, and must terminate the in-container process when
/// the returned future is dropped.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn is_running(&self, container: &str) -> Result<bool, SnapshotError>;

    /// Runs a command to completion and captures its output.
    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, SnapshotError>;

    /// Runs a command, forwarding its stdout into `stdout` chunk by chunk.
    ///
    /// The returned [`ExecOutput`] carries stderr and the exit code; its
    /// `stdout` is empty.
    async fn exec_stream_out(
        &self,
        container: &str,
        command: &[String],
        stdout: mpsc::Sender<Vec<u8>>,
    ) -> Result<ExecOutput, SnapshotError>;

    /// Runs a command, feeding it every chunk received on `stdin` and closing
    /// its input once the channel is exhausted.
    async fn exec_stream_in(
        &self,
        container: &str,
        command: &[String],
        stdin: mpsc::Receiver<Vec<u8>>,
    ) -> Result<ExecOutput, SnapshotError>;

    /// Starts a stopped container.
    async fn start(&self, container: &str) -> Result<(), SnapshotError>;
}

/// Builds an owned argv from string slices.
pub(crate) fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
