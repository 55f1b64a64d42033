//! [`ContainerRuntime`] backed by the `docker` command line client.

use crate::compress::CHUNK_SIZE;
use crate::error::SnapshotError;
use crate::runtime::{ContainerRuntime, ExecOutput};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as AsyncCommand;
use tokio::sync::mpsc;
use tracing::debug;

/// Runs commands through `docker exec`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    /// Uses a different client binary, e.g. `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn exec_command(&self, container: &str, command: &[String], interactive: bool) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.binary);
        cmd.arg("exec");
        if interactive {
            cmd.arg("-i");
        }
        cmd.arg(container).args(command).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> SnapshotError {
        SnapshotError::engine(&self.binary, format!("failed to spawn: {}", e))
    }
}

/// Reads a pipe to the end on its own task so the child never blocks on a full pipe.
fn drain<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_running(&self, container: &str) -> Result<bool, SnapshotError> {
        let output = AsyncCommand::new(&self.binary)
            .args(["inspect", "-f", "{{.State.Running}}", container])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            debug!(
                "inspect {} failed: {}",
                container,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, SnapshotError> {
        debug!("Executing in {}: {}", container, command.join(" "));
        let output = self
            .exec_command(container, command, false)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn exec_stream_out(
        &self,
        container: &str,
        command: &[String],
        stdout: mpsc::Sender<Vec<u8>>,
    ) -> Result<ExecOutput, SnapshotError> {
        debug!("Streaming output from {}: {}", container, command.join(" "));
        let mut child = self
            .exec_command(container, command, false)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr_handle = drain(child.stderr.take());
        let mut pipe = child
            .stdout
            .take()
            .ok_or_else(|| SnapshotError::engine(&self.binary, "stdout was not captured"))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = pipe.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            if stdout.send(buffer[..n].to_vec()).await.is_err() {
                let _ = child.kill().await;
                return Err(SnapshotError::engine(
                    &self.binary,
                    "output consumer stopped before the command finished",
                ));
            }
        }
        drop(stdout);

        let status = child.wait().await?;
        let stderr = stderr_handle.await.map_err(SnapshotError::task_join)?;
        Ok(ExecOutput {
            stdout: String::new(),
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    }

    async fn exec_stream_in(
        &self,
        container: &str,
        command: &[String],
        mut stdin: mpsc::Receiver<Vec<u8>>,
    ) -> Result<ExecOutput, SnapshotError> {
        debug!("Streaming input into {}: {}", container, command.join(" "));
        let mut child = self
            .exec_command(container, command, true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout_handle = drain(child.stdout.take());
        let stderr_handle = drain(child.stderr.take());
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| SnapshotError::engine(&self.binary, "stdin was not captured"))?;

        while let Some(chunk) = stdin.recv().await {
            if let Err(e) = pipe.write_all(&chunk).await {
                // The command exited early; its output explains why.
                debug!("Input pipe closed by {}: {}", container, e);
                break;
            }
        }
        let _ = pipe.shutdown().await;
        drop(pipe);
        drop(stdin);

        let status = child.wait().await?;
        Ok(ExecOutput {
            stdout: stdout_handle.await.map_err(SnapshotError::task_join)?,
            stderr: stderr_handle.await.map_err(SnapshotError::task_join)?,
            exit_code: status.code().unwrap_or(-1),
        })
    }

    async fn start(&self, container: &str) -> Result<(), SnapshotError> {
        let output = AsyncCommand::new(&self.binary)
            .args(["start", container])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(SnapshotError::engine(
                &self.binary,
                format!(
                    "failed to start {}: {}",
                    container,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}
