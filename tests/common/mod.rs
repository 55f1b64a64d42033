#![allow(dead_code)]

use async_trait::async_trait;
use nizam::{ContainerRuntime, ExecOutput, ServiceInfo, SnapshotConfig, SnapshotError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const FAKE_CHUNK: usize = 4096;

#[derive(Default)]
struct State {
    running: bool,
    data: Vec<u8>,
    restored: Option<Vec<u8>>,
    commands: Vec<Vec<String>>,
    last_save: i64,
    appendonly: bool,
    lastsave_frozen: bool,
    stall: bool,
    dump_exit: i32,
    dump_stderr: String,
    restore_stderr: String,
    restore_exit: i32,
}

/// In-memory container runtime: dumps stream `data`, restores capture their input.
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                running: true,
                data,
                last_save: 1_700_000_000,
                ..State::default()
            }),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_running(&self, running: bool) {
        self.with(|s| s.running = running);
    }

    pub fn set_data(&self, data: Vec<u8>) {
        self.with(|s| s.data = data);
    }

    pub fn set_stall(&self, stall: bool) {
        self.with(|s| s.stall = stall);
    }

    pub fn set_appendonly(&self, on: bool) {
        self.with(|s| s.appendonly = on);
    }

    /// `LASTSAVE` keeps its value across `BGSAVE`, as when both saves land in one second.
    pub fn freeze_lastsave(&self) {
        self.with(|s| s.lastsave_frozen = true);
    }

    /// The dump command streams its data and then exits with `exit_code`.
    pub fn fail_dump(&self, exit_code: i32, stderr: &str) {
        self.with(|s| {
            s.dump_exit = exit_code;
            s.dump_stderr = stderr.to_string();
        });
    }

    pub fn fail_restore(&self, stderr: &str, exit_code: i32) {
        self.with(|s| {
            s.restore_stderr = stderr.to_string();
            s.restore_exit = exit_code;
        });
    }

    pub fn restored(&self) -> Option<Vec<u8>> {
        self.with(|s| s.restored.clone())
    }

    pub fn commands(&self) -> Vec<String> {
        self.with(|s| s.commands.iter().map(|c| c.join(" ")).collect())
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    fn record(&self, command: &[String]) {
        self.with(|s| s.commands.push(command.to_vec()));
    }
}

fn ok(stdout: impl Into<String>) -> ExecOutput {
    ExecOutput {
        stdout: stdout.into(),
        ..ExecOutput::default()
    }
}

fn redis_reply(state: &mut State, command: &[String]) -> ExecOutput {
    let args: Vec<&str> = command.iter().map(String::as_str).collect();
    match args.as_slice() {
        [.., "CONFIG", "GET", "dir"] => ok("dir\n/data\n"),
        [.., "CONFIG", "GET", "dbfilename"] => ok("dbfilename\ndump.rdb\n"),
        [.., "CONFIG", "GET", "appendonly"] => {
            let value = if state.appendonly { "yes" } else { "no" };
            ok(format!("appendonly\n{}\n", value))
        }
        [.., "LASTSAVE"] => ok(format!("{}\n", state.last_save)),
        [.., "BGSAVE"] => {
            if !state.lastsave_frozen {
                state.last_save += 1;
            }
            ok("Background saving started\n")
        }
        [.., "INFO", "persistence"] => {
            ok("# Persistence\nrdb_bgsave_in_progress:0\nrdb_last_bgsave_status:ok\n")
        }
        [.., "PING"] if state.running => ok("PONG\n"),
        [.., "PING"] => ExecOutput {
            stderr: "Could not connect to Redis".to_string(),
            exit_code: 1,
            ..ExecOutput::default()
        },
        [.., "SHUTDOWN", "NOSAVE"] => {
            state.running = false;
            ExecOutput {
                stderr: "Error: Server closed the connection".to_string(),
                exit_code: 1,
                ..ExecOutput::default()
            }
        }
        _ => ok(""),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_running(&self, _container: &str) -> Result<bool, SnapshotError> {
        Ok(self.with(|s| s.running))
    }

    async fn exec(
        &self,
        _container: &str,
        command: &[String],
    ) -> Result<ExecOutput, SnapshotError> {
        self.record(command);
        Ok(self.with(|s| {
            if command.iter().any(|c| c == "redis-cli") {
                redis_reply(s, command)
            } else {
                ok("")
            }
        }))
    }

    async fn exec_stream_out(
        &self,
        _container: &str,
        command: &[String],
        stdout: mpsc::Sender<Vec<u8>>,
    ) -> Result<ExecOutput, SnapshotError> {
        self.record(command);
        let (data, stall, exit_code, stderr) =
            self.with(|s| (s.data.clone(), s.stall, s.dump_exit, s.dump_stderr.clone()));
        if stall {
            if let Some(first) = data.chunks(FAKE_CHUNK).next() {
                let _ = stdout.send(first.to_vec()).await;
            }
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        for chunk in data.chunks(FAKE_CHUNK) {
            if stdout.send(chunk.to_vec()).await.is_err() {
                break;
            }
        }
        Ok(ExecOutput {
            stdout: String::new(),
            stderr,
            exit_code,
        })
    }

    async fn exec_stream_in(
        &self,
        _container: &str,
        command: &[String],
        mut stdin: mpsc::Receiver<Vec<u8>>,
    ) -> Result<ExecOutput, SnapshotError> {
        self.record(command);
        let mut received = Vec::new();
        while let Some(chunk) = stdin.recv().await {
            received.extend_from_slice(&chunk);
        }
        Ok(self.with(|s| {
            s.restored = Some(received);
            ExecOutput {
                stdout: String::new(),
                stderr: s.restore_stderr.clone(),
                exit_code: s.restore_exit,
            }
        }))
    }

    async fn start(&self, container: &str) -> Result<(), SnapshotError> {
        self.record(&["start".to_string(), container.to_string()]);
        self.with(|s| s.running = true);
        Ok(())
    }
}

/// Deterministic, poorly compressible test payload spanning several chunks.
pub fn sample_data(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect()
}

pub fn service(name: &str, engine: &str) -> ServiceInfo {
    ServiceInfo {
        name: name.to_string(),
        engine: engine.to_string(),
        container: format!("nizam_{}", name),
        image: format!("{}:latest", engine),
        host: "localhost".to_string(),
        port: 5432,
        user: "app".to_string(),
        password: "secret".to_string(),
        database: "shop".to_string(),
    }
}

pub fn config(root: &TempDir) -> SnapshotConfig {
    SnapshotConfig {
        snapshot_root: root.path().join("snapshots"),
        seeds_root: root.path().join("seeds"),
        timeout: Duration::from_secs(30),
        ..SnapshotConfig::default()
    }
}
