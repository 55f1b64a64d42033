//! Redis: `BGSAVE` snapshot copied out of the container, restored by replacing
//! the RDB file and restarting the server.

use super::{check_output, dump_into_manifest, prepare_restore, CreateRequest, EngineKind};
use crate::error::SnapshotError;
use crate::manifest::Manifest;
use crate::pipeline::{restore_from_file, StreamSettings};
use crate::runtime::{argv, ContainerRuntime};
use crate::types::ServiceInfo;
use std::path::Path;
use std::sync::Arc;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, warn};

const DUMP_BASE_NAME: &str = "redis.rdb";
const ERROR_MARKERS: &[&str] = &["No such file", "Permission denied", "Read-only file system"];
const SAVE_POLL_MILLIS: u64 = 500;
const SAVE_POLL_ATTEMPTS: usize = 240;
const PING_POLL_MILLIS: u64 = 500;
const PING_POLL_ATTEMPTS: usize = 60;

pub struct RedisEngine {
    runtime: Arc<dyn ContainerRuntime>,
    settings: StreamSettings,
}

/// Where the server keeps its RDB file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RdbLocation {
    pub dir: String,
    pub file: String,
}

impl RdbLocation {
    pub fn path(&self) -> String {
        format!("{}/{}", self.dir.trim_end_matches('/'), self.file)
    }

    pub fn staging_path(&self) -> String {
        format!("{}.nizam-restore", self.path())
    }
}

impl RedisEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: StreamSettings) -> Self {
        Self { runtime, settings }
    }

    async fn cli(&self, service: &ServiceInfo, args: &[&str]) -> Result<String, SnapshotError> {
        let output = self
            .runtime
            .exec(&service.container, &cli_command(service, args))
            .await?;
        if !output.success() || output.stdout.starts_with("ERR") {
            return Err(SnapshotError::engine(
                EngineKind::Redis.as_str(),
                format!("redis-cli {} failed: {}", args.join(" "), output.combined()),
            ));
        }
        Ok(output.stdout)
    }

    async fn config_get(&self, service: &ServiceInfo, key: &str) -> Result<String, SnapshotError> {
        let reply = self.cli(service, &["CONFIG", "GET", key]).await?;
        parse_config_reply(&reply, key).ok_or_else(|| {
            SnapshotError::engine(
                EngineKind::Redis.as_str(),
                format!("unexpected CONFIG GET {} reply: {}", key, reply.trim()),
            )
        })
    }

    async fn rdb_location(&self, service: &ServiceInfo) -> Result<RdbLocation, SnapshotError> {
        Ok(RdbLocation {
            dir: self.config_get(service, "dir").await?,
            file: self.config_get(service, "dbfilename").await?,
        })
    }

    async fn last_save(&self, service: &ServiceInfo) -> Result<i64, SnapshotError> {
        let reply = self.cli(service, &["LASTSAVE"]).await?;
        parse_integer_reply(&reply).ok_or_else(|| {
            SnapshotError::engine(
                EngineKind::Redis.as_str(),
                format!("unexpected LASTSAVE reply: {}", reply.trim()),
            )
        })
    }

    /// Triggers a background save and waits until the server reports it finished.
    ///
    /// `LASTSAVE` has one-second resolution, so a save that completes in the
    /// same second as the previous one is recognised through `INFO persistence`.
    async fn background_save(&self, service: &ServiceInfo) -> Result<(), SnapshotError> {
        let before = self.last_save(service).await?;
        match self.cli(service, &["BGSAVE"]).await {
            Ok(reply) => debug!("BGSAVE: {}", reply.trim()),
            Err(e) if e.to_string().contains("already in progress") => {
                debug!("Background save already running, waiting for it")
            }
            Err(e) => return Err(e),
        }

        let strategy = tokio_retry2::strategy::FixedInterval::from_millis(SAVE_POLL_MILLIS)
            .take(SAVE_POLL_ATTEMPTS);
        Retry::spawn(strategy, move || async move {
            let persistence = match self.cli(service, &["INFO", "persistence"]).await {
                Ok(reply) => reply,
                Err(e) => return RetryError::to_permanent(e),
            };
            if parse_info_field(&persistence, "rdb_bgsave_in_progress").as_deref() == Some("1") {
                return RetryError::to_transient(save_pending());
            }
            if parse_info_field(&persistence, "rdb_last_bgsave_status").as_deref() == Some("err") {
                return RetryError::to_permanent(SnapshotError::engine(
                    EngineKind::Redis.as_str(),
                    "background save reported an error",
                ));
            }

            let now = match self.last_save(service).await {
                Ok(now) => now,
                Err(e) => return RetryError::to_permanent(e),
            };
            // Servers without the in-progress field only expose LASTSAVE.
            let done = match parse_info_field(&persistence, "rdb_bgsave_in_progress") {
                Some(_) => now >= before,
                None => now > before,
            };
            if done {
                Ok(())
            } else {
                RetryError::to_transient(save_pending())
            }
        })
        .await?;

        info!("Redis background save of {} completed", service.name);
        Ok(())
    }

    pub(crate) async fn create(
        &self,
        request: CreateRequest<'_>,
    ) -> Result<Manifest, SnapshotError> {
        let service = request.service;
        let location = self.rdb_location(service).await?;
        self.background_save(service).await?;

        let command = argv(["cat", location.path().as_str()]);
        dump_into_manifest(
            self.runtime.as_ref(),
            &self.settings,
            EngineKind::Redis,
            request,
            DUMP_BASE_NAME,
            &command,
        )
        .await
    }

    pub(crate) async fn restore(
        &self,
        service: &ServiceInfo,
        snapshot_dir: &Path,
        manifest: &Manifest,
        force: bool,
    ) -> Result<(), SnapshotError> {
        let data_path =
            prepare_restore(self.runtime.as_ref(), service, snapshot_dir, manifest).await?;
        let location = self.rdb_location(service).await?;

        if self.config_get(service, "appendonly").await? == "yes" {
            let message =
                "appendonly is enabled; the AOF will take precedence over the restored RDB";
            if !force {
                return Err(SnapshotError::engine(EngineKind::Redis.as_str(), message));
            }
            warn!("{}", message);
        }

        info!("Staging {} at {}", data_path.display(), location.staging_path());
        let output = restore_from_file(
            self.runtime.as_ref(),
            &service.container,
            &stage_command(&location),
            &data_path,
            manifest.compression,
            &self.settings,
        )
        .await?;
        check_output(EngineKind::Redis, "staging RDB", &output, ERROR_MARKERS, force)?;

        let output = self
            .runtime
            .exec(
                &service.container,
                &argv(["mv", "-f", location.staging_path().as_str(), location.path().as_str()]),
            )
            .await?;
        check_output(EngineKind::Redis, "replacing RDB", &output, ERROR_MARKERS, force)?;

        // The server exits on SHUTDOWN, so the client usually reports a dropped connection.
        let shutdown = self
            .runtime
            .exec(&service.container, &cli_command(service, &["SHUTDOWN", "NOSAVE"]))
            .await?;
        debug!("SHUTDOWN NOSAVE: {}", shutdown.combined());

        self.runtime.start(&service.container).await?;
        self.wait_until_ready(service).await?;
        info!("Redis restore of {} completed", service.name);
        Ok(())
    }

    async fn wait_until_ready(&self, service: &ServiceInfo) -> Result<(), SnapshotError> {
        let strategy = tokio_retry2::strategy::FixedInterval::from_millis(PING_POLL_MILLIS)
            .take(PING_POLL_ATTEMPTS);
        Retry::spawn(strategy, move || async move {
            match self.cli(service, &["PING"]).await {
                Ok(reply) if reply.trim() == "PONG" => Ok(()),
                Ok(reply) => RetryError::to_transient(SnapshotError::engine(
                    EngineKind::Redis.as_str(),
                    format!("server not ready: {}", reply.trim()),
                )),
                Err(e) => RetryError::to_transient(e),
            }
        })
        .await
    }
}

pub(crate) fn cli_command(service: &ServiceInfo, args: &[&str]) -> Vec<String> {
    let mut command = vec!["redis-cli".to_string()];
    if !service.password.is_empty() {
        command.extend(argv(["-a", service.password.as_str(), "--no-auth-warning"]));
    }
    command.extend(args.iter().map(|a| a.to_string()));
    command
}

fn stage_command(location: &RdbLocation) -> Vec<String> {
    let target = location.staging_path().replace('\'', "'\\''");
    argv(["sh".to_string(), "-c".to_string(), format!("cat > '{}'", target)])
}

/// Extracts the value from a `CONFIG GET` reply (`key\nvalue\n`).
pub(crate) fn parse_config_reply(reply: &str, key: &str) -> Option<String> {
    let mut lines = reply.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if line.eq_ignore_ascii_case(key) {
            return lines.next().map(str::to_string);
        }
    }
    None
}

fn save_pending() -> SnapshotError {
    SnapshotError::engine(
        EngineKind::Redis.as_str(),
        "background save did not complete in time",
    )
}

/// Value of `field` in an `INFO` reply (`field:value` lines).
pub(crate) fn parse_info_field(reply: &str, field: &str) -> Option<String> {
    reply
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(key, _)| *key == field)
        .map(|(_, value)| value.to_string())
}

pub(crate) fn parse_integer_reply(reply: &str) -> Option<i64> {
    reply
        .trim()
        .trim_start_matches("(integer)")
        .trim()
        .parse()
        .ok()
}
