//! Database engine strategies.
//!
//! Each supported engine kind maps to exactly one strategy through
//! [`EngineKind::resolve`]; [`Engine`] is the closed set of strategies.

mod mysql;
mod postgres;
mod redis;

pub use mysql::{MySqlEngine, MySqlFlavor};
pub use postgres::PostgresEngine;
pub use redis::RedisEngine;

use crate::compress::verify_sha256;
use crate::error::SnapshotError;
use crate::manifest::Manifest;
use crate::pipeline::{dump_to_file, StreamSettings};
use crate::runtime::{ContainerRuntime, ExecOutput};
use crate::types::{Compression, ServiceInfo};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Supported database engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Postgres,
    MySql,
    MariaDb,
    Redis,
}

/// Engine identifiers accepted in configuration and manifests.
const ENGINE_TABLE: &[(&str, EngineKind)] = &[
    ("postgres", EngineKind::Postgres),
    ("postgresql", EngineKind::Postgres),
    ("pg", EngineKind::Postgres),
    ("mysql", EngineKind::MySql),
    ("mariadb", EngineKind::MariaDb),
    ("redis", EngineKind::Redis),
    ("valkey", EngineKind::Redis),
];

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Postgres,
        EngineKind::MySql,
        EngineKind::MariaDb,
        EngineKind::Redis,
    ];

    pub fn resolve(id: &str) -> Result<Self, SnapshotError> {
        let id = id.trim().to_ascii_lowercase();
        ENGINE_TABLE
            .iter()
            .find(|(name, _)| *name == id)
            .map(|(_, kind)| *kind)
            .ok_or(SnapshotError::UnsupportedEngine(id))
    }

    /// Canonical identifier, used in manifests and the seed pack tree.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::MySql => "mysql",
            EngineKind::MariaDb => "mariadb",
            EngineKind::Redis => "redis",
        }
    }

    /// Whether dumps of `self` can be restored into `other`.
    pub fn compatible_with(&self, other: EngineKind) -> bool {
        matches!(
            (self, other),
            (EngineKind::Postgres, EngineKind::Postgres)
                | (EngineKind::Redis, EngineKind::Redis)
                | (
                    EngineKind::MySql | EngineKind::MariaDb,
                    EngineKind::MySql | EngineKind::MariaDb
                )
        )
    }

    /// Kinds whose dumps restore into `self`, starting with `self`.
    pub fn restorable_from(self) -> impl Iterator<Item = EngineKind> {
        std::iter::once(self).chain(
            Self::ALL
                .into_iter()
                .filter(move |other| *other != self && other.compatible_with(self)),
        )
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dump and restore strategy for one engine kind.
pub enum Engine {
    Postgres(PostgresEngine),
    MySql(MySqlEngine),
    Redis(RedisEngine),
}

impl Engine {
    pub fn for_kind(
        kind: EngineKind,
        runtime: Arc<dyn ContainerRuntime>,
        settings: StreamSettings,
    ) -> Self {
        match kind {
            EngineKind::Postgres => Engine::Postgres(PostgresEngine::new(runtime, settings)),
            EngineKind::MySql => {
                Engine::MySql(MySqlEngine::new(MySqlFlavor::MySql, runtime, settings))
            }
            EngineKind::MariaDb => {
                Engine::MySql(MySqlEngine::new(MySqlFlavor::MariaDb, runtime, settings))
            }
            EngineKind::Redis => Engine::Redis(RedisEngine::new(runtime, settings)),
        }
    }

    pub fn for_service(
        service: &ServiceInfo,
        runtime: Arc<dyn ContainerRuntime>,
        settings: StreamSettings,
    ) -> Result<Self, SnapshotError> {
        Ok(Self::for_kind(EngineKind::resolve(&service.engine)?, runtime, settings))
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Postgres(_) => EngineKind::Postgres,
            Engine::MySql(e) => e.kind(),
            Engine::Redis(_) => EngineKind::Redis,
        }
    }

    pub fn can_handle(&self, engine: &str) -> bool {
        EngineKind::resolve(engine)
            .map(|kind| kind == self.kind())
            .unwrap_or(false)
    }

    /// Dumps the service's data into `output_dir` and returns the manifest
    /// describing it. The caller writes the manifest.
    pub async fn create(
        &self,
        service: &ServiceInfo,
        output_dir: &Path,
        compression: Compression,
        note: Option<String>,
        tag: &str,
    ) -> Result<Manifest, SnapshotError> {
        let request = CreateRequest {
            service,
            output_dir,
            compression,
            note,
            tag,
        };
        match self {
            Engine::Postgres(e) => e.create(request).await,
            Engine::MySql(e) => e.create(request).await,
            Engine::Redis(e) => e.create(request).await,
        }
    }

    /// Loads the main file of `manifest` from `snapshot_dir` into the service.
    pub async fn restore(
        &self,
        service: &ServiceInfo,
        snapshot_dir: &Path,
        manifest: &Manifest,
        force: bool,
    ) -> Result<(), SnapshotError> {
        match self {
            Engine::Postgres(e) => e.restore(service, snapshot_dir, manifest, force).await,
            Engine::MySql(e) => e.restore(service, snapshot_dir, manifest, force).await,
            Engine::Redis(e) => e.restore(service, snapshot_dir, manifest, force).await,
        }
    }
}

pub(crate) struct CreateRequest<'a> {
    pub service: &'a ServiceInfo,
    pub output_dir: &'a Path,
    pub compression: Compression,
    pub note: Option<String>,
    pub tag: &'a str,
}

/// Streams `command`'s output into `<output_dir>/<base_name><ext>` and
/// records it in a new manifest.
pub(crate) async fn dump_into_manifest(
    runtime: &dyn ContainerRuntime,
    settings: &StreamSettings,
    kind: EngineKind,
    request: CreateRequest<'_>,
    base_name: &str,
    command: &[String],
) -> Result<Manifest, SnapshotError> {
    let service = request.service;
    let file_name = format!("{}{}", base_name, request.compression.extension());
    let final_path = request.output_dir.join(&file_name);

    info!(
        "Creating {} snapshot of {} into {}",
        kind,
        service.name,
        final_path.display()
    );
    let digest = dump_to_file(
        runtime,
        kind.as_str(),
        &service.container,
        command,
        &final_path,
        request.compression,
        settings,
    )
    .await?;

    let mut manifest = Manifest::new(
        &service.name,
        kind.as_str(),
        &service.image,
        request.tag,
        request.note,
        request.compression,
    );
    manifest.add_file(&file_name, &digest.sha256, digest.size);
    Ok(manifest)
}

/// Checks the stored file and the target before anything destructive happens.
///
/// Returns the path of the verified main file.
pub(crate) async fn prepare_restore(
    runtime: &dyn ContainerRuntime,
    service: &ServiceInfo,
    snapshot_dir: &Path,
    manifest: &Manifest,
) -> Result<PathBuf, SnapshotError> {
    manifest.validate()?;
    let main = manifest.main_file()?;
    let path = snapshot_dir.join(&main.name);

    info!("Verifying checksum of {}", path.display());
    verify_sha256(&path, &main.sha256).await?;

    if !runtime.is_running(&service.container).await? {
        return Err(SnapshotError::ContainerNotRunning(service.container.clone()));
    }
    Ok(path)
}

/// Applies the restore error policy to a command's output.
///
/// Failures are fatal unless `force` is set, in which case they are logged.
pub(crate) fn check_output(
    kind: EngineKind,
    step: &str,
    output: &ExecOutput,
    markers: &[&str],
    force: bool,
) -> Result<(), SnapshotError> {
    let text = output.combined();
    let marked = markers.iter().any(|m| text.contains(m));
    if output.success() && !marked {
        return Ok(());
    }

    let message = format!("{} (exit code {}): {}", step, output.exit_code, text);
    if force {
        warn!("{} reported errors, continuing because of force: {}", kind, message);
        return Ok(());
    }
    Err(SnapshotError::engine(kind.as_str(), message))
}

/// `KEY=value` pair for `env`, or nothing when the value is empty.
pub(crate) fn env_var(key: &str, value: &str) -> Option<String> {
    (!value.is_empty()).then(|| format!("{}={}", key, value))
}
