//! PostgreSQL: custom-format `pg_dump`, restored with `pg_restore --clean --if-exists`.

use super::{check_output, dump_into_manifest, env_var, prepare_restore, CreateRequest, EngineKind};
use crate::error::SnapshotError;
use crate::manifest::Manifest;
use crate::pipeline::{restore_from_file, StreamSettings};
use crate::runtime::ContainerRuntime;
use crate::types::ServiceInfo;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const DUMP_BASE_NAME: &str = "pg.dump";
const ERROR_MARKERS: &[&str] = &["ERROR:", "FATAL:", "pg_restore: error:"];
/// Database to connect to while dropping and recreating the target.
const MAINTENANCE_DB: &str = "template1";

pub struct PostgresEngine {
    runtime: Arc<dyn ContainerRuntime>,
    settings: StreamSettings,
}

impl PostgresEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: StreamSettings) -> Self {
        Self { runtime, settings }
    }

    pub(crate) async fn create(
        &self,
        request: CreateRequest<'_>,
    ) -> Result<Manifest, SnapshotError> {
        let command = dump_command(request.service);
        dump_into_manifest(
            self.runtime.as_ref(),
            &self.settings,
            EngineKind::Postgres,
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

        if force {
            self.recreate_database(service).await?;
        }

        info!("Restoring {} into database {}", data_path.display(), service.database);
        let output = restore_from_file(
            self.runtime.as_ref(),
            &service.container,
            &restore_command(service),
            &data_path,
            manifest.compression,
            &self.settings,
        )
        .await?;

        check_output(EngineKind::Postgres, "pg_restore", &output, ERROR_MARKERS, force)?;
        info!("PostgreSQL restore of {} completed", service.name);
        Ok(())
    }

    async fn recreate_database(&self, service: &ServiceInfo) -> Result<(), SnapshotError> {
        warn!("Dropping and recreating database {} (force)", service.database);
        for sql in recreate_statements(&service.database) {
            let output = self
                .runtime
                .exec(&service.container, &psql_command(service, MAINTENANCE_DB, &sql))
                .await?;
            if !output.success() {
                return Err(SnapshotError::engine(
                    EngineKind::Postgres.as_str(),
                    format!("`{}` failed: {}", sql, output.combined()),
                ));
            }
        }
        Ok(())
    }
}

fn with_password(service: &ServiceInfo, tool: &str) -> Vec<String> {
    let mut command = vec!["env".to_string()];
    command.extend(env_var("PGPASSWORD", &service.password));
    command.push(tool.to_string());
    command
}

pub(crate) fn dump_command(service: &ServiceInfo) -> Vec<String> {
    let mut command = with_password(service, "pg_dump");
    command.extend(
        [
            "-U",
            service.user.as_str(),
            "-d",
            service.database.as_str(),
            "--format=custom",
            "--no-owner",
            "--no-privileges",
        ]
        .map(String::from),
    );
    command
}

pub(crate) fn restore_command(service: &ServiceInfo) -> Vec<String> {
    let mut command = with_password(service, "pg_restore");
    command.extend(
        [
            "-U",
            service.user.as_str(),
            "-d",
            service.database.as_str(),
            "--clean",
            "--if-exists",
            "--no-owner",
            "--no-privileges",
        ]
        .map(String::from),
    );
    command
}

fn psql_command(service: &ServiceInfo, database: &str, sql: &str) -> Vec<String> {
    let mut command = with_password(service, "psql");
    command.extend(
        [
            "-U",
            service.user.as_str(),
            "-d",
            database,
            "-v",
            "ON_ERROR_STOP=1",
            "-c",
            sql,
        ]
        .map(String::from),
    );
    command
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn recreate_statements(database: &str) -> Vec<String> {
    vec![
        format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = {} AND pid <> pg_backend_pid()",
            quote_literal(database)
        ),
        format!("DROP DATABASE IF EXISTS {}", quote_ident(database)),
        format!("CREATE DATABASE {}", quote_ident(database)),
    ]
}
