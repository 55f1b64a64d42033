//! MySQL and MariaDB: single-transaction logical dumps replayed through the client.

use super::{check_output, dump_into_manifest, env_var, prepare_restore, CreateRequest, EngineKind};
use crate::error::SnapshotError;
use crate::manifest::Manifest;
use crate::pipeline::{restore_from_file, StreamSettings};
use crate::runtime::ContainerRuntime;
use crate::types::ServiceInfo;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const DUMP_BASE_NAME: &str = "mysql.sql";
const CHARSET: &str = "utf8mb4";
const ERROR_MARKERS: &[&str] = &["ERROR ", "ERROR:"];

/// Which client binaries the image ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MySqlFlavor {
    MySql,
    /// MariaDB 11 images no longer ship the `mysql*` aliases.
    MariaDb,
}

impl MySqlFlavor {
    fn dump_binary(&self) -> &'static str {
        match self {
            MySqlFlavor::MySql => "mysqldump",
            MySqlFlavor::MariaDb => "mariadb-dump",
        }
    }

    fn client_binary(&self) -> &'static str {
        match self {
            MySqlFlavor::MySql => "mysql",
            MySqlFlavor::MariaDb => "mariadb",
        }
    }
}

pub struct MySqlEngine {
    flavor: MySqlFlavor,
    runtime: Arc<dyn ContainerRuntime>,
    settings: StreamSettings,
}

impl MySqlEngine {
    pub fn new(
        flavor: MySqlFlavor,
        runtime: Arc<dyn ContainerRuntime>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            flavor,
            runtime,
            settings,
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self.flavor {
            MySqlFlavor::MySql => EngineKind::MySql,
            MySqlFlavor::MariaDb => EngineKind::MariaDb,
        }
    }

    pub(crate) async fn create(
        &self,
        request: CreateRequest<'_>,
    ) -> Result<Manifest, SnapshotError> {
        let command = dump_command(self.flavor, request.service);
        dump_into_manifest(
            self.runtime.as_ref(),
            &self.settings,
            self.kind(),
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
            warn!("Dropping and recreating database {} (force)", service.database);
            let sql = recreate_sql(&service.database);
            let output = self
                .runtime
                .exec(
                    &service.container,
                    &client_command(self.flavor, service, None, Some(sql.as_str())),
                )
                .await?;
            if !output.success() {
                return Err(SnapshotError::engine(
                    self.kind().as_str(),
                    format!("recreating {} failed: {}", service.database, output.combined()),
                ));
            }
        }

        info!("Restoring {} into database {}", data_path.display(), service.database);
        let output = restore_from_file(
            self.runtime.as_ref(),
            &service.container,
            &client_command(self.flavor, service, Some(&service.database), None),
            &data_path,
            manifest.compression,
            &self.settings,
        )
        .await?;

        check_output(
            self.kind(),
            self.flavor.client_binary(),
            &output,
            ERROR_MARKERS,
            force,
        )?;
        info!("{} restore of {} completed", self.kind(), service.name);
        Ok(())
    }
}

fn with_password(service: &ServiceInfo, tool: &str) -> Vec<String> {
    let mut command = vec!["env".to_string()];
    command.extend(env_var("MYSQL_PWD", &service.password));
    command.push(tool.to_string());
    command
}

pub(crate) fn dump_command(flavor: MySqlFlavor, service: &ServiceInfo) -> Vec<String> {
    let mut command = with_password(service, flavor.dump_binary());
    command.push(format!("--user={}", service.user));
    command.extend(
        [
            "--single-transaction",
            "--routines",
            "--triggers",
            "--events",
            "--complete-insert",
            "--extended-insert",
            "--add-drop-table",
            "--no-tablespaces",
        ]
        .map(String::from),
    );
    command.push(format!("--default-character-set={}", CHARSET));
    command.push(service.database.clone());
    command
}

/// Client invocation, either replaying stdin into `database` or running `sql`.
pub(crate) fn client_command(
    flavor: MySqlFlavor,
    service: &ServiceInfo,
    database: Option<&str>,
    sql: Option<&str>,
) -> Vec<String> {
    let mut command = with_password(service, flavor.client_binary());
    command.push(format!("--user={}", service.user));
    command.push(format!("--default-character-set={}", CHARSET));
    if let Some(sql) = sql {
        command.push("-e".to_string());
        command.push(sql.to_string());
    }
    if let Some(database) = database {
        command.push(database.to_string());
    }
    command
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub(crate) fn recreate_sql(database: &str) -> String {
    let db = quote_ident(database);
    format!(
        "DROP DATABASE IF EXISTS {db}; \
         CREATE DATABASE {db} CHARACTER SET {CHARSET} COLLATE {CHARSET}_unicode_ci;"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ServiceInfo {
        ServiceInfo {
            name: "mysql".to_string(),
            engine: "mysql".to_string(),
            container: "nizam_mysql".to_string(),
            image: "mysql:8.4".to_string(),
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "root".to_string(),
            database: "shop".to_string(),
        }
    }

    #[test]
    fn test_dump_is_consistent_and_complete() {
        let cmd = dump_command(MySqlFlavor::MySql, &service());
        assert_eq!(cmd[..3], ["env", "MYSQL_PWD=root", "mysqldump"]);
        for flag in [
            "--single-transaction",
            "--routines",
            "--triggers",
            "--events",
            "--complete-insert",
            "--extended-insert",
            "--default-character-set=utf8mb4",
        ] {
            assert!(cmd.iter().any(|a| a == flag), "missing {}", flag);
        }
        assert_eq!(cmd.last().map(String::as_str), Some("shop"));
    }

    #[test]
    fn test_mariadb_uses_its_own_binaries() {
        let cmd = dump_command(MySqlFlavor::MariaDb, &service());
        assert_eq!(cmd[2], "mariadb-dump");
        let cmd = client_command(MySqlFlavor::MariaDb, &service(), Some("shop"), None);
        assert_eq!(cmd[2], "mariadb");
        assert_eq!(cmd.last().map(String::as_str), Some("shop"));
    }

    #[test]
    fn test_recreate_sql_quotes_database() {
        let sql = recreate_sql("my`db");
        assert!(sql.starts_with("DROP DATABASE IF EXISTS `my``db`;"));
        assert!(sql.contains("CREATE DATABASE `my``db` CHARACTER SET utf8mb4"));
    }
}
