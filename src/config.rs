//! Service configuration loaded from `.nizam.yaml`.

use crate::engine::EngineKind;
use crate::error::SnapshotError;
use crate::types::ServiceInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = ".nizam.yaml";
const CONTAINER_PREFIX: &str = "nizam_";

/// One configured service.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub image: String,
    /// Overrides the engine detected from `image`.
    #[serde(default)]
    pub engine: Option<String>,
    /// Defaults to `nizam_<service>`.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    /// `host:container` port mappings, as for `docker run -p`.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Contents of `.nizam.yaml`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NizamConfig {
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl NizamConfig {
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SnapshotError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| SnapshotError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, SnapshotError> {
        serde_yaml::from_str(content).map_err(|e| SnapshotError::ConfigError(e.to_string()))
    }

    /// Builds the connection details of service `name`.
    pub fn resolve_service(&self, name: &str) -> Result<ServiceInfo, SnapshotError> {
        let service = self.services.get(name).ok_or_else(|| {
            SnapshotError::ConfigError(format!("service '{}' is not configured", name))
        })?;

        let engine_id = match &service.engine {
            Some(engine) => engine.clone(),
            None => detect_engine(&service.image).ok_or_else(|| {
                SnapshotError::UnsupportedEngine(format!(
                    "cannot infer an engine from image '{}' of service '{}'",
                    service.image, name
                ))
            })?,
        };
        let kind = EngineKind::resolve(&engine_id)?;
        let env = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| service.environment.get(*k))
                .filter(|v| !v.is_empty())
                .cloned()
        };

        let (user, password, database) = match kind {
            EngineKind::Postgres => {
                let user = env(&["POSTGRES_USER"]).unwrap_or_else(|| "postgres".to_string());
                let password = env(&["POSTGRES_PASSWORD"]).unwrap_or_default();
                let database = env(&["POSTGRES_DB"]).unwrap_or_else(|| user.clone());
                (user, password, database)
            }
            EngineKind::MySql | EngineKind::MariaDb => {
                let database = env(&["MARIADB_DATABASE", "MYSQL_DATABASE"])
                    .unwrap_or_else(|| "mysql".to_string());
                match env(&["MARIADB_USER", "MYSQL_USER"]) {
                    Some(user) => {
                        let password =
                            env(&["MARIADB_PASSWORD", "MYSQL_PASSWORD"]).unwrap_or_default();
                        (user, password, database)
                    }
                    None => {
                        let password = env(&["MARIADB_ROOT_PASSWORD", "MYSQL_ROOT_PASSWORD"])
                            .unwrap_or_default();
                        ("root".to_string(), password, database)
                    }
                }
            }
            EngineKind::Redis => {
                let password = env(&["REDIS_PASSWORD"]).unwrap_or_default();
                (String::new(), password, "0".to_string())
            }
        };

        let info = ServiceInfo {
            name: name.to_string(),
            engine: kind.as_str().to_string(),
            container: service
                .container
                .clone()
                .unwrap_or_else(|| format!("{}{}", CONTAINER_PREFIX, name)),
            image: service.image.clone(),
            host: service.host.clone().unwrap_or_else(|| "localhost".to_string()),
            port: service
                .ports
                .first()
                .and_then(|p| host_port(p))
                .unwrap_or_else(|| default_port(kind)),
            user,
            password,
            database,
        };
        debug!("Resolved service {} -> {} in {}", name, info.engine, info.container);
        Ok(info)
    }
}

/// Guesses the engine from an image reference such as `bitnami/postgresql:16`.
pub fn detect_engine(image: &str) -> Option<String> {
    let repository = image.rsplit('/').next().unwrap_or(image);
    let repository = repository.split([':', '@']).next().unwrap_or(repository);
    let repository = repository.to_ascii_lowercase();

    let engine = if ["postgres", "postgis", "timescaledb"]
        .iter()
        .any(|p| repository.starts_with(p))
    {
        "postgres"
    } else if repository.starts_with("mariadb") {
        "mariadb"
    } else if repository.starts_with("mysql") || repository.starts_with("percona") {
        "mysql"
    } else if repository.starts_with("redis") || repository.starts_with("valkey") {
        "redis"
    } else {
        return None;
    };
    Some(engine.to_string())
}

fn default_port(kind: EngineKind) -> u16 {
    match kind {
        EngineKind::Postgres => 5432,
        EngineKind::MySql | EngineKind::MariaDb => 3306,
        EngineKind::Redis => 6379,
    }
}

/// Host side of a `host:container` mapping (`5433:5432` -> 5433).
fn host_port(mapping: &str) -> Option<u16> {
    let parts: Vec<&str> = mapping.split(':').collect();
    match parts.as_slice() {
        [single] => single.split('/').next()?.parse().ok(),
        [.., host, _container] => host.parse().ok(),
        [] => None,
    }
}
