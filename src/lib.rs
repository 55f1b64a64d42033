//! Nizam - snapshot and seed pack engine for containerized development databases
//!
//! This library dumps databases running in local containers into compressed,
//! checksummed snapshots, restores them, and packages snapshots as versioned
//! seed packs that can be searched and installed into other services.
//!
//! # Features
//!
//! - **Streaming Dumps**: Multi-gigabyte dumps flow through a bounded channel
//!   into the compressor and never sit in memory
//! - **Atomic Snapshots**: Data files are renamed into place and the manifest
//!   is written last, so a crash never leaves a half-written snapshot
//! - **SHA-256 Verification**: Stored files are verified before any restore
//! - **Engine Strategies**: PostgreSQL, MySQL/MariaDB and Redis
//! - **Seed Packs**: Versioned, annotated snapshots with search and dependencies
//!
//! # Example
//!
//! ```no_run
//! use nizam::{CreateOptions, DockerCli, NizamConfig, SnapshotConfig, SnapshotService};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let services = NizamConfig::load(Path::new(".nizam.yaml"))?;
//! let postgres = services.resolve_service("postgres")?;
//!
//! let snapshots = SnapshotService::new(SnapshotConfig::default(), Arc::new(DockerCli::default()));
//! let created = snapshots
//!     .create(
//!         &postgres,
//!         CreateOptions {
//!             tag: Some("before-migration".to_string()),
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! println!("created {}", created.path.display());
//! # Ok(())
//! # }
//! ```

mod compress;
mod config;
mod docker;
mod engine;
mod error;
mod manifest;
mod pipeline;
mod runtime;
mod seed;
mod snapshot;
mod types;

pub use compress::{
    calculate_sha256, verify_sha256, CompressReader, CompressWriter, FileDigest, TempFile,
    CHUNK_SIZE,
};
pub use config::{detect_engine, NizamConfig, ServiceConfig, DEFAULT_CONFIG_FILE};
pub use docker::DockerCli;
pub use engine::{Engine, EngineKind, MySqlEngine, MySqlFlavor, PostgresEngine, RedisEngine};
pub use error::SnapshotError;
pub use manifest::{FileRecord, Manifest, MANIFEST_FILE};
pub use pipeline::StreamSettings;
pub use runtime::{ContainerRuntime, ExecOutput};
pub use seed::{
    compare_versions, parse_pack_ref, ColumnSchema, InstallOptions, InstallReport, PackDependency,
    PackExample, PackInfo, PackSchema, SearchQuery, SeedPackManifest, SeedPackOptions, SeedService,
    SourceSnapshot, TableSchema, README_FILE, SEED_MANIFEST_FILE,
};
pub use snapshot::SnapshotService;
pub use types::{
    Compression, CreateOptions, Encryption, PruneOptions, PruneReport, RestoreOptions,
    ServiceInfo, SnapshotConfig, SnapshotInfo, SnapshotSelector,
};
