//! Data structures shared by snapshot and seed pack operations.

use crate::error::SnapshotError;
use crate::manifest::Manifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Compression algorithm applied to stored data files.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Gzip,
    None,
}

impl Compression {
    /// File extension appended to data files, including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Zstd => ".zst",
            Compression::Gzip => ".gz",
            Compression::None => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Gzip => "gzip",
            Compression::None => "none",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" | "zst" => Ok(Compression::Zstd),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "none" | "" => Ok(Compression::None),
            other => Err(SnapshotError::CompressionError(format!(
                "unknown compression algorithm '{}' (expected zstd, gzip or none)",
                other
            ))),
        }
    }
}

/// Encryption applied to stored data files. Only `none` is implemented.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    #[default]
    None,
}

/// Connection and container details for one configured service.
///
/// Produced from configuration (see [`crate::config::NizamConfig::resolve_service`])
/// and consumed read-only by the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    /// Engine identifier as configured (`postgres`, `mariadb`, `redis`, ...).
    pub engine: String,
    pub container: String,
    pub image: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Runtime settings for the snapshot engine.
///
/// # Example
///
/// ```
/// use nizam::{Compression, SnapshotConfig};
///
/// let config = SnapshotConfig {
///     snapshot_root: ".nizam/snapshots".into(),
///     default_compression: Compression::Gzip,
///     ..SnapshotConfig::default()
/// };
/// assert_eq!(config.seeds_root, std::path::PathBuf::from(".nizam/seeds"));
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Root directory holding `<service>/<snapshot>/` directories.
    pub snapshot_root: PathBuf,
    /// Root directory holding `<engine>/<pack>/<version>/` directories.
    pub seeds_root: PathBuf,
    /// Version recorded in every manifest as `toolVersion`.
    pub tool_version: String,
    /// Compression used when a create request does not name one.
    pub default_compression: Compression,
    /// Deadline for a single create, restore or install.
    pub timeout: Duration,
    /// Number of chunks the conduit between exec and compressor may hold.
    ///
    /// Memory use of a stream is bounded by `channel_capacity * CHUNK_SIZE`.
    pub channel_capacity: usize,
    /// Draw a byte counter spinner while streaming.
    pub show_progress: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            snapshot_root: PathBuf::from(".nizam/snapshots"),
            seeds_root: PathBuf::from(".nizam/seeds"),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            default_compression: Compression::Zstd,
            timeout: Duration::from_secs(10 * 60),
            channel_capacity: 16,
            show_progress: false,
        }
    }
}

/// Options for creating a snapshot.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub tag: Option<String>,
    pub note: Option<String>,
    /// Falls back to [`SnapshotConfig::default_compression`].
    pub compression: Option<Compression>,
}

/// Which snapshot a restore should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelector {
    /// Most recent snapshot carrying this tag.
    Tag(String),
    /// Most recent snapshot overall.
    Latest,
    /// Most recent snapshot created strictly before the instant.
    Before(DateTime<Utc>),
}

/// Options for restoring a snapshot.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub selector: SnapshotSelector,
    /// Drop and recreate the target before loading, and tolerate engine errors.
    pub force: bool,
}

/// Options for pruning old snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    pub keep: usize,
    pub dry_run: bool,
}

/// One snapshot found on disk.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub service: String,
    /// Directory name, e.g. `20240810-143022-before-migration`.
    pub name: String,
    pub path: PathBuf,
    pub manifest: Manifest,
}

impl SnapshotInfo {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.manifest.created_at
    }

    pub fn tag(&self) -> &str {
        &self.manifest.tag
    }

    /// Total stored bytes of all data files.
    pub fn size(&self) -> u64 {
        self.manifest.files.iter().map(|f| f.size).sum()
    }
}

/// Result of a prune run.
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub kept: Vec<String>,
    /// Directories removed, or that would be removed under `dry_run`.
    pub removed: Vec<String>,
    pub dry_run: bool,
}
