//! Snapshot manifest: the JSON record stored next to a snapshot's data files.

use crate::compress::atomic_write;
use crate::error::SnapshotError;
use crate::types::{Compression, Encryption};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the manifest inside a snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One stored data file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    /// Checksum of the stored (possibly compressed) bytes.
    pub sha256: String,
    pub size: u64,
}

/// Metadata describing one snapshot and its data files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub service: String,
    pub engine: String,
    #[serde(default)]
    pub image: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub tool_version: String,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Data files; the first one is what restore consumes.
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl Manifest {
    /// Creates a manifest stamped with the current time and no files.
    pub fn new(
        service: &str,
        engine: &str,
        image: &str,
        tag: &str,
        note: Option<String>,
        compression: Compression,
    ) -> Self {
        Self {
            service: service.to_string(),
            engine: engine.to_string(),
            image: image.to_string(),
            created_at: Utc::now().trunc_subsecs(0),
            tag: tag.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            compression,
            encryption: Encryption::None,
            note: note.filter(|n| !n.is_empty()),
            files: Vec::new(),
        }
    }

    pub fn add_file(&mut self, name: &str, sha256: &str, size: u64) {
        self.files.push(FileRecord {
            name: name.to_string(),
            sha256: sha256.to_string(),
            size,
        });
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.service.is_empty() {
            return Err(SnapshotError::ManifestInvalid(
                "service name is required".to_string(),
            ));
        }
        if self.engine.is_empty() {
            return Err(SnapshotError::ManifestInvalid(
                "engine type is required".to_string(),
            ));
        }
        if self.files.is_empty() {
            return Err(SnapshotError::ManifestInvalid(
                "at least one file is required".to_string(),
            ));
        }
        if let Some(file) = self.files.iter().find(|f| f.name.is_empty() || f.sha256.is_empty()) {
            return Err(SnapshotError::ManifestInvalid(format!(
                "file record '{}' is missing a name or checksum",
                file.name
            )));
        }
        Ok(())
    }

    /// The data file restore consumes.
    pub fn main_file(&self) -> Result<&FileRecord, SnapshotError> {
        self.files
            .first()
            .ok_or_else(|| SnapshotError::ManifestInvalid("manifest lists no files".to_string()))
    }

    /// Writes pretty-printed JSON atomically, so readers never see a partial manifest.
    pub fn write_to_file(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(path, json.as_bytes())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content).map_err(|e| {
            SnapshotError::ManifestInvalid(format!("{}: {}", path.display(), e))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }
}
