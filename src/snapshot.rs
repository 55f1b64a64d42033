//! Snapshot lifecycle: create, list, restore, prune and remove.
//!
//! The directory tree under [`SnapshotConfig::snapshot_root`] is the only
//! index. A snapshot exists once its `manifest.json` does; the manifest is
//! always written after the data file has been committed.

use crate::engine::{Engine, EngineKind};
use crate::error::SnapshotError;
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::pipeline::{with_timeout, StreamSettings};
use crate::runtime::ContainerRuntime;
use crate::types::{
    CreateOptions, PruneOptions, PruneReport, RestoreOptions, ServiceInfo, SnapshotConfig,
    SnapshotInfo, SnapshotSelector,
};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const MAX_NAME_SUFFIX: usize = 1000;

/// Creates, lists, restores and prunes snapshots of configured services.
pub struct SnapshotService {
    config: SnapshotConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl SnapshotService {
    pub fn new(config: SnapshotConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    fn engine_for(&self, kind: EngineKind) -> Engine {
        Engine::for_kind(kind, self.runtime.clone(), StreamSettings::from(&self.config))
    }

    /// Dumps `service` into a fresh snapshot directory.
    ///
    /// The directory is removed again if the dump fails, times out or the
    /// future is dropped before the manifest is written.
    pub async fn create(
        &self,
        service: &ServiceInfo,
        options: CreateOptions,
    ) -> Result<SnapshotInfo, SnapshotError> {
        let kind = EngineKind::resolve(&service.engine)?;
        let engine = self.engine_for(kind);
        let compression = options.compression.unwrap_or(self.config.default_compression);

        let timestamp = Utc::now().format(DIR_TIMESTAMP_FORMAT).to_string();
        let user_tag = options
            .tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let tag = user_tag.map(str::to_string).unwrap_or_else(|| timestamp.clone());
        let base_name = match user_tag {
            Some(t) => format!("{}-{}", timestamp, sanitize_component(t)),
            None => timestamp,
        };

        let service_dir = self.config.snapshot_root.join(&service.name);
        std::fs::create_dir_all(&service_dir)?;
        let (name, dir) = reserve_dir(&service_dir, &base_name)?;
        let guard = DirGuard::new(dir.clone());

        info!(
            "Creating {} snapshot '{}' of {} ({})",
            kind, tag, service.name, compression
        );
        let mut manifest = with_timeout(
            self.config.timeout,
            "snapshot create",
            engine.create(service, &dir, compression, options.note, &tag),
        )
        .await?;

        manifest.tool_version = self.config.tool_version.clone();
        manifest.validate()?;
        manifest.write_to_file(&dir.join(MANIFEST_FILE))?;
        guard.keep();

        info!("✅ Snapshot {} created at {}", name, dir.display());
        Ok(SnapshotInfo {
            service: service.name.clone(),
            name,
            path: dir,
            manifest,
        })
    }

    /// Lists snapshots, newest first. Directories without a valid manifest are skipped.
    pub fn list(&self, service: Option<&str>) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        let services = match service {
            Some(name) => vec![name.to_string()],
            None => subdirectories(&self.config.snapshot_root)?,
        };

        let mut snapshots = Vec::new();
        for service in services {
            let service_dir = self.config.snapshot_root.join(&service);
            for name in subdirectories(&service_dir)? {
                let path = service_dir.join(&name);
                match Manifest::load_from_file(&path.join(MANIFEST_FILE)) {
                    Ok(manifest) => snapshots.push(SnapshotInfo {
                        service: service.clone(),
                        name,
                        path,
                        manifest,
                    }),
                    Err(e) => debug!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        sort_newest_first(&mut snapshots);
        Ok(snapshots)
    }

    /// Restores the snapshot chosen by `options.selector` into `service`.
    pub async fn restore(
        &self,
        service: &ServiceInfo,
        options: RestoreOptions,
    ) -> Result<SnapshotInfo, SnapshotError> {
        let snapshots = self.list(Some(&service.name))?;
        let snapshot = select_snapshot(&snapshots, &options.selector)
            .cloned()
            .ok_or_else(|| {
                SnapshotError::SnapshotNotFound(format!(
                    "no snapshot of {} matches {}",
                    service.name,
                    describe_selector(&options.selector)
                ))
            })?;

        let target = EngineKind::resolve(&service.engine)?;
        let source = EngineKind::resolve(&snapshot.manifest.engine)?;
        if !source.compatible_with(target) {
            return Err(SnapshotError::ConfigError(format!(
                "snapshot {} was taken from a {} service and cannot be restored into {} ({})",
                snapshot.name, source, service.name, target
            )));
        }

        info!(
            "Restoring snapshot {} (tag '{}', created {}) into {}",
            snapshot.name,
            snapshot.tag(),
            snapshot.created_at(),
            service.name
        );
        with_timeout(
            self.config.timeout,
            "snapshot restore",
            self.engine_for(target)
                .restore(service, &snapshot.path, &snapshot.manifest, options.force),
        )
        .await?;

        info!("✅ Restored {} from {}", service.name, snapshot.name);
        Ok(snapshot)
    }

    /// Keeps the newest `options.keep` snapshots of `service` and removes the rest.
    pub fn prune(
        &self,
        service: &str,
        options: PruneOptions,
    ) -> Result<PruneReport, SnapshotError> {
        let snapshots = self.list(Some(service))?;
        let split = options.keep.min(snapshots.len());
        let (kept, stale) = snapshots.split_at(split);

        let mut report = PruneReport {
            kept: kept.iter().map(|s| s.name.clone()).collect(),
            removed: Vec::new(),
            dry_run: options.dry_run,
        };

        for snapshot in stale {
            if options.dry_run {
                info!("Would remove snapshot {}", snapshot.name);
            } else {
                std::fs::remove_dir_all(&snapshot.path)?;
                info!("Removed snapshot {}", snapshot.name);
            }
            report.removed.push(snapshot.name.clone());
        }
        Ok(report)
    }

    /// Removes one snapshot, matched by directory name or else by tag (newest wins).
    pub fn remove(&self, service: &str, name_or_tag: &str) -> Result<SnapshotInfo, SnapshotError> {
        let snapshots = self.list(Some(service))?;
        let snapshot = snapshots
            .iter()
            .find(|s| s.name == name_or_tag)
            .or_else(|| snapshots.iter().find(|s| s.tag() == name_or_tag))
            .cloned()
            .ok_or_else(|| {
                SnapshotError::SnapshotNotFound(format!(
                    "{} has no snapshot '{}'",
                    service, name_or_tag
                ))
            })?;

        std::fs::remove_dir_all(&snapshot.path)?;
        info!("Removed snapshot {}", snapshot.name);
        Ok(snapshot)
    }
}

/// Newest `createdAt` first; equal timestamps fall back to directory name, descending.
pub(crate) fn sort_newest_first(snapshots: &mut [SnapshotInfo]) {
    snapshots.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.name.cmp(&a.name))
    });
}

/// Picks a snapshot from a list sorted with [`sort_newest_first`].
pub(crate) fn select_snapshot<'a>(
    snapshots: &'a [SnapshotInfo],
    selector: &SnapshotSelector,
) -> Option<&'a SnapshotInfo> {
    match selector {
        SnapshotSelector::Tag(tag) => snapshots.iter().find(|s| s.tag() == tag),
        SnapshotSelector::Latest => snapshots.first(),
        SnapshotSelector::Before(instant) => snapshots.iter().find(|s| s.created_at() < *instant),
    }
}

fn describe_selector(selector: &SnapshotSelector) -> String {
    match selector {
        SnapshotSelector::Tag(tag) => format!("tag '{}'", tag),
        SnapshotSelector::Latest => "latest".to_string(),
        SnapshotSelector::Before(instant) => format!("created before {}", instant.to_rfc3339()),
    }
}

/// Replaces characters that do not belong in a directory name.
pub(crate) fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Creates `<parent>/<base>` exclusively, appending `-1`, `-2`, ... on collision.
fn reserve_dir(parent: &Path, base: &str) -> Result<(String, PathBuf), SnapshotError> {
    for attempt in 0..MAX_NAME_SUFFIX {
        let name = match attempt {
            0 => base.to_string(),
            n => format!("{}-{}", base, n),
        };
        let path = parent.join(&name);
        match std::fs::create_dir(&path) {
            Ok(()) => return Ok((name, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(SnapshotError::FileSystemError(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free snapshot directory name for {} in {}", base, parent.display()),
    )))
}

/// Names of the visible subdirectories of `dir`, sorted. A missing `dir` is empty.
pub(crate) fn subdirectories(dir: &Path) -> Result<Vec<String>, SnapshotError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Removes a directory on drop unless [`DirGuard::keep`] was called.
pub(crate) struct DirGuard {
    path: PathBuf,
    keep: bool,
}

impl DirGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to clean up {}: {}", self.path.display(), e);
            }
        } else {
            debug!("Cleaned up {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Compression;
    use chrono::{DateTime, TimeZone};
    use tempfile::TempDir;

    fn info(name: &str, tag: &str, created_at: DateTime<Utc>) -> SnapshotInfo {
        let mut manifest =
            Manifest::new("pg", "postgres", "postgres:16", tag, None, Compression::None);
        manifest.created_at = created_at;
        manifest.add_file("pg.dump", "abc", 1);
        SnapshotInfo {
            service: "pg".to_string(),
            name: name.to_string(),
            path: PathBuf::from(name),
            manifest,
        }
    }

    #[test]
    fn test_sort_breaks_ties_by_name() {
        let t = Utc.with_ymd_and_hms(2024, 8, 10, 14, 30, 22).unwrap();
        let mut list = vec![
            info("20240810-143022-a", "a", t),
            info("20240809-000000", "old", t - chrono::Duration::days(1)),
            info("20240810-143022-b", "b", t),
        ];
        sort_newest_first(&mut list);
        let names: Vec<_> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["20240810-143022-b", "20240810-143022-a", "20240809-000000"]);
    }

    #[test]
    fn test_select_snapshot() {
        let t = Utc.with_ymd_and_hms(2024, 8, 10, 12, 0, 0).unwrap();
        let mut list = vec![
            info("one", "v1", t - chrono::Duration::hours(2)),
            info("two", "v2", t - chrono::Duration::hours(1)),
            info("three", "v1", t),
        ];
        sort_newest_first(&mut list);

        let latest = select_snapshot(&list, &SnapshotSelector::Latest).unwrap();
        assert_eq!(latest.name, "three");

        let tagged = select_snapshot(&list, &SnapshotSelector::Tag("v1".into())).unwrap();
        assert_eq!(tagged.name, "three");

        let before = select_snapshot(&list, &SnapshotSelector::Before(t)).unwrap();
        assert_eq!(before.name, "two");

        let earlier = SnapshotSelector::Before(t - chrono::Duration::hours(3));
        let none = select_snapshot(&list, &earlier);
        assert!(none.is_none());
        assert!(select_snapshot(&list, &SnapshotSelector::Tag("v9".into())).is_none());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("before migration/2"), "before-migration-2");
        assert_eq!(sanitize_component("v1.2_rc"), "v1.2_rc");
    }

    #[test]
    fn test_reserve_dir_appends_suffix() {
        let dir = TempDir::new().unwrap();
        let (first, _) = reserve_dir(dir.path(), "20240810-143022").unwrap();
        let (second, _) = reserve_dir(dir.path(), "20240810-143022").unwrap();
        let (third, _) = reserve_dir(dir.path(), "20240810-143022").unwrap();
        assert_eq!(first, "20240810-143022");
        assert_eq!(second, "20240810-143022-1");
        assert_eq!(third, "20240810-143022-2");
    }

    #[test]
    fn test_subdirectories_skips_files_and_hidden() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join(".staging")).unwrap();
        std::fs::write(dir.path().join("file"), b"x").unwrap();

        assert_eq!(subdirectories(dir.path()).unwrap(), ["a", "b"]);
        assert!(subdirectories(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_dir_guard() {
        let dir = TempDir::new().unwrap();
        let doomed = dir.path().join("doomed");
        std::fs::create_dir(&doomed).unwrap();
        drop(DirGuard::new(doomed.clone()));
        assert!(!doomed.exists());

        let kept = dir.path().join("kept");
        std::fs::create_dir(&kept).unwrap();
        DirGuard::new(kept.clone()).keep();
        assert!(kept.exists());
    }
}
