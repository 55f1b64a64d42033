//! Seed packs: named, versioned, annotated snapshots for redistribution.
//!
//! Packs live at `<seeds_root>/<engine>/<name>/<version>/` next to a
//! `seedpack.json` and a generated `README.md`. A pack version is assembled in
//! a hidden staging directory and renamed into place, so a version directory
//! is either complete or absent.

use crate::compress::{atomic_copy, atomic_write, verify_sha256};
use crate::engine::{Engine, EngineKind};
use crate::error::SnapshotError;
use crate::manifest::Manifest;
use crate::pipeline::{with_timeout, StreamSettings};
use crate::runtime::ContainerRuntime;
use crate::snapshot::{select_snapshot, subdirectories, DirGuard, SnapshotService};
use crate::types::{ServiceInfo, SnapshotConfig, SnapshotSelector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File name of the pack manifest inside a version directory.
pub const SEED_MANIFEST_FILE: &str = "seedpack.json";
pub const README_FILE: &str = "README.md";
const DEFAULT_VERSION: &str = "1.0.0";
const SEEDPACK_DEPENDENCY: &str = "seedpack";

/// Example query shipped with a pack.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PackExample {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub query: String,
    #[serde(default)]
    pub expected: String,
}

/// Something a pack needs in place before it is installed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackDependency {
    pub name: String,
    /// `seedpack` dependencies are checked against installed packs.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub optional: bool,
}

/// The snapshot a pack was built from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub service: String,
    pub engine: String,
    pub created_at: DateTime<Utc>,
    pub tag: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Descriptive schema; never checked against the data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PackSchema {
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

/// Snapshot manifest plus distribution metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedPackManifest {
    #[serde(flatten)]
    pub snapshot: Manifest,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub data_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub examples: Vec<PackExample>,
    #[serde(default)]
    pub dependencies: Vec<PackDependency>,
    pub source_snapshot: SourceSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<PackSchema>,
}

impl SeedPackManifest {
    pub fn validate(&self) -> Result<(), SnapshotError> {
        self.snapshot.validate()?;
        validate_component("pack name", &self.name)
            .and_then(|_| validate_component("pack version", &self.version))
            .map_err(|e| SnapshotError::ManifestInvalid(e.to_string()))
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(path, json.as_bytes())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: SeedPackManifest = serde_json::from_str(&content).map_err(|e| {
            SnapshotError::ManifestInvalid(format!("{}: {}", path.display(), e))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Markdown description written next to the pack data.
    pub fn render_readme(&self) -> String {
        let mut out = String::new();
        let title = if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        };
        let _ = writeln!(out, "# {}\n", title);
        if !self.description.is_empty() {
            let _ = writeln!(out, "{}\n", self.description);
        }

        let _ = writeln!(out, "- **Pack:** `{}@{}`", self.name, self.version);
        let _ = writeln!(out, "- **Engine:** {}", self.snapshot.engine);
        if !self.author.is_empty() {
            let _ = writeln!(out, "- **Author:** {}", self.author);
        }
        if !self.license.is_empty() {
            let _ = writeln!(out, "- **License:** {}", self.license);
        }
        if !self.homepage.is_empty() {
            let _ = writeln!(out, "- **Homepage:** {}", self.homepage);
        }
        if !self.repository.is_empty() {
            let _ = writeln!(out, "- **Repository:** {}", self.repository);
        }
        let _ = writeln!(out, "- **Data size:** {} bytes", self.data_size);
        if let Some(count) = self.record_count {
            let _ = writeln!(out, "- **Records:** {}", count);
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            let _ = writeln!(out, "- **Tags:** {}", tags.join(", "));
        }

        if !self.use_cases.is_empty() {
            let _ = writeln!(out, "\n## Use cases\n");
            for use_case in &self.use_cases {
                let _ = writeln!(out, "- {}", use_case);
            }
        }

        if !self.examples.is_empty() {
            let _ = writeln!(out, "\n## Examples");
            for example in &self.examples {
                let _ = writeln!(out, "\n### {}\n", example.title);
                if !example.description.is_empty() {
                    let _ = writeln!(out, "{}\n", example.description);
                }
                let _ = writeln!(out, "```\n{}\n```", example.query);
                if !example.expected.is_empty() {
                    let _ = writeln!(out, "\nExpected: {}", example.expected);
                }
            }
        }

        if !self.dependencies.is_empty() {
            let _ = writeln!(out, "\n## Dependencies\n");
            for dep in &self.dependencies {
                let version = if dep.version.is_empty() { "*" } else { &dep.version };
                let optional = if dep.optional { " (optional)" } else { "" };
                let _ = writeln!(out, "- {} `{}` {}{}", dep.kind, dep.name, version, optional);
            }
        }

        if let Some(schema) = &self.schema {
            let _ = writeln!(out, "\n## Schema\n");
            for table in &schema.tables {
                let columns: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type))
                    .collect();
                let _ = writeln!(out, "- `{}`: {}", table.name, columns.join(", "));
            }
        }

        let _ = writeln!(
            out,
            "\n---\nBuilt from snapshot `{}` of service `{}` taken {}.",
            self.source_snapshot.tag,
            self.source_snapshot.service,
            self.source_snapshot.created_at.to_rfc3339()
        );
        out
    }
}

/// Metadata supplied when building a pack.
#[derive(Debug, Clone, Default)]
pub struct SeedPackOptions {
    /// Defaults to the service name.
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: String,
    /// Defaults to `1.0.0`.
    pub version: Option<String>,
    pub author: String,
    pub license: String,
    pub homepage: String,
    pub repository: String,
    pub tags: Vec<String>,
    pub record_count: Option<u64>,
    pub use_cases: Vec<String>,
    pub examples: Vec<PackExample>,
    pub dependencies: Vec<PackDependency>,
    pub schema: Option<PackSchema>,
    /// Replace an existing pack with the same name and version.
    pub force: bool,
}

/// One pack version found on disk.
#[derive(Debug, Clone)]
pub struct PackInfo {
    pub engine: String,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub manifest: SeedPackManifest,
}

/// Filters for [`SeedService::search`]; all given filters must match.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Case-insensitive substring of name, display name or description.
    pub query: Option<String>,
    pub engine: Option<String>,
    /// Every tag must be present on the pack.
    pub tags: Vec<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Recreate the target database and ignore missing dependencies.
    pub force: bool,
    /// Resolve everything but stop before the restore.
    pub dry_run: bool,
}

/// What an install did, or would do under `dry_run`.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub pack: String,
    pub version: String,
    pub engine: String,
    pub service: String,
    pub data_file: PathBuf,
    pub dry_run: bool,
    pub restored: bool,
    /// Dependencies that could not be checked or were missing but tolerated.
    pub skipped_dependencies: Vec<String>,
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "Would install" } else { "Installed" };
        write!(
            f,
            "{} seed pack {}@{} ({}) into service {} from {}",
            verb,
            self.pack,
            self.version,
            self.engine,
            self.service,
            self.data_file.display()
        )?;
        if !self.skipped_dependencies.is_empty() {
            write!(f, "; unchecked dependencies: {}", self.skipped_dependencies.join(", "))?;
        }
        Ok(())
    }
}

/// Splits `name` or `name@version`.
pub fn parse_pack_ref(pack_ref: &str) -> Result<(String, Option<String>), SnapshotError> {
    let (name, version) = match pack_ref.split_once('@') {
        Some((name, version)) => (name.trim(), Some(version.trim())),
        None => (pack_ref.trim(), None),
    };
    validate_component("pack name", name)?;
    if let Some(version) = version {
        validate_component("pack version", version)?;
    }
    Ok((name.to_string(), version.map(str::to_string)))
}

fn validate_component(what: &str, value: &str) -> Result<(), SnapshotError> {
    if value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\', '@'])
        || value.chars().any(char::is_whitespace)
    {
        return Err(SnapshotError::ConfigError(format!("invalid {}: '{}'", what, value)));
    }
    Ok(())
}

/// Orders versions component-wise, numerically where both sides are numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.trim_start_matches('v').split(['.', '-', '+']).collect();
    let b_parts: Vec<&str> = b.trim_start_matches('v').split(['.', '-', '+']).collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let ordering = match (a_parts.get(i), b_parts.get(i)) {
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            },
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn canonical_engine(engine: &str) -> String {
    EngineKind::resolve(engine)
        .map(|kind| kind.as_str().to_string())
        .unwrap_or_else(|_| engine.to_ascii_lowercase())
}

/// Builds, lists, searches, installs and removes seed packs.
pub struct SeedService {
    config: SnapshotConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl SeedService {
    pub fn new(config: SnapshotConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { config, runtime }
    }

    fn pack_dir(&self, engine: &str, name: &str) -> PathBuf {
        self.config.seeds_root.join(engine).join(name)
    }

    /// Builds a pack from a snapshot of `service` (the latest when `snapshot_tag` is `None`).
    ///
    /// Checksums and copies run on blocking threads; dropping the future
    /// removes the staging directory.
    pub async fn create(
        &self,
        service: &str,
        snapshot_tag: Option<&str>,
        options: SeedPackOptions,
    ) -> Result<PackInfo, SnapshotError> {
        let snapshots =
            SnapshotService::new(self.config.clone(), self.runtime.clone()).list(Some(service))?;
        let selector = match snapshot_tag {
            Some(tag) => SnapshotSelector::Tag(tag.to_string()),
            None => SnapshotSelector::Latest,
        };
        let source = select_snapshot(&snapshots, &selector).ok_or_else(|| {
            SnapshotError::SnapshotNotFound(match snapshot_tag {
                Some(tag) => format!("{} has no snapshot tagged '{}'", service, tag),
                None => format!("{} has no snapshots", service),
            })
        })?;

        let name = options.name.clone().unwrap_or_else(|| service.to_string());
        let version = options
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        validate_component("pack name", &name)?;
        validate_component("pack version", &version)?;

        let engine = EngineKind::resolve(&source.manifest.engine)?.as_str().to_string();
        let name_dir = self.pack_dir(&engine, &name);
        let version_dir = name_dir.join(&version);
        let pack_id = format!("{}/{}@{}", engine, name, version);
        if version_dir.exists() && !options.force {
            return Err(SnapshotError::PackAlreadyExists(pack_id));
        }

        std::fs::create_dir_all(&name_dir)?;
        let staging_dir = name_dir.join(format!(".{}.partial-{}", version, std::process::id()));
        if staging_dir.exists() {
            std::fs::remove_dir_all(&staging_dir)?;
        }
        std::fs::create_dir(&staging_dir)?;
        let staging = DirGuard::new(staging_dir.clone());

        info!(
            "Building seed pack {} from snapshot {} of {}",
            pack_id, source.name, service
        );
        let mut data_size = 0;
        for file in &source.manifest.files {
            let src = source.path.join(&file.name);
            verify_sha256(&src, &file.sha256).await?;
            let dst = staging_dir.join(&file.name);
            data_size += tokio::task::spawn_blocking(move || atomic_copy(&src, &dst))
                .await
                .map_err(SnapshotError::task_join)??;
        }

        let mut snapshot = source.manifest.clone();
        snapshot.tool_version = self.config.tool_version.clone();
        let manifest = SeedPackManifest {
            source_snapshot: SourceSnapshot {
                service: source.manifest.service.clone(),
                engine: source.manifest.engine.clone(),
                created_at: source.manifest.created_at,
                tag: source.manifest.tag.clone(),
            },
            snapshot,
            display_name: options.display_name.unwrap_or_else(|| name.clone()),
            name: name.clone(),
            description: options.description,
            version: version.clone(),
            author: options.author,
            license: options.license,
            homepage: options.homepage,
            repository: options.repository,
            tags: options
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            data_size,
            record_count: options.record_count,
            use_cases: options.use_cases,
            examples: options.examples,
            dependencies: options.dependencies,
            schema: options.schema,
        };
        manifest.validate()?;

        atomic_write(&staging_dir.join(README_FILE), manifest.render_readme().as_bytes())?;
        manifest.write_to_file(&staging_dir.join(SEED_MANIFEST_FILE))?;

        if version_dir.exists() {
            warn!("Replacing existing seed pack {} (force)", pack_id);
            std::fs::remove_dir_all(&version_dir)?;
        }
        std::fs::rename(&staging_dir, &version_dir)?;
        staging.keep();

        info!("✅ Seed pack {} created at {}", pack_id, version_dir.display());
        Ok(PackInfo {
            engine,
            name,
            version,
            path: version_dir,
            manifest,
        })
    }

    /// Lists installed packs, sorted by engine and name with newest versions first.
    pub fn list(&self, engine: Option<&str>) -> Result<Vec<PackInfo>, SnapshotError> {
        let engines = match engine {
            Some(engine) => vec![canonical_engine(engine)],
            None => subdirectories(&self.config.seeds_root)?,
        };

        let mut packs = Vec::new();
        for engine in engines {
            let engine_dir = self.config.seeds_root.join(&engine);
            for name in subdirectories(&engine_dir)? {
                let name_dir = engine_dir.join(&name);
                for version in subdirectories(&name_dir)? {
                    let path = name_dir.join(&version);
                    match SeedPackManifest::load_from_file(&path.join(SEED_MANIFEST_FILE)) {
                        Ok(manifest) => packs.push(PackInfo {
                            engine: engine.clone(),
                            name: name.clone(),
                            version,
                            path,
                            manifest,
                        }),
                        Err(e) => debug!("Skipping {}: {}", path.display(), e),
                    }
                }
            }
        }

        packs.sort_by(|a, b| {
            a.engine
                .cmp(&b.engine)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| compare_versions(&b.version, &a.version))
        });
        Ok(packs)
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<PackInfo>, SnapshotError> {
        let needle = query
            .query
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        let engine = query.engine.as_deref().map(canonical_engine);

        let packs = self.list(engine.as_deref())?;
        Ok(packs
            .into_iter()
            .filter(|pack| {
                let m = &pack.manifest;
                let text_match = needle.as_ref().map_or(true, |needle| {
                    m.name.to_lowercase().contains(needle)
                        || m.display_name.to_lowercase().contains(needle)
                        || m.description.to_lowercase().contains(needle)
                });
                let tags_match = query.tags.iter().all(|t| m.tags.contains(t));
                let author_match = query.author.as_ref().map_or(true, |a| &m.author == a);
                text_match && tags_match && author_match
            })
            .collect())
    }

    /// Resolves `name` or `name@version` (newest version when omitted).
    pub fn info(&self, engine: &str, pack_ref: &str) -> Result<PackInfo, SnapshotError> {
        let (name, version) = parse_pack_ref(pack_ref)?;
        self.resolve(&canonical_engine(engine), &name, version.as_deref())
    }

    fn resolve(
        &self,
        engine: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<PackInfo, SnapshotError> {
        let mut versions = self
            .list(Some(engine))?
            .into_iter()
            .filter(|p| p.name == name)
            .peekable();
        if versions.peek().is_none() {
            return Err(SnapshotError::PackNotFound(format!("{}/{}", engine, name)));
        }

        // `list` orders versions newest first.
        let found = match version {
            None => versions.next(),
            Some(version) => versions.find(|p| p.version == version),
        };
        found.ok_or_else(|| SnapshotError::VersionNotFound {
            pack: format!("{}/{}", engine, name),
            version: version.unwrap_or_default().to_string(),
        })
    }

    /// Checks declared dependencies. Returns the ones that were not enforced.
    fn check_dependencies(
        &self,
        engine: &str,
        manifest: &SeedPackManifest,
        force: bool,
    ) -> Result<Vec<String>, SnapshotError> {
        let mut skipped = Vec::new();
        for dep in &manifest.dependencies {
            let label = if dep.version.is_empty() {
                dep.name.clone()
            } else {
                format!("{}@{}", dep.name, dep.version)
            };

            if dep.kind != SEEDPACK_DEPENDENCY {
                debug!("Cannot verify {} dependency {}", dep.kind, label);
                skipped.push(format!("{} ({})", label, dep.kind));
                continue;
            }

            let wanted = match dep.version.as_str() {
                "" | "*" => None,
                v => Some(v),
            };
            if self.resolve(engine, &dep.name, wanted).is_ok() {
                continue;
            }
            if dep.optional {
                info!("Optional dependency {} is not installed", label);
                skipped.push(label);
            } else if force {
                warn!("Required dependency {} is missing, continuing because of force", label);
                skipped.push(label);
            } else {
                return Err(SnapshotError::DependencyUnsatisfied(format!(
                    "{}@{} requires seed pack {}",
                    manifest.name, manifest.version, label
                )));
            }
        }
        Ok(skipped)
    }

    /// Finds a pack for a `kind` service, searching its own engine tree before
    /// the trees of compatible engines.
    fn resolve_for(
        &self,
        kind: EngineKind,
        name: &str,
        version: Option<&str>,
    ) -> Result<PackInfo, SnapshotError> {
        let mut missing: Option<SnapshotError> = None;
        for candidate in kind.restorable_from() {
            match self.resolve(candidate.as_str(), name, version) {
                Ok(pack) => return Ok(pack),
                Err(SnapshotError::PackNotFound(_)) if missing.is_some() => {}
                Err(e @ SnapshotError::PackNotFound(_)) => missing = Some(e),
                // A missing version says more than a missing pack.
                Err(e @ SnapshotError::VersionNotFound { .. }) => {
                    if !matches!(missing, Some(SnapshotError::VersionNotFound { .. })) {
                        missing = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(missing.unwrap_or_else(|| {
            SnapshotError::PackNotFound(format!("{}/{}", kind.as_str(), name))
        }))
    }

    /// Loads a pack into `service`. Packs built from a compatible engine are
    /// accepted, e.g. a mysql pack installs into mariadb.
    pub async fn install(
        &self,
        service: &ServiceInfo,
        pack_ref: &str,
        options: InstallOptions,
    ) -> Result<InstallReport, SnapshotError> {
        let kind = EngineKind::resolve(&service.engine)?;
        let (name, version) = parse_pack_ref(pack_ref)?;
        let pack = self.resolve_for(kind, &name, version.as_deref())?;
        let skipped = self.check_dependencies(&pack.engine, &pack.manifest, options.force)?;

        let data_file = pack.path.join(&pack.manifest.snapshot.main_file()?.name);
        let mut report = InstallReport {
            pack: pack.name.clone(),
            version: pack.version.clone(),
            engine: pack.engine.clone(),
            service: service.name.clone(),
            data_file,
            dry_run: options.dry_run,
            restored: false,
            skipped_dependencies: skipped,
        };

        if options.dry_run {
            verify_sha256(&report.data_file, &pack.manifest.snapshot.main_file()?.sha256).await?;
            info!("{}", report);
            return Ok(report);
        }

        let settings = StreamSettings::from(&self.config);
        let engine = Engine::for_kind(kind, self.runtime.clone(), settings);
        with_timeout(
            self.config.timeout,
            "seed pack install",
            engine.restore(service, &pack.path, &pack.manifest.snapshot, options.force),
        )
        .await?;

        report.restored = true;
        info!("✅ {}", report);
        Ok(report)
    }

    /// Deletes one version, or every version when none is given.
    pub fn remove(
        &self,
        engine: &str,
        pack_ref: &str,
        version: Option<&str>,
    ) -> Result<Vec<String>, SnapshotError> {
        let engine = canonical_engine(engine);
        let (name, ref_version) = parse_pack_ref(pack_ref)?;
        let version = version.map(str::to_string).or(ref_version);
        let name_dir = self.pack_dir(&engine, &name);
        if !name_dir.is_dir() {
            return Err(SnapshotError::PackNotFound(format!("{}/{}", engine, name)));
        }

        let removed = match version {
            Some(version) => {
                validate_component("pack version", &version)?;
                let version_dir = name_dir.join(&version);
                if !version_dir.is_dir() {
                    return Err(SnapshotError::VersionNotFound {
                        pack: format!("{}/{}", engine, name),
                        version,
                    });
                }
                std::fs::remove_dir_all(&version_dir)?;
                if subdirectories(&name_dir)?.is_empty() {
                    std::fs::remove_dir_all(&name_dir)?;
                }
                vec![version]
            }
            None => {
                let versions = subdirectories(&name_dir)?;
                std::fs::remove_dir_all(&name_dir)?;
                versions
            }
        };

        info!("Removed seed pack {}/{} ({})", engine, name, removed.join(", "));
        Ok(removed)
    }
}
