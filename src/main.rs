use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use nizam::{
    Compression, CreateOptions, DockerCli, InstallOptions, NizamConfig, PackDependency,
    PruneOptions, RestoreOptions, SearchQuery, SeedPackOptions, SeedService, SnapshotConfig,
    SnapshotError, SnapshotSelector, SnapshotService, DEFAULT_CONFIG_FILE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nizam")]
#[command(about = "Snapshots and seed packs for local development databases", long_about = None)]
#[command(version)]
struct Args {
    /// Service configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Snapshot root directory
    #[arg(long, default_value = ".nizam/snapshots")]
    snapshot_dir: PathBuf,

    /// Seed pack root directory
    #[arg(long, default_value = ".nizam/seeds")]
    seeds_dir: PathBuf,

    /// Deadline for create, restore and install (e.g. "10m", "1h 30m")
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, list, restore and prune snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Build, search and install seed packs
    #[command(subcommand)]
    Pack(PackCommand),
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Dump a service into a new snapshot
    Create {
        service: String,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// zstd, gzip or none
        #[arg(long)]
        compress: Option<Compression>,
    },
    /// List snapshots, newest first
    List { service: Option<String> },
    /// Restore a snapshot into a service
    Restore {
        service: String,
        #[arg(long, conflicts_with_all = ["latest", "before"])]
        tag: Option<String>,
        #[arg(long, conflicts_with = "before")]
        latest: bool,
        /// RFC 3339 timestamp, e.g. 2024-08-10T14:30:22Z
        #[arg(long, value_parser = parse_timestamp)]
        before: Option<chrono::DateTime<chrono::Utc>>,
        /// Drop and recreate the database first and tolerate restore errors
        #[arg(long)]
        force: bool,
    },
    /// Keep the newest snapshots and delete the rest
    Prune {
        service: String,
        #[arg(long, default_value_t = 5)]
        keep: usize,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete one snapshot by directory name or tag
    Rm { service: String, snapshot: String },
}

#[derive(ClapArgs, Debug)]
struct PackMetadata {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    display_name: Option<String>,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    version: Option<String>,
    #[arg(long, default_value = "")]
    author: String,
    #[arg(long, default_value = "")]
    license: String,
    #[arg(long, default_value = "")]
    homepage: String,
    #[arg(long, default_value = "")]
    repository: String,
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
    #[arg(long)]
    records: Option<u64>,
    #[arg(long = "use-case")]
    use_cases: Vec<String>,
    /// Seed pack dependency as name[@version], repeatable
    #[arg(long = "depends-on")]
    depends_on: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum PackCommand {
    /// Build a seed pack from a snapshot (latest unless --snapshot is given)
    Create {
        service: String,
        #[arg(long)]
        snapshot: Option<String>,
        #[command(flatten)]
        metadata: PackMetadata,
        #[arg(long)]
        force: bool,
    },
    /// List seed packs
    List { engine: Option<String> },
    /// Search seed packs
    Search {
        query: Option<String>,
        #[arg(long)]
        engine: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        author: Option<String>,
    },
    /// Install a seed pack (name or name@version) into a service
    Install {
        service: String,
        pack: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show a seed pack manifest
    Info { engine: String, pack: String },
    /// Remove a seed pack version, or all versions
    Rm {
        engine: String,
        pack: String,
        #[arg(long)]
        version: Option<String>,
    },
}

fn parse_timestamp(value: &str) -> Result<chrono::DateTime<chrono::Utc>, String> {
    let time = humantime::parse_rfc3339_weak(value).map_err(|e| e.to_string())?;
    Ok(chrono::DateTime::<chrono::Utc>::from(time))
}

fn human_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
}

async fn run_snapshot(
    args: &Args,
    config: SnapshotConfig,
    command: &SnapshotCommand,
) -> Result<()> {
    let service_config = || NizamConfig::load(&args.config);
    let snapshots = SnapshotService::new(config, Arc::new(DockerCli::default()));

    match command {
        SnapshotCommand::Create {
            service,
            tag,
            note,
            compress,
        } => {
            let info = service_config()?.resolve_service(service)?;
            let created = snapshots
                .create(
                    &info,
                    CreateOptions {
                        tag: tag.clone(),
                        note: note.clone(),
                        compression: *compress,
                    },
                )
                .await?;
            println!(
                "{}  {}  {}",
                created.name,
                created.tag(),
                human_size(created.size())
            );
        }
        SnapshotCommand::List { service } => {
            for s in snapshots.list(service.as_deref())? {
                println!(
                    "{:<12} {:<40} {:<24} {:>10}  {}",
                    s.service,
                    s.name,
                    s.tag(),
                    human_size(s.size()),
                    s.manifest.note.as_deref().unwrap_or("")
                );
            }
        }
        SnapshotCommand::Restore {
            service,
            tag,
            latest,
            before,
            force,
        } => {
            let selector = match (tag, before) {
                (Some(tag), _) => SnapshotSelector::Tag(tag.clone()),
                (None, Some(before)) => SnapshotSelector::Before(*before),
                (None, None) => {
                    if !latest {
                        info!("No selector given, restoring the latest snapshot");
                    }
                    SnapshotSelector::Latest
                }
            };
            let info = service_config()?.resolve_service(service)?;
            let restored = snapshots
                .restore(
                    &info,
                    RestoreOptions {
                        selector,
                        force: *force,
                    },
                )
                .await?;
            println!("Restored {} from {}", service, restored.name);
        }
        SnapshotCommand::Prune {
            service,
            keep,
            dry_run,
        } => {
            let report = snapshots.prune(
                service,
                PruneOptions {
                    keep: *keep,
                    dry_run: *dry_run,
                },
            )?;
            let verb = if report.dry_run { "Would remove" } else { "Removed" };
            for name in &report.removed {
                println!("{} {}", verb, name);
            }
            println!("Kept {} snapshot(s)", report.kept.len());
        }
        SnapshotCommand::Rm { service, snapshot } => {
            let removed = snapshots.remove(service, snapshot)?;
            println!("Removed {}", removed.name);
        }
    }
    Ok(())
}

fn parse_dependency(value: &str) -> Result<PackDependency> {
    let (name, version) = nizam::parse_pack_ref(value)?;
    Ok(PackDependency {
        name,
        kind: "seedpack".to_string(),
        version: version.unwrap_or_default(),
        optional: false,
    })
}

async fn run_pack(args: &Args, config: SnapshotConfig, command: &PackCommand) -> Result<()> {
    let seeds = SeedService::new(config, Arc::new(DockerCli::default()));

    match command {
        PackCommand::Create {
            service,
            snapshot,
            metadata,
            force,
        } => {
            let dependencies = metadata
                .depends_on
                .iter()
                .map(|d| parse_dependency(d))
                .collect::<Result<Vec<_>>>()?;
            let options = SeedPackOptions {
                name: metadata.name.clone(),
                display_name: metadata.display_name.clone(),
                description: metadata.description.clone(),
                version: metadata.version.clone(),
                author: metadata.author.clone(),
                license: metadata.license.clone(),
                homepage: metadata.homepage.clone(),
                repository: metadata.repository.clone(),
                tags: metadata.tags.clone(),
                record_count: metadata.records,
                use_cases: metadata.use_cases.clone(),
                dependencies,
                force: *force,
                ..Default::default()
            };
            let pack = seeds.create(service, snapshot.as_deref(), options).await?;
            println!(
                "Created {}/{}@{} at {}",
                pack.engine,
                pack.name,
                pack.version,
                pack.path.display()
            );
        }
        PackCommand::List { engine } => {
            for pack in seeds.list(engine.as_deref())? {
                println!(
                    "{:<10} {:<28} {:<10} {:>10}  {}",
                    pack.engine,
                    pack.name,
                    pack.version,
                    human_size(pack.manifest.data_size),
                    pack.manifest.description
                );
            }
        }
        PackCommand::Search {
            query,
            engine,
            tags,
            author,
        } => {
            let found = seeds.search(&SearchQuery {
                query: query.clone(),
                engine: engine.clone(),
                tags: tags.clone(),
                author: author.clone(),
            })?;
            for pack in found {
                let tags: Vec<&str> = pack.manifest.tags.iter().map(String::as_str).collect();
                println!("{}/{}@{}  [{}]", pack.engine, pack.name, pack.version, tags.join(", "));
            }
        }
        PackCommand::Install {
            service,
            pack,
            force,
            dry_run,
        } => {
            let info = NizamConfig::load(&args.config)?.resolve_service(service)?;
            let report = seeds
                .install(
                    &info,
                    pack,
                    InstallOptions {
                        force: *force,
                        dry_run: *dry_run,
                    },
                )
                .await?;
            println!("{}", report);
        }
        PackCommand::Info { engine, pack } => {
            let pack = seeds.info(engine, pack)?;
            println!("{}", serde_json::to_string_pretty(&pack.manifest)?);
        }
        PackCommand::Rm {
            engine,
            pack,
            version,
        } => {
            let removed = seeds.remove(engine, pack, version.as_deref())?;
            println!("Removed {} version(s): {}", removed.len(), removed.join(", "));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("nizam={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = SnapshotConfig {
        snapshot_root: args.snapshot_dir.clone(),
        seeds_root: args.seeds_dir.clone(),
        timeout: args.timeout,
        show_progress: atty::is(atty::Stream::Stderr),
        ..SnapshotConfig::default()
    };

    let work = async {
        match &args.command {
            Command::Snapshot(command) => run_snapshot(&args, config, command).await,
            Command::Pack(command) => run_pack(&args, config, command).await,
        }
    };

    // Dropping `work` kills the exec child and removes temporary files.
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            Err(anyhow::Error::new(SnapshotError::CancelledOrTimedOut(
                "interrupted".to_string(),
            ))
            .context("operation aborted, temporary files were removed"))
        }
    }
}
