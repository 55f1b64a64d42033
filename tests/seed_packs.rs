mod common;

use common::{config, sample_data, service, FakeRuntime};
use nizam::{
    CreateOptions, InstallOptions, PackDependency, SearchQuery, SeedPackManifest, SeedPackOptions,
    SeedService, SnapshotError, SnapshotService, README_FILE, SEED_MANIFEST_FILE,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    runtime: Arc<FakeRuntime>,
    snapshots: SnapshotService,
    seeds: SeedService,
    data: Vec<u8>,
}

/// A postgres service `pg` with snapshots tagged `v1` and `v2`.
async fn fixture() -> Fixture {
    let root = TempDir::new().unwrap();
    let data = sample_data(120_000);
    let runtime = FakeRuntime::new(data.clone());
    let snapshots = SnapshotService::new(config(&root), runtime.clone());
    let seeds = SeedService::new(config(&root), runtime.clone());

    let pg = service("pg", "postgres");
    for tag in ["v1", "v2"] {
        snapshots
            .create(
                &pg,
                CreateOptions {
                    tag: Some(tag.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    Fixture {
        _root: root,
        runtime,
        snapshots,
        seeds,
        data,
    }
}

fn pack(name: &str, version: &str, tags: &[&str]) -> SeedPackOptions {
    SeedPackOptions {
        name: Some(name.to_string()),
        version: Some(version.to_string()),
        description: format!("{} sample data", name),
        author: "data-team".to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_pack_from_snapshot() {
    let f = fixture().await;
    let created = f
        .seeds
        .create("pg", Some("v1"), pack("ecommerce", "1.0.0", &["ecommerce", "demo"]))
        .await
        .unwrap();

    assert_eq!(created.engine, "postgres");
    assert!(created.path.ends_with("postgres/ecommerce/1.0.0"));
    assert!(created.path.join(README_FILE).exists());

    let manifest =
        SeedPackManifest::load_from_file(&created.path.join(SEED_MANIFEST_FILE)).unwrap();
    assert_eq!(manifest, created.manifest);
    assert_eq!(manifest.source_snapshot.tag, "v1");
    assert_eq!(manifest.source_snapshot.service, "pg");
    assert_eq!(manifest.display_name, "ecommerce");

    let data_file = &manifest.snapshot.files[0];
    let copied = std::fs::metadata(created.path.join(&data_file.name)).unwrap();
    assert_eq!(copied.len(), data_file.size);
    assert_eq!(manifest.data_size, data_file.size);

    let leftovers: Vec<_> = std::fs::read_dir(created.path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_create_defaults_to_latest_snapshot_and_service_name() {
    let f = fixture().await;
    let created = f.seeds.create("pg", None, SeedPackOptions::default()).await.unwrap();
    assert_eq!(created.name, "pg");
    assert_eq!(created.version, "1.0.0");
    assert_eq!(created.manifest.source_snapshot.tag, "v2");

    assert!(matches!(
        f.seeds.create("pg", Some("missing"), SeedPackOptions::default()).await,
        Err(SnapshotError::SnapshotNotFound(_))
    ));
    assert!(matches!(
        f.seeds.create("nobody", None, SeedPackOptions::default()).await,
        Err(SnapshotError::SnapshotNotFound(_))
    ));
}

#[tokio::test]
async fn test_existing_version_needs_force() {
    let f = fixture().await;
    f.seeds.create("pg", Some("v1"), pack("shop", "1.0.0", &[])).await.unwrap();

    let err = f
        .seeds
        .create("pg", Some("v2"), pack("shop", "1.0.0", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::PackAlreadyExists(_)));

    let replaced = f
        .seeds
        .create(
            "pg",
            Some("v2"),
            SeedPackOptions {
                force: true,
                ..pack("shop", "1.0.0", &[])
            },
        )
        .await
        .unwrap();
    assert_eq!(replaced.manifest.source_snapshot.tag, "v2");
    assert_eq!(f.seeds.list(Some("postgres")).unwrap().len(), 1);
}

#[tokio::test]
async fn test_pack_from_corrupted_snapshot_is_refused() {
    let f = fixture().await;
    let snapshot = f.snapshots.list(Some("pg")).unwrap().remove(0);
    let data_file = snapshot.path.join(&snapshot.manifest.files[0].name);
    let mut bytes = std::fs::read(&data_file).unwrap();
    bytes[0] ^= 0x01;
    std::fs::write(&data_file, bytes).unwrap();

    let err = f
        .seeds
        .create("pg", None, pack("broken", "1.0.0", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::ChecksumMismatch { .. }));
    assert!(f.seeds.list(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_search_by_text_tags_and_author() {
    let f = fixture().await;
    f.seeds
        .create("pg", Some("v1"), pack("ecommerce", "1.0.0", &["ecommerce", "demo"]))
        .await
        .unwrap();
    f.seeds
        .create("pg", Some("v2"), pack("blog", "1.0.0", &["cms", "demo"]))
        .await
        .unwrap();

    let demo = f
        .seeds
        .search(&SearchQuery {
            tags: vec!["demo".to_string()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(demo.len(), 2);

    let shop = f
        .seeds
        .search(&SearchQuery {
            tags: vec!["ecommerce".to_string(), "demo".to_string()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(shop.len(), 1);
    assert_eq!(shop[0].name, "ecommerce");

    let text = f
        .seeds
        .search(&SearchQuery {
            query: Some("BLOG sample".to_string()),
            engine: Some("postgresql".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(text.len(), 1);
    assert_eq!(text[0].name, "blog");

    let nobody = f
        .seeds
        .search(&SearchQuery {
            author: Some("someone-else".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(nobody.is_empty());

    let other_engine = f
        .seeds
        .search(&SearchQuery {
            engine: Some("redis".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(other_engine.is_empty());
}

#[tokio::test]
async fn test_version_resolution() {
    let f = fixture().await;
    for version in ["1.0.0", "1.10.0", "1.2.0"] {
        f.seeds.create("pg", None, pack("shop", version, &[])).await.unwrap();
    }

    assert_eq!(f.seeds.info("postgres", "shop").unwrap().version, "1.10.0");
    assert_eq!(f.seeds.info("pg", "shop@1.2.0").unwrap().version, "1.2.0");

    let versions: Vec<String> = f
        .seeds
        .list(Some("postgres"))
        .unwrap()
        .into_iter()
        .map(|p| p.version)
        .collect();
    assert_eq!(versions, ["1.10.0", "1.2.0", "1.0.0"]);

    assert!(matches!(
        f.seeds.info("postgres", "shop@2.0.0"),
        Err(SnapshotError::VersionNotFound { ref version, .. }) if version == "2.0.0"
    ));
    assert!(matches!(
        f.seeds.info("postgres", "unknown"),
        Err(SnapshotError::PackNotFound(_))
    ));
}

#[tokio::test]
async fn test_install_dry_run_does_not_restore() {
    let f = fixture().await;
    f.seeds.create("pg", Some("v1"), pack("ecommerce", "1.0.0", &[])).await.unwrap();

    let report = f
        .seeds
        .install(
            &service("target", "postgres"),
            "ecommerce",
            InstallOptions {
                force: false,
                dry_run: true,
            },
        )
        .await
        .unwrap();

    assert!(report.dry_run);
    assert!(!report.restored);
    assert_eq!(report.version, "1.0.0");
    assert!(report.to_string().starts_with("Would install"));
    assert!(f.runtime.restored().is_none());
    assert!(!f.runtime.ran("pg_restore"));
}

#[tokio::test]
async fn test_install_restores_pack_data() {
    let f = fixture().await;
    f.seeds.create("pg", Some("v1"), pack("ecommerce", "1.0.0", &[])).await.unwrap();

    let report = f
        .seeds
        .install(
            &service("target", "postgres"),
            "ecommerce@1.0.0",
            InstallOptions::default(),
        )
        .await
        .unwrap();

    assert!(report.restored);
    assert_eq!(report.service, "target");
    assert_eq!(f.runtime.restored().as_deref(), Some(f.data.as_slice()));
}

#[tokio::test]
async fn test_install_into_other_engine_finds_nothing() {
    let f = fixture().await;
    f.seeds.create("pg", Some("v1"), pack("ecommerce", "1.0.0", &[])).await.unwrap();

    let err = f
        .seeds
        .install(&service("cache", "redis"), "ecommerce", InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::PackNotFound(_)));
}

#[tokio::test]
async fn test_mysql_pack_installs_into_mariadb() {
    let f = fixture().await;
    let my = service("my", "mysql");
    f.snapshots.create(&my, CreateOptions::default()).await.unwrap();
    f.seeds.create("my", None, pack("shop", "1.0.0", &[])).await.unwrap();

    let maria = service("maria", "mariadb");
    let report = f
        .seeds
        .install(&maria, "shop@1.0.0", InstallOptions::default())
        .await
        .unwrap();
    assert!(report.restored);
    assert_eq!(report.engine, "mysql");
    assert_eq!(f.runtime.restored().as_deref(), Some(f.data.as_slice()));

    let err = f
        .seeds
        .install(&maria, "shop@2.0.0", InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::VersionNotFound { .. }));
}

#[tokio::test]
async fn test_install_checks_seedpack_dependencies() {
    let f = fixture().await;
    f.seeds
        .create(
            "pg",
            Some("v2"),
            SeedPackOptions {
                dependencies: vec![
                    PackDependency {
                        name: "base".to_string(),
                        kind: "seedpack".to_string(),
                        version: "1.0.0".to_string(),
                        optional: false,
                    },
                    PackDependency {
                        name: "postgis".to_string(),
                        kind: "extension".to_string(),
                        version: String::new(),
                        optional: false,
                    },
                ],
                ..pack("orders", "1.0.0", &[])
            },
        )
        .await
        .unwrap();
    let target = service("target", "postgres");

    let err = f
        .seeds
        .install(&target, "orders", InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::DependencyUnsatisfied(_)));
    assert!(f.runtime.restored().is_none());

    let forced = f
        .seeds
        .install(
            &target,
            "orders",
            InstallOptions {
                force: true,
                dry_run: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.skipped_dependencies.len(), 2);

    f.seeds.create("pg", Some("v1"), pack("base", "1.0.0", &[])).await.unwrap();
    let report = f
        .seeds
        .install(&target, "orders", InstallOptions::default())
        .await
        .unwrap();
    assert!(report.restored);
    assert_eq!(report.skipped_dependencies, ["postgis (extension)"]);
}

#[tokio::test]
async fn test_remove_versions() {
    let f = fixture().await;
    f.seeds.create("pg", None, pack("shop", "1.0.0", &[])).await.unwrap();
    f.seeds.create("pg", None, pack("shop", "1.1.0", &[])).await.unwrap();
    f.seeds.create("pg", None, pack("blog", "0.1.0", &[])).await.unwrap();

    assert_eq!(f.seeds.remove("postgres", "shop@1.0.0", None).unwrap(), ["1.0.0"]);
    assert_eq!(f.seeds.info("postgres", "shop").unwrap().version, "1.1.0");

    assert!(matches!(
        f.seeds.remove("postgres", "shop", Some("9.9.9")),
        Err(SnapshotError::VersionNotFound { .. })
    ));

    assert_eq!(f.seeds.remove("postgres", "blog", None).unwrap(), ["0.1.0"]);
    assert!(matches!(
        f.seeds.remove("postgres", "blog", None),
        Err(SnapshotError::PackNotFound(_))
    ));
    assert_eq!(f.seeds.list(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_pack_names_are_rejected() {
    let f = fixture().await;
    for name in ["../escape", "a/b", ""] {
        let err = f
            .seeds
            .create(
                "pg",
                None,
                SeedPackOptions {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::ConfigError(_)), "{:?}", name);
    }
}

#[tokio::test]
async fn test_starter_pack_search_and_dry_run_install() {
    let f = fixture().await;
    f.seeds
        .create(
            "pg",
            Some("v1"),
            pack("ecommerce-starter", "1.0.0", &["ecommerce", "starter", "demo"]),
        )
        .await
        .unwrap();
    f.seeds
        .create("pg", Some("v2"), pack("blog-content", "1.0.0", &["blog", "cms"]))
        .await
        .unwrap();

    let found = f
        .seeds
        .search(&SearchQuery {
            tags: vec!["ecommerce".to_string(), "starter".to_string()],
            engine: Some("postgres".to_string()),
            ..Default::default()
        })
        .unwrap();
    let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["ecommerce-starter"]);

    let report = f
        .seeds
        .install(
            &service("postgres-svc", "postgres"),
            "ecommerce-starter@1.0.0",
            InstallOptions {
                force: false,
                dry_run: true,
            },
        )
        .await
        .unwrap();
    assert!(!report.restored);
    assert!(report.to_string().contains("ecommerce-starter@1.0.0"));
    assert!(report.to_string().contains("postgres-svc"));
    assert!(f.runtime.restored().is_none());
}
