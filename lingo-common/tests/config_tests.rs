//! Root folder resolution and initialization
//!
//! Tests that touch LINGO_ROOT_FOLDER or LINGO_ROOT run under #[serial] so
//! they never observe each other's environment.

use lingo_common::config::{CompiledDefaults, RootFolderInitializer, RootFolderResolver, TomlConfig};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

fn clear_env() {
    env::remove_var("LINGO_ROOT_FOLDER");
    env::remove_var("LINGO_ROOT");
}

#[test]
fn test_compiled_defaults_are_usable() {
    let defaults = CompiledDefaults::for_current_platform();
    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert!(defaults.root_folder.to_string_lossy().contains("lingo"));
    assert_eq!(defaults.log_level, "info");
}

#[test]
#[serial]
fn test_resolver_without_overrides_uses_default() {
    clear_env();
    let resolved = RootFolderResolver::new().resolve();
    assert_eq!(resolved, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var("LINGO_ROOT_FOLDER", "/env/primary");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/toml/root")),
        ..TomlConfig::default()
    };
    let resolved = RootFolderResolver::new()
        .with_cli_arg(Some(PathBuf::from("/cli/root")))
        .with_toml(&config)
        .resolve();
    assert_eq!(resolved, PathBuf::from("/cli/root"));
    clear_env();
}

#[test]
#[serial]
fn test_env_priority_over_toml() {
    clear_env();
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/toml/root")),
        ..TomlConfig::default()
    };

    env::set_var("LINGO_ROOT", "/env/fallback");
    assert_eq!(
        RootFolderResolver::new().with_toml(&config).resolve(),
        PathBuf::from("/env/fallback")
    );

    env::set_var("LINGO_ROOT_FOLDER", "/env/primary");
    assert_eq!(
        RootFolderResolver::new().with_toml(&config).resolve(),
        PathBuf::from("/env/primary")
    );

    clear_env();
    assert_eq!(
        RootFolderResolver::new().with_toml(&config).resolve(),
        PathBuf::from("/toml/root")
    );
}

#[test]
#[serial]
fn test_blank_env_value_is_ignored() {
    clear_env();
    env::set_var("LINGO_ROOT_FOLDER", "   ");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/toml/root")),
        ..TomlConfig::default()
    };
    assert_eq!(
        RootFolderResolver::new().with_toml(&config).resolve(),
        PathBuf::from("/toml/root")
    );
    clear_env();
}

#[tokio::test]
async fn test_initializer_creates_folder_and_databases() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("nested").join("lingo");
    let init = RootFolderInitializer::new(root.clone());

    init.ensure_directory_exists().unwrap();
    assert!(root.is_dir());
    // Idempotent
    init.ensure_directory_exists().unwrap();

    let config = TomlConfig::default();
    let local = lingo_common::ProjectStore::open(&init.local_database_path())
        .await
        .unwrap();
    let shared = lingo_common::SqliteSharedStore::open(&init.shared_database_path(&config.sync))
        .await
        .unwrap();
    assert!(local.list().await.unwrap().is_empty());
    assert_eq!(
        lingo_common::db::schema_version(shared.pool()).await.unwrap(),
        lingo_common::db::CURRENT_SCHEMA_VERSION
    );
    assert!(root.join("projects.db").exists());
    assert!(root.join("shared.db").exists());
}

#[test]
fn test_load_config_file_from_disk() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        "root_folder = \"/srv/lingo\"\n[sync]\nconflict_policy = \"reject_stale\"\n",
    )
    .unwrap();

    let config = TomlConfig::load(&path).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/lingo")));
    assert_eq!(
        config.sync.conflict_policy,
        lingo_common::ConflictPolicy::RejectStale
    );
}
