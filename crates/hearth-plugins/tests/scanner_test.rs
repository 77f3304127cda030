//! Package scanner tests over temporary search-path trees.

mod common;

use std::path::Path;

use common::{KEYWORD, write_aliased_plugin, write_package, write_plugin};
use hearth_plugins::{PackageScanner, SearchPaths};

fn scanner() -> PackageScanner {
    PackageScanner::new("homebridge-", KEYWORD)
}

#[tokio::test]
async fn test_custom_install_wins_over_global() {
    let custom = tempfile::tempdir().unwrap();
    let global = tempfile::tempdir().unwrap();
    write_plugin(custom.path(), "homebridge-foo", "1.0.0");
    write_plugin(global.path(), "homebridge-foo", "1.0.0");

    let paths = SearchPaths::new(
        vec![global.path().to_path_buf()],
        Some(custom.path().to_path_buf()),
    );
    let records = scanner().scan(&paths).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "homebridge-foo");
    assert_eq!(records[0].install_path.as_deref(), Some(custom.path()));
    assert!(!records[0].is_global_install);
}

#[tokio::test]
async fn test_earlier_global_path_wins() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write_plugin(first.path(), "homebridge-foo", "2.0.0");
    write_plugin(second.path(), "homebridge-foo", "1.0.0");

    let paths = SearchPaths::new(
        vec![first.path().to_path_buf(), second.path().to_path_buf()],
        None,
    );
    let records = scanner().scan(&paths).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].installed_version.as_deref(), Some("2.0.0"));
    assert!(records[0].is_global_install);
}

#[tokio::test]
async fn test_filters_by_prefix_and_keyword() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "homebridge-hue", "0.13.1");
    write_package(root.path(), "homebridge-no-keyword", "1.0.0", &["smart-home"]);
    write_package(root.path(), "left-pad", "1.3.0", &[KEYWORD]);
    write_package(root.path(), "homebridge", "1.8.0", &["homekit"]);

    let paths = SearchPaths::new(vec![root.path().to_path_buf()], None);
    let names: Vec<_> = scanner()
        .scan(&paths)
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();

    assert_eq!(names, vec!["homebridge-hue"]);
}

#[tokio::test]
async fn test_scoped_packages_are_discovered() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "@acme/homebridge-lock", "3.1.0");
    write_package(root.path(), "@acme/utils", "1.0.0", &[KEYWORD]);

    let paths = SearchPaths::new(vec![root.path().to_path_buf()], None);
    let records = scanner().scan(&paths).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "@acme/homebridge-lock");
    assert_eq!(
        records[0].package_dir().as_deref(),
        Some(root.path().join("@acme/homebridge-lock").as_path())
    );
}

#[tokio::test]
async fn test_bad_manifests_are_skipped() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "homebridge-good", "1.0.0");

    let broken = root.path().join("homebridge-broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("package.json"), "{ not json").unwrap();

    std::fs::create_dir_all(root.path().join("homebridge-empty")).unwrap();
    std::fs::write(root.path().join("homebridge-file"), "not a directory").unwrap();

    let paths = SearchPaths::new(vec![root.path().to_path_buf()], None);
    let records = scanner().scan(&paths).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "homebridge-good");
}

#[tokio::test]
async fn test_record_details() {
    let root = tempfile::tempdir().unwrap();
    let dir = write_plugin(root.path(), "homebridge-hue", "0.13.1");
    std::fs::write(dir.join("config.schema.json"), r#"{"pluginAlias":"Hue"}"#).unwrap();
    write_plugin(root.path(), "homebridge-alexa", "2.0.0");

    let paths = SearchPaths::new(vec![root.path().to_path_buf()], None);
    let records = scanner().scan(&paths).await;

    let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["homebridge-alexa", "homebridge-hue"]);

    let hue = &records[1];
    assert!(hue.has_settings_schema);
    assert!(!records[0].has_settings_schema);
    assert_eq!(hue.installed_version.as_deref(), Some("0.13.1"));
    assert_eq!(hue.description, "homebridge-hue for tests");
    assert!(!hue.is_public_package);
    assert!(!hue.update_available);
}

#[tokio::test]
async fn test_record_points_at_folder_it_was_read_from() {
    let root = tempfile::tempdir().unwrap();
    let dir = write_aliased_plugin(root.path(), "homebridge-hue-legacy", "homebridge-hue", "0.11.0");
    std::fs::write(dir.join("config.schema.json"), r#"{"pluginAlias":"Hue"}"#).unwrap();

    let paths = SearchPaths::new(vec![root.path().to_path_buf()], None);
    let records = scanner().scan(&paths).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "homebridge-hue");
    assert!(records[0].has_settings_schema);
    assert_eq!(records[0].package_dir(), Some(dir));
}

#[tokio::test]
async fn test_missing_search_path_yields_nothing() {
    let paths = SearchPaths::new(vec![Path::new("/definitely/not/here").to_path_buf()], None);
    assert!(scanner().scan(&paths).await.is_empty());
}

#[tokio::test]
async fn test_find_package_ignores_plugin_filters() {
    let custom = tempfile::tempdir().unwrap();
    let global = tempfile::tempdir().unwrap();
    write_package(global.path(), "homebridge", "1.8.0", &["homekit"]);

    let paths = SearchPaths::new(
        vec![global.path().to_path_buf()],
        Some(custom.path().to_path_buf()),
    );
    let runtime = scanner().find_package(&paths, "homebridge").await.unwrap();

    assert_eq!(runtime.installed_version.as_deref(), Some("1.8.0"));
    assert_eq!(runtime.install_path.as_deref(), Some(global.path()));
    assert!(runtime.is_global_install);

    assert!(scanner().find_package(&paths, "homebridge-missing").await.is_none());
}
