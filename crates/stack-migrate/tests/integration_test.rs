//! End-to-end runs of the export and import orchestrators against the
//! in-memory stack.
//!
//! Run with: `cargo test --test integration_test`

#![allow(clippy::pedantic)]

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use stack_migrate::client::memory::MemoryStack;
use stack_migrate::client::Resource;
use stack_migrate::{Error, Exporter, Importer, RunConfig, UidMapper};

fn run_config(data_dir: &Path, modules: &[&str]) -> RunConfig {
    let yaml = format!(
        r#"
stack:
  api_key: blt_integration
  management_token: cs_token
data_dir: {}
modules:
  types: [{}]
retry:
  max_retries: 0
  delay_ms: 0
show_progress: false
"#,
        data_dir.display(),
        modules.join(", ")
    );
    serde_yaml::from_str(&yaml).expect("valid config")
}

fn blog_entries() -> Resource {
    Resource::Entry {
        content_type: "blog".to_string(),
        locale: "en-us".to_string(),
    }
}

/// A small but fully linked source stack.
fn seed_source(stack: &MemoryStack) {
    stack.seed(
        &Resource::Environment,
        vec![
            json!({"uid": "env_prod", "name": "production"}),
            json!({"uid": "env_stage", "name": "staging"}),
        ],
    );
    stack.seed(
        &Resource::ContentType,
        vec![json!({
            "uid": "blog",
            "title": "Blog",
            "schema": [
                {"uid": "title", "data_type": "text"},
                {"uid": "hero", "data_type": "file"}
            ]
        })],
    );
    stack.seed_asset(
        json!({"uid": "asset_src", "title": "Logo", "filename": "logo.png"}),
        b"\x89PNG".to_vec(),
    );
    stack.seed(
        &blog_entries(),
        vec![
            json!({
                "uid": "entry_1",
                "title": "Hello",
                "hero": "asset_src",
                "publish_details": [{"environment": "env_prod", "locale": "en-us"}]
            }),
            json!({"uid": "entry_2", "title": "Second"}),
            json!({"uid": "entry_3", "title": "Third"}),
        ],
    );
}

#[tokio::test]
async fn test_round_trip_into_empty_stack() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("content");
    let modules = ["environments", "assets", "content-types", "entries"];

    let source = MemoryStack::new();
    seed_source(&source);
    let exported = Exporter::new(run_config(&data, &modules), Arc::new(source))
        .run()
        .await
        .unwrap();
    assert!(!exported.no_success_msg);
    assert!(data.join("entries/blog/en-us/index.json").is_file());
    assert!(data.join("assets/files/asset_src/logo.png").is_file());

    let mut config = run_config(&data, &modules);
    let backup = dir.path().join("backup");
    config.backup_dir = Some(backup.clone());
    let target = MemoryStack::new();
    let imported = Importer::new(config, Arc::new(target.clone()))
        .run()
        .await
        .unwrap();
    assert!(!imported.no_success_msg);

    assert_eq!(target.items(&Resource::Environment).len(), 2);
    assert_eq!(target.items(&Resource::ContentType).len(), 1);
    let assets = target.items(&Resource::Asset);
    assert_eq!(assets.len(), 1);
    let entries = target.items(&blog_entries());
    assert_eq!(entries.len(), 3);

    let hello = entries.iter().find(|e| e["title"] == "Hello").unwrap();
    assert_eq!(hello["hero"], assets[0]["uid"]);
    assert!(hello.get("publish_details").is_none());

    let mapper = UidMapper::new(&backup);
    let environments = mapper.read("environments").unwrap();
    let published = target.published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].target.environments,
        vec![environments.get("env_prod").unwrap().to_string()]
    );
    assert_eq!(mapper.read("entries").unwrap().len(), 3);
}

#[tokio::test]
async fn test_second_import_creates_nothing_new() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("content");
    let modules = ["environments", "content-types", "entries"];

    let source = MemoryStack::new();
    seed_source(&source);
    Exporter::new(run_config(&data, &modules), Arc::new(source))
        .run()
        .await
        .unwrap();

    let mut config = run_config(&data, &modules);
    config.backup_dir = Some(dir.path().join("backup"));
    config.skip_publish = true;
    let target = MemoryStack::new();
    Importer::new(config.clone(), Arc::new(target.clone()))
        .run()
        .await
        .unwrap();
    let creates = target.calls("create");

    Importer::new(config, Arc::new(target.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(target.calls("create"), creates);
    assert_eq!(target.items(&blog_entries()).len(), 3);
    assert!(target.published().is_empty());
}

#[tokio::test]
async fn test_branch_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("content");

    let source = MemoryStack::new();
    source.set_branches(&["b1", "b2"]);
    for branch in ["b1", "b2"] {
        seed_source(&source.scoped_stack(Some(branch)));
    }
    source.fail_resource(Some("b2"), &blog_entries());

    let err = Exporter::new(
        run_config(&data, &["content-types", "entries"]),
        Arc::new(source),
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.code(), "MIG-013");
    match &err {
        Error::Branch { branch, source } => {
            assert_eq!(branch, "b2");
            assert!(source.to_string().contains("Entries"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(data.join("b1/entries/blog/en-us/index.json").is_file());
    assert!(!data.join("b2/entries/blog/en-us/index.json").exists());
}

#[tokio::test]
async fn test_settings_need_environment_map() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("content");

    let source = MemoryStack::new();
    source.seed_settings(json!({"live_preview": {"enabled": true, "default-env": "env_prod"}}));
    Exporter::new(run_config(&data, &["stack-settings"]), Arc::new(source))
        .run()
        .await
        .unwrap();
    assert!(data.join("stack/settings.json").is_file());

    let mut config = run_config(&data, &["stack-settings"]);
    config.backup_dir = Some(dir.path().join("backup"));
    let target = MemoryStack::new();
    Importer::new(config, Arc::new(target.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(target.settings_writes(), 0);
}

#[tokio::test]
async fn test_settings_applied_with_environments() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("content");
    let modules = ["environments", "stack-settings"];

    let source = MemoryStack::new();
    seed_source(&source);
    source.seed_settings(json!({"live_preview": {"enabled": true, "default-env": "env_prod"}}));
    Exporter::new(run_config(&data, &modules), Arc::new(source))
        .run()
        .await
        .unwrap();

    let mut config = run_config(&data, &modules);
    let backup = dir.path().join("backup");
    config.backup_dir = Some(backup.clone());
    let target = MemoryStack::new();
    Importer::new(config, Arc::new(target.clone()))
        .run()
        .await
        .unwrap();

    let environments = UidMapper::new(&backup).read("environments").unwrap();
    let settings = stack_migrate::StackClient::stack_settings(&target).await.unwrap();
    assert_eq!(target.settings_writes(), 1);
    assert_eq!(
        settings["live_preview"]["default-env"],
        environments.get("env_prod").unwrap()
    );
}
