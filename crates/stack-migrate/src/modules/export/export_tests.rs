//! Tests for the module exporters, run against the in-memory stack.

use super::*;
use crate::client::memory::MemoryStack;
use crate::client::SharedClient;
use crate::modules::testing::{config, context, context_with};
use crate::store::{read_json_file, ChunkedJsonReader};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn shared(stack: &MemoryStack) -> SharedClient {
    Arc::new(stack.clone())
}

#[tokio::test]
async fn test_list_exporter_writes_document_keyed_by_uid() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(
        &Resource::Environment,
        vec![
            json!({"uid": "env1", "name": "production"}),
            json!({"uid": "env2", "name": "staging"}),
            json!({"uid": "env3", "name": "development"}),
        ],
    );

    let mut exporter = ListExporter::new(context(ModuleKind::Environments, shared(&stack), dir.path()));
    exporter.start().await.unwrap();

    let written: BTreeMap<String, Value> = read_json_file(
        &dir.path().join("environments").join("environments.json"),
    )
    .unwrap()
    .unwrap();
    assert_eq!(written.len(), 3);
    assert_eq!(written["env2"]["name"], "staging");
    // Three items with a page size of two.
    assert_eq!(stack.calls("find"), 2);
}

#[tokio::test]
async fn test_built_in_roles_are_not_exported() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(
        &Resource::Role,
        vec![
            json!({"uid": "r1", "name": "Admin"}),
            json!({"uid": "r2", "name": "Translators"}),
            json!({"uid": "r3", "name": "Developer"}),
        ],
    );

    let mut exporter = ListExporter::new(context(ModuleKind::CustomRoles, shared(&stack), dir.path()));
    exporter.start().await.unwrap();

    let written: BTreeMap<String, Value> = read_json_file(
        &dir.path().join("custom-roles").join("custom-roles.json"),
    )
    .unwrap()
    .unwrap();
    assert_eq!(written.keys().collect::<Vec<_>>(), vec!["r2"]);
}

#[tokio::test]
async fn test_get_items_with_zero_total_issues_no_calls() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    let ctx = context(ModuleKind::Labels, shared(&stack), dir.path());

    let mut pages = 0;
    let outcome = get_items(&ctx, &Resource::Label, &Query::default(), 0, process::ITEMS, |_| {
        pages += 1;
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(outcome.total(), 0);
    assert_eq!(pages, 0);
    assert_eq!(stack.total_calls(), 0);
}

#[tokio::test]
async fn test_get_assets_folders_with_zero_total_issues_no_calls() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    let exporter = AssetsExporter::new(context(ModuleKind::Assets, shared(&stack), dir.path()));

    assert_eq!(exporter.get_assets_folders(0).await.unwrap(), 0);
    assert_eq!(stack.total_calls(), 0);
}

#[tokio::test]
async fn test_failed_page_is_counted_not_fatal() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.fail_resource(None, &Resource::Label);
    let ctx = context(ModuleKind::Labels, shared(&stack), dir.path());

    let outcome = get_items(&ctx, &Resource::Label, &Query::default(), 5, process::ITEMS, |_| Ok(()))
        .await
        .unwrap();

    // Pages of two: skip 0, 2 and 4.
    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.succeeded, 0);
}

#[tokio::test]
async fn test_uncountable_module_is_structural_failure() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.fail_resource(None, &Resource::Webhook);

    let mut exporter = ListExporter::new(context(ModuleKind::Webhooks, shared(&stack), dir.path()));
    let err = exporter.start().await.unwrap_err();
    assert!(matches!(err, Error::Structural(_)));
}

#[tokio::test]
async fn test_shared_binary_is_downloaded_once() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    let first = stack.seed_asset(
        json!({"uid": "a1", "filename": "logo.png", "title": "Logo"}),
        b"png".to_vec(),
    );
    stack.seed(
        &Resource::Asset,
        vec![json!({
            "uid": "a2",
            "filename": "logo.png",
            "url": first["url"],
            "title": "Logo copy",
            "is_dir": false
        })],
    );

    let mut exporter = AssetsExporter::new(context(ModuleKind::Assets, shared(&stack), dir.path()));
    exporter.start().await.unwrap();

    assert_eq!(stack.calls("download"), 1);
    let assets_dir = dir.path().join("assets");
    assert!(assets_dir.join("files/a1/logo.png").exists());
    assert!(!assets_dir.join("files/a2").exists());

    let downloads: DownloadIndex =
        read_json_file(&assets_dir.join(DOWNLOADS_FILE)).unwrap().unwrap();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads.values().next().unwrap().len(), 1);

    let reader = ChunkedJsonReader::open(&assets_dir, "assets.json")
        .unwrap()
        .unwrap();
    assert_eq!(reader.read_all().unwrap().len(), 2);
}

#[tokio::test]
async fn test_shared_url_with_two_filenames_indexed_separately() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    let first = stack.seed_asset(
        json!({"uid": "a1", "filename": "logo.png", "title": "Logo"}),
        b"png".to_vec(),
    );
    let url = first["url"].as_str().unwrap().to_string();
    stack.seed(
        &Resource::Asset,
        vec![json!({"uid": "a2", "filename": "logo-dark.png", "url": url, "is_dir": false})],
    );

    let mut exporter = AssetsExporter::new(context(ModuleKind::Assets, shared(&stack), dir.path()));
    exporter.start().await.unwrap();

    let downloads: DownloadIndex = read_json_file(&dir.path().join("assets").join(DOWNLOADS_FILE))
        .unwrap()
        .unwrap();
    let by_name = &downloads[&url];
    assert_eq!(by_name["logo.png"], "files/a1/logo.png");
    assert_eq!(by_name["logo-dark.png"], "files/a2/logo-dark.png");
}

#[tokio::test]
async fn test_folders_written_when_present() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(
        &Resource::AssetFolder,
        vec![
            json!({"uid": "f1", "name": "images", "is_dir": true}),
            json!({"uid": "f2", "name": "icons", "is_dir": true, "parent_uid": "f1"}),
        ],
    );

    let exporter = AssetsExporter::new(context(ModuleKind::Assets, shared(&stack), dir.path()));
    create_folder_if_not_exist(&dir.path().join("assets")).unwrap();
    assert_eq!(exporter.get_assets_folders(2).await.unwrap(), 2);

    let folders: Vec<Value> = read_json_file(&dir.path().join("assets").join(FOLDERS_FILE))
        .unwrap()
        .unwrap();
    assert_eq!(folders[1]["parent_uid"], "f1");
}

#[tokio::test]
async fn test_locales_master_kept_apart() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(
        &Resource::Locale,
        vec![
            json!({"code": "en-us", "name": "English"}),
            json!({"code": "fr-fr", "name": "French", "fallback_locale": "en-us"}),
        ],
    );

    let mut exporter = LocalesExporter::new(context(ModuleKind::Locales, shared(&stack), dir.path()));
    exporter.start().await.unwrap();

    let locales = read_exported_locales(&dir.path().join("locales"), "locales.json")
        .unwrap()
        .unwrap();
    assert_eq!(locales.master, "en-us");
    assert_eq!(locales.others.keys().collect::<Vec<_>>(), vec!["fr-fr"]);
}

#[tokio::test]
async fn test_entries_exported_per_content_type_and_locale() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(&Resource::ContentType, vec![json!({"uid": "blog", "title": "Blog"})]);
    let english = Resource::Entry {
        content_type: "blog".to_string(),
        locale: "en-us".to_string(),
    };
    stack.seed(
        &english,
        vec![
            json!({"uid": "e1", "title": "One"}),
            json!({"uid": "e2", "title": "Two"}),
            json!({"uid": "e3", "title": "Three"}),
        ],
    );

    let client = shared(&stack);
    ListExporter::new(context(ModuleKind::ContentTypes, client.clone(), dir.path()))
        .start()
        .await
        .unwrap();
    EntriesExporter::new(context(ModuleKind::Entries, client, dir.path()))
        .start()
        .await
        .unwrap();

    let reader = ChunkedJsonReader::open(&dir.path().join("entries/blog/en-us"), "index.json")
        .unwrap()
        .unwrap();
    let entries = reader.read_all().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e["locale"] == "en-us"));
}

#[tokio::test]
async fn test_entries_without_content_types_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();

    EntriesExporter::new(context(ModuleKind::Entries, shared(&stack), dir.path()))
        .start()
        .await
        .unwrap();
    assert_eq!(stack.total_calls(), 0);
}

#[tokio::test]
async fn test_taxonomy_terms_written_per_taxonomy() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(&Resource::Taxonomy, vec![json!({"uid": "regions", "name": "Regions"})]);
    stack.seed(
        &Resource::Term {
            taxonomy: "regions".to_string(),
        },
        vec![
            json!({"uid": "emea", "name": "EMEA"}),
            json!({"uid": "france", "name": "France", "parent_uid": "emea"}),
        ],
    );

    let mut exporter =
        TaxonomiesExporter::new(context(ModuleKind::Taxonomies, shared(&stack), dir.path()));
    exporter.start().await.unwrap();

    let terms: Vec<Value> = read_json_file(
        &dir.path()
            .join("taxonomies")
            .join(TERMS_DIR)
            .join("regions.json"),
    )
    .unwrap()
    .unwrap();
    assert_eq!(terms.len(), 2);
}

#[tokio::test]
async fn test_versioned_assets_exported_when_enabled() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed_asset(
        json!({"uid": "a1", "filename": "hero.jpg", "_version": 2}),
        b"v2".to_vec(),
    );
    stack.seed_binary("memory://assets/a1/v1/hero.jpg", b"v1".to_vec());
    stack.seed(
        &Resource::AssetVersion {
            asset: "a1".to_string(),
        },
        vec![json!({
            "_version": 1,
            "filename": "hero.jpg",
            "url": "memory://assets/a1/v1/hero.jpg"
        })],
    );

    let mut cfg = config(dir.path());
    cfg.modules
        .options
        .entry(ModuleKind::Assets)
        .or_default()
        .include_versioned_assets = true;
    let mut exporter = AssetsExporter::new(context_with(
        ModuleKind::Assets,
        cfg,
        shared(&stack),
        dir.path(),
    ));
    exporter.start().await.unwrap();

    let assets_dir = dir.path().join("assets");
    assert!(assets_dir.join(VERSIONS_DIR).join("versions.json").exists());
    assert!(assets_dir.join("files/a1/v1/hero.jpg").exists());
    assert_eq!(stack.calls("download"), 2);
}

#[tokio::test]
async fn test_stack_settings_exported() {
    let dir = TempDir::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed_settings(json!({"stack_variables": {"a": 1}}));

    StackSettingsExporter::new(context(ModuleKind::StackSettings, shared(&stack), dir.path()))
        .start()
        .await
        .unwrap();

    let settings: Value = read_json_file(&dir.path().join("stack").join("settings.json"))
        .unwrap()
        .unwrap();
    assert_eq!(settings["stack_variables"]["a"], 1);
}
