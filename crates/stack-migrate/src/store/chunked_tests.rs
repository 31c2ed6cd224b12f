//! Tests for the chunked JSON store.

use super::*;
use serde_json::json;
use tempfile::TempDir;

fn asset(i: usize) -> Value {
    json!({
        "uid": format!("blt{:04}", i),
        "url": format!("https://cdn.example.com/{}/file.png", i),
        "filename": "file.png",
        "description": "x".repeat(64),
    })
}

#[test]
fn test_rollover_by_item_count() {
    let dir = TempDir::new().unwrap();
    let limits = ChunkLimits {
        max_bytes: u64::MAX,
        max_items: Some(3),
    };

    let mut writer = ChunkedJsonWriter::create(dir.path(), "assets.json", limits).unwrap();
    writer.write_into_file((0..7).map(asset)).unwrap();
    let reader = writer.complete_file().unwrap();

    let chunks: Vec<_> = reader.chunk_names().map(str::to_string).collect();
    assert_eq!(chunks, vec!["chunk-1.json", "chunk-2.json", "chunk-3.json"]);
    assert_eq!(reader.read_chunk("chunk-3.json").unwrap().len(), 1);
}

#[test]
fn test_rollover_by_size_keeps_every_item() {
    let dir = TempDir::new().unwrap();
    let limits = ChunkLimits {
        max_bytes: 400,
        max_items: None,
    };

    let mut writer = ChunkedJsonWriter::create(dir.path(), "assets.json", limits).unwrap();
    for i in 0..20 {
        writer.write_into_file([asset(i)]).unwrap();
    }
    assert_eq!(writer.len(), 20);
    writer.complete_file().unwrap();

    let reader = ChunkedJsonReader::open(dir.path(), "assets.json")
        .unwrap()
        .unwrap();
    assert!(reader.chunk_names().count() > 1);

    let mut uids: Vec<String> = reader
        .read_all()
        .unwrap()
        .iter()
        .map(|v| v["uid"].as_str().unwrap().to_string())
        .collect();
    uids.sort();
    uids.dedup();
    assert_eq!(uids.len(), 20);
}

#[test]
fn test_oversized_single_item_gets_its_own_chunk() {
    let dir = TempDir::new().unwrap();
    let limits = ChunkLimits {
        max_bytes: 10,
        max_items: None,
    };

    let mut writer = ChunkedJsonWriter::create(dir.path(), "big.json", limits).unwrap();
    writer.write_into_file([asset(1), asset(2)]).unwrap();
    let reader = writer.complete_file().unwrap();

    assert_eq!(reader.chunk_names().count(), 2);
}

#[test]
fn test_plain_meta_contains_picked_keys_only() {
    let dir = TempDir::new().unwrap();
    let mut writer = ChunkedJsonWriter::create(dir.path(), "assets.json", ChunkLimits::default())
        .unwrap()
        .with_meta_keys(&["uid", "url", "filename"]);
    writer.write_into_file([asset(1), asset(2)]).unwrap();
    let reader = writer.complete_file().unwrap();

    let meta = reader.get_plain_meta().unwrap();
    assert_eq!(meta.len(), 2);
    assert!(meta[0].get("url").is_some());
    assert!(meta[0].get("description").is_none());
}

#[test]
fn test_empty_set_still_writes_index() {
    let dir = TempDir::new().unwrap();
    let writer = ChunkedJsonWriter::create(dir.path(), "entries.json", ChunkLimits::default()).unwrap();
    assert!(writer.is_empty());
    writer.complete_file().unwrap();

    let reader = ChunkedJsonReader::open(dir.path(), "entries.json")
        .unwrap()
        .unwrap();
    assert!(reader.read_all().unwrap().is_empty());
    assert!(reader.get_plain_meta().unwrap().is_empty());
}

#[test]
fn test_open_missing_index_is_none() {
    let dir = TempDir::new().unwrap();
    assert!(ChunkedJsonReader::open(dir.path(), "assets.json")
        .unwrap()
        .is_none());
}

#[test]
fn test_missing_chunk_is_structural_error() {
    let dir = TempDir::new().unwrap();
    let mut writer = ChunkedJsonWriter::create(dir.path(), "assets.json", ChunkLimits::default()).unwrap();
    writer.write_into_file([asset(1)]).unwrap();
    let reader = writer.complete_file().unwrap();
    std::fs::remove_file(dir.path().join("chunk-1.json")).unwrap();

    assert!(matches!(reader.read_all(), Err(Error::Structural(_))));
}

#[test]
fn test_items_without_key_field_get_synthetic_keys() {
    let dir = TempDir::new().unwrap();
    let mut writer = ChunkedJsonWriter::create(dir.path(), "x.json", ChunkLimits::default()).unwrap();
    writer
        .write_into_file([json!({"name": "a"}), json!({"name": "b"})])
        .unwrap();
    let reader = writer.complete_file().unwrap();

    assert_eq!(reader.read_all().unwrap().len(), 2);
}
