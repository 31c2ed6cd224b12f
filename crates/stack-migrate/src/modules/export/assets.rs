//! Asset export: folders, metadata chunks, versions and binaries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{get_items, require_count};
use crate::client::{Query, Resource};
use crate::concurrency::BatchOutcome;
use crate::error::Result;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::store::{
    create_folder_if_not_exist, write_json_file, ChunkedJsonReader, ChunkedJsonWriter,
};

/// Folder records of the asset tree.
pub const FOLDERS_FILE: &str = "folders.json";
/// Sub-directory holding earlier asset versions.
pub const VERSIONS_DIR: &str = "versions";
/// Index file of the versions chunk set.
const VERSIONS_INDEX: &str = "versions.json";
/// Sub-directory holding downloaded binaries.
pub const FILES_DIR: &str = "files";
/// `url → filename → relative path` of every downloaded binary.
pub const DOWNLOADS_FILE: &str = "downloads.json";

/// Index of downloaded binaries, as stored in [`DOWNLOADS_FILE`].
pub type DownloadIndex = BTreeMap<String, BTreeMap<String, String>>;

/// Local file name of an asset record, stripped of any directory part.
#[must_use]
pub fn local_file_name(record: &Value) -> String {
    record
        .get("filename")
        .and_then(Value::as_str)
        .and_then(|f| Path::new(f).file_name())
        .and_then(|f| f.to_str())
        .unwrap_or("file")
        .to_string()
}

const META_KEYS: [&str; 5] = ["uid", "url", "filename", "_version", "parent_uid"];

/// One binary to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Download {
    uid: String,
    url: String,
    filename: String,
    version: Option<u64>,
}

impl Download {
    fn from_meta(record: &Value, versioned: bool) -> Option<Self> {
        let uid = record.get("uid")?.as_str()?.to_string();
        let url = record.get("url")?.as_str()?.to_string();
        let filename = local_file_name(record);
        let version = if versioned {
            record.get("_version").and_then(Value::as_u64)
        } else {
            None
        };
        Some(Self {
            uid,
            url,
            filename,
            version,
        })
    }

    fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(FILES_DIR).join(&self.uid);
        if let Some(version) = self.version {
            path = path.join(format!("v{}", version));
        }
        path.join(&self.filename)
    }
}

/// Keeps the first record of every `(url, filename)` pair.
fn dedup_downloads(records: Vec<Download>) -> Vec<Download> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|d| {
            let fresh = seen.insert((d.url.clone(), d.filename.clone()));
            if !fresh {
                debug!(uid = %d.uid, url = %d.url, "skipping duplicate download");
            }
            fresh
        })
        .collect()
}

/// Exports the asset module.
pub struct AssetsExporter {
    ctx: ModuleContext,
}

impl AssetsExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    /// Fetches `total` folder records into `folders.json`.
    ///
    /// Returns the number of folders written; zero issues no calls.
    pub async fn get_assets_folders(&self, total: u64) -> Result<usize> {
        if total == 0 {
            return Ok(0);
        }
        let mut folders = Vec::new();
        get_items(
            &self.ctx,
            &Resource::AssetFolder,
            &Query::default(),
            total,
            process::FOLDERS,
            |page| {
                folders.extend(page);
                Ok(())
            },
        )
        .await?;

        write_json_file(&self.ctx.module_dir().join(FOLDERS_FILE), &folders)?;
        Ok(folders.len())
    }

    async fn export_metadata(&self, total: u64) -> Result<ChunkedJsonReader> {
        let mut writer = ChunkedJsonWriter::create(
            self.ctx.module_dir(),
            &self.ctx.settings.file_name,
            self.ctx.settings.chunk_limits,
        )?
        .with_meta_keys(&META_KEYS);

        get_items(
            &self.ctx,
            &Resource::Asset,
            &Query::default().param("include_publish_details", "true"),
            total,
            process::ITEMS,
            |page| writer.write_into_file(page),
        )
        .await?;

        writer.complete_file()
    }

    /// Exports earlier versions of every asset with `_version > 1`.
    async fn export_versions(&self, assets: &ChunkedJsonReader) -> Result<ChunkedJsonReader> {
        let versioned: Vec<String> = assets
            .get_plain_meta()?
            .iter()
            .filter(|m| m.get("_version").and_then(Value::as_u64).unwrap_or(1) > 1)
            .filter_map(|m| m.get("uid").and_then(Value::as_str).map(str::to_string))
            .collect();

        let mut writer = ChunkedJsonWriter::create(
            self.ctx.module_dir().join(VERSIONS_DIR),
            VERSIONS_INDEX,
            self.ctx.settings.chunk_limits,
        )?
        .with_key_field("version_key")
        .with_meta_keys(&["uid", "url", "filename", "_version"]);

        let client = &self.ctx.client;
        let progress = &self.ctx.progress;
        progress.add_total(process::VERSIONS, versioned.len() as u64);

        self.ctx
            .reader()
            .run(
                "fetch asset versions",
                versioned,
                |uid| async move {
                    client
                        .find(&Resource::AssetVersion { asset: uid }, &Query::default())
                        .await
                },
                |uid, versions| {
                    let versions = versions.into_iter().map(|mut version| {
                        let number = version.get("_version").and_then(Value::as_u64).unwrap_or(0);
                        if let Value::Object(map) = &mut version {
                            map.entry("uid").or_insert_with(|| json!(uid));
                            map.insert("version_key".to_string(), json!(format!("{}-v{}", uid, number)));
                        }
                        version
                    });
                    writer.write_into_file(versions)?;
                    progress.success(process::VERSIONS, 1);
                    Ok(())
                },
                |uid, e| {
                    warn!(uid = %uid, "asset versions failed: {}", e);
                    progress.failure(process::VERSIONS, 1);
                },
            )
            .await?;

        writer.complete_file()
    }

    /// Downloads every unique binary referenced by the meta indexes.
    ///
    /// Records sharing `(url, filename)` are downloaded once.
    pub async fn download_binaries(
        &self,
        assets: &ChunkedJsonReader,
        versions: Option<&ChunkedJsonReader>,
    ) -> Result<BatchOutcome> {
        let mut records: Vec<Download> = assets
            .get_plain_meta()?
            .iter()
            .filter_map(|m| Download::from_meta(m, false))
            .collect();
        if let Some(versions) = versions {
            records.extend(
                versions
                    .get_plain_meta()?
                    .iter()
                    .filter_map(|m| Download::from_meta(m, true)),
            );
        }
        let unique = dedup_downloads(records);

        let dir = self.ctx.module_dir();
        let client = &self.ctx.client;
        let progress = &self.ctx.progress;
        let secured = self.ctx.settings.secured_assets;
        let mut index = DownloadIndex::new();
        progress.add_total(process::DOWNLOADS, unique.len() as u64);

        let outcome = self
            .ctx
            .downloader()
            .run(
                "download asset",
                unique,
                |d| async move { client.download(&d.url, secured).await },
                |d, bytes| {
                    let relative = d.relative_path();
                    let target = dir.join(&relative);
                    if let Some(parent) = target.parent() {
                        create_folder_if_not_exist(parent)?;
                    }
                    fs::write(&target, bytes)?;
                    index
                        .entry(d.url)
                        .or_default()
                        .insert(d.filename, relative.to_string_lossy().replace('\\', "/"));
                    progress.success(process::DOWNLOADS, 1);
                    Ok(())
                },
                |d, e| {
                    warn!(uid = %d.uid, url = %d.url, "download failed: {}", e);
                    progress.failure(process::DOWNLOADS, 1);
                },
            )
            .await?;

        write_json_file(&dir.join(DOWNLOADS_FILE), &index)?;
        Ok(outcome)
    }
}

#[async_trait]
impl ModuleRunner for AssetsExporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Assets
    }

    async fn start(&mut self) -> Result<()> {
        create_folder_if_not_exist(&self.ctx.module_dir())?;

        let folder_count =
            require_count(&self.ctx, &Resource::AssetFolder, &Query::default()).await?;
        let folders = self.get_assets_folders(folder_count).await?;

        let asset_count = require_count(&self.ctx, &Resource::Asset, &Query::default()).await?;
        let assets = self.export_metadata(asset_count).await?;

        let versions = if self.ctx.settings.include_versioned_assets {
            Some(self.export_versions(&assets).await?)
        } else {
            None
        };

        let downloads = self.download_binaries(&assets, versions.as_ref()).await?;
        info!(
            folders,
            assets = asset_count,
            downloaded = downloads.succeeded,
            failed_downloads = downloads.failed,
            "assets exported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download(uid: &str, url: &str, filename: &str) -> Download {
        Download {
            uid: uid.to_string(),
            url: url.to_string(),
            filename: filename.to_string(),
            version: None,
        }
    }

    #[test]
    fn test_dedup_by_url_and_filename() {
        let unique = dedup_downloads(vec![
            download("a1", "https://cdn/x", "x.png"),
            download("a2", "https://cdn/x", "x.png"),
            download("a3", "https://cdn/x", "y.png"),
            download("a1", "https://cdn/z", "x.png"),
        ]);
        let uids: Vec<&str> = unique.iter().map(|d| d.uid.as_str()).collect();
        assert_eq!(uids, vec!["a1", "a3", "a1"]);
    }

    #[test]
    fn test_meta_filename_cannot_escape_directory() {
        let d = Download::from_meta(
            &json!({"uid": "a1", "url": "https://cdn/a", "filename": "../../etc/passwd"}),
            false,
        )
        .unwrap();
        assert_eq!(d.relative_path(), PathBuf::from("files/a1/passwd"));
    }

    #[test]
    fn test_versioned_path_includes_version() {
        let d = Download::from_meta(
            &json!({"uid": "a1", "url": "https://cdn/a", "filename": "a.png", "_version": 2}),
            true,
        )
        .unwrap();
        assert_eq!(d.relative_path(), PathBuf::from("files/a1/v2/a.png"));
    }
}
