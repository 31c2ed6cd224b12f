//! Asset import: folders, binaries, url table and publishing.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use super::{create_tree, publish_all, publish_target, CreateSpec, PendingItem, PublishJob};
use crate::client::Resource;
use crate::error::Result;
use crate::mapper::{FailedItem, UidMap};
use crate::modules::export::{
    local_file_name, DownloadIndex, DOWNLOADS_FILE, FILES_DIR, FOLDERS_FILE,
};
use crate::modules::refs::ReferenceRewriter;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::store::{read_json_file, ChunkedJsonReader};

/// Folder uid table, next to the asset uid table.
pub const FOLDER_MAPPING_FILE: &str = "folder-uid-mapping.json";
/// `old url → new url` table used to rewrite urls embedded in entries.
pub const URL_MAPPING_FILE: &str = "url-mapping.json";

/// Metadata sent along with a binary.
const UPLOAD_FIELDS: [&str; 4] = ["title", "description", "tags", "parent_uid"];

/// One asset ready to upload.
#[derive(Debug, Clone)]
struct Upload {
    item: PendingItem,
    url: Option<String>,
    filename: String,
    path: PathBuf,
    record: Value,
}

/// Imports assets.
pub struct AssetsImporter {
    ctx: ModuleContext,
    environments: Option<UidMap>,
}

impl AssetsImporter {
    /// Creates the importer; `environments` is needed only for publishing.
    #[must_use]
    pub fn new(ctx: ModuleContext, environments: Option<UidMap>) -> Self {
        Self { ctx, environments }
    }

    async fn import_folders(&self) -> Result<UidMap> {
        let folders: Vec<Value> =
            read_json_file(&self.ctx.module_dir().join(FOLDERS_FILE))?.unwrap_or_default();
        let items: Vec<PendingItem> = folders
            .iter()
            .filter_map(|folder| PendingItem::from_record(folder, "uid", false))
            .collect();
        if items.is_empty() {
            return Ok(UidMap::default());
        }
        let spec = CreateSpec::new(&Resource::AssetFolder, "/name")
            .process(process::FOLDERS)
            .table(FOLDER_MAPPING_FILE);
        create_tree(&self.ctx, spec, "parent_uid", items).await
    }

    /// Uploads prepared from the asset records; records without a local
    /// binary are returned as failures.
    fn prepare(
        &self,
        records: Vec<Value>,
        folders: &UidMap,
        known: &UidMap,
    ) -> Result<(Vec<Upload>, Vec<FailedItem>)> {
        let dir = self.ctx.module_dir();
        let downloads: DownloadIndex =
            read_json_file(&dir.join(DOWNLOADS_FILE))?.unwrap_or_default();
        let mut folder_rewriter = ReferenceRewriter::new("asset folders", folders);

        let mut uploads = Vec::new();
        let mut missing = Vec::new();
        for record in records {
            let Some(item) = PendingItem::from_record(&record, "uid", false) else {
                continue;
            };
            if known.get(&item.uid).is_some() {
                continue;
            }
            let url = record.get("url").and_then(Value::as_str).map(str::to_string);
            let filename = record
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or("file")
                .to_string();
            let local = local_file_name(&record);
            let path = url
                .as_deref()
                .and_then(|u| downloads.get(u))
                .and_then(|by_name| by_name.get(&local))
                .map(|relative| dir.join(relative))
                .unwrap_or_else(|| dir.join(FILES_DIR).join(&item.uid).join(&local));
            if !path.is_file() {
                warn!(uid = %item.uid, path = %path.display(), "binary missing, skipping asset");
                missing.push(item.failed("binary not found in export"));
                continue;
            }

            let mut metadata = Map::new();
            for field in UPLOAD_FIELDS {
                if let Some(value) = item.payload.get(field) {
                    metadata.insert(field.to_string(), value.clone());
                }
            }
            let mut metadata = Value::Object(metadata);
            folder_rewriter.rewrite_pointer(&mut metadata, "/parent_uid");

            uploads.push(Upload {
                item: PendingItem {
                    payload: metadata,
                    ..item
                },
                url,
                filename,
                path,
                record,
            });
        }
        Ok((uploads, missing))
    }
}

#[async_trait]
impl ModuleRunner for AssetsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Assets
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let Some(reader) = ChunkedJsonReader::open(&ctx.module_dir(), &ctx.settings.file_name)?
        else {
            info!("no exported assets, skipping");
            return Ok(());
        };
        let folders = self.import_folders().await?;
        let known = ctx.mapper.read(ctx.map_key())?;
        let records = reader.read_all()?;
        let total = records.len() as u64;
        let skipped = records
            .iter()
            .filter_map(|r| r.get("uid").and_then(Value::as_str))
            .filter(|uid| known.get(uid).is_some())
            .count();
        let (uploads, mut failures) = self.prepare(records, &folders, &known)?;

        let progress = &ctx.progress;
        progress.add_total(process::ITEMS, total);
        progress.success(process::ITEMS, skipped as u64);
        progress.failure(process::ITEMS, failures.len() as u64);

        let client = &ctx.client;
        let environments = self.environments.as_ref();
        let mut uids: Vec<(String, String)> = Vec::new();
        let mut jobs = Vec::new();
        let mut unreadable: Vec<Upload> = Vec::new();
        let mut rejected: Vec<FailedItem> = Vec::new();
        ctx.writer()
            .run(
                "upload asset",
                uploads,
                |upload: Upload| async move {
                    let bytes = tokio::fs::read(&upload.path).await?;
                    client
                        .upload_asset(upload.item.payload, &upload.filename, bytes)
                        .await
                },
                |upload, response| {
                    let Some(new_uid) = response.get("uid").and_then(Value::as_str) else {
                        unreadable.push(upload);
                        return Ok(());
                    };
                    ctx.mapper.write(ctx.map_key(), &upload.item.uid, new_uid)?;
                    if let (Some(old), Some(new)) =
                        (&upload.url, response.get("url").and_then(Value::as_str))
                    {
                        ctx.mapper
                            .write_table(ctx.map_key(), URL_MAPPING_FILE, [(old.as_str(), new)])?;
                    }
                    progress.success(process::ITEMS, 1);
                    if let Some(target) =
                        environments.and_then(|envs| publish_target(&upload.record, envs, None))
                    {
                        jobs.push(PublishJob {
                            resource: Resource::Asset,
                            uid: new_uid.to_string(),
                            item: upload.item.clone(),
                            target,
                        });
                    }
                    uids.push((upload.item.uid, new_uid.to_string()));
                    Ok(())
                },
                |upload, e| {
                    warn!(uid = %upload.item.uid, "upload failed: {}", e);
                    rejected.push(upload.item.failed(e));
                },
            )
            .await?;

        failures.extend(
            unreadable
                .iter()
                .map(|upload| upload.item.failed("response carries no uid")),
        );
        progress.failure(process::ITEMS, (rejected.len() + unreadable.len()) as u64);
        failures.extend(rejected);
        ctx.mapper.record_failures(ctx.map_key(), &failures)?;

        if self.environments.is_none() && !ctx.config.skip_publish {
            warn!("environment uid map not found, assets will not be published");
        }
        let published = publish_all(ctx, jobs).await?;

        info!(
            folders = folders.len(),
            uploaded = uids.len(),
            failed = failures.len(),
            published = published.succeeded,
            "assets imported"
        );
        Ok(())
    }
}
