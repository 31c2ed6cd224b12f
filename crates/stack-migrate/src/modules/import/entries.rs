//! Entry import.
//!
//! Entries are imported master locale first. The first pass creates each
//! entry (or localizes it when the master version already exists) with
//! asset uids and urls rewritten and entry references removed. Once every
//! entry has a target uid, a second pass restores the references, and
//! finally entries are published to their mapped environments.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{
    create_all, publish_all, publish_target, update_all, CreateSpec, PendingItem, PublishJob,
    URL_MAPPING_FILE,
};
use crate::client::Resource;
use crate::error::Result;
use crate::mapper::UidMap;
use crate::modules::export::read_exported_locales;
use crate::modules::refs::{
    replace_mapped_strings, replace_urls, rewrite_entry_references, strip_entry_references,
    ReferenceRewriter,
};
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner, Prerequisites};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::{read_json_file, ChunkedJsonReader};

/// An exported entry together with where it goes on the target.
#[derive(Debug, Clone)]
struct EntryRecord {
    /// Target collection (mapped content type and locale).
    resource: Resource,
    item: PendingItem,
    record: Value,
}

/// Imports entries.
pub struct EntriesImporter {
    ctx: ModuleContext,
    prerequisites: Prerequisites,
}

impl EntriesImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(ctx: ModuleContext, prerequisites: Prerequisites) -> Self {
        Self { ctx, prerequisites }
    }

    async fn locales(&self) -> Result<Vec<String>> {
        let settings = self.ctx.config.module_settings(ModuleKind::Locales);
        match read_exported_locales(&self.ctx.dir_of(ModuleKind::Locales), &settings.file_name)? {
            Some(locales) => Ok(locales.codes()),
            None => {
                let master = with_retry(&self.ctx.config.retry, "master locale", || {
                    self.ctx.client.master_locale()
                })
                .await?;
                Ok(vec![master])
            }
        }
    }

    fn content_types(&self) -> Result<Vec<String>> {
        let settings = self.ctx.config.module_settings(ModuleKind::ContentTypes);
        let schemas: Option<BTreeMap<String, Value>> = read_json_file(
            &self
                .ctx
                .dir_of(ModuleKind::ContentTypes)
                .join(&settings.file_name),
        )?;
        Ok(schemas.map(|s| s.into_keys().collect()).unwrap_or_default())
    }

    fn target_of<'a>(&'a self, kind: ModuleKind, old: &'a str) -> &'a str {
        self.prerequisites
            .get(kind)
            .and_then(|map| map.get(old))
            .unwrap_or(old)
    }

    /// Exported entries of one content type and locale.
    fn read(&self, content_type: &str, locale: &str) -> Result<Vec<EntryRecord>> {
        let dir = self.ctx.module_dir().join(content_type).join(locale);
        let Some(reader) = ChunkedJsonReader::open(&dir, &self.ctx.settings.file_name)? else {
            return Ok(Vec::new());
        };
        let resource = Resource::Entry {
            content_type: self.target_of(ModuleKind::ContentTypes, content_type).to_string(),
            locale: self.target_of(ModuleKind::Locales, locale).to_string(),
        };
        Ok(reader
            .read_all()?
            .into_iter()
            .filter_map(|record| {
                let item = PendingItem::from_record(&record, "uid", false)?.in_locale(locale);
                Some(EntryRecord {
                    resource: resource.clone(),
                    item,
                    record,
                })
            })
            .collect())
    }

    /// Rewrites asset uids and urls in place.
    fn rewrite_assets(&self, payload: &mut Value, urls: &UidMap) {
        if let Some(assets) = self.prerequisites.get(ModuleKind::Assets) {
            replace_mapped_strings(payload, assets);
        }
        replace_urls(payload, urls);
    }

    /// First pass for one locale. Returns entries that carry references.
    async fn import_locale(
        &self,
        entries: Vec<EntryRecord>,
        urls: &UidMap,
    ) -> Result<Vec<EntryRecord>> {
        let mut with_references = Vec::new();
        let mut creates: BTreeMap<Resource, Vec<PendingItem>> = BTreeMap::new();
        let mut localizations = Vec::new();
        let known = self.ctx.mapper.read(self.ctx.map_key())?;

        for mut entry in entries {
            self.rewrite_assets(&mut entry.item.payload, urls);
            let mut skeleton = entry.item.clone();
            if strip_entry_references(&mut skeleton.payload) {
                with_references.push(entry.clone());
            }
            match known.get(&entry.item.uid) {
                Some(new) => localizations.push((entry.resource, new.to_string(), skeleton)),
                None => creates.entry(entry.resource).or_default().push(skeleton),
            }
        }

        for (resource, items) in creates {
            create_all(&self.ctx, CreateSpec::new(&resource, "/title"), items).await?;
        }

        let mut by_resource: BTreeMap<Resource, Vec<(String, PendingItem)>> = BTreeMap::new();
        for (resource, uid, item) in localizations {
            by_resource.entry(resource).or_default().push((uid, item));
        }
        for (resource, items) in by_resource {
            update_all(&self.ctx, &resource, process::ITEMS, items).await?;
        }
        Ok(with_references)
    }

    /// Second pass: restores entry references through the entry map.
    async fn link_references(&self, entries: Vec<EntryRecord>) -> Result<u64> {
        let map = self.ctx.mapper.read(self.ctx.map_key())?;
        let mut rewriter = ReferenceRewriter::new(ModuleKind::Entries.as_str(), &map);
        let mut by_resource: BTreeMap<Resource, Vec<(String, PendingItem)>> = BTreeMap::new();
        for mut entry in entries {
            let Some(new) = map.get(&entry.item.uid) else {
                continue;
            };
            rewrite_entry_references(&mut entry.item.payload, &mut rewriter);
            by_resource
                .entry(entry.resource)
                .or_default()
                .push((new.to_string(), entry.item));
        }
        if !rewriter.unresolved().is_empty() {
            debug!(
                unresolved = rewriter.unresolved().len(),
                "entry references left unchanged"
            );
        }

        let mut linked = 0;
        for (resource, items) in by_resource {
            linked += update_all(&self.ctx, &resource, process::REFERENCES, items)
                .await?
                .succeeded;
        }
        Ok(linked)
    }

    fn publish_jobs(&self, entries: &[EntryRecord]) -> Vec<PublishJob> {
        let Some(environments) = self.prerequisites.get(ModuleKind::Environments) else {
            return Vec::new();
        };
        let Ok(map) = self.ctx.mapper.read(self.ctx.map_key()) else {
            return Vec::new();
        };
        let locales = self.prerequisites.get(ModuleKind::Locales);
        entries
            .iter()
            .filter_map(|entry| {
                let uid = map.get(&entry.item.uid)?;
                let target = publish_target(&entry.record, environments, locales)?;
                Some(PublishJob {
                    resource: entry.resource.clone(),
                    uid: uid.to_string(),
                    item: entry.item.clone(),
                    target,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ModuleRunner for EntriesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Entries
    }

    async fn start(&mut self) -> Result<()> {
        let content_types = self.content_types()?;
        if content_types.is_empty() {
            info!("no exported content types, skipping entries");
            return Ok(());
        }
        let locales = self.locales().await?;
        let urls = self
            .ctx
            .mapper
            .read_table(ModuleKind::Assets.as_str(), URL_MAPPING_FILE)?;

        let mut all = Vec::new();
        let mut with_references = Vec::new();
        for locale in &locales {
            let mut entries = Vec::new();
            for content_type in &content_types {
                entries.extend(self.read(content_type, locale)?);
            }
            if entries.is_empty() {
                continue;
            }
            debug!(locale = %locale, entries = entries.len(), "importing locale");
            all.extend(entries.iter().cloned());
            with_references.extend(self.import_locale(entries, &urls).await?);
        }

        let linked = self.link_references(with_references).await?;
        let published = publish_all(&self.ctx, self.publish_jobs(&all)).await?;
        info!(
            entries = all.len(),
            references_linked = linked,
            published = published.succeeded,
            "entries imported"
        );
        Ok(())
    }
}
