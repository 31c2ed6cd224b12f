//! Entry export, one chunk set per content type and locale.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{get_items, read_exported_locales, require_count};
use crate::client::{Query, Resource};
use crate::error::Result;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::{create_folder_if_not_exist, read_json_file, ChunkedJsonWriter};

/// Exports entries under `<entries>/<content type>/<locale>/`.
pub struct EntriesExporter {
    ctx: ModuleContext,
}

impl EntriesExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    async fn locale_codes(&self) -> Result<Vec<String>> {
        let locales_settings = self.ctx.config.module_settings(ModuleKind::Locales);
        let exported = read_exported_locales(
            &self.ctx.dir_of(ModuleKind::Locales),
            &locales_settings.file_name,
        )?;
        match exported {
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

    async fn export_one(&self, content_type: &str, locale: &str) -> Result<u64> {
        let resource = Resource::Entry {
            content_type: content_type.to_string(),
            locale: locale.to_string(),
        };
        let query = Query::default().param("include_publish_details", "true");
        let total = require_count(&self.ctx, &resource, &query).await?;
        if total == 0 {
            debug!(content_type, locale, "no entries");
            return Ok(0);
        }

        let mut writer = ChunkedJsonWriter::create(
            self.ctx.module_dir().join(content_type).join(locale),
            &self.ctx.settings.file_name,
            self.ctx.settings.chunk_limits,
        )?
        .with_meta_keys(&["uid", "title", "locale"]);

        get_items(&self.ctx, &resource, &query, total, process::ITEMS, |page| {
            writer.write_into_file(page)
        })
        .await?;

        let written = writer.len() as u64;
        writer.complete_file()?;
        Ok(written)
    }
}

#[async_trait]
impl ModuleRunner for EntriesExporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Entries
    }

    async fn start(&mut self) -> Result<()> {
        let content_types_settings = self.ctx.config.module_settings(ModuleKind::ContentTypes);
        let schemas: Option<BTreeMap<String, Value>> = read_json_file(
            &self
                .ctx
                .dir_of(ModuleKind::ContentTypes)
                .join(&content_types_settings.file_name),
        )?;
        let Some(schemas) = schemas else {
            info!("no exported content types, nothing to export");
            return Ok(());
        };

        create_folder_if_not_exist(&self.ctx.module_dir())?;
        let locales = self.locale_codes().await?;

        let mut exported = 0;
        for content_type in schemas.keys() {
            for locale in &locales {
                exported += self.export_one(content_type, locale).await?;
            }
        }
        info!(
            content_types = schemas.len(),
            locales = locales.len(),
            entries = exported,
            "entries exported"
        );
        Ok(())
    }
}
