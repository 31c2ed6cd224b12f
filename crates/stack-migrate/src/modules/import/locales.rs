//! Locale import.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{create_tree, CreateSpec, PendingItem};
use crate::client::Resource;
use crate::error::Result;
use crate::modules::export::read_exported_locales;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::retry::with_retry;

/// Creates the exported locales on the target.
///
/// The source master locale is never created; it is mapped onto the
/// target's master locale so fallbacks and localized entries follow it.
pub struct LocalesImporter {
    ctx: ModuleContext,
}

impl LocalesImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ModuleRunner for LocalesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Locales
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let Some(exported) = read_exported_locales(&ctx.module_dir(), &ctx.settings.file_name)?
        else {
            info!("no exported locales, skipping");
            return Ok(());
        };

        let target_master = with_retry(&ctx.config.retry, "master locale", || {
            ctx.client.master_locale()
        })
        .await?;
        ctx.mapper
            .write(ctx.map_key(), &exported.master, &target_master)?;

        let items: Vec<PendingItem> = exported
            .others
            .values()
            .filter_map(|record| PendingItem::from_record(record, "code", true))
            .map(|mut item| {
                if let Value::Object(fields) = &mut item.payload {
                    fields.retain(|k, _| matches!(k.as_str(), "code" | "name" | "fallback_locale"));
                }
                item
            })
            .collect();

        let mapped = create_tree(
            ctx,
            CreateSpec::new(&Resource::Locale, "/code"),
            "fallback_locale",
            items,
        )
        .await?;
        info!(
            master = %target_master,
            imported = mapped.len(),
            "locales imported"
        );
        Ok(())
    }
}
