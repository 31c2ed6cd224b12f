//! Locale export. The master locale is kept apart from the others.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::{get_items, require_count};
use crate::client::{Query, Resource};
use crate::error::Result;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::{create_folder_if_not_exist, read_json_file, write_json_file};

/// File holding the master locale, keyed by code.
pub const MASTER_LOCALE_FILE: &str = "master-locale.json";

/// Locales found in an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedLocales {
    /// Master locale code of the source stack.
    pub master: String,
    /// Other locale records, keyed by code.
    pub others: BTreeMap<String, Value>,
}

impl ExportedLocales {
    /// Every code, master first.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        std::iter::once(self.master.clone())
            .chain(self.others.keys().filter(|c| **c != self.master).cloned())
            .collect()
    }
}

/// Reads the locales written by [`LocalesExporter`] from `dir`.
///
/// `None` when the locales module was not exported.
pub fn read_exported_locales(dir: &Path, file_name: &str) -> Result<Option<ExportedLocales>> {
    let master: Option<BTreeMap<String, Value>> = read_json_file(&dir.join(MASTER_LOCALE_FILE))?;
    let Some(master) = master.and_then(|m| m.into_keys().next()) else {
        return Ok(None);
    };
    let others: BTreeMap<String, Value> =
        read_json_file(&dir.join(file_name))?.unwrap_or_default();
    Ok(Some(ExportedLocales { master, others }))
}

/// Exports the locale module.
pub struct LocalesExporter {
    ctx: ModuleContext,
}

impl LocalesExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ModuleRunner for LocalesExporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Locales
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        create_folder_if_not_exist(&ctx.module_dir())?;

        let master = with_retry(&ctx.config.retry, "master locale", || {
            ctx.client.master_locale()
        })
        .await?;

        let total = require_count(ctx, &Resource::Locale, &Query::default()).await?;
        let mut all = Vec::new();
        get_items(ctx, &Resource::Locale, &Query::default(), total, process::ITEMS, |page| {
            all.extend(page);
            Ok(())
        })
        .await?;

        let mut master_record = json!({ "code": master, "name": master });
        let mut others = BTreeMap::new();
        for locale in all {
            let Some(code) = locale.get("code").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if code == master {
                master_record = locale;
            } else {
                others.insert(code, locale);
            }
        }

        write_json_file(
            &ctx.module_dir().join(MASTER_LOCALE_FILE),
            &BTreeMap::from([(master.clone(), master_record)]),
        )?;
        write_json_file(&ctx.primary_file(), &others)?;
        info!(master = %master, locales = others.len(), "locales exported");
        Ok(())
    }
}
