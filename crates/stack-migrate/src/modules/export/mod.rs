//! Module exporters.
//!
//! An exporter walks the module's state machine:
//! counting, fetching structure (folders, terms), fetching items and,
//! for assets, downloading binaries. Pages are fetched through the
//! module's [`BoundedCaller`](crate::concurrency::BoundedCaller); a page
//! that keeps failing is counted as failed and the module moves on.

mod assets;
mod entries;
mod locales;
mod settings;
mod taxonomies;

pub use assets::{
    local_file_name, AssetsExporter, DownloadIndex, DOWNLOADS_FILE, FILES_DIR, FOLDERS_FILE,
    VERSIONS_DIR,
};
pub use entries::EntriesExporter;
pub use locales::{read_exported_locales, ExportedLocales, LocalesExporter, MASTER_LOCALE_FILE};
pub use settings::StackSettingsExporter;
pub use taxonomies::{TaxonomiesExporter, TERMS_DIR};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{list_resource, ModuleContext, ModuleKind, ModuleRunner};
use crate::client::{Query, Resource};
use crate::concurrency::BatchOutcome;
use crate::error::{Error, Result};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::{create_folder_if_not_exist, write_json_file};

/// Roles every stack ships with; they are never exported or created.
pub(crate) const BUILT_IN_ROLES: [&str; 3] = ["Admin", "Developer", "Content Manager"];

/// Counts the entities matching `query`.
///
/// Returns `None` when the count cannot be obtained after retries, so the
/// caller decides whether that is fatal.
pub async fn get_count(ctx: &ModuleContext, resource: &Resource, query: &Query) -> Option<u64> {
    let label = format!("count {}", resource.plural_key());
    match with_retry(&ctx.config.retry, &label, || ctx.client.count(resource, query)).await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(
                module = ctx.kind.as_str(),
                resource = resource.plural_key(),
                "count failed: {}",
                e
            );
            None
        }
    }
}

/// Count that the module cannot do without.
pub(crate) async fn require_count(
    ctx: &ModuleContext,
    resource: &Resource,
    query: &Query,
) -> Result<u64> {
    get_count(ctx, resource, query).await.ok_or_else(|| {
        Error::Structural(format!(
            "cannot count {} of {}",
            resource.plural_key(),
            ctx.kind.display_name()
        ))
    })
}

/// Fetches `total` entities page by page and hands every page to `sink`.
///
/// With `total == 0` no call is issued. A page that fails after retries is
/// counted against `process` and skipped.
pub async fn get_items<S>(
    ctx: &ModuleContext,
    resource: &Resource,
    base: &Query,
    total: u64,
    process: &str,
    mut sink: S,
) -> Result<BatchOutcome>
where
    S: FnMut(Vec<Value>) -> Result<()>,
{
    if total == 0 {
        return Ok(BatchOutcome::default());
    }

    let limit = ctx.settings.batch_limit.max(1);
    let pages: Vec<Query> = (0..total)
        .step_by(usize::try_from(limit).unwrap_or(usize::MAX))
        .map(|skip| Query {
            skip,
            limit,
            params: base.params.clone(),
        })
        .collect();

    ctx.progress.add_total(process, total);
    let client = &ctx.client;
    let progress = &ctx.progress;
    let label = format!("fetch {}", resource.plural_key());

    ctx.reader()
        .run(
            &label,
            pages,
            |page| async move { client.find(resource, &page).await },
            |_, items| {
                progress.success(process, items.len() as u64);
                sink(items)
            },
            |page, e| {
                let missed = limit.min(total.saturating_sub(page.skip));
                warn!(
                    module = ctx.kind.as_str(),
                    skip = page.skip,
                    "page failed: {}",
                    e
                );
                progress.failure(process, missed);
            },
        )
        .await
}

/// Exporter for modules that are a flat list of entities, written as one
/// document keyed by uid.
pub struct ListExporter {
    ctx: ModuleContext,
}

impl ListExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    fn keep(&self, item: &Value) -> bool {
        match self.ctx.kind {
            ModuleKind::CustomRoles => item
                .get("name")
                .and_then(Value::as_str)
                .map_or(true, |name| !BUILT_IN_ROLES.contains(&name)),
            _ => true,
        }
    }
}

#[async_trait]
impl ModuleRunner for ListExporter {
    fn kind(&self) -> ModuleKind {
        self.ctx.kind
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let resource = list_resource(ctx.kind).ok_or_else(|| {
            Error::Structural(format!("{} is not a list module", ctx.kind.display_name()))
        })?;
        create_folder_if_not_exist(&ctx.module_dir())?;

        let total = require_count(ctx, &resource, &Query::default()).await?;
        let id_field = resource.id_field();
        let mut items: BTreeMap<String, Value> = BTreeMap::new();
        let outcome = get_items(ctx, &resource, &Query::default(), total, process::ITEMS, |page| {
            for item in page.into_iter().filter(|item| self.keep(item)) {
                let key = item
                    .get(id_field)
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("item-{}", items.len()), str::to_string);
                items.insert(key, item);
            }
            Ok(())
        })
        .await?;

        write_json_file(&ctx.primary_file(), &items)?;
        info!(
            module = ctx.kind.as_str(),
            exported = items.len(),
            failed_pages = outcome.failed,
            "export complete"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "export_tests.rs"]
mod tests;
