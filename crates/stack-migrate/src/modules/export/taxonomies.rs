//! Taxonomy export: taxonomies plus one term file per taxonomy.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{get_count, get_items, require_count};
use crate::client::{Query, Resource};
use crate::error::Result;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::store::{create_folder_if_not_exist, write_json_file};

/// Sub-directory holding `<taxonomy uid>.json` term lists.
pub const TERMS_DIR: &str = "terms";

/// Exports taxonomies and their terms.
pub struct TaxonomiesExporter {
    ctx: ModuleContext,
}

impl TaxonomiesExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    async fn export_terms(&self, taxonomy: &str) -> Result<usize> {
        let resource = Resource::Term {
            taxonomy: taxonomy.to_string(),
        };
        let Some(total) = get_count(&self.ctx, &resource, &Query::default()).await else {
            warn!(taxonomy, "terms could not be counted, skipping");
            self.ctx.progress.failure(process::TERMS, 1);
            return Ok(0);
        };

        let mut terms = Vec::new();
        get_items(&self.ctx, &resource, &Query::default(), total, process::TERMS, |page| {
            terms.extend(page);
            Ok(())
        })
        .await?;

        let count = terms.len();
        write_json_file(
            &self
                .ctx
                .module_dir()
                .join(TERMS_DIR)
                .join(format!("{}.json", taxonomy)),
            &terms,
        )?;
        Ok(count)
    }
}

#[async_trait]
impl ModuleRunner for TaxonomiesExporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Taxonomies
    }

    async fn start(&mut self) -> Result<()> {
        create_folder_if_not_exist(&self.ctx.module_dir())?;

        let total = require_count(&self.ctx, &Resource::Taxonomy, &Query::default()).await?;
        let mut taxonomies: BTreeMap<String, Value> = BTreeMap::new();
        get_items(
            &self.ctx,
            &Resource::Taxonomy,
            &Query::default(),
            total,
            process::ITEMS,
            |page| {
                for taxonomy in page {
                    if let Some(uid) = taxonomy.get("uid").and_then(Value::as_str) {
                        taxonomies.insert(uid.to_string(), taxonomy.clone());
                    }
                }
                Ok(())
            },
        )
        .await?;

        write_json_file(&self.ctx.primary_file(), &taxonomies)?;

        let mut terms = 0;
        for uid in taxonomies.keys() {
            terms += self.export_terms(uid).await?;
        }
        info!(taxonomies = taxonomies.len(), terms, "taxonomies exported");
        Ok(())
    }
}
