//! Taxonomy import: taxonomies, then each taxonomy's terms parent-first.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{create_all, create_tree, pending_items, read_document, CreateSpec, PendingItem};
use crate::client::Resource;
use crate::error::Result;
use crate::modules::export::TERMS_DIR;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::store::read_json_file;

/// Mapper table of one taxonomy's terms.
fn terms_table(taxonomy: &str) -> String {
    format!("terms-{}.json", taxonomy)
}

/// Imports taxonomies and their terms.
pub struct TaxonomiesImporter {
    ctx: ModuleContext,
}

impl TaxonomiesImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    async fn import_terms(&self, taxonomy: &str, target: &str) -> Result<usize> {
        let path = self
            .ctx
            .module_dir()
            .join(TERMS_DIR)
            .join(format!("{}.json", taxonomy));
        let Some(terms) = read_json_file::<Vec<Value>>(&path)? else {
            return Ok(0);
        };

        let items: Vec<PendingItem> = terms
            .iter()
            .filter_map(|term| PendingItem::from_record(term, "uid", true))
            .collect();
        let resource = Resource::Term {
            taxonomy: target.to_string(),
        };
        let table = terms_table(taxonomy);
        let spec = CreateSpec::new(&resource, "/uid")
            .process(process::TERMS)
            .table(&table);
        let mapped = create_tree(&self.ctx, spec, "parent_uid", items).await?;
        Ok(mapped.len())
    }
}

#[async_trait]
impl ModuleRunner for TaxonomiesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Taxonomies
    }

    async fn start(&mut self) -> Result<()> {
        let Some(records) = read_document(&self.ctx)? else {
            info!("no exported taxonomies, skipping");
            return Ok(());
        };

        let items = pending_items(&records, "uid", true);
        let map = create_all(&self.ctx, CreateSpec::new(&Resource::Taxonomy, "/uid"), items).await?;

        let mut terms = 0;
        for (old, new) in map.iter() {
            terms += self.import_terms(old, new).await?;
        }
        info!(taxonomies = map.len(), terms, "taxonomies imported");
        Ok(())
    }
}
