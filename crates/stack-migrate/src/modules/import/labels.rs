//! Label import.
//!
//! Labels form a tree through `parent`, a list of label uids. They are
//! created flat first, then updated with their parents once every label
//! has a target uid.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{create_all, pending_items, read_document, update_all, CreateSpec, PendingItem};
use crate::client::Resource;
use crate::error::Result;
use crate::mapper::UidMap;
use crate::modules::refs::ReferenceRewriter;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner, Prerequisites};
use crate::progress::process;

/// Imports labels.
pub struct LabelsImporter {
    ctx: ModuleContext,
    prerequisites: Prerequisites,
}

impl LabelsImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(ctx: ModuleContext, prerequisites: Prerequisites) -> Self {
        Self { ctx, prerequisites }
    }

    fn remap_content_types(&self, label: &mut Value) {
        if let Some(map) = self.prerequisites.get(ModuleKind::ContentTypes) {
            ReferenceRewriter::new(ModuleKind::ContentTypes.as_str(), map)
                .rewrite_pointer(label, "/content_types");
        }
    }
}

fn has_parent(item: &PendingItem) -> bool {
    item.payload
        .get("parent")
        .and_then(Value::as_array)
        .is_some_and(|parents| !parents.is_empty())
}

#[async_trait]
impl ModuleRunner for LabelsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Labels
    }

    async fn start(&mut self) -> Result<()> {
        let Some(records) = read_document(&self.ctx)? else {
            info!("no exported labels, skipping");
            return Ok(());
        };

        let mut items = pending_items(&records, "uid", false);
        for item in &mut items {
            self.remap_content_types(&mut item.payload);
        }
        let children: Vec<PendingItem> = items.iter().filter(|i| has_parent(i)).cloned().collect();

        let flat: Vec<PendingItem> = items
            .into_iter()
            .map(|mut item| {
                if let Value::Object(fields) = &mut item.payload {
                    fields.remove("parent");
                }
                item
            })
            .collect();
        let map: UidMap = create_all(&self.ctx, CreateSpec::new(&Resource::Label, "/name"), flat).await?;

        let mut updates = Vec::new();
        let mut rewriter = ReferenceRewriter::new(ModuleKind::Labels.as_str(), &map);
        for mut item in children {
            let Some(new_uid) = map.get(&item.uid) else {
                continue;
            };
            rewriter.rewrite_pointer(&mut item.payload, "/parent");
            updates.push((new_uid.to_string(), item));
        }
        let parented = update_all(&self.ctx, &Resource::Label, process::REFERENCES, updates).await?;

        info!(
            labels = map.len(),
            parents_linked = parented.succeeded,
            "labels imported"
        );
        Ok(())
    }
}
