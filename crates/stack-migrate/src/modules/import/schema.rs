//! Two-pass import of content types and global fields.
//!
//! Pass one creates every schema with its reference, global field and
//! extension fields removed, so schemas that point at each other (or at
//! themselves) can all exist. Pass two puts the full schema back with
//! every uid translated.
//!
//! Global fields are imported before content types, so entry references
//! inside a global field cannot be resolved yet. Those global fields are
//! listed in [`PENDING_GLOBAL_FIELDS_FILE`] and completed by the content
//! type import.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{create_all, pending_items, read_document, update_all, CreateSpec, PendingItem};
use crate::client::Resource;
use crate::error::{Error, Result};
use crate::mapper::UidMap;
use crate::modules::refs::ReferenceRewriter;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner, Prerequisites};
use crate::progress::process;
use crate::store::{read_json_file, write_json_file};

/// Global fields waiting for the content type map.
pub const PENDING_GLOBAL_FIELDS_FILE: &str = "pending-references.json";

/// True for a field that points at another schema or an extension.
fn is_linked_field(field: &Value) -> bool {
    field.get("reference_to").is_some() || field.get("extension_uid").is_some()
}

/// True for an entry reference field.
fn is_entry_reference_field(field: &Value) -> bool {
    field.get("data_type").and_then(Value::as_str) == Some("reference")
}

/// Removes every field matching `pred` from a schema tree; returns
/// whether anything was removed.
fn strip_fields(schema: &mut Value, pred: fn(&Value) -> bool) -> bool {
    match schema {
        Value::Array(fields) => {
            let before = fields.len();
            fields.retain(|field| !pred(field));
            let mut stripped = fields.len() != before;
            for field in fields.iter_mut() {
                stripped |= strip_fields(field, pred);
            }
            stripped
        }
        Value::Object(members) => members
            .values_mut()
            .fold(false, |stripped, v| strip_fields(v, pred) | stripped),
        _ => false,
    }
}

/// Maps used to translate a schema.
#[derive(Debug, Clone, Copy, Default)]
struct SchemaMaps<'a> {
    content_types: Option<&'a UidMap>,
    global_fields: Option<&'a UidMap>,
    extensions: Option<&'a UidMap>,
}

impl SchemaMaps<'_> {
    /// Rewrites `reference_to` and `extension_uid` through a schema tree.
    fn remap(&self, schema: &mut Value) {
        match schema {
            Value::Array(fields) => fields.iter_mut().for_each(|f| self.remap(f)),
            Value::Object(members) => {
                let entry_reference = members.get("data_type").and_then(Value::as_str) == Some("reference");
                if let Some(target) = members.get_mut("reference_to") {
                    let (module, map) = if entry_reference {
                        (ModuleKind::ContentTypes, self.content_types)
                    } else {
                        (ModuleKind::GlobalFields, self.global_fields)
                    };
                    if let Some(map) = map {
                        ReferenceRewriter::new(module.as_str(), map).rewrite_each(target);
                    }
                }
                if let (Some(uid), Some(map)) = (members.get_mut("extension_uid"), self.extensions) {
                    ReferenceRewriter::new(ModuleKind::Extensions.as_str(), map).rewrite(uid);
                }
                members.values_mut().for_each(|v| self.remap(v));
            }
            _ => {}
        }
    }
}

/// Imports global fields or content types.
pub struct SchemaImporter {
    ctx: ModuleContext,
    prerequisites: Prerequisites,
}

impl SchemaImporter {
    /// Creates the importer for `ctx.kind` (global fields or content types).
    #[must_use]
    pub fn new(ctx: ModuleContext, prerequisites: Prerequisites) -> Self {
        Self { ctx, prerequisites }
    }

    fn resource(&self) -> Result<Resource> {
        match self.ctx.kind {
            ModuleKind::GlobalFields => Ok(Resource::GlobalField),
            ModuleKind::ContentTypes => Ok(Resource::ContentType),
            other => Err(Error::Structural(format!(
                "{} has no schema",
                other.display_name()
            ))),
        }
    }

    fn pending_path(&self) -> std::path::PathBuf {
        self.ctx
            .mapper
            .module_dir(ModuleKind::GlobalFields.as_str())
            .join(PENDING_GLOBAL_FIELDS_FILE)
    }

    /// Pass two payloads for every created schema that lost fields in
    /// pass one. Global fields keep their entry references stripped and
    /// are returned separately as pending.
    fn full_schemas(
        &self,
        records: &[PendingItem],
        stripped: &BTreeSet<String>,
        own: &UidMap,
    ) -> (Vec<(String, PendingItem)>, Vec<String>) {
        let is_global = self.ctx.kind == ModuleKind::GlobalFields;
        let maps = SchemaMaps {
            content_types: if is_global {
                None
            } else {
                Some(own)
            },
            global_fields: if is_global {
                Some(own)
            } else {
                self.prerequisites.get(ModuleKind::GlobalFields)
            },
            extensions: self.prerequisites.get(ModuleKind::Extensions),
        };

        let mut updates = Vec::new();
        let mut pending = Vec::new();
        for item in records {
            let Some(new) = own.get(&item.uid) else {
                continue;
            };
            if !stripped.contains(&item.uid) {
                continue;
            }
            let mut item = item.clone();
            if let Some(schema) = item.payload.get_mut("schema") {
                if is_global && strip_fields(schema, is_entry_reference_field) {
                    pending.push(item.uid.clone());
                }
                maps.remap(schema);
            }
            updates.push((new.to_string(), item));
        }
        (updates, pending)
    }

    fn record_pending(&self, uids: Vec<String>) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let path = self.pending_path();
        let mut pending: BTreeSet<String> = read_json_file(&path)?.unwrap_or_default();
        pending.extend(uids);
        info!(
            global_fields = pending.len(),
            "global fields with entry references wait for content types"
        );
        write_json_file(&path, &pending)
    }

    /// Completes global fields left pending by the global field import.
    async fn complete_pending(&self, content_types: &UidMap) -> Result<()> {
        let path = self.pending_path();
        let pending: BTreeSet<String> = read_json_file(&path)?.unwrap_or_default();
        if pending.is_empty() {
            return Ok(());
        }
        let Some(global_fields) = self.prerequisites.get(ModuleKind::GlobalFields) else {
            return Ok(());
        };

        let gf_settings = self.ctx.config.module_settings(ModuleKind::GlobalFields);
        let records: std::collections::BTreeMap<String, Value> = read_json_file(
            &self
                .ctx
                .dir_of(ModuleKind::GlobalFields)
                .join(&gf_settings.file_name),
        )?
        .unwrap_or_default();

        let maps = SchemaMaps {
            content_types: Some(content_types),
            global_fields: Some(global_fields),
            extensions: self.prerequisites.get(ModuleKind::Extensions),
        };
        let mut updates = Vec::new();
        for uid in &pending {
            let (Some(record), Some(new)) = (records.get(uid), global_fields.get(uid)) else {
                continue;
            };
            let Some(mut item) = PendingItem::from_record(record, "uid", true) else {
                continue;
            };
            if let Some(schema) = item.payload.get_mut("schema") {
                maps.remap(schema);
            }
            updates.push((new.to_string(), item));
        }

        debug!(global_fields = updates.len(), "completing pending global fields");
        update_all(&self.ctx, &Resource::GlobalField, process::REFERENCES, updates).await?;
        write_json_file(&path, &BTreeSet::<String>::new())
    }
}

#[async_trait]
impl ModuleRunner for SchemaImporter {
    fn kind(&self) -> ModuleKind {
        self.ctx.kind
    }

    async fn start(&mut self) -> Result<()> {
        let resource = self.resource()?;
        let Some(records) = read_document(&self.ctx)? else {
            info!(module = self.ctx.kind.as_str(), "no exported schemas, skipping");
            return Ok(());
        };
        let items = pending_items(&records, "uid", true);

        let mut stripped = BTreeSet::new();
        let skeletons: Vec<PendingItem> = items
            .iter()
            .cloned()
            .map(|mut item| {
                if let Some(schema) = item.payload.get_mut("schema") {
                    if strip_fields(schema, is_linked_field) {
                        stripped.insert(item.uid.clone());
                    }
                }
                item
            })
            .collect();
        let own = create_all(&self.ctx, CreateSpec::new(&resource, "/uid"), skeletons).await?;

        let (updates, pending) = self.full_schemas(&items, &stripped, &own);
        let linked = update_all(&self.ctx, &resource, process::REFERENCES, updates).await?;
        self.record_pending(pending)?;

        if self.ctx.kind == ModuleKind::ContentTypes {
            self.complete_pending(&own).await?;
        }

        info!(
            module = self.ctx.kind.as_str(),
            created = own.len(),
            linked = linked.succeeded,
            "schemas imported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blog_schema() -> Value {
        json!([
            {"uid": "title", "data_type": "text"},
            {"uid": "author", "data_type": "reference", "reference_to": ["person"]},
            {"uid": "seo", "data_type": "global_field", "reference_to": "seo_fields"},
            {"uid": "color", "data_type": "json", "extension_uid": "ext_old"},
            {"uid": "sections", "data_type": "blocks", "blocks": [
                {"uid": "quote", "schema": [
                    {"uid": "source", "data_type": "reference", "reference_to": ["person"]},
                    {"uid": "text", "data_type": "text"}
                ]}
            ]}
        ])
    }

    #[test]
    fn test_skeleton_keeps_plain_fields_only() {
        let mut schema = blog_schema();
        assert!(strip_fields(&mut schema, is_linked_field));

        let uids: Vec<&str> = schema
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["uid"].as_str())
            .collect();
        assert_eq!(uids, vec!["title", "sections"]);
        assert_eq!(schema[1]["blocks"][0]["schema"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_plain_schema_not_stripped() {
        let mut schema = json!([{"uid": "title", "data_type": "text"}]);
        assert!(!strip_fields(&mut schema, is_linked_field));
    }

    #[test]
    fn test_remap_uses_map_per_field_kind() {
        let content_types: UidMap = [("person".to_string(), "person_new".to_string())]
            .into_iter()
            .collect();
        let global_fields: UidMap = [("seo_fields".to_string(), "seo_new".to_string())]
            .into_iter()
            .collect();
        let extensions: UidMap = [("ext_old".to_string(), "ext_new".to_string())]
            .into_iter()
            .collect();
        let maps = SchemaMaps {
            content_types: Some(&content_types),
            global_fields: Some(&global_fields),
            extensions: Some(&extensions),
        };

        let mut schema = blog_schema();
        maps.remap(&mut schema);

        assert_eq!(schema[1]["reference_to"], json!(["person_new"]));
        assert_eq!(schema[2]["reference_to"], "seo_new");
        assert_eq!(schema[3]["extension_uid"], "ext_new");
        assert_eq!(
            schema[4]["blocks"][0]["schema"][0]["reference_to"],
            json!(["person_new"])
        );
    }

    #[test]
    fn test_missing_map_leaves_references() {
        let maps = SchemaMaps::default();
        let mut schema = blog_schema();
        maps.remap(&mut schema);
        assert_eq!(schema, blog_schema());
    }
}
