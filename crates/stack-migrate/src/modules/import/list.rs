//! Importer for modules that are a flat list of entities.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{create_all, pending_items, read_document, set_field, CreateSpec, PendingItem};
use crate::config::WebhookStatus;
use crate::error::{Error, Result};
use crate::mapper::UidMap;
use crate::modules::export::BUILT_IN_ROLES;
use crate::modules::refs::ReferenceRewriter;
use crate::modules::{list_resource, ModuleContext, ModuleKind, ModuleRunner, Prerequisites};

/// Content type selector meaning "every content type".
const ALL_CONTENT_TYPES: &str = "$all";

/// Imports environments, extensions, webhooks, workflows, custom roles
/// and personalization projects.
pub struct ListImporter {
    ctx: ModuleContext,
    prerequisites: Prerequisites,
}

impl ListImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(ctx: ModuleContext, prerequisites: Prerequisites) -> Self {
        Self { ctx, prerequisites }
    }

    /// Field an existing entity is recognised by.
    fn identity(&self) -> &'static str {
        match self.ctx.kind {
            ModuleKind::Extensions => "/title",
            _ => "/name",
        }
    }

    fn keep(&self, item: &PendingItem) -> bool {
        match self.ctx.kind {
            ModuleKind::CustomRoles => item
                .title
                .as_deref()
                .map_or(true, |name| !BUILT_IN_ROLES.contains(&name)),
            _ => true,
        }
    }

    /// Module-specific rewriting of the payload.
    fn prepare(&self, item: &mut PendingItem) {
        let payload = &mut item.payload;
        match self.ctx.kind {
            ModuleKind::Webhooks => {
                if self.ctx.config.import_webhook_status == WebhookStatus::Disable {
                    set_field(payload, "disabled", json!(true));
                }
            }
            ModuleKind::Workflows => self.remap_workflow(payload),
            ModuleKind::CustomRoles => self.remap_role(payload),
            ModuleKind::Personalize => {
                set_field(
                    payload,
                    "connectedStackApiKey",
                    json!(self.ctx.config.stack.api_key),
                );
            }
            _ => {}
        }
    }

    fn remap_workflow(&self, workflow: &mut Value) {
        if let Some(content_types) = self.prerequisites.get(ModuleKind::ContentTypes) {
            remap_content_types(workflow.get_mut("content_types"), content_types);
        }
        let Some(roles) = self.prerequisites.get(ModuleKind::CustomRoles) else {
            return;
        };
        let mut rewriter = ReferenceRewriter::new(ModuleKind::CustomRoles.as_str(), roles);
        if let Some(Value::Array(stages)) = workflow.get_mut("workflow_stages") {
            for stage in stages {
                rewriter.rewrite_pointer(stage, "/SYS_ACL/roles/uids");
            }
        }
    }

    fn remap_role(&self, role: &mut Value) {
        let Some(Value::Array(rules)) = role.get_mut("rules") else {
            return;
        };
        for rule in rules {
            let (kind, field) = match rule.get("module").and_then(Value::as_str) {
                Some("environment") => (ModuleKind::Environments, "environments"),
                Some("locale") => (ModuleKind::Locales, "locales"),
                Some("content_type") => (ModuleKind::ContentTypes, "content_types"),
                _ => continue,
            };
            let Some(map) = self.prerequisites.get(kind) else {
                continue;
            };
            if kind == ModuleKind::ContentTypes {
                remap_content_types(rule.get_mut(field), map);
            } else {
                ReferenceRewriter::new(kind.as_str(), map).rewrite_pointer(rule, &format!("/{}", field));
            }
        }
    }
}

/// Rewrites a content type list, leaving the `$all` selector alone.
fn remap_content_types(value: Option<&mut Value>, map: &UidMap) {
    let Some(Value::Array(uids)) = value else {
        return;
    };
    let mut rewriter = ReferenceRewriter::new(ModuleKind::ContentTypes.as_str(), map);
    for uid in uids.iter_mut().filter(|uid| uid.as_str() != Some(ALL_CONTENT_TYPES)) {
        rewriter.rewrite(uid);
    }
}

#[async_trait]
impl ModuleRunner for ListImporter {
    fn kind(&self) -> ModuleKind {
        self.ctx.kind
    }

    async fn start(&mut self) -> Result<()> {
        let resource = list_resource(self.ctx.kind).ok_or_else(|| {
            Error::Structural(format!("{} is not a list module", self.ctx.kind.display_name()))
        })?;
        let Some(records) = read_document(&self.ctx)? else {
            info!(module = self.ctx.kind.as_str(), "nothing exported, skipping");
            return Ok(());
        };

        let mut items: Vec<PendingItem> = pending_items(&records, resource.id_field(), false)
            .into_iter()
            .filter(|item| self.keep(item))
            .collect();
        for item in &mut items {
            self.prepare(item);
        }

        let mapped = create_all(&self.ctx, CreateSpec::new(&resource, self.identity()), items).await?;
        info!(
            module = self.ctx.kind.as_str(),
            imported = mapped.len(),
            "import complete"
        );
        Ok(())
    }
}
