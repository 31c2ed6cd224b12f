//! Marketplace app import: install each app, then restore its
//! configuration when the export carried one.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{create_all, read_document, update_all, CreateSpec, PendingItem};
use crate::client::Resource;
use crate::error::Result;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;

/// Configuration keys restored by the install step.
const CONFIGURATION_KEYS: [&str; 2] = ["configuration", "server_configuration"];

/// Imports marketplace app installations.
pub struct MarketplaceAppsImporter {
    ctx: ModuleContext,
}

impl MarketplaceAppsImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    /// Installation request for an exported installation record.
    fn installation(&self, record: &Value) -> Option<PendingItem> {
        let uid = record.get("uid")?.as_str()?.to_string();
        let Some(app_uid) = record.pointer("/manifest/uid").and_then(Value::as_str) else {
            warn!(installation = %uid, "installation has no app manifest, skipping");
            return None;
        };
        let name = record
            .pointer("/manifest/name")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(PendingItem {
            uid,
            title: name,
            locale: None,
            payload: json!({
                "app_uid": app_uid,
                "manifest": {"uid": app_uid},
                "target_type": "stack",
                "target_uid": self.ctx.config.stack.api_key,
            }),
        })
    }
}

/// Configuration carried by an exported installation, if any.
fn configuration(record: &Value) -> Option<Value> {
    let mut config = Map::new();
    for key in CONFIGURATION_KEYS {
        match record.get(key) {
            Some(Value::Object(fields)) if !fields.is_empty() => {
                config.insert(key.to_string(), Value::Object(fields.clone()));
            }
            _ => {}
        }
    }
    (!config.is_empty()).then_some(Value::Object(config))
}

#[async_trait]
impl ModuleRunner for MarketplaceAppsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::MarketplaceApps
    }

    async fn start(&mut self) -> Result<()> {
        let Some(records) = read_document(&self.ctx)? else {
            info!("no exported marketplace apps, skipping");
            return Ok(());
        };

        let installs: Vec<PendingItem> = records
            .values()
            .filter_map(|record| self.installation(record))
            .collect();
        let map = create_all(
            &self.ctx,
            CreateSpec::new(&Resource::AppInstallation, "/manifest/uid").process(process::INSTALL),
            installs,
        )
        .await?;

        let mut configure = Vec::new();
        for (old, record) in &records {
            let (Some(new), Some(config)) = (map.get(old), configuration(record)) else {
                continue;
            };
            let mut item = self.installation(record).unwrap_or_else(|| PendingItem {
                uid: old.clone(),
                title: None,
                locale: None,
                payload: Value::Null,
            });
            item.payload = config;
            configure.push((new.to_string(), item));
        }
        let configured =
            update_all(&self.ctx, &Resource::AppInstallation, process::CONFIGURE, configure).await?;

        info!(
            installed = map.len(),
            configured = configured.succeeded,
            "marketplace apps imported"
        );
        Ok(())
    }
}
