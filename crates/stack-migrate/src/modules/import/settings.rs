//! Stack settings import.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::mapper::{FailedItem, UidMap};
use crate::modules::refs::ReferenceRewriter;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::read_json_file;

const DEFAULT_ENVIRONMENT: &str = "/live_preview/default-env";

/// Applies the exported stack settings to the target.
///
/// The live preview default environment must point at a target
/// environment, so the environment map is required; without it the
/// module is skipped.
pub struct StackSettingsImporter {
    ctx: ModuleContext,
    environments: Option<UidMap>,
}

impl StackSettingsImporter {
    /// Creates the importer with the environment map, if one exists.
    #[must_use]
    pub fn new(ctx: ModuleContext, environments: Option<UidMap>) -> Self {
        Self { ctx, environments }
    }
}

#[async_trait]
impl ModuleRunner for StackSettingsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::StackSettings
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        let Some(environments) = &self.environments else {
            warn!("environment uid map not found, skipping stack settings");
            return Ok(());
        };
        let Some(mut settings) = read_json_file::<Value>(&ctx.primary_file())? else {
            info!("no exported stack settings, skipping");
            return Ok(());
        };

        let mut rewriter = ReferenceRewriter::new(ModuleKind::Environments.as_str(), environments);
        rewriter.rewrite_pointer(&mut settings, DEFAULT_ENVIRONMENT);

        ctx.progress.add_total(process::ITEMS, 1);
        let applied = with_retry(&ctx.config.retry, "apply stack settings", || {
            ctx.client.add_settings(settings.clone())
        })
        .await;
        match applied {
            Ok(_) => {
                ctx.progress.success(process::ITEMS, 1);
                info!("stack settings applied");
            }
            Err(e) => {
                warn!("stack settings failed: {}", e);
                ctx.progress.failure(process::ITEMS, 1);
                ctx.mapper.record_failures(
                    ctx.map_key(),
                    &[FailedItem {
                        uid: "stack_settings".to_string(),
                        title: None,
                        locale: None,
                        error: e.to_string(),
                    }],
                )?;
            }
        }
        Ok(())
    }
}
