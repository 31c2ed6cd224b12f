//! Stack settings export.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::modules::{ModuleContext, ModuleKind, ModuleRunner};
use crate::progress::process;
use crate::retry::with_retry;
use crate::store::{create_folder_if_not_exist, write_json_file};

/// Exports the stack settings document.
pub struct StackSettingsExporter {
    ctx: ModuleContext,
}

impl StackSettingsExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ModuleRunner for StackSettingsExporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::StackSettings
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        create_folder_if_not_exist(&ctx.module_dir())?;
        ctx.progress.add_total(process::ITEMS, 1);

        let settings = match with_retry(&ctx.config.retry, "stack settings", || {
            ctx.client.stack_settings()
        })
        .await
        {
            Ok(settings) => settings,
            Err(e) => {
                ctx.progress.failure(process::ITEMS, 1);
                return Err(e);
            }
        };

        write_json_file(&ctx.primary_file(), &settings)?;
        ctx.progress.success(process::ITEMS, 1);
        info!("stack settings exported");
        Ok(())
    }
}
