//! Content modules and the runner contract they share.
//!
//! Every module has an exporter and an importer implementing
//! [`ModuleRunner`]. Runners are built by [`create_exporter`] and
//! [`create_importer`] from a static table; importers receive the uid
//! maps of the modules they depend on when they are constructed.

pub mod descriptor;
pub mod export;
pub mod import;
pub mod refs;

pub use descriptor::ModuleKind;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::client::{Resource, SharedClient};
use crate::concurrency::BoundedCaller;
use crate::config::{ModuleSettings, RunConfig};
use crate::error::Result;
use crate::mapper::{UidMap, UidMapper};
use crate::progress::ModuleProgress;

/// Uniform contract of a module exporter or importer.
#[async_trait]
pub trait ModuleRunner: Send {
    /// Module this runner handles.
    fn kind(&self) -> ModuleKind;

    /// Runs the module to completion.
    ///
    /// # Errors
    ///
    /// Only structural failures are returned; item-level failures are
    /// counted and recorded.
    async fn start(&mut self) -> Result<()>;
}

/// Everything a runner needs for one module of one branch.
#[derive(Clone)]
pub struct ModuleContext {
    /// Module being run.
    pub kind: ModuleKind,
    /// Run configuration.
    pub config: Arc<RunConfig>,
    /// Effective settings of this module.
    pub settings: ModuleSettings,
    /// Remote stack, scoped to the branch.
    pub client: SharedClient,
    /// Uid tables of the branch.
    pub mapper: Arc<UidMapper>,
    /// Progress handle of this module.
    pub progress: ModuleProgress,
    /// Content root of the branch.
    pub root: PathBuf,
    /// Branch uid, when the stack is branched.
    pub branch: Option<String>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("kind", &self.kind)
            .field("client", &self.client.name())
            .field("root", &self.root)
            .field("branch", &self.branch)
            .finish()
    }
}

impl ModuleContext {
    /// Builds the context of `kind`.
    #[must_use]
    pub fn new(
        kind: ModuleKind,
        config: Arc<RunConfig>,
        client: SharedClient,
        mapper: Arc<UidMapper>,
        progress: ModuleProgress,
        root: PathBuf,
        branch: Option<String>,
    ) -> Self {
        let settings = config.module_settings(kind);
        Self {
            kind,
            config,
            settings,
            client,
            mapper,
            progress,
            root,
            branch,
        }
    }

    /// Directory of this module's files.
    #[must_use]
    pub fn module_dir(&self) -> PathBuf {
        self.root.join(&self.settings.dir_name)
    }

    /// Directory of another module's files in the same branch.
    #[must_use]
    pub fn dir_of(&self, kind: ModuleKind) -> PathBuf {
        self.root.join(self.config.module_settings(kind).dir_name)
    }

    /// Primary document path of this module.
    #[must_use]
    pub fn primary_file(&self) -> PathBuf {
        self.module_dir().join(&self.settings.file_name)
    }

    /// Caller for read calls.
    #[must_use]
    pub fn reader(&self) -> BoundedCaller {
        BoundedCaller::new(self.settings.fetch_concurrency, self.config.retry.clone())
    }

    /// Caller for write calls.
    #[must_use]
    pub fn writer(&self) -> BoundedCaller {
        BoundedCaller::new(self.settings.write_concurrency, self.config.retry.clone())
    }

    /// Caller for binary downloads.
    #[must_use]
    pub fn downloader(&self) -> BoundedCaller {
        BoundedCaller::new(self.settings.download_limit, self.config.retry.clone())
    }

    /// Mapper key of this module.
    #[must_use]
    pub fn map_key(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Uid maps of an importer's prerequisite modules, loaded at construction.
#[derive(Debug, Clone, Default)]
pub struct Prerequisites {
    maps: BTreeMap<ModuleKind, UidMap>,
}

impl Prerequisites {
    /// Loads the maps of `kinds`; a missing map is logged and skipped.
    pub fn load(mapper: &UidMapper, module: ModuleKind, kinds: &[ModuleKind]) -> Result<Self> {
        let mut maps = BTreeMap::new();
        for kind in kinds {
            match mapper.load(kind.as_str())? {
                Some(map) => {
                    maps.insert(*kind, map);
                }
                None => warn!(
                    module = module.as_str(),
                    prerequisite = kind.as_str(),
                    "uid map not found, references into it will not be rewritten"
                ),
            }
        }
        Ok(Self { maps })
    }

    /// Map of `kind`, if it was available.
    #[must_use]
    pub fn get(&self, kind: ModuleKind) -> Option<&UidMap> {
        self.maps.get(&kind)
    }

    /// Adds a map (used by tests and by importers that build maps in memory).
    pub fn insert(&mut self, kind: ModuleKind, map: UidMap) {
        self.maps.insert(kind, map);
    }
}

/// Remote collection holding a module's entities, for modules that are a
/// plain list.
#[must_use]
pub fn list_resource(kind: ModuleKind) -> Option<Resource> {
    Some(match kind {
        ModuleKind::Locales => Resource::Locale,
        ModuleKind::Environments => Resource::Environment,
        ModuleKind::Extensions => Resource::Extension,
        ModuleKind::MarketplaceApps => Resource::AppInstallation,
        ModuleKind::Assets => Resource::Asset,
        ModuleKind::Taxonomies => Resource::Taxonomy,
        ModuleKind::GlobalFields => Resource::GlobalField,
        ModuleKind::ContentTypes => Resource::ContentType,
        ModuleKind::Personalize => Resource::PersonalizeProject,
        ModuleKind::CustomRoles => Resource::Role,
        ModuleKind::Workflows => Resource::Workflow,
        ModuleKind::Labels => Resource::Label,
        ModuleKind::Webhooks => Resource::Webhook,
        ModuleKind::StackSettings | ModuleKind::Entries => return None,
    })
}

/// Exporter for `ctx.kind`.
#[must_use]
pub fn create_exporter(ctx: ModuleContext) -> Box<dyn ModuleRunner> {
    use export::{
        AssetsExporter, EntriesExporter, ListExporter, LocalesExporter, StackSettingsExporter,
        TaxonomiesExporter,
    };

    match ctx.kind {
        ModuleKind::StackSettings => Box::new(StackSettingsExporter::new(ctx)),
        ModuleKind::Locales => Box::new(LocalesExporter::new(ctx)),
        ModuleKind::Assets => Box::new(AssetsExporter::new(ctx)),
        ModuleKind::Taxonomies => Box::new(TaxonomiesExporter::new(ctx)),
        ModuleKind::Entries => Box::new(EntriesExporter::new(ctx)),
        _ => Box::new(ListExporter::new(ctx)),
    }
}

/// Importer for `ctx.kind`, with its prerequisite maps resolved.
///
/// # Errors
///
/// Returns an error if a prerequisite map exists but cannot be read.
pub fn create_importer(ctx: ModuleContext) -> Result<Box<dyn ModuleRunner>> {
    use import::{
        AssetsImporter, EntriesImporter, LabelsImporter, ListImporter, LocalesImporter,
        MarketplaceAppsImporter, SchemaImporter, StackSettingsImporter, TaxonomiesImporter,
    };

    let prerequisites = Prerequisites::load(&ctx.mapper, ctx.kind, ctx.kind.dependencies())?;

    Ok(match ctx.kind {
        ModuleKind::StackSettings => {
            let environments = prerequisites.get(ModuleKind::Environments).cloned();
            Box::new(StackSettingsImporter::new(ctx, environments))
        }
        ModuleKind::Locales => Box::new(LocalesImporter::new(ctx)),
        ModuleKind::Assets => {
            let environments = prerequisites.get(ModuleKind::Environments).cloned();
            Box::new(AssetsImporter::new(ctx, environments))
        }
        ModuleKind::GlobalFields | ModuleKind::ContentTypes => {
            Box::new(SchemaImporter::new(ctx, prerequisites))
        }
        ModuleKind::Taxonomies => Box::new(TaxonomiesImporter::new(ctx)),
        ModuleKind::Labels => Box::new(LabelsImporter::new(ctx, prerequisites)),
        ModuleKind::MarketplaceApps => Box::new(MarketplaceAppsImporter::new(ctx)),
        ModuleKind::Entries => Box::new(EntriesImporter::new(ctx, prerequisites)),
        ModuleKind::Environments
        | ModuleKind::Extensions
        | ModuleKind::Webhooks
        | ModuleKind::Workflows
        | ModuleKind::CustomRoles
        | ModuleKind::Personalize => Box::new(ListImporter::new(ctx, prerequisites)),
    })
}
