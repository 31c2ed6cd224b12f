// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # stack-migrate
//!
//! `stack-migrate` is a CLI tool and library for moving structured content
//! (assets, content models, entries, settings) between two stacks of a
//! content platform while keeping every cross-module reference valid.
//!
//! ## Modules
//!
//! | Module | Export | Import remaps |
//! |--------|--------|---------------|
//! | stack settings | settings | default live preview environment |
//! | locales | all locales, master apart | fallback locale |
//! | environments, extensions, webhooks | all | (writes uid map) |
//! | assets | folders, metadata chunks, binaries, versions | parent folder, urls |
//! | global fields, content types | all | schema references (two passes) |
//! | taxonomies | taxonomies and terms | parent term |
//! | labels, workflows, custom roles | all | content types, roles, environments |
//! | entries | per content type and locale | assets, entry references, publishing |
//! | marketplace apps, personalize | installations, projects | target stack |
//!
//! ## Quick Start
//!
//! ```bash
//! # Export the source stack into ./content
//! stack-migrate export --config migration.yaml
//!
//! # Import it (reads a backup copy of ./content)
//! stack-migrate import --config migration.yaml --dry-run
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! stack:
//!   api_key: blt0123456789
//!   management_token: cs0123456789
//! data_dir: ./content
//! modules:
//!   types: [environments, assets, content-types, entries]
//!   assets:
//!     include_versioned_assets: true
//! defaults:
//!   batch_limit: 100
//!   fetch_concurrency: 5
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod mapper;
pub mod modules;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod store;

pub use client::{SharedClient, StackClient};
pub use config::{ModuleSettings, RunConfig};
pub use error::{Error, Result};
pub use mapper::{UidMap, UidMapper};
pub use modules::{ModuleKind, ModuleRunner};
pub use orchestrator::{BranchSummary, Exporter, Importer, RunSummary};
pub use progress::{ModuleSummary, ResultCounts};
