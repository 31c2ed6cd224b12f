//! Remote stack API seen as a capability interface.
//!
//! The engine never talks HTTP directly; modules speak to a
//! [`StackClient`]. Two implementations ship with the crate:
//!
//! - [`http::HttpStackClient`] for the content management REST API
//! - [`memory::MemoryStack`] an in-process stack used for dry runs and tests

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

/// A kind of remote entity, with any parent scope it needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// Asset metadata (files only, folders excluded).
    Asset,
    /// Asset folder.
    AssetFolder,
    /// Earlier versions of one asset.
    AssetVersion {
        /// Asset uid.
        asset: String,
    },
    /// Content type schema.
    ContentType,
    /// Global field schema.
    GlobalField,
    /// Entry of one content type in one locale.
    Entry {
        /// Content type uid.
        content_type: String,
        /// Locale code.
        locale: String,
    },
    /// Publishing environment.
    Environment,
    /// Locale.
    Locale,
    /// UI extension / custom field.
    Extension,
    /// Label.
    Label,
    /// Webhook.
    Webhook,
    /// Workflow.
    Workflow,
    /// Custom role.
    Role,
    /// Taxonomy.
    Taxonomy,
    /// Term of one taxonomy.
    Term {
        /// Taxonomy uid.
        taxonomy: String,
    },
    /// Marketplace app installation.
    AppInstallation,
    /// Personalization project.
    PersonalizeProject,
}

impl Resource {
    /// Path of the collection relative to its API host.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Asset | Self::AssetFolder => "assets".to_string(),
            Self::AssetVersion { asset } => format!("assets/{}/versions", asset),
            Self::ContentType => "content_types".to_string(),
            Self::GlobalField => "global_fields".to_string(),
            Self::Entry { content_type, .. } => format!("content_types/{}/entries", content_type),
            Self::Environment => "environments".to_string(),
            Self::Locale => "locales".to_string(),
            Self::Extension => "extensions".to_string(),
            Self::Label => "labels".to_string(),
            Self::Webhook => "webhooks".to_string(),
            Self::Workflow => "workflows".to_string(),
            Self::Role => "roles".to_string(),
            Self::Taxonomy => "taxonomies".to_string(),
            Self::Term { taxonomy } => format!("taxonomies/{}/terms", taxonomy),
            Self::AppInstallation => "installations".to_string(),
            Self::PersonalizeProject => "projects".to_string(),
        }
    }

    /// JSON key wrapping a single entity in requests and responses.
    #[must_use]
    pub fn singular_key(&self) -> &'static str {
        match self {
            Self::Asset | Self::AssetFolder | Self::AssetVersion { .. } => "asset",
            Self::ContentType => "content_type",
            Self::GlobalField => "global_field",
            Self::Entry { .. } => "entry",
            Self::Environment => "environment",
            Self::Locale => "locale",
            Self::Extension => "extension",
            Self::Label => "label",
            Self::Webhook => "webhook",
            Self::Workflow => "workflow",
            Self::Role => "role",
            Self::Taxonomy => "taxonomy",
            Self::Term { .. } => "term",
            Self::AppInstallation => "installation",
            Self::PersonalizeProject => "project",
        }
    }

    /// JSON key holding a list of entities in responses.
    #[must_use]
    pub fn plural_key(&self) -> &'static str {
        match self {
            Self::Asset | Self::AssetFolder => "assets",
            Self::AssetVersion { .. } => "versions",
            Self::ContentType => "content_types",
            Self::GlobalField => "global_fields",
            Self::Entry { .. } => "entries",
            Self::Environment => "environments",
            Self::Locale => "locales",
            Self::Extension => "extensions",
            Self::Label => "labels",
            Self::Webhook => "webhooks",
            Self::Workflow => "workflows",
            Self::Role => "roles",
            Self::Taxonomy => "taxonomies",
            Self::Term { .. } => "terms",
            Self::AppInstallation => "data",
            Self::PersonalizeProject => "projects",
        }
    }

    /// Field that identifies the entity (`uid` for most kinds).
    #[must_use]
    pub fn id_field(&self) -> &'static str {
        match self {
            Self::Locale => "code",
            _ => "uid",
        }
    }
}

/// Pagination window plus extra query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Items to skip.
    pub skip: u64,
    /// Page size; zero means the API default.
    pub limit: u64,
    /// Additional parameters passed through verbatim.
    pub params: BTreeMap<String, String>,
}

impl Query {
    /// Query for the page starting at `skip`.
    #[must_use]
    pub fn page(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit,
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// A stack branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch uid (e.g. `main`).
    pub uid: String,
    /// Branch it was forked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Where an item should be published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishTarget {
    /// Environment uids (target stack).
    pub environments: Vec<String>,
    /// Locale codes.
    pub locales: Vec<String>,
}

/// Capability interface of a remote stack.
///
/// Implementations must be cheap to share behind an [`Arc`]; every module
/// of a run holds one.
#[async_trait]
pub trait StackClient: Send + Sync {
    /// Implementation name for logs.
    fn name(&self) -> &'static str;

    /// Client scoped to `branch` (`None` = default branch).
    fn scoped(&self, branch: Option<&str>) -> Arc<dyn StackClient>;

    /// Branches of the stack, or `None` if the stack has no branch support.
    async fn branches(&self) -> Result<Option<Vec<Branch>>>;

    /// Number of entities matching `query`.
    async fn count(&self, resource: &Resource, query: &Query) -> Result<u64>;

    /// One page of entities.
    async fn find(&self, resource: &Resource, query: &Query) -> Result<Vec<Value>>;

    /// Creates an entity and returns it as stored (with its new uid).
    async fn create(&self, resource: &Resource, payload: Value) -> Result<Value>;

    /// Replaces an entity.
    async fn update(&self, resource: &Resource, uid: &str, payload: Value) -> Result<Value>;

    /// Uploads an asset binary with its metadata.
    async fn upload_asset(&self, metadata: Value, file_name: &str, bytes: Vec<u8>) -> Result<Value>;

    /// Downloads a binary from an asset url. `authenticated` sends the
    /// stack credentials along (secured assets).
    async fn download(&self, url: &str, authenticated: bool) -> Result<Vec<u8>>;

    /// Publishes an entity.
    async fn publish(&self, resource: &Resource, uid: &str, target: &PublishTarget) -> Result<()>;

    /// Code of the stack's master locale.
    async fn master_locale(&self) -> Result<String>;

    /// Stack-level settings.
    async fn stack_settings(&self) -> Result<Value>;

    /// Applies stack-level settings.
    async fn add_settings(&self, settings: Value) -> Result<Value>;
}

/// Shared handle to a client.
pub type SharedClient = Arc<dyn StackClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_resource_paths() {
        let entry = Resource::Entry {
            content_type: "blog".to_string(),
            locale: "en-us".to_string(),
        };
        assert_eq!(entry.path(), "content_types/blog/entries");
        assert_eq!(entry.singular_key(), "entry");
        assert_eq!(entry.plural_key(), "entries");
    }

    #[test]
    fn test_locale_identified_by_code() {
        assert_eq!(Resource::Locale.id_field(), "code");
        assert_eq!(Resource::Environment.id_field(), "uid");
    }

    #[test]
    fn test_query_builder() {
        let q = Query::page(100, 50).param("locale", "fr-fr");
        assert_eq!(q.skip, 100);
        assert_eq!(q.params.get("locale").map(String::as_str), Some("fr-fr"));
    }
}
