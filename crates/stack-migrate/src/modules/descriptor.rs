//! Static metadata of every content module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// A named category of content exported/imported as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    /// Stack-level settings (live preview, discrete variables).
    StackSettings,
    /// Languages.
    Locales,
    /// Publishing environments.
    Environments,
    /// UI extensions and custom fields.
    Extensions,
    /// Marketplace app installations.
    MarketplaceApps,
    /// Files and folders.
    Assets,
    /// Taxonomies and their terms.
    Taxonomies,
    /// Reusable field groups.
    GlobalFields,
    /// Content models.
    ContentTypes,
    /// Personalization projects.
    Personalize,
    /// Custom roles.
    CustomRoles,
    /// Publishing workflows.
    Workflows,
    /// Content type labels.
    Labels,
    /// Outgoing webhooks.
    Webhooks,
    /// Content entries.
    Entries,
}

impl ModuleKind {
    /// Every module, in the default execution order.
    pub const ALL: [ModuleKind; 15] = [
        Self::Locales,
        Self::Environments,
        Self::StackSettings,
        Self::Extensions,
        Self::MarketplaceApps,
        Self::Assets,
        Self::Taxonomies,
        Self::GlobalFields,
        Self::ContentTypes,
        Self::Personalize,
        Self::CustomRoles,
        Self::Workflows,
        Self::Labels,
        Self::Webhooks,
        Self::Entries,
    ];

    /// Default module list.
    #[must_use]
    pub fn default_order() -> Vec<Self> {
        Self::ALL.to_vec()
    }

    /// Config / mapper key (kebab-case).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StackSettings => "stack-settings",
            Self::Locales => "locales",
            Self::Environments => "environments",
            Self::Extensions => "extensions",
            Self::MarketplaceApps => "marketplace-apps",
            Self::Assets => "assets",
            Self::Taxonomies => "taxonomies",
            Self::GlobalFields => "global-fields",
            Self::ContentTypes => "content-types",
            Self::Personalize => "personalize",
            Self::CustomRoles => "custom-roles",
            Self::Workflows => "workflows",
            Self::Labels => "labels",
            Self::Webhooks => "webhooks",
            Self::Entries => "entries",
        }
    }

    /// Human-readable name used in progress and summaries.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::StackSettings => "Stack Settings",
            Self::Locales => "Locales",
            Self::Environments => "Environments",
            Self::Extensions => "Extensions",
            Self::MarketplaceApps => "Marketplace Apps",
            Self::Assets => "Assets",
            Self::Taxonomies => "Taxonomies",
            Self::GlobalFields => "Global Fields",
            Self::ContentTypes => "Content Types",
            Self::Personalize => "Personalize",
            Self::CustomRoles => "Custom Roles",
            Self::Workflows => "Workflows",
            Self::Labels => "Labels",
            Self::Webhooks => "Webhooks",
            Self::Entries => "Entries",
        }
    }

    /// Default directory under the data root.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::StackSettings => "stack",
            Self::MarketplaceApps => "marketplace_apps",
            Self::GlobalFields => "global_fields",
            Self::ContentTypes => "content_types",
            Self::CustomRoles => "custom-roles",
            _ => self.as_str(),
        }
    }

    /// Default primary document name.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::StackSettings => "settings.json",
            Self::Locales => "locales.json",
            Self::Environments => "environments.json",
            Self::Extensions => "extensions.json",
            Self::MarketplaceApps => "marketplace_apps.json",
            Self::Assets => "assets.json",
            Self::Taxonomies => "taxonomies.json",
            Self::GlobalFields => "globalfields.json",
            Self::ContentTypes => "schema.json",
            Self::Personalize => "projects.json",
            Self::CustomRoles => "custom-roles.json",
            Self::Workflows => "workflows.json",
            Self::Labels => "labels.json",
            Self::Webhooks => "webhooks.json",
            Self::Entries => "index.json",
        }
    }

    /// Modules whose uid maps this module reads on import.
    #[must_use]
    pub const fn dependencies(&self) -> &'static [ModuleKind] {
        match self {
            Self::StackSettings | Self::Assets => &[Self::Environments],
            Self::GlobalFields => &[Self::Extensions, Self::MarketplaceApps],
            Self::ContentTypes => &[
                Self::GlobalFields,
                Self::Extensions,
                Self::MarketplaceApps,
                Self::Taxonomies,
            ],
            Self::CustomRoles => &[Self::Environments, Self::Locales, Self::ContentTypes],
            Self::Workflows => &[Self::ContentTypes, Self::CustomRoles],
            Self::Labels => &[Self::ContentTypes],
            Self::Entries => &[
                Self::Locales,
                Self::Environments,
                Self::Assets,
                Self::ContentTypes,
                Self::Taxonomies,
            ],
            _ => &[],
        }
    }

    /// Sorts `selected` so every module comes after the dependencies that
    /// are also selected. Ties keep the order of `selected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on duplicates or a cycle.
    pub fn dependency_order(selected: &[ModuleKind]) -> Result<Vec<ModuleKind>> {
        let set: BTreeSet<ModuleKind> = selected.iter().copied().collect();
        if set.len() != selected.len() {
            return Err(Error::Config("modules.types contains duplicates".to_string()));
        }

        let mut done: BTreeSet<ModuleKind> = BTreeSet::new();
        let mut ordered = Vec::with_capacity(selected.len());

        while ordered.len() < selected.len() {
            let next = selected.iter().copied().find(|kind| {
                !done.contains(kind)
                    && kind
                        .dependencies()
                        .iter()
                        .all(|dep| !set.contains(dep) || done.contains(dep))
            });
            match next {
                Some(kind) => {
                    done.insert(kind);
                    ordered.push(kind);
                }
                None => {
                    return Err(Error::Config(
                        "module dependencies form a cycle".to_string(),
                    ))
                }
            }
        }

        Ok(ordered)
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for ModuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown module '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order_respects_dependencies() {
        let order = ModuleKind::dependency_order(&ModuleKind::ALL).unwrap();
        assert_eq!(order, ModuleKind::ALL.to_vec());
    }

    #[test]
    fn test_dependency_order_moves_prerequisites_first() {
        let order = ModuleKind::dependency_order(&[
            ModuleKind::Entries,
            ModuleKind::Labels,
            ModuleKind::ContentTypes,
            ModuleKind::Assets,
        ])
        .unwrap();
        assert_eq!(
            order,
            vec![
                ModuleKind::ContentTypes,
                ModuleKind::Labels,
                ModuleKind::Assets,
                ModuleKind::Entries
            ]
        );
    }

    #[test]
    fn test_assets_run_after_environments() {
        let order =
            ModuleKind::dependency_order(&[ModuleKind::Assets, ModuleKind::Environments]).unwrap();
        assert_eq!(order, vec![ModuleKind::Environments, ModuleKind::Assets]);
    }

    #[test]
    fn test_dependency_order_rejects_duplicates() {
        assert!(ModuleKind::dependency_order(&[ModuleKind::Assets, ModuleKind::Assets]).is_err());
    }

    #[test]
    fn test_from_str_round_trips_names() {
        for kind in ModuleKind::ALL {
            assert_eq!(kind.as_str().parse::<ModuleKind>().unwrap(), kind);
        }
        assert!("widgets".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for kind in ModuleKind::ALL {
            let yaml = serde_yaml::to_string(&kind).unwrap();
            assert_eq!(yaml.trim(), kind.as_str());
        }
    }
}
