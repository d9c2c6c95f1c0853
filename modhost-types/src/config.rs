//! Plugin configuration as supplied by the plugin-discovery layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How far the host trusts a plugin's author.
/// Selects the resource ceilings applied to the plugin's sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    #[default]
    Untrusted,
    Trusted,
}

/// The kind of game object a plugin is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Core,
    Building,
    Item,
    Zone,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Core => "core",
            Self::Building => "building",
            Self::Item => "item",
            Self::Zone => "zone",
        };
        f.write_str(name)
    }
}

/// A plugin as handed to the sandbox core.
///
/// Configs are never mutated after creation. A new source for the same id is
/// a different logical plugin version and replaces the old one on `load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub id: String,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub trust: TrustLevel,
    pub kind: PluginKind,
    /// Id of the object kind this plugin supports, if it is kind-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports: Option<String>,
}

impl PluginConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: PluginKind,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source: source.into(),
            trust: TrustLevel::Untrusted,
            kind,
            supports: None,
        }
    }

    #[must_use]
    pub fn with_trust(mut self, trust: TrustLevel) -> Self {
        self.trust = trust;
        self
    }

    #[must_use]
    pub fn supporting(mut self, kind_id: impl Into<String>) -> Self {
        self.supports = Some(kind_id.into());
        self
    }
}
