//! Canonical, host-trusted UI state produced from a plugin's raw response.
//!
//! Nothing in here can hold a live guest closure: callbacks are carried as
//! [`CallbackRef`] strings that the sandbox manager resolves on demand.

use crate::config::PluginConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference standing in for a guest closure.
/// Valid only for the update cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackRef(String);

impl CallbackRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallbackRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A submit handler bound to the plugin that owns it.
///
/// The renderer hands this back to the sandbox manager together with the
/// form values; the manager performs the actual lookup and invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitProxy {
    pub plugin_id: String,
    pub callback: CallbackRef,
}

impl SubmitProxy {
    pub fn new(plugin_id: impl Into<String>, callback: CallbackRef) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            callback,
        }
    }
}

/// Kinds of UI component a plugin may contribute to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentType {
    Building,
    Tile,
    MobileUnit,
    Nav,
    Item,
    Zone,
}

impl ComponentType {
    /// Parses the wire name; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "building" => Some(Self::Building),
            "tile" => Some(Self::Tile),
            "mobileUnit" => Some(Self::MobileUnit),
            "nav" => Some(Self::Nav),
            "item" => Some(Self::Item),
            "zone" => Some(Self::Zone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Popout,
    Dialog,
    Inline,
}

impl ContentType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "popout" => Some(Self::Popout),
            "dialog" => Some(Self::Dialog),
            "inline" => Some(Self::Inline),
            _ => None,
        }
    }
}

/// A button rendered inside a content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Button {
    /// Invokes a guest callback with no values.
    Action { text: String, action: CallbackRef },
    /// Shows the sibling content block with the given id.
    Toggle { text: String, content: String },
    /// Submits the enclosing content's form.
    Submit { text: String },
}

impl Button {
    pub fn text(&self) -> &str {
        match self {
            Self::Action { text, .. } | Self::Toggle { text, .. } | Self::Submit { text } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentContent {
    pub id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit: Option<SubmitProxy>,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Vec<ComponentContent>,
}

/// Normalized UI description for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginState {
    pub components: Vec<Component>,
}

impl PluginState {
    /// Every callback reference carried by this state, in document order.
    pub fn callback_refs(&self) -> Vec<&CallbackRef> {
        let mut refs = Vec::new();
        for component in &self.components {
            for content in &component.content {
                if let Some(proxy) = &content.submit {
                    refs.push(&proxy.callback);
                }
                for button in &content.buttons {
                    if let Button::Action { action, .. } = button {
                        refs.push(action);
                    }
                }
            }
        }
        refs
    }
}

/// Result of one update cycle for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginUpdateResponse {
    pub config: PluginConfig,
    pub state: PluginState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginUpdateResponse {
    pub fn ok(config: PluginConfig, state: PluginState) -> Self {
        Self {
            config,
            state,
            error: None,
        }
    }

    /// A cycle that failed for this plugin only; the state is left empty.
    pub fn failed(config: PluginConfig, error: impl Into<String>) -> Self {
        Self {
            config,
            state: PluginState::default(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
