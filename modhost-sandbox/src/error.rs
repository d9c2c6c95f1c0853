//! Error types for the sandbox host.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin '{0}' is busy with another call")]
    ContextBusy(String),

    #[error("script compilation failed: {plugin_id}: {message}")]
    Compilation { plugin_id: String, message: String },

    #[error(
        "importing modules is only available for the bridge module (plugin '{plugin_id}' requested '{path}')"
    )]
    ModuleImportViolation { plugin_id: String, path: String },

    #[error("capability '{capability}' refused for plugin '{plugin_id}': bridge is disabled")]
    CapabilityViolation {
        plugin_id: String,
        capability: String,
    },

    #[error("malformed response from plugin '{plugin_id}': {detail}")]
    MalformedResponse { plugin_id: String, detail: String },

    #[error("callback ref collision in plugin '{plugin_id}': {reference}")]
    RefCollision {
        plugin_id: String,
        reference: String,
    },

    #[error("resource limit exceeded: {plugin_id}: {detail}")]
    ResourceExhausted { plugin_id: String, detail: String },

    #[error("plugin '{plugin_id}' aborted after exhausting its {budget} step budget")]
    StepBudgetExhausted { plugin_id: String, budget: u64 },

    #[error("timeout: plugin '{plugin_id}' exceeded {timeout_ms}ms deadline")]
    Timeout { plugin_id: String, timeout_ms: u64 },

    #[error("plugin crashed: {plugin_id}: {message}")]
    PluginCrashed { plugin_id: String, message: String },

    #[error("value conversion failed: {0}")]
    Conversion(String),

    #[error("invalid sandbox configuration: {0}")]
    Config(String),
}

impl PluginHostError {
    /// Out-of-memory and stack class failures. A context that hit one of
    /// these is torn down so the next load starts fresh.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Errors produced while normalizing an untrusted plugin response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("response must be a map or a list, got {0}")]
    UnexpectedRoot(&'static str),

    #[error("component {index}: content entry {position} is missing an id")]
    MissingContentId { index: usize, position: usize },

    #[error("button '{text}': action must be a callback ref, found {found}")]
    InvalidAction { text: String, found: &'static str },

    #[error("button '{text}': toggle must name a sibling content id")]
    InvalidToggle { text: String },

    #[error("button '{text}': unknown button type '{kind}'")]
    UnknownButtonType { text: String, kind: String },

    #[error("{0}")]
    Invalid(String),
}
