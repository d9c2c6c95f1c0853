//! Rhai-based sandbox host for semi-trusted game mods.
//!
//! Loads plugin scripts into isolated contexts, hands them a depth-bounded
//! snapshot of the world, normalizes the UI they describe, and routes user
//! interactions back to their callbacks through a capability-gated bridge.
//!
//! Each plugin runs in its own `rhai::Engine` with call-depth and data-size
//! ceilings, a per-call step budget, and access to the `bridge` module only.

pub mod abi;
mod bridge;
mod capability;
mod config;
mod convert;
mod error;
mod manager;
mod normalizer;
mod registry;
mod sandbox;
mod serializer;

pub use bridge::{
    ActionCall, DispatchError, Dispatcher, LogEntry, LogLevel, Logger, Receipt, ReceiptFuture,
    TracingLogger, BRIDGE_MODULE, MAX_DISPATCH_ARGS,
};
pub use capability::{Capability, CapabilityGate};
pub use config::{ResourceLimits, SandboxConfig, MAX_NESTED_VALUES};
pub use convert::{ValueTooDeep, FUNCTION_MARKER, MAX_VALUE_DEPTH};
pub use error::{NormalizeError, PluginHostError};
pub use manager::{SandboxManager, SubmitOutcome};
pub use normalizer::{ResponseNormalizer, VersionedResponse, CURRENT_VERSION};
pub use registry::{CallbackKind, CallbackRegistry};
pub use sandbox::{source_hash, ContextMetrics, SandboxContext, UPDATE_FN};
pub use serializer::{BoundedTree, StateSerializer};
