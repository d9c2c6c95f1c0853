//! The host bridge: the only host functions a guest can reach.
//!
//! Exposed to scripts as the `bridge` module (`bridge::dispatch`,
//! `bridge::log`, `bridge::encode_call`). Each function checks the
//! capability gate before doing anything else; a closed gate is logged and
//! the call returns unit without effect.

use crate::abi;
use crate::capability::{Capability, CapabilityGate};
use crate::convert::dynamic_to_json;
use crate::error::PluginHostError;
use futures::future::LocalBoxFuture;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Module, ModuleResolver, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// The one module name guest code may import.
pub const BRIDGE_MODULE: &str = "bridge";

/// Positional arguments accepted by `bridge::dispatch` after the action name.
pub const MAX_DISPATCH_ARGS: usize = 8;

/// Whatever the dispatcher reports back for a forwarded action.
pub type Receipt = Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

pub type ReceiptFuture = LocalBoxFuture<'static, Result<Receipt, DispatchError>>;

/// An action requested by a guest handler, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCall {
    pub plugin_id: String,
    pub action: String,
    pub args: Vec<Value>,
}

/// Executes actions on behalf of plugins. The returned future is awaited by
/// the manager once the handler has returned.
pub trait Dispatcher {
    fn dispatch(&self, call: ActionCall) -> ReceiptFuture;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Unknown level names are treated as `info`.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub plugin_id: String,
    pub level: LogLevel,
    pub text: String,
    pub values: Vec<Value>,
}

pub trait Logger {
    fn send(&self, entry: LogEntry);
}

/// Logger that writes guest log entries to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn send(&self, entry: LogEntry) {
        let LogEntry {
            plugin_id,
            level,
            text,
            values,
        } = entry;
        match level {
            LogLevel::Debug => debug!(plugin_id = %plugin_id, values = ?values, "{}", text),
            LogLevel::Info => info!(plugin_id = %plugin_id, values = ?values, "{}", text),
            LogLevel::Warn => warn!(plugin_id = %plugin_id, values = ?values, "{}", text),
            LogLevel::Error => error!(plugin_id = %plugin_id, values = ?values, "{}", text),
        }
    }
}

// ================================================================
// Bridge
// ================================================================

/// Per-context bridge state shared by the registered native functions.
pub struct HostBridge {
    plugin_id: String,
    gate: CapabilityGate,
    dispatcher: Rc<dyn Dispatcher>,
    logger: Rc<dyn Logger>,
    pending: RefCell<Vec<ReceiptFuture>>,
    forwarded: Cell<u64>,
}

impl HostBridge {
    pub fn new(
        plugin_id: impl Into<String>,
        gate: CapabilityGate,
        dispatcher: Rc<dyn Dispatcher>,
        logger: Rc<dyn Logger>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            gate,
            dispatcher,
            logger,
            pending: RefCell::new(Vec::new()),
            forwarded: Cell::new(0),
        }
    }

    fn permit(&self, capability: Capability) -> bool {
        if self.gate.is_open() {
            return true;
        }
        let violation = PluginHostError::CapabilityViolation {
            plugin_id: self.plugin_id.clone(),
            capability: capability.to_string(),
        };
        warn!(plugin_id = %self.plugin_id, capability = %capability, "{}", violation);
        false
    }

    /// Forwards an action to the dispatcher. Returns the call's ticket, its
    /// position among the receipts of the current handler.
    pub fn dispatch(&self, action: &str, args: &[Dynamic]) -> Result<Dynamic, Box<EvalAltResult>> {
        if !self.permit(Capability::Dispatch) {
            return Ok(Dynamic::UNIT);
        }
        let call = ActionCall {
            plugin_id: self.plugin_id.clone(),
            action: action.to_string(),
            args: host_values(args)?,
        };
        debug!(plugin_id = %self.plugin_id, action = %call.action, args = call.args.len(), "Forwarding dispatch");

        let receipt = self.dispatcher.dispatch(call);
        let mut pending = self.pending.borrow_mut();
        pending.push(receipt);
        self.forwarded.set(self.forwarded.get() + 1);
        Ok(Dynamic::from((pending.len() - 1) as rhai::INT))
    }

    /// `values` may be unit, a single value, or an array of values.
    pub fn log(&self, level: &str, text: &Dynamic, values: &Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
        if !self.permit(Capability::Log) {
            return Ok(Dynamic::UNIT);
        }
        let values = if values.is_unit() {
            Vec::new()
        } else if let Some(items) = values.read_lock::<Array>() {
            host_values(&items)?
        } else {
            host_values(std::slice::from_ref(values))?
        };
        self.logger.send(LogEntry {
            plugin_id: self.plugin_id.clone(),
            level: LogLevel::parse(level),
            text: text.to_string(),
            values,
        });
        Ok(Dynamic::UNIT)
    }

    /// Encoding errors are thrown into the guest; the call has no host effect.
    pub fn encode_call(&self, signature: &str, args: &Array) -> Result<Dynamic, Box<EvalAltResult>> {
        if !self.permit(Capability::EncodeCall) {
            return Ok(Dynamic::UNIT);
        }
        let args = host_values(args)?;
        abi::encode_call(signature, &args)
            .map(Dynamic::from_blob)
            .map_err(|e| EvalAltResult::ErrorRuntime(e.to_string().into(), Position::NONE).into())
    }

    /// Receipt futures collected since the last call.
    pub(crate) fn take_pending(&self) -> Vec<ReceiptFuture> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub fn dispatches_forwarded(&self) -> u64 {
        self.forwarded.get()
    }
}

/// Converts guest arguments for the host. A value nested too deeply is
/// thrown back as a data-size error.
fn host_values(values: &[Dynamic]) -> Result<Vec<Value>, Box<EvalAltResult>> {
    values
        .iter()
        .map(|value| {
            dynamic_to_json(value)
                .map_err(|e| EvalAltResult::ErrorDataTooLarge(e.to_string(), Position::NONE).into())
        })
        .collect()
}

/// Builds the `bridge` module around one context's bridge.
pub fn bridge_module(bridge: &Rc<HostBridge>) -> Module {
    let mut module = Module::new();

    macro_rules! register_dispatch {
        ($($arg:ident),*) => {{
            let bridge = Rc::clone(bridge);
            module.set_native_fn(
                Capability::Dispatch.function_name(),
                move |action: ImmutableString $(, $arg: Dynamic)*| bridge.dispatch(&action, &[$($arg),*]),
            );
        }};
    }

    register_dispatch!();
    register_dispatch!(a0);
    register_dispatch!(a0, a1);
    register_dispatch!(a0, a1, a2);
    register_dispatch!(a0, a1, a2, a3);
    register_dispatch!(a0, a1, a2, a3, a4);
    register_dispatch!(a0, a1, a2, a3, a4, a5);
    register_dispatch!(a0, a1, a2, a3, a4, a5, a6);
    register_dispatch!(a0, a1, a2, a3, a4, a5, a6, a7);

    let b = Rc::clone(bridge);
    module.set_native_fn(
        Capability::Log.function_name(),
        move |level: ImmutableString, text: Dynamic| b.log(&level, &text, &Dynamic::UNIT),
    );
    let b = Rc::clone(bridge);
    module.set_native_fn(
        Capability::Log.function_name(),
        move |level: ImmutableString, text: Dynamic, values: Dynamic| b.log(&level, &text, &values),
    );

    let b = Rc::clone(bridge);
    module.set_native_fn(
        Capability::EncodeCall.function_name(),
        move |signature: ImmutableString| b.encode_call(&signature, &Array::new()),
    );
    let b = Rc::clone(bridge);
    module.set_native_fn(
        Capability::EncodeCall.function_name(),
        move |signature: ImmutableString, args: Array| b.encode_call(&signature, &args),
    );

    module
}

/// Module resolver that only knows the bridge. Every other path fails with
/// `ErrorModuleNotFound`, which surfaces as a module import violation.
pub struct BridgeResolver {
    module: Rc<Module>,
}

impl BridgeResolver {
    pub fn new(module: Rc<Module>) -> Self {
        Self { module }
    }
}

impl ModuleResolver for BridgeResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Rc<Module>, Box<EvalAltResult>> {
        if path == BRIDGE_MODULE {
            Ok(Rc::clone(&self.module))
        } else {
            Err(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos).into())
        }
    }
}
