//! One isolated execution context per loaded plugin.
//!
//! Each `SandboxContext` owns its own `rhai::Engine` with:
//! - Call-depth, expression-depth and data-size ceilings
//! - A per-call step budget enforced by the progress hook
//! - A module resolver that only knows the `bridge` module
//! - A capability gate that is closed except while a handler runs
//!
//! The context compiles the plugin source, runs its top-level code once, and
//! then serves `update` calls and callback invocations.

use crate::bridge::{bridge_module, BridgeResolver, Dispatcher, HostBridge, Logger, ReceiptFuture, BRIDGE_MODULE};
use crate::capability::CapabilityGate;
use crate::config::ResourceLimits;
use crate::convert::{dynamic_to_json, to_guest};
use crate::error::PluginHostError;
use crate::normalizer::ResponseNormalizer;
use crate::registry::{CallbackKind, CallbackRegistry};
use modhost_types::{PluginConfig, PluginState};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Name of the function every plugin must define.
pub const UPDATE_FN: &str = "update";

/// Per-context usage figures, analogous to fuel metrics for wasm plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextMetrics {
    /// Number of update cycles started.
    pub cycle: u64,
    /// Live callback refs in the current registry.
    pub registry_size: usize,
    /// Interpreter steps used by the most recent guest call.
    pub steps_last_call: u64,
    pub step_budget: u64,
    /// Dispatches forwarded over the lifetime of the context.
    pub dispatches_forwarded: u64,
    /// Wall time of the most recent update call, in milliseconds.
    pub last_update_ms: u64,
}

/// Hex SHA-256 of a plugin source, used to detect unchanged reloads.
pub fn source_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Maps an engine error onto the host taxonomy.
pub(crate) fn classify(plugin_id: &str, step_budget: u64, err: &EvalAltResult) -> PluginHostError {
    let plugin_id = plugin_id.to_string();
    match err.unwrap_inner() {
        EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataTooLarge(..)
        | EvalAltResult::ErrorTooManyModules(..) => PluginHostError::ResourceExhausted {
            plugin_id,
            detail: err.to_string(),
        },
        EvalAltResult::ErrorTerminated(..) | EvalAltResult::ErrorTooManyOperations(..) => {
            PluginHostError::StepBudgetExhausted {
                plugin_id,
                budget: step_budget,
            }
        }
        EvalAltResult::ErrorModuleNotFound(path, ..) => PluginHostError::ModuleImportViolation {
            plugin_id,
            path: path.clone(),
        },
        EvalAltResult::ErrorParsing(..) => PluginHostError::Compilation {
            plugin_id,
            message: err.to_string(),
        },
        _ => PluginHostError::PluginCrashed {
            plugin_id,
            message: err.to_string(),
        },
    }
}

struct GuestRuntime {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
}

fn build_engine(
    plugin_id: &str,
    limits: &ResourceLimits,
    bridge: &Rc<HostBridge>,
    steps: &Rc<Cell<u64>>,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.disable_symbol("eval");

    let mut module = bridge_module(bridge);
    module.build_index();
    let module = Rc::new(module);
    engine.register_static_module(BRIDGE_MODULE, Rc::clone(&module));
    engine.set_module_resolver(BridgeResolver::new(module));

    let id = plugin_id.to_string();
    engine.on_print(move |text| trace!(plugin_id = %id, "guest print: {}", text));
    let id = plugin_id.to_string();
    engine.on_debug(move |text, _source, pos| trace!(plugin_id = %id, %pos, "guest debug: {}", text));

    let counter = Rc::clone(steps);
    let budget = limits.max_operations;
    engine.on_progress(move |ops| {
        counter.set(ops);
        (ops > budget).then(|| Dynamic::from(budget as rhai::INT))
    });

    engine
}

/// Held while a call is in flight; clears the busy flag on drop.
pub(crate) struct FlightGuard<'a> {
    busy: &'a Cell<bool>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

pub struct SandboxContext {
    config: PluginConfig,
    source_hash: String,
    limits: ResourceLimits,
    gate: CapabilityGate,
    bridge: Rc<HostBridge>,
    runtime: RefCell<GuestRuntime>,
    registry: RefCell<CallbackRegistry>,
    normalizer: ResponseNormalizer,
    cycle: Cell<u64>,
    steps: Rc<Cell<u64>>,
    last_update_ms: Cell<u64>,
    busy: Cell<bool>,
}

impl SandboxContext {
    /// Compiles the plugin and runs its top-level code with the gate closed.
    pub fn load(
        config: PluginConfig,
        limits: ResourceLimits,
        dispatcher: Rc<dyn Dispatcher>,
        logger: Rc<dyn Logger>,
    ) -> Result<Self, PluginHostError> {
        let plugin_id = config.id.clone();
        info!(
            plugin_id = %plugin_id,
            kind = %config.kind,
            trust = ?config.trust,
            step_budget = limits.max_operations,
            "Creating sandbox context"
        );

        let gate = CapabilityGate::new();
        let bridge = Rc::new(HostBridge::new(&plugin_id, gate.clone(), dispatcher, logger));
        let steps = Rc::new(Cell::new(0));
        let engine = build_engine(&plugin_id, &limits, &bridge, &steps);

        // Literal imports are resolved here, so a forbidden import fails the load.
        let ast = engine
            .compile_into_self_contained(&Scope::new(), &config.source)
            .map_err(|e| classify(&plugin_id, limits.max_operations, &e))?;

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| classify(&plugin_id, limits.max_operations, &e))?;
        debug!(plugin_id = %plugin_id, steps = steps.get(), "Top-level code executed");

        Ok(Self {
            source_hash: source_hash(&config.source),
            normalizer: ResponseNormalizer::new(&plugin_id),
            registry: RefCell::new(CallbackRegistry::new(&plugin_id, 0)),
            config,
            limits,
            gate,
            bridge,
            runtime: RefCell::new(GuestRuntime { engine, ast, scope }),
            cycle: Cell::new(0),
            steps,
            last_update_ms: Cell::new(0),
            busy: Cell::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.get()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Claims the context for one call; `None` if a call is already in flight.
    pub(crate) fn try_enter(&self) -> Option<FlightGuard<'_>> {
        if self.busy.replace(true) {
            return None;
        }
        Some(FlightGuard { busy: &self.busy })
    }

    // ================================================================
    // Guest calls
    // ================================================================

    /// Runs one update cycle against a guest-ready state snapshot.
    ///
    /// The previous cycle's refs expire as soon as this starts. A result that
    /// arrives after `deadline` is discarded and no refs are installed; the
    /// context stays usable for the next cycle.
    pub fn run_update(&self, state: &Dynamic, deadline: Duration) -> Result<PluginState, PluginHostError> {
        let cycle = self.cycle.get() + 1;
        self.cycle.set(cycle);
        self.registry.replace(CallbackRegistry::new(self.id(), cycle));

        let started = Instant::now();
        let mut raw = self.call_update(state.clone())?;

        let mut registry = CallbackRegistry::new(self.id(), cycle);
        registry.substitute(&mut raw)?;
        let response = dynamic_to_json(&raw).map_err(|e| PluginHostError::ResourceExhausted {
            plugin_id: self.id().to_string(),
            detail: e.to_string(),
        })?;

        let elapsed = started.elapsed();
        self.last_update_ms.set(elapsed.as_millis() as u64);
        if elapsed > deadline {
            return Err(PluginHostError::Timeout {
                plugin_id: self.id().to_string(),
                timeout_ms: deadline.as_millis() as u64,
            });
        }

        let state = self
            .normalizer
            .normalize(&response)
            .map_err(|e| PluginHostError::MalformedResponse {
                plugin_id: self.id().to_string(),
                detail: e.to_string(),
            })?;

        debug!(
            plugin_id = %self.id(),
            cycle,
            components = state.components.len(),
            refs = registry.len(),
            steps = self.steps.get(),
            "Update cycle complete"
        );
        self.registry.replace(registry);
        Ok(state)
    }

    fn call_update(&self, state: Dynamic) -> Result<Dynamic, PluginHostError> {
        let mut runtime = self.runtime.borrow_mut();
        let GuestRuntime { engine, ast, scope } = &mut *runtime;
        self.steps.set(0);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        engine
            .call_fn_with_options::<Dynamic>(options, scope, ast, UPDATE_FN, (state,))
            .map_err(|e| match *e {
                EvalAltResult::ErrorFunctionNotFound(ref signature, _)
                    if signature.starts_with(UPDATE_FN) =>
                {
                    PluginHostError::MalformedResponse {
                        plugin_id: self.id().to_string(),
                        detail: format!("plugin does not define `{UPDATE_FN}(state)`"),
                    }
                }
                _ => classify(self.id(), self.limits.max_operations, &e),
            })
    }

    /// Invokes the callback behind `reference` with the gate open.
    ///
    /// Returns `None` when the ref is not in the current registry. On success
    /// returns the receipt futures of every dispatch the handler made; on
    /// failure those are dropped (the actions were already forwarded).
    pub(crate) fn invoke(
        &self,
        reference: &str,
        values: &Value,
    ) -> Result<Option<Vec<ReceiptFuture>>, PluginHostError> {
        let Some(callback) = self.registry.borrow().resolve(reference).cloned() else {
            return Ok(None);
        };
        let submitted = match callback.kind {
            CallbackKind::Action => None,
            CallbackKind::Submit => Some(to_guest(values)?),
        };

        let result = {
            let runtime = self.runtime.borrow();
            let GuestRuntime { engine, ast, .. } = &*runtime;
            self.steps.set(0);
            let _open = self.gate.open();
            match submitted {
                None => callback.function.call::<Dynamic>(engine, ast, ()),
                Some(values) => callback.function.call::<Dynamic>(engine, ast, (values,)),
            }
        };
        let pending = self.bridge.take_pending();

        match result {
            Ok(_) => {
                debug!(
                    plugin_id = %self.id(),
                    reference,
                    dispatches = pending.len(),
                    steps = self.steps.get(),
                    "Callback completed"
                );
                Ok(Some(pending))
            }
            Err(e) => Err(classify(self.id(), self.limits.max_operations, &e)),
        }
    }

    pub fn metrics(&self) -> ContextMetrics {
        ContextMetrics {
            cycle: self.cycle.get(),
            registry_size: self.registry.borrow().len(),
            steps_last_call: self.steps.get(),
            step_budget: self.limits.max_operations,
            dispatches_forwarded: self.bridge.dispatches_forwarded(),
            last_update_ms: self.last_update_ms.get(),
        }
    }

    /// Releases guest values held by the context. Outstanding refs expire.
    pub fn dispose(&self) {
        self.registry.replace(CallbackRegistry::new(self.id(), self.cycle.get()));
        drop(self.bridge.take_pending());
        if let Ok(mut runtime) = self.runtime.try_borrow_mut() {
            runtime.scope.clear();
        }
        debug!(plugin_id = %self.id(), "Sandbox context disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ActionCall, LogEntry};
    use modhost_types::{PluginKind, TrustLevel};
    use serde_json::json;

    struct NoopDispatcher;

    impl Dispatcher for NoopDispatcher {
        fn dispatch(&self, _call: ActionCall) -> ReceiptFuture {
            Box::pin(async { Ok(Value::Null) })
        }
    }

    struct NoopLogger;

    impl Logger for NoopLogger {
        fn send(&self, _entry: LogEntry) {}
    }

    fn load(source: &str, limits: ResourceLimits) -> Result<SandboxContext, PluginHostError> {
        let config = PluginConfig::new("p1", "Test", PluginKind::Building, source)
            .with_trust(TrustLevel::Untrusted);
        SandboxContext::load(config, limits, Rc::new(NoopDispatcher), Rc::new(NoopLogger))
    }

    const SIMPLE: &str = r#"
        fn update(state) {
            #{ version: 1, components: [#{ id: "x", type: "building", content: [#{
                id: "default", type: "popout",
                buttons: [#{ text: "Go", type: "action", action: || 1 }]
            }] }] }
        }
    "#;

    #[test]
    fn source_hash_is_stable_hex() {
        assert_eq!(source_hash("abc"), source_hash("abc"));
        assert_ne!(source_hash("abc"), source_hash("abd"));
        assert_eq!(source_hash("").len(), 64);
    }

    #[test]
    fn update_installs_cycle_refs() {
        let ctx = load(SIMPLE, ResourceLimits::untrusted()).unwrap();
        let state = ctx.run_update(&Dynamic::UNIT, Duration::from_secs(5)).unwrap();
        assert_eq!(state.callback_refs()[0].as_str(), "x/default/0#1");
        assert_eq!(ctx.metrics().registry_size, 1);
        assert_eq!(ctx.metrics().cycle, 1);
        assert!(ctx.metrics().steps_last_call > 0);
    }

    #[test]
    fn missing_update_is_malformed() {
        let ctx = load("let x = 1;", ResourceLimits::untrusted()).unwrap();
        let err = ctx.run_update(&Dynamic::UNIT, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, PluginHostError::MalformedResponse { .. }));
    }

    #[test]
    fn syntax_error_fails_compilation() {
        let err = load("fn update(state) {", ResourceLimits::untrusted()).err().unwrap();
        assert!(matches!(err, PluginHostError::Compilation { .. }));
    }

    #[test]
    fn eval_is_disabled() {
        let err = load(r#"eval("1 + 1");"#, ResourceLimits::untrusted()).err().unwrap();
        assert!(matches!(err, PluginHostError::Compilation { .. }));
    }

    #[test]
    fn runaway_top_level_code_is_stopped() {
        let limits = ResourceLimits {
            max_operations: 1_000,
            ..ResourceLimits::untrusted()
        };
        let err = load("loop {}", limits).err().unwrap();
        assert!(matches!(err, PluginHostError::StepBudgetExhausted { budget: 1_000, .. }));
    }

    #[test]
    fn unknown_ref_invokes_nothing() {
        let ctx = load(SIMPLE, ResourceLimits::untrusted()).unwrap();
        ctx.run_update(&Dynamic::UNIT, Duration::from_secs(5)).unwrap();
        assert!(ctx.invoke("x/default/0#99", &json!(null)).unwrap().is_none());
        assert!(ctx.invoke("x/default/0#1", &json!(null)).unwrap().is_some());
        assert!(!ctx.gate.is_open());
    }

    #[test]
    fn flight_guard_is_exclusive() {
        let ctx = load(SIMPLE, ResourceLimits::untrusted()).unwrap();
        let first = ctx.try_enter();
        assert!(first.is_some());
        assert!(ctx.try_enter().is_none());
        drop(first);
        assert!(ctx.try_enter().is_some());
    }
}
