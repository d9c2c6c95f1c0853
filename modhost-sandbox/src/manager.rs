//! Central sandbox lifecycle manager.
//!
//! Owns every active `SandboxContext`, keyed by plugin id, handles
//! load/reload/unload, runs update batches, and routes callback submits.
//! The host is single-threaded; the manager uses interior mutability so a
//! dispatcher or logger may call back into it during a guest call. No two
//! calls ever run against the same context at once.

use crate::bridge::{DispatchError, Dispatcher, Logger, Receipt};
use crate::config::SandboxConfig;
use crate::convert::to_guest;
use crate::error::PluginHostError;
use crate::sandbox::{source_hash, ContextMetrics, SandboxContext};
use crate::serializer::StateSerializer;
use futures::future::join_all;
use modhost_types::{PluginConfig, PluginUpdateResponse, WorldValue};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Result of routing a user interaction to a plugin callback.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The handler ran; one receipt per dispatch, in call order.
    Completed {
        receipts: Vec<Result<Receipt, DispatchError>>,
    },
    /// The ref is unknown or belongs to an older cycle. Nothing ran.
    Stale,
    /// Another call against this plugin is still in flight. Nothing ran.
    Busy,
    /// The handler failed. The plugin stays loaded unless it exhausted a
    /// resource ceiling.
    Failed { error: PluginHostError },
}

impl SubmitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

pub struct SandboxManager {
    config: SandboxConfig,
    serializer: StateSerializer,
    dispatcher: Rc<dyn Dispatcher>,
    logger: Rc<dyn Logger>,
    contexts: RefCell<HashMap<String, Rc<SandboxContext>>>,
}

impl SandboxManager {
    pub fn new(dispatcher: Rc<dyn Dispatcher>, logger: Rc<dyn Logger>) -> Self {
        Self::with_config(SandboxConfig::default(), dispatcher, logger)
    }

    pub fn with_config(
        config: SandboxConfig,
        dispatcher: Rc<dyn Dispatcher>,
        logger: Rc<dyn Logger>,
    ) -> Self {
        Self {
            serializer: StateSerializer::new(config.state_depth),
            config,
            dispatcher,
            logger,
            contexts: RefCell::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    // ================================================================
    // Loading / Unloading
    // ================================================================

    /// Loads a plugin. Identical source under the same id is a no-op; new
    /// source disposes the old context before the new one is built.
    pub fn load(&self, config: PluginConfig) -> Result<(), PluginHostError> {
        let plugin_id = config.id.clone();
        let hash = source_hash(&config.source);

        if let Some(existing) = self.context(&plugin_id) {
            if existing.is_busy() {
                return Err(PluginHostError::ContextBusy(plugin_id));
            }
            if existing.source_hash() == hash {
                debug!(plugin_id = %plugin_id, "Source unchanged, keeping loaded context");
                return Ok(());
            }
            self.remove(&plugin_id);
            info!(plugin_id = %plugin_id, "Source changed, previous context disposed");
        }

        let limits = self.config.limits_for(config.trust).clone();
        let context = SandboxContext::load(
            config,
            limits,
            Rc::clone(&self.dispatcher),
            Rc::clone(&self.logger),
        )?;

        info!(plugin_id = %plugin_id, "Plugin loaded");
        self.contexts.borrow_mut().insert(plugin_id, Rc::new(context));
        Ok(())
    }

    /// Loads each config in turn. Returns one result per entry, either the
    /// plugin id or the error that kept it from activating.
    pub fn load_all(&self, configs: Vec<PluginConfig>) -> Vec<Result<String, PluginHostError>> {
        configs
            .into_iter()
            .map(|config| {
                let plugin_id = config.id.clone();
                self.load(config).map(|()| plugin_id)
            })
            .collect()
    }

    /// Makes the active set match `configs`: loads every entry and unloads
    /// any context whose id is not listed.
    pub fn reconcile(&self, configs: Vec<PluginConfig>) -> Vec<Result<String, PluginHostError>> {
        let wanted: HashSet<&str> = configs.iter().map(|c| c.id.as_str()).collect();
        for plugin_id in self.plugin_ids() {
            if wanted.contains(plugin_id.as_str()) {
                continue;
            }
            if let Err(e) = self.unload(&plugin_id) {
                warn!(plugin_id = %plugin_id, "Could not unload during reconcile: {}", e);
            }
        }
        self.load_all(configs)
    }

    /// Disposes and removes a context. Unknown ids are ignored.
    pub fn unload(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        match self.context(plugin_id) {
            Some(context) if context.is_busy() => {
                Err(PluginHostError::ContextBusy(plugin_id.to_string()))
            }
            Some(_) => {
                self.remove(plugin_id);
                info!(plugin_id = %plugin_id, "Plugin unloaded");
                Ok(())
            }
            None => {
                debug!(plugin_id = %plugin_id, "Unload requested for plugin that is not loaded");
                Ok(())
            }
        }
    }

    fn remove(&self, plugin_id: &str) {
        let removed = self.contexts.borrow_mut().remove(plugin_id);
        if let Some(context) = removed {
            context.dispose();
        }
    }

    /// Tears down a context that exhausted a resource ceiling so the next
    /// load starts fresh.
    fn evict(&self, plugin_id: &str, error: &PluginHostError) {
        warn!(plugin_id = %plugin_id, "Evicting plugin after resource exhaustion: {}", error);
        self.remove(plugin_id);
    }

    // ================================================================
    // Plugin access
    // ================================================================

    fn context(&self, plugin_id: &str) -> Option<Rc<SandboxContext>> {
        self.contexts.borrow().get(plugin_id).cloned()
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.contexts.borrow().contains_key(plugin_id)
    }

    pub fn plugin_count(&self) -> usize {
        self.contexts.borrow().len()
    }

    /// Ids of every loaded plugin, sorted.
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn plugin_config(&self, plugin_id: &str) -> Result<PluginConfig, PluginHostError> {
        self.context(plugin_id)
            .map(|context| context.config().clone())
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    // ================================================================
    // Update cycle
    // ================================================================

    /// Runs one update cycle for each listed plugin against a bounded
    /// snapshot of `world`. Failures are reported per plugin and never stop
    /// the rest of the batch. Unknown ids are skipped.
    pub fn update<S: AsRef<str>>(&self, plugin_ids: &[S], world: &WorldValue) -> Vec<PluginUpdateResponse> {
        let tree = self.serializer.to_bounded_tree(world);
        let snapshot = to_guest(&tree);
        let deadline = self.config.update_deadline();

        let mut responses = Vec::with_capacity(plugin_ids.len());
        for plugin_id in plugin_ids {
            let plugin_id = plugin_id.as_ref();
            let Some(context) = self.context(plugin_id) else {
                warn!(plugin_id = %plugin_id, "Update requested for unknown plugin, skipping");
                continue;
            };
            let config = context.config().clone();

            let result = match (&snapshot, context.try_enter()) {
                (_, None) => Err(PluginHostError::ContextBusy(plugin_id.to_string())),
                (Err(e), Some(_flight)) => Err(PluginHostError::Conversion(e.to_string())),
                (Ok(state), Some(_flight)) => context.run_update(state, deadline),
            };

            let response = match result {
                Ok(state) => PluginUpdateResponse::ok(config, state),
                Err(error) => {
                    warn!(plugin_id = %plugin_id, "Plugin update failed: {}", error);
                    if error.is_resource_exhaustion() {
                        self.evict(plugin_id, &error);
                    }
                    PluginUpdateResponse::failed(config, error.to_string())
                }
            };
            responses.push(response);
        }
        responses
    }

    /// Runs an update cycle for every loaded plugin, in id order.
    pub fn update_all(&self, world: &WorldValue) -> Vec<PluginUpdateResponse> {
        self.update(&self.plugin_ids(), world)
    }

    // ================================================================
    // Callbacks
    // ================================================================

    /// Invokes the callback behind `reference` with the bridge enabled, then
    /// waits for the receipts of every action it dispatched.
    ///
    /// Only an unknown plugin id is an error. A second submit against a
    /// plugin whose previous submit is still pending is rejected, not queued.
    pub async fn submit(
        &self,
        plugin_id: &str,
        reference: &str,
        values: Value,
    ) -> Result<SubmitOutcome, PluginHostError> {
        let context = self
            .context(plugin_id)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;

        let Some(_flight) = context.try_enter() else {
            warn!(plugin_id = %plugin_id, reference, "Submit rejected: another call is in flight");
            return Ok(SubmitOutcome::Busy);
        };

        let pending = match context.invoke(reference, &values) {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                info!(plugin_id = %plugin_id, reference, "Ignoring submit for stale or unknown ref");
                return Ok(SubmitOutcome::Stale);
            }
            Err(error) => {
                warn!(plugin_id = %plugin_id, reference, "Callback failed: {}", error);
                if error.is_resource_exhaustion() {
                    self.evict(plugin_id, &error);
                }
                return Ok(SubmitOutcome::Failed { error });
            }
        };

        let receipts = join_all(pending).await;
        debug!(plugin_id = %plugin_id, reference, receipts = receipts.len(), "Submit complete");
        Ok(SubmitOutcome::Completed { receipts })
    }

    // ================================================================
    // Metrics
    // ================================================================

    pub fn metrics(&self, plugin_id: &str) -> Result<ContextMetrics, PluginHostError> {
        self.context(plugin_id)
            .map(|context| context.metrics())
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    /// Returns (plugin_id, metrics) for every loaded plugin, sorted by id.
    pub fn all_metrics(&self) -> Vec<(String, ContextMetrics)> {
        let mut all: Vec<(String, ContextMetrics)> = self
            .contexts
            .borrow()
            .iter()
            .map(|(id, context)| (id.clone(), context.metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
