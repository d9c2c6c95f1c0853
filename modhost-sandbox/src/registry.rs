//! Per-cycle callback registry.
//!
//! Guest responses carry live closures in `submit` and button `action`
//! slots. Before a response leaves its context every such closure is moved
//! into the registry and replaced with an opaque ref of the form
//! `{component}/{content}/{slot}#{cycle}`. A registry belongs to exactly one
//! update cycle and is replaced wholesale by the next one.

use crate::error::PluginHostError;
use rhai::{Array, Dynamic, FnPtr, Map};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Button handler, called without arguments.
    Action,
    /// Content submit handler, called with the submitted values.
    Submit,
}

#[derive(Debug, Clone)]
pub struct Callback {
    pub kind: CallbackKind,
    pub function: FnPtr,
}

#[derive(Debug, Clone)]
pub struct CallbackRegistry {
    plugin_id: String,
    cycle: u64,
    entries: HashMap<String, Callback>,
}

impl CallbackRegistry {
    pub fn new(plugin_id: impl Into<String>, cycle: u64) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            cycle,
            entries: HashMap::new(),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, reference: &str) -> Option<&Callback> {
        self.entries.get(reference)
    }

    pub fn refs(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Stores a callback. An existing entry under the same ref is never
    /// overwritten.
    pub fn insert(&mut self, reference: String, callback: Callback) -> Result<(), PluginHostError> {
        if self.entries.contains_key(&reference) {
            return Err(PluginHostError::RefCollision {
                plugin_id: self.plugin_id.clone(),
                reference,
            });
        }
        self.entries.insert(reference, callback);
        Ok(())
    }

    /// Replaces every closure in a raw `update` response with a fresh ref.
    ///
    /// The walk is fixed at component -> content -> buttons. The root may be
    /// a map with `components` or, for legacy responses, the list itself.
    pub fn substitute(&mut self, raw: &mut Dynamic) -> Result<(), PluginHostError> {
        if raw.is_array() {
            return self.substitute_components(raw);
        }
        if let Some(mut root) = raw.write_lock::<Map>() {
            if let Some(components) = root.get_mut("components") {
                self.substitute_components(components)?;
            }
        }
        Ok(())
    }

    fn substitute_components(&mut self, components: &mut Dynamic) -> Result<(), PluginHostError> {
        let Some(mut components) = components.write_lock::<Array>() else {
            return Ok(());
        };
        for (index, component) in components.iter_mut().enumerate() {
            let Some(mut component) = component.write_lock::<Map>() else {
                continue;
            };
            let component_id = id_text(component.get("id")).unwrap_or_else(|| index.to_string());
            let Some(content) = component.get_mut("content") else {
                continue;
            };
            let Some(mut entries) = content.write_lock::<Array>() else {
                continue;
            };
            for (position, entry) in entries.iter_mut().enumerate() {
                let Some(mut entry) = entry.write_lock::<Map>() else {
                    continue;
                };
                let content_id = id_text(entry.get("id")).unwrap_or_else(|| position.to_string());
                let prefix = format!("{component_id}/{content_id}");

                if let Some(submit) = entry.get_mut("submit") {
                    self.replace(submit, &prefix, "submit", CallbackKind::Submit)?;
                }
                let Some(buttons) = entry.get_mut("buttons") else {
                    continue;
                };
                let Some(mut buttons) = buttons.write_lock::<Array>() else {
                    continue;
                };
                for (slot, button) in buttons.iter_mut().enumerate() {
                    if let Some(mut button) = button.write_lock::<Map>() {
                        if let Some(action) = button.get_mut("action") {
                            self.replace(action, &prefix, &slot.to_string(), CallbackKind::Action)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn replace(
        &mut self,
        value: &mut Dynamic,
        prefix: &str,
        slot: &str,
        kind: CallbackKind,
    ) -> Result<(), PluginHostError> {
        let Some(function) = value.clone().try_cast::<FnPtr>() else {
            return Ok(());
        };
        let reference = format!("{prefix}/{slot}#{}", self.cycle);
        self.insert(reference.clone(), Callback { kind, function })?;
        *value = Dynamic::from(reference);
        Ok(())
    }
}

fn id_text(value: Option<&Dynamic>) -> Option<String> {
    let value = value?;
    (value.is_string() || value.is_int()).then(|| value.to_string())
}
