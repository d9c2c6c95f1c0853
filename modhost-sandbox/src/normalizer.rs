//! Turns an untrusted, loosely shaped plugin response into a [`PluginState`].
//!
//! Responses are a versioned tagged union: the version is read once at the
//! boundary and the matching dialect normalizes the rest. Unknown component
//! types are dropped for forward compatibility; malformed content or buttons
//! fail the whole response for that plugin.

use crate::convert::FUNCTION_MARKER;
use crate::error::NormalizeError;
use modhost_types::{
    Button, CallbackRef, Component, ComponentContent, ComponentType, ContentType, PluginState,
    SubmitProxy,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Newest response version this host understands.
pub const CURRENT_VERSION: u64 = 1;

/// A raw response after version dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VersionedResponse<'a> {
    /// Version 0: the component list itself, buttons may omit `type`.
    Legacy(&'a [Value]),
    /// Version 1 (and anything newer): `{ version, components }`.
    V1(&'a [Value]),
}

impl<'a> VersionedResponse<'a> {
    pub fn parse(raw: &'a Value) -> Result<Self, NormalizeError> {
        let root = match raw {
            Value::Array(components) => return Ok(Self::Legacy(components)),
            Value::Object(root) => root,
            other => return Err(NormalizeError::UnexpectedRoot(kind_name(other))),
        };

        let version = match root.get("version") {
            None | Some(Value::Null) => CURRENT_VERSION,
            Some(v) => v.as_u64().ok_or_else(|| {
                NormalizeError::Invalid(format!("version must be a non-negative integer, got {v}"))
            })?,
        };
        let components = components_of(root)?;

        match version {
            0 => Ok(Self::Legacy(components)),
            CURRENT_VERSION => Ok(Self::V1(components)),
            newer => {
                debug!(version = newer, "Response version is newer than supported, normalizing as v{}", CURRENT_VERSION);
                Ok(Self::V1(components))
            }
        }
    }
}

fn components_of(root: &Map<String, Value>) -> Result<&[Value], NormalizeError> {
    match root.get("components") {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(NormalizeError::Invalid(format!(
            "components must be a list, got {}",
            kind_name(other)
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonDialect {
    Legacy,
    Typed,
}

/// Normalizer bound to one plugin; string `submit` refs become proxies that
/// route back to it.
#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    plugin_id: String,
}

impl ResponseNormalizer {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn normalize(&self, raw: &Value) -> Result<PluginState, NormalizeError> {
        let (components, dialect) = match VersionedResponse::parse(raw)? {
            VersionedResponse::Legacy(components) => (components, ButtonDialect::Legacy),
            VersionedResponse::V1(components) => (components, ButtonDialect::Typed),
        };

        let mut normalized = Vec::with_capacity(components.len());
        for (index, component) in components.iter().enumerate() {
            if let Some(component) = self.component(index, component, dialect)? {
                normalized.push(component);
            }
        }
        Ok(PluginState {
            components: normalized,
        })
    }

    fn component(
        &self,
        index: usize,
        raw: &Value,
        dialect: ButtonDialect,
    ) -> Result<Option<Component>, NormalizeError> {
        let Some(fields) = raw.as_object() else {
            debug!(plugin_id = %self.plugin_id, index, "Dropping non-map component");
            return Ok(None);
        };
        let kind = fields.get("type").and_then(Value::as_str);
        let Some(component_type) = kind.and_then(ComponentType::parse) else {
            debug!(plugin_id = %self.plugin_id, index, kind = ?kind, "Dropping component of unknown type");
            return Ok(None);
        };

        let entries: &[Value] = match fields.get("content") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(NormalizeError::Invalid(format!(
                    "component {index}: content must be a list, got {}",
                    kind_name(other)
                )));
            }
        };
        let sibling_ids: HashSet<String> = entries
            .iter()
            .filter_map(|entry| id_text(entry.get("id")))
            .collect();

        let content = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| self.content(index, position, entry, &sibling_ids, dialect))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Component {
            id: id_text(fields.get("id")).unwrap_or_else(|| index.to_string()),
            component_type,
            title: text_field(fields, "title"),
            summary: text_field(fields, "summary"),
            content,
        }))
    }

    fn content(
        &self,
        index: usize,
        position: usize,
        raw: &Value,
        sibling_ids: &HashSet<String>,
        dialect: ButtonDialect,
    ) -> Result<ComponentContent, NormalizeError> {
        let missing_id = || NormalizeError::MissingContentId { index, position };
        let fields = raw.as_object().ok_or_else(missing_id)?;
        let id = id_text(fields.get("id")).ok_or_else(missing_id)?;

        let content_type = fields
            .get("type")
            .and_then(Value::as_str)
            .and_then(ContentType::parse)
            .unwrap_or(ContentType::Popout);

        // Only a ref string becomes a proxy; anything else is dropped.
        let submit = match fields.get("submit") {
            Some(Value::String(reference)) => Some(SubmitProxy::new(
                self.plugin_id.as_str(),
                CallbackRef::new(reference.as_str()),
            )),
            None | Some(Value::Null) => None,
            Some(other) => {
                debug!(plugin_id = %self.plugin_id, content = %id, kind = kind_name(other), "Ignoring non-ref submit");
                None
            }
        };

        let buttons = match fields.get("buttons") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(buttons)) => buttons
                .iter()
                .map(|button| button_from(button, sibling_ids, dialect))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(NormalizeError::Invalid(format!(
                    "content '{id}': buttons must be a list, got {}",
                    kind_name(other)
                )));
            }
        };

        Ok(ComponentContent {
            id,
            content_type,
            html: text_field(fields, "html"),
            submit,
            buttons,
        })
    }
}

fn button_from(
    raw: &Value,
    sibling_ids: &HashSet<String>,
    dialect: ButtonDialect,
) -> Result<Button, NormalizeError> {
    let fields = raw.as_object().ok_or_else(|| {
        NormalizeError::Invalid(format!("button must be a map, got {}", kind_name(raw)))
    })?;
    let text = text_field(fields, "text").unwrap_or_default();

    let kind = match (fields.get("type").and_then(Value::as_str), dialect) {
        (Some(kind), _) => kind,
        (None, ButtonDialect::Legacy) if fields.contains_key("action") => "action",
        (None, _) => {
            return Err(NormalizeError::UnknownButtonType {
                text,
                kind: String::new(),
            });
        }
    };

    match kind {
        "action" => match fields.get("action") {
            Some(Value::String(reference)) => Ok(Button::Action {
                text,
                action: CallbackRef::new(reference.as_str()),
            }),
            other => Err(NormalizeError::InvalidAction {
                text,
                found: other.map_or("nothing", kind_name),
            }),
        },
        "toggle" => match fields.get("content").and_then(Value::as_str) {
            Some(target) if sibling_ids.contains(target) => Ok(Button::Toggle {
                text,
                content: target.to_string(),
            }),
            _ => Err(NormalizeError::InvalidToggle { text }),
        },
        "submit" => Ok(Button::Submit { text }),
        other => Err(NormalizeError::UnknownButtonType {
            text,
            kind: other.to_string(),
        }),
    }
}

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(fields) if fields.contains_key(FUNCTION_MARKER) => "function",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn normalize(raw: Value) -> Result<PluginState, NormalizeError> {
        ResponseNormalizer::new("p1").normalize(&raw)
    }

    #[test]
    fn full_v1_response() {
        let state = normalize(json!({
            "version": 1,
            "components": [{
                "id": "x",
                "type": "building",
                "title": "HQ",
                "content": [
                    {
                        "id": "default",
                        "type": "popout",
                        "html": "<p>hi</p>",
                        "submit": "x/default/submit#1",
                        "buttons": [
                            {"text": "Go", "type": "action", "action": "x/default/0#1"},
                            {"text": "More", "type": "toggle", "content": "more"},
                            {"text": "Send", "type": "submit"}
                        ]
                    },
                    {"id": "more", "type": "dialog"}
                ]
            }]
        }))
        .unwrap();

        let expected = PluginState {
            components: vec![Component {
                id: "x".into(),
                component_type: ComponentType::Building,
                title: Some("HQ".into()),
                summary: None,
                content: vec![
                    ComponentContent {
                        id: "default".into(),
                        content_type: ContentType::Popout,
                        html: Some("<p>hi</p>".into()),
                        submit: Some(SubmitProxy::new("p1", CallbackRef::from("x/default/submit#1"))),
                        buttons: vec![
                            Button::Action {
                                text: "Go".into(),
                                action: CallbackRef::from("x/default/0#1"),
                            },
                            Button::Toggle {
                                text: "More".into(),
                                content: "more".into(),
                            },
                            Button::Submit { text: "Send".into() },
                        ],
                    },
                    ComponentContent {
                        id: "more".into(),
                        content_type: ContentType::Dialog,
                        html: None,
                        submit: None,
                        buttons: vec![],
                    },
                ],
            }],
        };
        assert_eq!(state, expected);
    }

    #[test]
    fn unknown_component_type_is_dropped() {
        let state = normalize(json!({"components": [{"id": "c1", "type": "bogus"}]})).unwrap();
        assert!(state.components.is_empty());
    }

    #[test]
    fn missing_components_is_empty() {
        assert_eq!(normalize(json!({})).unwrap(), PluginState::default());
        assert_eq!(normalize(json!({"components": null})).unwrap(), PluginState::default());
    }

    #[test]
    fn unknown_button_type_fails() {
        let err = normalize(json!({"components": [{
            "id": "c1", "type": "tile",
            "content": [{"id": "a", "buttons": [{"type": "bogus"}]}]
        }]}))
        .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::UnknownButtonType {
                text: String::new(),
                kind: "bogus".into()
            }
        );
    }

    #[test]
    fn missing_content_id_fails() {
        let err = normalize(json!({"components": [{
            "id": "c1", "type": "tile", "content": [{"id": "a"}, {"type": "inline"}]
        }]}))
        .unwrap_err();
        assert_eq!(err, NormalizeError::MissingContentId { index: 0, position: 1 });
    }

    #[test]
    fn leftover_function_in_action_is_rejected() {
        let err = normalize(json!({"components": [{
            "id": "c1", "type": "tile",
            "content": [{"id": "a", "buttons": [{"text": "Go", "type": "action", "action": {"$fn": "anon"}}]}]
        }]}))
        .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidAction {
                text: "Go".into(),
                found: "function"
            }
        );
    }

    #[test]
    fn toggle_must_name_a_sibling() {
        let err = normalize(json!({"components": [{
            "id": "c1", "type": "tile",
            "content": [{"id": "a", "buttons": [{"text": "T", "type": "toggle", "content": "elsewhere"}]}]
        }]}))
        .unwrap_err();
        assert_eq!(err, NormalizeError::InvalidToggle { text: "T".into() });
    }

    #[test]
    fn non_ref_submit_is_left_undefined() {
        let state = normalize(json!({"components": [{
            "id": "c1", "type": "tile", "content": [{"id": "a", "submit": 5}]
        }]}))
        .unwrap();
        assert_eq!(state.components[0].content[0].submit, None);
    }

    #[test]
    fn legacy_list_accepts_untyped_action_buttons() {
        let state = normalize(json!([{
            "id": "c1", "type": "nav",
            "content": [{"id": "a", "buttons": [{"text": "Go", "action": "c1/a/0#3"}]}]
        }]))
        .unwrap();
        assert_eq!(
            state.components[0].content[0].buttons,
            vec![Button::Action {
                text: "Go".into(),
                action: CallbackRef::from("c1/a/0#3")
            }]
        );

        let typed = normalize(json!({"version": 1, "components": [{
            "id": "c1", "type": "nav",
            "content": [{"id": "a", "buttons": [{"text": "Go", "action": "c1/a/0#3"}]}]
        }]}));
        assert!(matches!(typed, Err(NormalizeError::UnknownButtonType { .. })));
    }

    #[test]
    fn newer_versions_use_latest_dialect() {
        let state = normalize(json!({"version": 9, "components": [{"id": "z", "type": "zone"}]})).unwrap();
        assert_eq!(state.components[0].component_type, ComponentType::Zone);
    }

    #[test]
    fn scalar_root_is_malformed() {
        assert_eq!(normalize(json!(3)), Err(NormalizeError::UnexpectedRoot("number")));
        assert_eq!(normalize(Value::Null), Err(NormalizeError::UnexpectedRoot("null")));
    }
}
