//! Wire-shape tests for the canonical state consumed by the rendering layer.

use modhost_types::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn sample_config() -> PluginConfig {
    PluginConfig::new("mod.shop", "Shop", PluginKind::Building, "fn update(s) { #{} }")
        .with_trust(TrustLevel::Trusted)
        .supporting("0xbuilding")
}

fn sample_state() -> PluginState {
    PluginState {
        components: vec![Component {
            id: "shop".into(),
            component_type: ComponentType::Building,
            title: Some("Shop".into()),
            summary: None,
            content: vec![
                ComponentContent {
                    id: "default".into(),
                    content_type: ContentType::Popout,
                    html: Some("<p>Buy things</p>".into()),
                    submit: Some(SubmitProxy::new(
                        "mod.shop",
                        CallbackRef::from("shop/default/submit#3"),
                    )),
                    buttons: vec![
                        Button::Action {
                            text: "Buy".into(),
                            action: CallbackRef::from("shop/default/0#3"),
                        },
                        Button::Toggle {
                            text: "Info".into(),
                            content: "info".into(),
                        },
                        Button::Submit { text: "Send".into() },
                    ],
                },
                ComponentContent {
                    id: "info".into(),
                    content_type: ContentType::Inline,
                    html: None,
                    submit: None,
                    buttons: vec![],
                },
            ],
        }],
    }
}

#[test]
fn update_response_wire_shape() {
    let response = PluginUpdateResponse::ok(sample_config(), sample_state());
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(
        value,
        json!({
            "config": {
                "id": "mod.shop",
                "name": "Shop",
                "source": "fn update(s) { #{} }",
                "trust": "trusted",
                "kind": "building",
                "supports": "0xbuilding"
            },
            "state": {
                "components": [{
                    "id": "shop",
                    "type": "building",
                    "title": "Shop",
                    "content": [
                        {
                            "id": "default",
                            "type": "popout",
                            "html": "<p>Buy things</p>",
                            "submit": {"pluginId": "mod.shop", "callback": "shop/default/submit#3"},
                            "buttons": [
                                {"type": "action", "text": "Buy", "action": "shop/default/0#3"},
                                {"type": "toggle", "text": "Info", "content": "info"},
                                {"type": "submit", "text": "Send"}
                            ]
                        },
                        {"id": "info", "type": "inline", "buttons": []}
                    ]
                }]
            }
        })
    );
}

#[test]
fn update_response_survives_json_transport() {
    let response = PluginUpdateResponse::failed(sample_config(), "normalization failed");
    let text = serde_json::to_string(&response).unwrap();
    let back: PluginUpdateResponse = serde_json::from_str(&text).unwrap();
    assert_eq!(back, response);
    assert_eq!(back.error.as_deref(), Some("normalization failed"));
}

#[test]
fn button_text_accessor() {
    let state = sample_state();
    let texts: Vec<&str> = state.components[0].content[0]
        .buttons
        .iter()
        .map(Button::text)
        .collect();
    assert_eq!(texts, vec!["Buy", "Info", "Send"]);
}
