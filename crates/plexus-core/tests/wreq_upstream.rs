//! The real HTTP client against a local mock upstream.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plexus_common::{ApiType, RequestContext};
use plexus_config::{ConfigHandle, ConfigSnapshot};
use plexus_core::{
    DispatchOutcome, Engine, EngineOptions, UpstreamClientConfig, WreqUpstreamClient,
};

fn config_for(base_url: &str) -> ConfigSnapshot {
    let yaml = format!(
        r#"
providers:
  mock:
    api_base_url: {base_url}
    api_key: sk-mock-123456789
models:
  default:
    selector: in_order
    targets:
      - {{ provider: mock, model: mock-model }}
"#
    );
    ConfigSnapshot::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn unary_chat_round_trip_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-mock-123456789"))
        .and(body_partial_json(json!({ "model": "mock-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-http",
            "object": "chat.completion",
            "created": 0,
            "model": "mock-model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "pong" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        Arc::new(WreqUpstreamClient::new(UpstreamClientConfig::default()).expect("client builds"));
    let engine = Engine::new(
        ConfigHandle::new(config_for(&server.uri())),
        client,
        EngineOptions::default(),
    )
    .await;

    let raw = json!({
        "model": "default",
        "messages": [{ "role": "user", "content": "ping" }],
    })
    .to_string();
    let outcome = engine
        .handle(
            ApiType::Chat,
            raw.as_bytes(),
            RequestContext::new(ApiType::Chat),
        )
        .await
        .unwrap();

    let DispatchOutcome::Unary { status, body, response } = outcome else {
        panic!("expected unary outcome");
    };
    assert_eq!(status, 200);
    assert_eq!(response.text(), "pong");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");
}
