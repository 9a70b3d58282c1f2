//! OpenAiGenerator against a stub chat-completions endpoint.

mod common;

use common::{Canned, StubServer};
use oracle_core::domain::{Bytes32, PendingRequest};
use oracle_core::generator::{CodeGenerator, GenerationContext, GenerationError, PreviousAttempt};
use oracle_core::sanitize_ancillary;
use oracle_http::{GeneratorConfig, OpenAiGenerator};
use serde_json::json;

const SCRIPT: &str = "import json\n\ndef resolve_oracle():\n    return {'decision': 'NO', 'reason': 'n/a'}\n\nif __name__ == '__main__':\n    print(json.dumps(resolve_oracle()))";

fn context() -> GenerationContext {
    let request = PendingRequest {
        request_id: Bytes32::new([7; 32]),
        requester: "0x01".into(),
        reward_token: "0x02".into(),
        reward: "0".into(),
        timestamp: 1_700_000_000,
        identifier: Bytes32::new([8; 32]),
        ancillary_data: b"Will ETH close above 3000?".to_vec(),
        settled: false,
        settled_price: 0,
        evidence_hash: Bytes32::ZERO,
    };
    GenerationContext::new(&request, &sanitize_ancillary(&request.ancillary_text()))
}

fn completion(content: &str) -> Canned {
    Canned::json(
        200,
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        }),
    )
}

fn generator(server: &StubServer, api_key: Option<&str>) -> OpenAiGenerator {
    OpenAiGenerator::new(GeneratorConfig {
        api_base: format!("{}/v1", server.base_url),
        model: "test-model".into(),
        api_key: api_key.map(str::to_string),
        timeout_secs: 5,
        ..GeneratorConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_fenced_reply_is_unwrapped() {
    let server = StubServer::start(vec![completion(&format!(
        "Here you go:\n```python\n{SCRIPT}\n```\n"
    ))])
    .await;
    let gen = generator(&server, Some("sk-test"));

    let code = gen.generate("resolve it", &context()).await.unwrap();
    assert_eq!(code, SCRIPT);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/v1/chat/completions");
    assert_eq!(requests[0].header("authorization"), Some("Bearer sk-test"));

    let body = requests[0].json();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("Task: resolve it"));
    assert!(user.contains("Will ETH close above 3000?"));
}

#[tokio::test]
async fn test_retry_prompt_carries_previous_code_and_error() {
    let server = StubServer::start(vec![completion(SCRIPT)]).await;
    let gen = generator(&server, None);

    let ctx = context().with_previous_attempt(Some(PreviousAttempt {
        previous_code: "print('broken')".into(),
        error: "NameError: name 'x' is not defined".into(),
    }));
    gen.generate("resolve it", &ctx).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].header("authorization"), None);
    let body = requests[0].json();
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.starts_with("The previous code failed."));
    assert!(user.contains("print('broken')"));
    assert!(user.contains("NameError"));
}

#[tokio::test]
async fn test_http_error_is_reported_with_status() {
    let server = StubServer::start(vec![Canned::text(503, "model loading")]).await;
    let gen = generator(&server, None);

    let err = gen.generate("t", &context()).await.unwrap_err();
    match err {
        GenerationError::Http { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "model loading");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_reply_without_entry_point_is_rejected() {
    let server = StubServer::start(vec![completion("print('hello')")]).await;
    let gen = generator(&server, None);

    let err = gen.generate("t", &context()).await.unwrap_err();
    assert!(matches!(err, GenerationError::MissingEntryPoint));
}

#[tokio::test]
async fn test_empty_choices_is_empty_response() {
    let server = StubServer::start(vec![Canned::json(200, json!({"choices": []}))]).await;
    let gen = generator(&server, None);

    let err = gen.generate("t", &context()).await.unwrap_err();
    assert!(matches!(err, GenerationError::EmptyResponse));
}

#[tokio::test]
async fn test_non_json_body_is_invalid_response() {
    let server = StubServer::start(vec![Canned::text(200, "<html>proxy</html>")]).await;
    let gen = generator(&server, None);

    let err = gen.generate("t", &context()).await.unwrap_err();
    assert!(matches!(err, GenerationError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let gen = OpenAiGenerator::new(GeneratorConfig {
        api_base: "http://127.0.0.1:9/v1".into(),
        timeout_secs: 2,
        ..GeneratorConfig::default()
    })
    .unwrap();

    let err = gen.generate("t", &context()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Transport(_)));
}
