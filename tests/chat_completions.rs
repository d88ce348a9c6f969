use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mcp_tool_loop::error::LlmError;
use mcp_tool_loop::llm::{
    ChatCompletionsClient, CompletionProvider, CompletionRequest, LlmSettings, Message, ToolChoice,
};

/// What the stub saw: the bearer header and the request body.
type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

#[derive(Clone)]
struct Stub {
    seen: Seen,
    status: StatusCode,
    reply: Value,
}

async fn completions(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.seen.lock().unwrap().push((auth, body));
    (stub.status, Json(stub.reply)).into_response()
}

/// Serve `reply` with `status` on `/v1/chat/completions`; returns the base URL.
async fn stub_provider(status: StatusCode, reply: Value) -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(Stub {
            seen: Arc::clone(&seen),
            status,
            reply,
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), seen)
}

fn client(base_url: String) -> ChatCompletionsClient {
    ChatCompletionsClient::new(LlmSettings {
        base_url,
        api_key: Some("sk-test".into()),
        model: "gpt-4o".into(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn calculate_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "calculate",
            "description": "Calculate the result of a mathematical expression.",
            "parameters": {
                "type": "object",
                "properties": { "expression": { "type": "string" } },
                "required": ["expression"]
            }
        }
    })
}

#[tokio::test]
async fn parses_tool_calls_from_first_choice() {
    let (base, seen) = stub_provider(
        StatusCode::OK,
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": { "name": "calculate", "arguments": "{\"expression\": \"90 * 68.6\"}" }
                    }]
                }
            }]
        }),
    )
    .await;

    let response = client(base)
        .complete(CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("What is 90 multiplied by 68.6?")],
            tools: vec![calculate_tool()],
            tool_choice: ToolChoice::Auto,
        })
        .await
        .unwrap();

    assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    let calls = response.message.tool_call_requests();
    assert_eq!(calls.len(), 1);
    let call = calls[0].clone().normalize();
    assert_eq!(call.id.as_deref(), Some("call_abc"));
    assert_eq!(call.name, "calculate");
    assert_eq!(call.arguments.to_value(), json!({"expression": "90 * 68.6"}));

    let seen = seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["tools"][0]["function"]["name"], "calculate");
    assert_eq!(body["messages"][0]["role"], "user");
}

#[tokio::test]
async fn second_pass_sends_tool_choice_none() {
    let (base, seen) = stub_provider(
        StatusCode::OK,
        json!({
            "choices": [{ "message": { "role": "assistant", "content": "6174.0" } }]
        }),
    )
    .await;

    let response = client(base)
        .complete(CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![
                Message::user("q"),
                Message::tool(Some("call_abc".into()), "6174.0"),
            ],
            tools: vec![calculate_tool()],
            tool_choice: ToolChoice::None,
        })
        .await
        .unwrap();

    assert_eq!(response.message.text(), "6174.0");
    let seen = seen.lock().unwrap();
    let body = &seen[0].1;
    assert_eq!(body["tool_choice"], "none");
    assert_eq!(body["messages"][1]["role"], "tool");
    assert_eq!(body["messages"][1]["tool_call_id"], "call_abc");
}

#[tokio::test]
async fn error_status_is_an_api_error() {
    let (base, _seen) = stub_provider(
        StatusCode::TOO_MANY_REQUESTS,
        json!({ "error": { "message": "slow down" } }),
    )
    .await;

    let err = client(base)
        .complete(CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("q")],
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        })
        .await
        .unwrap_err();

    match err {
        LlmError::Api { status, message } => {
            assert_eq!(status, 429);
            assert!(message.contains("slow down"), "{message}");
        }
        other => panic!("expected an API error, got {other}"),
    }
}

#[tokio::test]
async fn empty_choices_are_malformed() {
    let (base, _seen) = stub_provider(StatusCode::OK, json!({ "choices": [] })).await;

    let err = client(base)
        .complete(CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("q")],
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::MalformedResponse(_)), "{err}");
}
