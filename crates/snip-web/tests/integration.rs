//! Integration tests for the snip-web crate.
//!
//! Each test serves a chat agent backed by a scripted engine on an
//! ephemeral port and talks to it with `reqwest` or with the remote agent.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use snip_agent::testing::ScriptedModel;
use snip_agent::wire::{Endpoint, EndpointPaths};
use snip_agent::{
    Agent, AgentConfig, AgentError, BoxError, ChatAgent, ChatOps, ChatResponse, Flow, RemoteAgent,
    Role,
};
use snip_web::{ChatServer, ServerConfig};

const MODEL: &str = "ai/qwen2.5:latest";

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

struct Running {
    base: String,
    agent: Arc<ChatAgent>,
    handle: JoinHandle<snip_web::Result<()>>,
}

async fn start(model: ScriptedModel, server: impl FnOnce(ChatServer) -> ChatServer) -> (Running, Arc<ScriptedModel>) {
    start_with_paths(model, EndpointPaths::default(), server).await
}

async fn start_with_paths(
    model: ScriptedModel,
    paths: EndpointPaths,
    server: impl FnOnce(ChatServer) -> ChatServer,
) -> (Running, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let config = AgentConfig {
        name: "bob".into(),
        system_instructions: "You are helpful.".into(),
        model_id: MODEL.into(),
        engine_url: "http://stub/v1".into(),
    };
    let agent = Arc::new(
        ChatAgent::builder(config)
            .flows(Flow::ALL)
            .client(model.clone())
            .build()
            .await
            .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = server(ChatServer::new(
        ServerConfig {
            paths,
            ..ServerConfig::default()
        },
        agent.clone(),
    ));
    let handle = tokio::spawn(server.serve_on(listener));

    (
        Running {
            base: format!("http://{addr}"),
            agent,
            handle,
        },
        model,
    )
}

/// Decode the `data:` payloads of an event stream body.
fn data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_owned())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
//  JSON endpoints
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn json_endpoints_round_trip() {
    let model = ScriptedModel::new(MODEL);
    model.push_text("4").push_text("5");
    let (server, _model) = start(model, |s| s).await;
    let http = reqwest::Client::new();

    let health: Value = http
        .get(format!("{}/healthcheck", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok"}));

    let reply: Value = http
        .post(format!("{}/api/chat", server.base))
        .json(&json!({"message": "What is 2+2?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply, json!({"response": "4", "finish_reason": "stop"}));

    // The nested form is accepted too.
    let reply: Value = http
        .post(format!("{}/api/chat", server.base))
        .json(&json!({"data": {"message": "And plus 1?"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["response"], "5");

    let messages: Vec<Value> = http
        .get(format!("{}/api/messages", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages.len(), 4);

    let info: Value = http
        .get(format!("{}/api/information", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["name"], "bob");
    assert_eq!(info["model_id"], MODEL);
}

#[tokio::test]
async fn add_system_message_appends_to_history() {
    let (server, _model) = start(ScriptedModel::new(MODEL), |s| s).await;
    let http = reqwest::Client::new();

    let ack: Value = http
        .post(format!("{}/api/add-system-message", server.base))
        .json(&json!({"context": "Be brief."}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack, json!({"status": "ok"}));

    let messages = server.agent.messages().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].text(), "Be brief.");
}

#[tokio::test]
async fn bad_body_is_a_json_error() {
    let (server, _model) = start(ScriptedModel::new(MODEL), |s| s).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", server.base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn engine_failure_is_a_json_error() {
    let model = ScriptedModel::new(MODEL);
    model.push_error("engine down");
    let (server, _model) = start(model, |s| s).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", server.base))
        .json(&json!({"message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("engine down"));
    assert!(server.agent.messages().await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Routing
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn disabled_and_overridden_paths() {
    let paths = EndpointPaths::default()
        .with(Endpoint::Messages, "-")
        .with(Endpoint::Healthcheck, "/health");
    let (server, _model) = start_with_paths(ScriptedModel::new(MODEL), paths, |s| s).await;
    let http = reqwest::Client::new();

    let status = |path: &'static str| {
        let http = http.clone();
        let url = format!("{}{path}", server.base);
        async move { http.get(url).send().await.unwrap().status() }
    };
    assert_eq!(status("/api/messages").await, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(status("/healthcheck").await, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(status("/health").await, reqwest::StatusCode::OK);

    // Shutdown is disabled unless configured.
    let resp = http
        .post(format!("{}/server/shutdown", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn extra_routes_are_served() {
    let (server, _model) = start(ScriptedModel::new(MODEL), |s| {
        s.route("/version", get(|| async { "1.0" }))
    })
    .await;
    let body = reqwest::get(format!("{}/version", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "1.0");
}

// ═══════════════════════════════════════════════════════════════════════
//  Streaming
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_stream_emits_chunks_final_and_done() {
    let model = ScriptedModel::new(MODEL);
    model.push_text_stream(&["Hel", "lo"]);
    let (server, _model) = start(model, |s| s).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat-stream", server.base))
        .json(&json!({"message": "greet"}))
        .send()
        .await
        .unwrap();
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let lines = data_lines(&resp.text().await.unwrap());
    assert_eq!(lines.len(), 4);
    let first: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first, json!({"message": {"response": "Hel"}}));
    let last: Value = serde_json::from_str(&lines[2]).unwrap();
    assert_eq!(
        last,
        json!({"result": {"response": "Hello", "finish_reason": "stop"}})
    );
    assert_eq!(lines[3], "[DONE]");

    assert_eq!(server.agent.messages().await.unwrap().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
//  Remote agent against a live server
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn remote_agent_drives_server() {
    let model = ScriptedModel::new(MODEL);
    model.push_text("4").push_text_stream(&["Hello ", "world"]);
    let (server, _model) = start(model, |s| s).await;
    let remote = RemoteAgent::new("remote", server.base.clone()).unwrap();

    remote.health().await.unwrap();
    assert_eq!(remote.info().await.unwrap().name, "bob");
    assert_eq!(remote.ask_with_memory("What is 2+2?").await.unwrap().text, "4");

    let mut chunks = 0;
    let mut on_chunk = |c: &ChatResponse| -> Result<(), BoxError> {
        if !c.is_terminal() {
            chunks += 1;
        }
        Ok(())
    };
    let response = remote.ask_stream("greet", &mut on_chunk).await.unwrap();
    assert_eq!(response.text, "Hello world");
    assert!(response.is_finish_reason_stop());
    assert_eq!(chunks, 2);

    let messages = remote.messages().await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        remote.context_size().await.unwrap(),
        messages.iter().map(|m| m.char_len()).sum::<usize>()
    );

    remote.add_system_message("Be brief.").await.unwrap();
    assert_eq!(server.agent.messages().await.unwrap().len(), 5);

    let err = remote.replace_messages(Vec::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::UnsupportedOnRemote { .. }));
}

#[tokio::test]
async fn cancel_stream_endpoint_stops_generation() {
    let model = ScriptedModel::new(MODEL).with_chunk_delay(Duration::from_millis(20));
    model.push_text_stream(&["a "; 50]);
    let (server, _model) = start(model, |s| s).await;

    let remote = Arc::new(RemoteAgent::new("remote", server.base.clone()).unwrap());
    let streaming = {
        let remote = remote.clone();
        tokio::spawn(async move {
            let mut on_chunk = |_: &ChatResponse| -> Result<(), BoxError> { Ok(()) };
            remote.ask_stream("Write a long poem", &mut on_chunk).await
        })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !server.agent.has_active_stream() {
        assert!(tokio::time::Instant::now() < deadline, "stream never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    remote.cancel_remote_stream().await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), streaming)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, AgentError::RemoteStreamFailed { ref message, .. } if message == "<cancelled>"));
    assert!(!server.agent.has_active_stream());
}

// ═══════════════════════════════════════════════════════════════════════
//  Shutdown
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_endpoint_stops_serving() {
    let paths = EndpointPaths::default().with(Endpoint::Shutdown, "/server/shutdown");
    let (server, _model) = start_with_paths(ScriptedModel::new(MODEL), paths, |s| s).await;

    let ack: Value = reqwest::Client::new()
        .post(format!("{}/server/shutdown", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack, json!({"status": "shutting down"}));

    let result = tokio::time::timeout(Duration::from_secs(1), server.handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());

    let after = reqwest::Client::new()
        .get(format!("{}/healthcheck", server.base))
        .send()
        .await;
    assert!(after.is_err());
}

#[tokio::test]
async fn shutdown_token_stops_serving() {
    let mut token = None;
    let (server, _model) = start(ScriptedModel::new(MODEL), |s| {
        token = Some(s.shutdown_token());
        s
    })
    .await;

    token.unwrap().cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), server.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
