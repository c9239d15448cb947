//! Integration tests for the HTTP chat client against a mock server.

use std::time::Duration;

use coachline::{ChatClient, ClientConfig, Message, WireFormat};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {f}\n\n")).collect()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn client_for(server: &MockServer) -> ChatClient {
    let config = ClientConfig::new()
        .with_base_url(server.uri())
        .with_retry_base_delay(Duration::from_millis(10));
    ChatClient::new(config).expect("client should build")
}

async fn collect(client: &ChatClient, prompt: &str, history: &[Message]) -> Vec<coachline::Result<String>> {
    client
        .stream(prompt, history)
        .await
        .expect("stream should open")
        .collect()
        .await
}

#[tokio::test]
async fn stream_without_done_ends_on_close() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(event_stream(sse_body(&[
            r#"{"content":"Hello"}"#,
            r#"{"content":" world"}"#,
            r#"{"content":"!"}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let chunks: Vec<String> = collect(&client_for(&server), "hi", &[])
        .await
        .into_iter()
        .map(|c| c.expect("chunk"))
        .collect();
    assert_eq!(chunks, vec!["Hello", " world", "!"]);
    assert_eq!(chunks.concat(), "Hello world!");
}

#[tokio::test]
async fn stream_stops_at_done_and_skips_empty_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(event_stream(sse_body(&[
            r#"{"content":""}"#,
            r#"{"content":"Rest well."}"#,
            "[DONE]",
            r#"{"content":"after done"}"#,
        ])))
        .mount(&server)
        .await;

    let chunks: Vec<String> = collect(&client_for(&server), "sleep tips", &[])
        .await
        .into_iter()
        .map(|c| c.expect("chunk"))
        .collect();
    assert_eq!(chunks, vec!["Rest well."]);
}

#[tokio::test]
async fn request_carries_prompt_and_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .and(body_partial_json(json!({"message": "and tomorrow?"})))
        .respond_with(event_stream(sse_body(&[r#"{"content":"Cardio."}"#])))
        .expect(1)
        .mount(&server)
        .await;

    let history = vec![
        Message::user("what should I train today?"),
        Message::assistant("Legs."),
    ];
    let items = collect(&client_for(&server), "and tomorrow?", &history).await;
    assert_eq!(items.len(), 1);

    let requests = server.received_requests().await.expect("recording enabled");
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(
        body["history"],
        json!([
            {"role": "user", "content": "what should I train today?"},
            {"role": "assistant", "content": "Legs."}
        ])
    );
}

#[tokio::test]
async fn error_frame_terminates_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(event_stream(sse_body(&[
            r#"{"content":"Start with"}"#,
            r#"{"error":"upstream model unavailable"}"#,
            r#"{"content":"never delivered"}"#,
        ])))
        .mount(&server)
        .await;

    let items = collect(&client_for(&server), "hi", &[]).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().ok(), Some("Start with"));
    let err = items[1].as_ref().expect_err("error frame");
    assert!(err.is_remote());
    assert_eq!(err.user_message(), "upstream model unavailable");
}

#[tokio::test]
async fn rate_limited_stream_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(event_stream(sse_body(&[r#"{"content":"Finally."}"#, "[DONE]"])))
        .expect(1)
        .mount(&server)
        .await;

    let items = collect(&client_for(&server), "hi", &[]).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_deref().ok(), Some("Finally."));
}

#[tokio::test]
async fn rate_limit_is_surfaced_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .expect(4)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .send("hi", &[])
        .await
        .expect_err("rate limited");
    assert!(err.is_rate_limit());
    assert_eq!(err.status_code(), Some(429));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    assert_eq!(
        err.user_message(),
        "Rate limit exceeded! You may have hit your daily quota. Try again later."
    );
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .send("hi", &[])
        .await
        .expect_err("server error");
    assert!(err.is_network());
    assert_eq!(err.status_code(), Some(500));
    assert_eq!(err.user_message(), "Failed to get a response. Please try again.");
}

#[tokio::test]
async fn single_shot_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"message": "protein per day?"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "About 1.6 g per kg."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .send("protein per day?", &[])
        .await
        .expect("reply");
    assert_eq!(reply, "About 1.6 g per kg.");
}

#[tokio::test]
async fn plain_text_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/gemini/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Warm up for five minutes \u{2014} then stretch."))
        .expect(2)
        .mount(&server)
        .await;

    let config = ClientConfig::new()
        .with_base_url(server.uri())
        .with_wire_format(WireFormat::PlainText);
    let client = ChatClient::new(config).expect("client should build");
    let history = vec![Message::user("hi"), Message::assistant("Hello!")];

    let streamed: String = client
        .stream("routine?", &history)
        .await
        .expect("stream should open")
        .map(|c| c.expect("chunk"))
        .collect::<Vec<_>>()
        .await
        .concat();
    assert_eq!(streamed, "Warm up for five minutes \u{2014} then stretch.");

    let reply = client.send("routine?", &history).await.expect("reply");
    assert_eq!(reply, streamed);

    let requests = server.received_requests().await.expect("recording enabled");
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(
        body,
        json!({"messages": [
            {"role": "user", "text": "hi"},
            {"role": "model", "text": "Hello!"},
            {"role": "user", "text": "routine?"}
        ]})
    );
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let config = ClientConfig::new()
        .with_base_url("http://127.0.0.1:9/")
        .with_timeout(Duration::from_secs(2));
    let err = match ChatClient::new(config).expect("client").stream("hi", &[]).await {
        Ok(_) => panic!("expected a connection failure"),
        Err(err) => err,
    };
    assert!(err.is_network());
}
