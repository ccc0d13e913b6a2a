use campuschat_core::api::{ChatRequest, LoginRequest};
use campuschat_core::events::StreamEvent;
use campuschat_providers::endpoints::Endpoints;
use campuschat_providers::{HttpRuntime, StreamDecoder, TransportError, parse};
use futures_util::StreamExt;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runtime() -> HttpRuntime {
    HttpRuntime::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn login_posts_credentials_and_parses_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(body_partial_json(serde_json::json!({"email": "ada@uni.edu"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "email": "ada@uni.edu"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoints = Endpoints::new(&server.uri()).unwrap();
    let req = endpoints.login(&LoginRequest {
        email: "ada@uni.edu".into(),
        password: "pw".into(),
    });
    let resp = runtime().execute(&req).await.unwrap();
    let login = parse::parse_login(resp).unwrap();
    assert_eq!(login.access_token, "tok-1");
    assert_eq!(login.email.as_deref(), Some("ada@uni.edu"));
}

#[tokio::test]
async fn history_sends_bearer_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/history"))
        .and(query_param("limit", "10"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "history": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoints = Endpoints::new(&server.uri()).unwrap();
    let resp = runtime()
        .execute(&endpoints.chat_history(10, Some("tok")))
        .await
        .unwrap();
    let msgs = parse::parse_history(resp).unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[1].content, "hello");
}

#[tokio::test]
async fn stream_reports_unauthorized_before_any_byte() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/memory/stream"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "detail": "Not authenticated"
        })))
        .mount(&server)
        .await;

    let endpoints = Endpoints::new(&server.uri()).unwrap();
    let req = endpoints.chat_stream(&ChatRequest::new("hi"), true, Some("stale"));
    let err = runtime().open_stream(&req).await.err().unwrap();
    assert_eq!(err, TransportError::Unauthorized);
}

#[tokio::test]
async fn stream_server_error_is_a_hard_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(serde_json::json!({"detail": "warming up"})),
        )
        .mount(&server)
        .await;

    let endpoints = Endpoints::new(&server.uri()).unwrap();
    let req = endpoints.chat_stream(&ChatRequest::new("hi"), false, None);
    match runtime().open_stream(&req).await {
        Err(TransportError::Status { status, detail }) => {
            assert_eq!(status, 503);
            assert_eq!(detail, "warming up");
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("expected a hard failure"),
    }
}

#[tokio::test]
async fn streamed_body_decodes_into_events() {
    let body = concat!(
        "data: {\"type\":\"content\",\"content\":\"Hi \",\"done\":false}\n\n",
        "data: {\"type\":\"content\",\"content\":\"there\",\"done\":false}\n\n",
        "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Hi there\",",
        "\"session_id\":\"s-42\",\"message_count\":2,\"is_new_conversation\":true}\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/memory/stream"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let endpoints = Endpoints::new(&server.uri()).unwrap();
    let req = endpoints.chat_stream(&ChatRequest::new("hi"), true, Some("tok"));
    let mut stream = runtime().open_stream(&req).await.unwrap();

    let mut decoder = StreamDecoder::new();
    let mut events = Vec::new();
    while let Some(chunk) = stream.next().await {
        events.extend(decoder.feed(&chunk.unwrap()));
    }
    events.extend(decoder.finish());

    assert_eq!(events[0], StreamEvent::ContentDelta("Hi ".into()));
    assert_eq!(events[1], StreamEvent::ContentDelta("there".into()));
    match &events[2] {
        StreamEvent::Complete {
            final_text,
            session,
        } => {
            assert_eq!(final_text.as_deref(), Some("Hi there"));
            assert_eq!(session.as_ref().unwrap().session_id.as_str(), "s-42");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    // Port 9 (discard) on localhost is expected to refuse connections.
    let endpoints = Endpoints::new("http://127.0.0.1:9").unwrap();
    let err = runtime().execute(&endpoints.health()).await.err().unwrap();
    assert!(matches!(err, TransportError::Network(_)), "{err:?}");
}
