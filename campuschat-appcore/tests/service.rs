use std::sync::Arc;
use std::time::Duration;

use campuschat_appcore::{AppService, user_facing_error};
use campuschat_core::types::SessionId;
use campuschat_runtime::{AuthState, ConfigStore, MemoryVault, TokenVault};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(server: &MockServer, dir: &tempfile::TempDir, vault: Arc<dyn TokenVault>) -> AppService {
    let uri = server.uri();
    AppService::open(
        ConfigStore::at_path(dir.path().join("config.json")),
        move |cfg| cfg.with_base_url(uri),
        dir.path(),
        vault,
    )
    .unwrap()
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok", "token_type": "bearer", "expires_in": 3600
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn failed_delete_leaves_document_cache_unchanged() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "d1", "filename": "a.pdf"},
            {"id": "d2", "filename": "b.pdf"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/documents/d1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"detail": "db locked"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/documents/d2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let svc = service(&server, &dir, Arc::new(MemoryVault::default()));
    svc.login("ada@uni.edu", "pw").await.unwrap();
    assert_eq!(svc.list_documents().await.unwrap().len(), 2);

    let err = svc.delete_document("d1").await.unwrap_err();
    assert!(user_facing_error(&err).contains("having trouble"));
    assert_eq!(svc.cached_documents().len(), 2);

    svc.delete_document("d2").await.unwrap();
    let cached = svc.cached_documents();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, "d1");
}

#[tokio::test]
async fn upload_polls_until_finished_and_refreshes_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "upload_id": "u1", "filename": "notes.txt", "status": "processing"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/upload/progress/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "completed", "progress": 100.0, "chunk_count": 3
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "documents": [{"id": "d9", "filename": "notes.txt", "chunk_count": 3}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "office hours: 9-5").unwrap();

    let svc = service(&server, &dir, Arc::new(MemoryVault::with_token("tok")));
    let accepted = svc.upload_document(&file).await.unwrap();
    assert_eq!(accepted.upload_id, "u1");

    let mut seen = Vec::new();
    let done = svc
        .wait_for_upload("u1", Duration::from_millis(100), |p| seen.push(p.progress))
        .await
        .unwrap();
    assert!(done.is_finished());
    assert_eq!(seen, vec![100.0]);
    assert_eq!(svc.cached_documents()[0].id, "d9");
}

#[tokio::test]
async fn failed_processing_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/upload/progress/u2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "failed", "progress": 10.0, "error": "unsupported file"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let svc = service(&server, &dir, Arc::new(MemoryVault::default()));
    let err = svc
        .wait_for_upload("u2", Duration::from_millis(100), |_| {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unsupported file"));
}

#[tokio::test]
async fn active_conversation_survives_restart() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat/memory/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
            "data: {\"type\":\"content\",\"content\":\"Hi there\",\"done\":false}\n",
            "data: {\"type\":\"complete\",\"done\":true,\"session_id\":\"s-7\",\"message_count\":2}\n",
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/s-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "session_id": "s-7",
            "messages": [{"message": "hello", "response": "Hi there"}]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let vault: Arc<dyn TokenVault> = Arc::new(MemoryVault::default());
    {
        let svc = service(&server, &dir, vault.clone());
        svc.login("ada@uni.edu", "pw").await.unwrap();
        svc.send_message("hello").await.unwrap();
    }

    let svc = service(&server, &dir, vault);
    assert!(matches!(svc.auth_state(), AuthState::SignedIn { .. }));
    let resumed = svc.resume_last_conversation().await.unwrap();
    assert_eq!(resumed, Some(SessionId::new("s-7")));
    let view = svc.chat().snapshot();
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[1].content, "Hi there");
}

#[tokio::test]
async fn logout_clears_session_and_caches() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let svc = service(&server, &dir, Arc::new(MemoryVault::default()));
    svc.login("ada@uni.edu", "pw").await.unwrap();
    let mut auth = svc.watch_auth();
    auth.borrow_and_update();

    svc.logout().unwrap();
    assert!(auth.has_changed().unwrap());
    assert!(!svc.auth_state().is_signed_in());
    assert!(svc.cached_conversations().is_empty());
}
