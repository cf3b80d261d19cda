use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use billing_core::ListPage;
use billing_engine::{
    error_from_body, ApiError, ApiGateway, AtomicFileWriter, CredentialStore, ErrorKind,
    GatewaySettings, ListSource, LogoutHook, MemoryCredentialStore, NoopLogoutHook, TaskState,
    TaskStatusSource,
};
use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct CountingHook {
    calls: AtomicUsize,
}

impl LogoutHook for CountingHook {
    fn on_logout(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    gateway: ApiGateway,
    store: Arc<MemoryCredentialStore>,
    hook: Arc<CountingHook>,
}

fn harness(server: &MockServer, token: Option<&str>) -> Harness {
    let settings = GatewaySettings::with_base_url(&format!("{}/api", server.uri())).unwrap();
    let store = Arc::new(match token {
        Some(token) => MemoryCredentialStore::with_token(token),
        None => MemoryCredentialStore::new(),
    });
    let hook = Arc::new(CountingHook::default());
    let gateway = ApiGateway::new(settings, store.clone(), hook.clone()).unwrap();
    Harness {
        gateway,
        store,
        hook,
    }
}

#[tokio::test]
async fn attaches_bearer_and_list_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/readings/drafts"))
        .and(header("Authorization", "Bearer t-123"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "50"))
        .and(query_param("period_id", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": 1, "room": "101"}],
            "total": 51
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("t-123"));
    let params = vec![
        ("page".to_string(), "2".to_string()),
        ("limit".to_string(), "50".to_string()),
        ("period_id".to_string(), "7".to_string()),
    ];
    let page: ListPage<Value> = h
        .gateway
        .fetch_page("/readings/drafts", &params)
        .await
        .expect("list ok");

    assert_eq!(page.total, 51);
    assert_eq!(page.items, vec![json!({"id": 1, "room": "101"})]);
}

#[tokio::test]
async fn validation_error_uses_detail_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tariffs"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"detail": "Tariff already exists"})),
        )
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let err = h
        .gateway
        .post_json::<_, Value>("/tariffs", &json!({"name": "water"}))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Rejected(422));
    assert_eq!(err.status(), Some(422));
    assert_eq!(err.message, "Tariff already exists");
    assert_eq!(err.to_string(), "Tariff already exists");
}

#[tokio::test]
async fn validation_error_list_is_joined() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/readings"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [
                {"loc": ["body", "hot_water"], "msg": "must be positive"},
                {"loc": ["body", "cold_water"], "msg": "field required"}
            ]
        })))
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let err = h
        .gateway
        .post_json::<_, Value>("/readings", &json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.message, "must be positive; field required");
}

#[tokio::test]
async fn server_fault_falls_back_to_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/debtors"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let err = h
        .gateway
        .get_json::<Value>("/debtors", &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server(502));
    assert_eq!(err.message, "upstream unavailable");
}

#[tokio::test]
async fn empty_error_body_uses_status_line() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let err = h
        .gateway
        .get_json::<Value>("/missing", &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Rejected(404));
    assert_eq!(err.message, "404 Not Found");
}

#[tokio::test]
async fn concurrent_unauthorized_logs_out_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .expect(5)
        .mount(&server)
        .await;

    let h = harness(&server, Some("stale"));
    let calls = (0..5).map(|_| h.gateway.get_json::<Value>("/me", &[]));
    let results = join_all(calls).await;

    assert!(results
        .iter()
        .all(|result| result.as_ref().unwrap_err().kind == ErrorKind::Unauthorized));
    assert_eq!(h.hook.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.token(), None);
    assert!(!h.gateway.is_authenticated());
}

#[tokio::test]
async fn login_stores_token_and_rearms_logout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"username": "accountant", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let h = harness(&server, Some("old"));
    let _ = h.gateway.get_json::<Value>("/me", &[]).await;
    assert_eq!(h.hook.calls.load(Ordering::SeqCst), 1);

    h.gateway.login("accountant", "secret").await.expect("login");
    assert_eq!(h.store.token().as_deref(), Some("fresh"));

    let _ = h.gateway.get_json::<Value>("/me", &[]).await;
    assert_eq!(h.hook.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn wrong_password_is_a_plain_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid credentials"})),
        )
        .mount(&server)
        .await;

    let h = harness(&server, None);
    let err = h.gateway.login("resident", "nope").await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Rejected(401));
    assert_eq!(err.message, "Invalid credentials");
    assert_eq!(h.hook.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn manual_logout_clears_and_notifies() {
    let server = MockServer::start().await;
    let h = harness(&server, Some("t"));

    h.gateway.logout();

    assert_eq!(h.store.token(), None);
    assert_eq!(h.hook.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn task_status_is_read_from_task_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/abc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "download_url": "/files/report-1.xlsx"
        })))
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let status = h.gateway.task_status("abc-1").await.expect("status");

    assert_eq!(status.state(), TaskState::Done);
    assert_eq!(status.download_url.as_deref(), Some("/files/report-1.xlsx"));
}

#[tokio::test]
async fn download_streams_blob_to_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/receipt-12.pdf"))
        .and(header("Authorization", "Bearer t"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"))
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    let target = h
        .gateway
        .download("/api/files/receipt-12.pdf", &writer, "receipt-12.pdf")
        .await
        .expect("download");

    assert_eq!(std::fs::read(target).unwrap(), b"%PDF-1.7");
}

#[test]
fn absolute_urls_bypass_base() {
    let settings = GatewaySettings::with_base_url("http://billing.local/api/").unwrap();
    let gateway = ApiGateway::new(
        settings,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(NoopLogoutHook),
    )
    .unwrap();

    assert_eq!(
        gateway.url("readings", &[]).unwrap().as_str(),
        "http://billing.local/api/readings"
    );
    assert_eq!(
        gateway
            .url("https://cdn.example.com/r.zip", &[])
            .unwrap()
            .as_str(),
        "https://cdn.example.com/r.zip"
    );
}

#[test]
fn server_links_resolve_against_origin() {
    let settings = GatewaySettings::with_base_url("http://billing.local/api").unwrap();
    let gateway = ApiGateway::new(
        settings,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(NoopLogoutHook),
    )
    .unwrap();

    assert_eq!(
        gateway.url("/readings/drafts", &[]).unwrap().as_str(),
        "http://billing.local/api/readings/drafts"
    );
    assert_eq!(
        gateway.resolve_link("/api/files/r.xlsx").unwrap().as_str(),
        "http://billing.local/api/files/r.xlsx"
    );
    assert_eq!(
        gateway
            .resolve_link("https://cdn.example.com/r.zip")
            .unwrap()
            .as_str(),
        "https://cdn.example.com/r.zip"
    );
}

#[tokio::test]
async fn download_from_other_host_carries_no_credential() {
    let server = MockServer::start().await;
    let cdn = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"PK".to_vec(), "application/zip"))
        .expect(1)
        .mount(&cdn)
        .await;

    let h = harness(&server, Some("secret-token"));
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    h.gateway
        .download(&format!("{}/archive.zip", cdn.uri()), &writer, "archive.zip")
        .await
        .expect("download");

    let requests = cdn.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn unauthorized_from_other_host_keeps_session() {
    let server = MockServer::start().await;
    let cdn = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expired.zip"))
        .respond_with(ResponseTemplate::new(401).set_body_string("link expired"))
        .mount(&cdn)
        .await;

    let h = harness(&server, Some("t"));
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    let err = h
        .gateway
        .download(&format!("{}/expired.zip", cdn.uri()), &writer, "expired.zip")
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Rejected(401));
    assert_eq!(err.message, "link expired");
    assert_eq!(h.hook.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.token().as_deref(), Some("t"));
}

#[tokio::test]
async fn task_id_is_encoded_as_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/report%202024%2F05"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "PENDING"})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("t"));
    let status = h.gateway.task_status("report 2024/05").await.expect("status");

    assert_eq!(status.state(), TaskState::Pending);
}

#[test]
fn error_body_precedence() {
    let err = error_from_body(
        StatusCode::BAD_REQUEST,
        r#"{"error": "period is closed", "message": "ignored"}"#,
    );
    assert_eq!(err.message, "period is closed");

    let err = error_from_body(StatusCode::CONFLICT, r#"{"message": "already approved"}"#);
    assert_eq!(err.message, "already approved");

    let err = error_from_body(StatusCode::SERVICE_UNAVAILABLE, "   ");
    assert_eq!(err.kind, ErrorKind::Server(503));
    assert_eq!(err.message, "503 Service Unavailable");

    let err = error_from_body(StatusCode::UNAUTHORIZED, "");
    assert!(err.is_unauthorized());
    assert_eq!(err.status(), Some(401));
}

#[test]
fn cancellation_is_not_a_failure() {
    let err = ApiError::cancelled();
    assert!(err.is_cancelled());
    assert_eq!(err.status(), None);
    assert_eq!(err.kind.to_string(), "cancelled");
}
