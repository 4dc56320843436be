//! End-to-end client behavior against a mock HTTP server

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use viport_client::{
    ApiClient, ApiError, ClientConfig, Credentials, MemoryTokenStore, SharedTokenStore,
};

fn config_for(server: &MockServer) -> ClientConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut config = ClientConfig::new(server.uri());
    config.retry_delay_ms = 50;
    config
}

fn success(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
}

fn failure(status: u16, code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "success": false,
        "error": {"code": code, "message": message, "statusCode": status}
    }))
}

#[tokio::test]
async fn get_unwraps_success_envelope_and_sends_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header_exists("x-request-id"))
        .respond_with(success(json!({"id": 1, "name": "alice"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let user: Value = client.get("/users/me").await.unwrap();
    assert_eq!(user["name"], "alice");
}

#[tokio::test]
async fn login_then_authorized_call_then_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(success(json!({
            "accessToken": "a1", "refreshToken": "r1", "expiresIn": 900
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(failure(401, "TOKEN_EXPIRED", "token expired"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(success(json!({"id": 9})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(success(json!({"accessToken": "a2", "refreshToken": "r2"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let session: Value = client
        .post("/auth/login", &json!({"email": "a@b.c", "password": "pw"}))
        .await
        .unwrap();
    client.set_credentials(Credentials::new(
        session["accessToken"].as_str().unwrap(),
        session["refreshToken"].as_str().unwrap(),
    ));

    let me: Value = client.get("/users/me").await.unwrap();
    assert_eq!(me["id"], 9);
    assert_eq!(client.credentials().unwrap().access_token, "a2");
}

#[tokio::test]
async fn error_envelope_code_survives_to_the_caller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(failure(409, "EMAIL_TAKEN", "email already registered"))
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let err = client
        .post::<Value, _>("/auth/register", &json!({"email": "a@b.c"}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EMAIL_TAKEN");
    assert_eq!(err.status(), Some(409));
}

#[tokio::test]
async fn malformed_body_is_reported_as_such() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/odd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"foo": "bar"})))
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let err = client.get::<Value>("/odd").await.unwrap_err();
    assert!(matches!(err, ApiError::MalformedResponse { .. }));
}

#[tokio::test]
async fn concurrent_401s_trigger_exactly_one_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(failure(401, "TOKEN_EXPIRED", "token expired"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(success(json!({"id": 1})))
        .mount(&server)
        .await;
    // slow refresh widens the window in which the other callers queue up
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header_exists("x-request-id"))
        .respond_with(
            success(json!({"accessToken": "fresh", "refreshToken": "r2", "expiresIn": 900}))
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store: SharedTokenStore = Arc::new(MemoryTokenStore::new());
    store.set(Credentials::new("stale", "r1"));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = refreshes.clone();
    let client = Arc::new(
        ApiClient::with_hooks(
            config_for(&server),
            store.clone(),
            Some(Arc::new(move |_creds: &Credentials| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        )
        .unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.get::<Value>("/users/me").await
        }));
    }
    for task in tasks {
        let user = task.await.unwrap().unwrap();
        assert_eq!(user["id"], 1);
    }

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(store.get().unwrap().access_token, "fresh");
    assert_eq!(store.get().unwrap().refresh_token, "r2");
}

#[tokio::test]
async fn missing_refresh_token_means_no_refresh_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(failure(401, "TOKEN_EXPIRED", "token expired"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(success(json!({"accessToken": "x", "refreshToken": "y"})))
        .expect(0)
        .mount(&server)
        .await;

    let store: SharedTokenStore = Arc::new(MemoryTokenStore::new());
    store.set(Credentials::new("stale", ""));
    let client = ApiClient::with_store(config_for(&server), store.clone()).unwrap();

    let err = client.get::<Value>("/users/me").await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized { .. }));
    assert!(store.get().is_none());
}

#[tokio::test]
async fn failed_refresh_clears_credentials_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(failure(401, "TOKEN_EXPIRED", "token expired"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(failure(401, "REFRESH_INVALID", "refresh token revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let store: SharedTokenStore = Arc::new(MemoryTokenStore::new());
    store.set(Credentials::new("stale", "r1"));
    let signed_out = Arc::new(AtomicUsize::new(0));
    let flag = signed_out.clone();
    let client = ApiClient::with_hooks(
        config_for(&server),
        store.clone(),
        None,
        Some(Arc::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        })),
    )
    .unwrap();

    let err = client.get::<Value>("/users/me").await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized { .. }));
    assert!(store.get().is_none());
    assert_eq!(signed_out.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limited_request_waits_out_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            failure(429, "RATE_LIMIT_EXCEEDED", "slow down")
                .insert_header("retry-after", "1"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(success(json!([{"id": 1}])))
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let started = Instant::now();
    let feed: Value = client.get("/feed").await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(feed[0]["id"], 1);
}

#[tokio::test]
async fn exhausted_429s_surface_the_rate_limit_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(failure(429, "RATE_LIMIT_EXCEEDED", "slow down"))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.max_retries = 1;
    let client = ApiClient::new(config).unwrap();
    let err = client.get::<Value>("/feed").await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimited { .. }));
}

#[tokio::test]
async fn network_failures_back_off_then_give_up() {
    // nothing listens on this port
    let mut config = ClientConfig::new("http://127.0.0.1:9");
    config.max_retries = 2;
    config.retry_delay_ms = 50;
    let client = ApiClient::new(config).unwrap();

    let started = Instant::now();
    let err = client.get::<Value>("/users/me").await.unwrap_err();
    assert!(matches!(err, ApiError::Network { .. }));
    // two retries: 50ms then 100ms of backoff before the final failure
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn timeouts_fail_immediately_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(success(json!({})).set_delay(Duration::from_secs(3)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.timeout_secs = 1;
    config.retry_delay_ms = 5000;
    let client = ApiClient::new(config).unwrap();

    let started = Instant::now();
    let err = client.get::<Value>("/slow").await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout));
    // a retry would have waited out the 5s backoff
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn rate_limit_headers_are_captured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(
            success(json!({"id": 1}))
                .insert_header("x-ratelimit-limit", "100")
                .insert_header("x-ratelimit-remaining", "97")
                .insert_header("x-ratelimit-reset", "1735689600"),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    assert!(client.rate_limit().is_none());
    let _: Value = client.get("/users/me").await.unwrap();

    let info = client.rate_limit().unwrap();
    assert_eq!(info.limit, 100);
    assert_eq!(info.remaining, 97);
    assert_eq!(info.reset_at, 1_735_689_600);
}

#[tokio::test]
async fn health_check_needs_no_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(success(json!({"status": "ok", "version": "1.4.2"})))
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let health = client.health_check().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version.as_deref(), Some("1.4.2"));
}

#[tokio::test]
async fn upload_reports_monotonic_progress_to_completion() {
    use bytes::Bytes;
    use parking_lot::Mutex;
    use viport_client::UploadFile;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/media/upload"))
        .respond_with(success(json!({"fileId": "f-1"})))
        .mount(&server)
        .await;

    let client = ApiClient::new(config_for(&server)).unwrap();
    let files = vec![UploadFile {
        field_name: "file".to_string(),
        file_name: "photo.png".to_string(),
        mime_type: "image/png".to_string(),
        data: Bytes::from(vec![7u8; 200 * 1024]),
    }];

    let reports: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let result: Value = client
        .upload(
            "/media/upload",
            &files,
            &[("visibility".to_string(), "public".to_string())],
            Some(Arc::new(move |sent, total| {
                sink.lock().push((sent, total));
            })),
        )
        .await
        .unwrap();
    assert_eq!(result["fileId"], "f-1");

    let reports = reports.lock();
    assert!(!reports.is_empty());
    let total = (200 * 1024) as u64;
    assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(*reports.last().unwrap(), (total, total));
    assert!(reports.iter().all(|(_, t)| *t == total));
}

#[tokio::test]
async fn upload_replays_once_after_refresh() {
    use bytes::Bytes;
    use viport_client::UploadFile;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/media/upload"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(failure(401, "TOKEN_EXPIRED", "token expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/media/upload"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(success(json!({"fileId": "f-2"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(success(json!({"accessToken": "fresh", "refreshToken": "r2"})))
        .expect(1)
        .mount(&server)
        .await;

    let store: SharedTokenStore = Arc::new(MemoryTokenStore::new());
    store.set(Credentials::new("stale", "r1"));
    let client = ApiClient::with_store(config_for(&server), store).unwrap();

    let files = vec![UploadFile {
        field_name: "file".to_string(),
        file_name: "clip.mp4".to_string(),
        mime_type: "video/mp4".to_string(),
        data: Bytes::from_static(b"0123456789"),
    }];
    let result: Value = client
        .upload("/media/upload", &files, &[], None)
        .await
        .unwrap();
    assert_eq!(result["fileId"], "f-2");
}
