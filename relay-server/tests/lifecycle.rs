use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use actix_web::{test, web, App};
use async_trait::async_trait;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use relay_auth::AuthClient;
use relay_config::{AuthConfig, Config, CounterStoreConfig};
use relay_quotas::{CounterStore, CounterStoreError};
use relay_server::dispatch as relay_server_handle;
use relay_server::AppState;

#[derive(Default)]
struct FakeCounterStore {
    counters: Mutex<HashMap<String, u64>>,
}

impl FakeCounterStore {
    fn with(counts: &[(&str, u64)]) -> Self {
        let mut map = HashMap::new();
        for (key, value) in counts {
            map.insert((*key).to_owned(), *value);
        }
        FakeCounterStore {
            counters: Mutex::new(map),
        }
    }
}

#[async_trait]
impl CounterStore for FakeCounterStore {
    async fn counter_read(&self, key: &str) -> Result<u64, CounterStoreError> {
        Ok(*self.counters.lock().unwrap().get(key).unwrap_or(&0))
    }

    async fn counter_incr(&self, key: &str, _ttl_seconds: u64) -> Result<(), CounterStoreError> {
        *self.counters.lock().unwrap().entry(key.to_owned()).or_insert(0) += 1;
        Ok(())
    }
}

fn basic_auth_header(user: &str, pass: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
    format!("Basic {encoded}")
}

fn state_with(auth_url: String, store: FakeCounterStore) -> AppState {
    let auth_config = AuthConfig {
        urls: vec![auth_url],
        timeout: Duration::from_secs(2),
        realm: "proxytest".to_owned(),
    };
    AppState {
        auth_client: Arc::new(AuthClient::new(&auth_config).unwrap()),
        counter_store: Arc::new(store),
        config: Arc::new(Config {
            http_port: 0,
            auth: auth_config,
            counter_store: CounterStoreConfig::default(),
            thread_pool_size: 1,
            bucket_size: None,
        }),
    }
}

#[actix_web::test]
async fn rejects_requests_without_an_authorization_header() {
    let state = state_with("http://127.0.0.1:1/auth".to_owned(), FakeCounterStore::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::to(relay_server_handle)),
    )
    .await;

    let req = test::TestRequest::get().uri("/foo").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 401);
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(header.contains("realm=\"proxytest\""));
}

#[actix_web::test]
async fn surfaces_an_auth_denial_with_its_body_wrapped() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth")
        .match_query(mockito::Matcher::Any)
        .with_status(403)
        .with_body(r#"{"message":"Wrong API key"}"#)
        .create_async()
        .await;

    let state = state_with(format!("{}/auth", server.url()), FakeCounterStore::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::to(relay_server_handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/foo")
        .insert_header(("Authorization", basic_auth_header("user", "pass")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 403);
    let body = test::read_body(resp).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], r#"{"message":"Wrong API key"}"#);
}

#[actix_web::test]
async fn throttled_token_returns_429_with_retry_seconds() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"tokens":[{"id":"abc","rates":[{"value":400,"period":"minute"}]}],
                "upstreams":[{"url":"http://127.0.0.1:1/x","rates":[]}]}"#,
        )
        .create_async()
        .await;

    let now = relay_common::unix_timestamp();
    let bucket = relay_common::bucket(now, 60);
    let key = format!("abc_minute_{bucket}");

    let state = state_with(
        format!("{}/auth", server.url()),
        FakeCounterStore::with(&[(&key, 400)]),
    );
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::to(relay_server_handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/foo")
        .insert_header(("Authorization", basic_auth_header("user", "pass")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 429);
    let retry_after = resp.headers().get("retry-after").unwrap().to_str().unwrap();
    assert!(retry_after.parse::<u64>().unwrap() > 0);
}

#[actix_web::test]
async fn happy_path_forwards_to_the_upstream_and_relays_its_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();

    let upstream_task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buffer = vec![0u8; 4096];
        let read = socket.read(&mut buffer).await.unwrap();
        let received = String::from_utf8_lossy(&buffer[..read]).into_owned();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        received
    });

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(format!(
            r#"{{"tokens":[{{"id":"abc","rates":[{{"value":400,"period":"minute"}}]}}],
                 "upstreams":[{{"url":"http://{upstream_addr}/path?key=val",
                                "rates":[{{"value":1800,"period":"hour"}}]}}]}}"#
        ))
        .create_async()
        .await;

    let state = state_with(format!("{}/auth", server.url()), FakeCounterStore::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::to(relay_server_handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/path?key=val")
        .insert_header(("Authorization", basic_auth_header("user", "pass")))
        .insert_header(("Host", "client-facing-host.example"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"ok");

    let received = upstream_task.await.unwrap();
    assert!(received.starts_with("GET /path?key=val HTTP/1.1"));
    assert!(received.contains("Host: client-facing-host.example"));
}

#[actix_web::test]
async fn upstream_connect_failure_is_reported_as_503() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"tokens":[{"id":"abc","rates":[]}],
                "upstreams":[{"url":"http://127.0.0.1:1/x","rates":[]}]}"#,
        )
        .create_async()
        .await;

    let state = state_with(format!("{}/auth", server.url()), FakeCounterStore::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::to(relay_server_handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/foo")
        .insert_header(("Authorization", basic_auth_header("user", "pass")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 503);
}
