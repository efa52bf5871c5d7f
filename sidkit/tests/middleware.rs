use std::convert::Infallible;

use axum::Router;
use axum::body::Body;
use axum::routing::get;
use http::header::{COOKIE, SET_COOKIE};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use sidkit::config::{CookieConfig, SessionConfig};
use sidkit::store::memory::MemoryStore;
use sidkit::store::{StoreError, StoreResult};
use sidkit::{Document, Session, SessionId, SessionLayer, SessionStore};
use tower::{Layer, ServiceExt, service_fn};
use tracing_test::traced_test;

/// A store whose backend is always down.
#[derive(Debug, Clone, Copy)]
struct UnavailableStore;

fn backend_down() -> StoreError {
    StoreError::Backend("connection refused".into())
}

impl sidkit::AsyncSessionStore for UnavailableStore {
    async fn create_session(&self) -> StoreResult<SessionId> {
        Err(backend_down())
    }

    async fn get_session(&self, _sid: &SessionId) -> StoreResult<Document> {
        Err(backend_down())
    }

    async fn put_session(&self, _sid: &SessionId, _document: &Document) -> StoreResult<()> {
        Err(backend_down())
    }

    async fn remove_session(&self, _sid: &SessionId) -> StoreResult<()> {
        Err(backend_down())
    }
}

fn request_with_cookie(cookie: &str) -> Request<Body> {
    Request::builder()
        .uri("/")
        .header(COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_owned())
        .collect()
}

fn session_id_of(set_cookie: &str) -> SessionId {
    let cookie = cookie::Cookie::parse(set_cookie).unwrap();
    assert_eq!(cookie.name(), "sid");
    cookie.value().parse().unwrap()
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn count_visits(session: Session) -> String {
    let visits = session.get_as::<u64>("visits").await.unwrap().unwrap_or(0) + 1;
    session.set("visits", visits).await.unwrap();
    visits.to_string()
}

async fn logout(session: Session) -> &'static str {
    session.destroy();
    "bye"
}

fn app(store: MemoryStore, config: SessionConfig) -> Router {
    Router::new()
        .route("/", get(count_visits))
        .route("/logout", get(logout))
        .layer(SessionLayer::new(store, config))
}

#[tokio::test]
async fn new_client_gets_a_cookie() {
    let store = MemoryStore::new();
    let app = app(store.clone(), SessionConfig::default());

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    let sid = session_id_of(&cookies[0]);
    assert!(cookies[0].contains("HttpOnly"));
    assert!(cookies[0].contains("SameSite=Strict"));
    assert!(cookies[0].contains("Path=/"));
    assert!(cookies[0].contains("Expires="));
    assert_eq!(store.get(&sid, "visits").unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn returning_client_keeps_its_session() {
    let store = MemoryStore::new();
    let app = app(store.clone(), SessionConfig::default());

    let first = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let sid = session_id_of(&set_cookies(&first)[0]);

    let second = app
        .oneshot(request_with_cookie(&format!("sid={sid}")))
        .await
        .unwrap();

    assert!(set_cookies(&second).is_empty());
    assert_eq!(body_string(second).await, "2");
    assert_eq!(store.get(&sid, "visits").unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn unknown_but_valid_session_id_is_reused() {
    let store = MemoryStore::new();
    let app = app(store.clone(), SessionConfig::default());
    let sid = SessionId::generate();

    let response = app
        .oneshot(request_with_cookie(&format!("sid={sid}")))
        .await
        .unwrap();

    assert!(set_cookies(&response).is_empty());
    assert_eq!(store.get(&sid, "visits").unwrap(), Some(json!(1)));
}

#[tokio::test]
#[traced_test]
async fn malformed_session_id_is_replaced() {
    let app = app(MemoryStore::new(), SessionConfig::default());

    let response = app
        .oneshot(request_with_cookie("sid=../../etc/passwd"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    session_id_of(&cookies[0]);
    assert!(logs_contain("Ignoring malformed session cookie"));
}

#[tokio::test]
async fn custom_cookie_name() {
    let config = SessionConfig::builder()
        .cookie(CookieConfig::builder().name("session").build())
        .build();
    let store = MemoryStore::new();
    let app = app(store.clone(), config);
    let sid = SessionId::generate();

    let response = app
        .oneshot(request_with_cookie(&format!("sid=ignored; session={sid}")))
        .await
        .unwrap();

    assert!(set_cookies(&response).is_empty());
    assert_eq!(store.get(&sid, "visits").unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn destroy_clears_cookie_and_keeps_document() {
    let store = MemoryStore::new();
    let app = app(store.clone(), SessionConfig::default());
    let sid = store.create_session().unwrap();
    store.set(&sid, "visits", json!(5)).unwrap();

    let response = app
        .oneshot(
            Request::get("/logout")
                .header(COOKIE, format!("sid={sid}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("sid=;"));
    assert!(cookies[0].contains("Max-Age=0"));
    assert_eq!(store.get(&sid, "visits").unwrap(), Some(json!(5)));
}

#[tokio::test]
async fn destroy_can_remove_document() {
    let store = MemoryStore::new();
    let config = SessionConfig::builder().destroy_removes_session(true).build();
    let app = app(store.clone(), config);
    let sid = store.create_session().unwrap();
    store.set(&sid, "visits", json!(5)).unwrap();

    let response = app
        .oneshot(
            Request::get("/logout")
                .header(COOKIE, format!("sid={sid}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get(&sid, "visits").unwrap(), None);
}

#[tokio::test]
#[traced_test]
async fn store_failure_is_internal_server_error() {
    let service = SessionLayer::new(UnavailableStore, SessionConfig::default()).layer(
        service_fn(|_request: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::from("unreachable")))
        }),
    );

    let response = service
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(body_string(response).await, "");
    assert!(logs_contain("Session middleware failed"));
}

#[tokio::test]
async fn handler_store_errors_reach_the_handler() {
    let service = SessionLayer::new(UnavailableStore, SessionConfig::default()).layer(
        service_fn(|request: Request<Body>| async move {
            let session = Session::from_request(&request);
            let error = session.get("visits").await.unwrap_err();
            Ok::<_, Infallible>(Response::new(Body::from(error.to_string())))
        }),
    );
    let sid = SessionId::generate();

    let response = service
        .oneshot(request_with_cookie(&format!("sid={sid}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        "session store: backend error: connection refused"
    );
}

#[tokio::test]
async fn extractor_without_layer_is_rejected() {
    let app = Router::new().route("/", get(count_visits));

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
