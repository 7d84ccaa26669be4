#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde_json::{Value, json};

pub const TOKEN: &str = "dev";

/// In-process stub of the course service, bound to an ephemeral port and shut
/// down when the guard drops.
pub struct StubGuard {
    pub base_url: String,
    pub token: String,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for StubGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone)]
struct StubState {
    courses: Arc<Mutex<Vec<Value>>>,
}

pub fn spawn_stub(courses: Vec<Value>) -> Result<StubGuard> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind stub listener")?;
    let addr = listener.local_addr().context("stub local addr")?;
    listener
        .set_nonblocking(true)
        .context("set stub listener nonblocking")?;

    let state = StubState {
        courses: Arc::new(Mutex::new(courses)),
    };
    let app = router(state);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build stub runtime");
        rt.block_on(async move {
            let listener =
                tokio::net::TcpListener::from_std(listener).expect("adopt stub listener");
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("serve stub");
        });
    });

    let base_url = format!("http://{addr}");
    wait_for_healthz(&base_url)?;

    Ok(StubGuard {
        base_url,
        token: TOKEN.to_string(),
        shutdown: Some(tx),
        handle: Some(handle),
    })
}

pub fn wait_for_healthz(base_url: &str) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > Duration::from_secs(5) {
            anyhow::bail!("stub did not become healthy at {}/healthz", base_url);
        }
        match client.get(format!("{base_url}/healthz")).send() {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => thread::sleep(Duration::from_millis(10)),
        }
    }
}

/// A base URL nothing listens on, for connectivity-failure tests.
pub fn dead_base_url() -> Result<String> {
    // Bind and drop: the port existed a moment ago and is now closed.
    let listener = TcpListener::bind("127.0.0.1:0").context("bind probe listener")?;
    let addr = listener.local_addr().context("probe local addr")?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

fn router(state: StubState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/whoami", get(whoami))
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/:id",
            axum::routing::put(update_course).delete(delete_course),
        )
        .route("/courses/upload", post(upload))
        .route("/courses/import", post(import))
        .route("/grades", get(list_grades))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route("/plain", get(|| async { "just text" }))
        .route("/broken", get(broken))
        .route("/invalid", get(invalid))
        .route("/forbidden", get(forbidden))
        .route("/expired-msg", get(expired_msg))
        .route("/expired-text", get(expired_text))
        .with_state(state)
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {TOKEN}");
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"message": "invalid token"}})),
    )
        .into_response()
}

fn value_id(item: &Value) -> Option<String> {
    match item.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

async fn whoami(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"user": "pat", "role": "teacher"})).into_response()
}

async fn list_courses(State(state): State<StubState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(state.courses.lock().unwrap().clone()).into_response()
}

async fn create_course(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(mut course): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut courses = state.courses.lock().unwrap();
    if value_id(&course).is_none() {
        let next = courses
            .iter()
            .filter_map(|c| value_id(c)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        if let Some(map) = course.as_object_mut() {
            map.insert("id".to_string(), json!(next));
        }
    }
    courses.push(course.clone());
    (StatusCode::CREATED, Json(course)).into_response()
}

async fn update_course(
    State(state): State<StubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut courses = state.courses.lock().unwrap();
    let Some(course) = courses
        .iter_mut()
        .find(|c| value_id(c).as_deref() == Some(id.as_str()))
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "course not found"}})),
        )
            .into_response();
    };
    if let (Some(target), Some(fields)) = (course.as_object_mut(), patch.as_object()) {
        for (k, v) in fields {
            if k != "id" {
                target.insert(k.clone(), v.clone());
            }
        }
    }
    Json(course.clone()).into_response()
}

async fn delete_course(
    State(state): State<StubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut courses = state.courses.lock().unwrap();
    let before = courses.len();
    courses.retain(|c| value_id(c).as_deref() != Some(id.as_str()));
    if courses.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "course not found"}})),
        )
            .into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn upload(headers: HeaderMap, mut multipart: Multipart) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut file_name = String::new();
    let mut size = 0usize;
    let mut fields = serde_json::Map::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            file_name = field.file_name().unwrap_or("").to_string();
            size = field.bytes().await.unwrap().len();
        } else {
            fields.insert(name, Value::String(field.text().await.unwrap()));
        }
    }
    Json(json!({"file": file_name, "bytes": size, "fields": fields})).into_response()
}

async fn import(headers: HeaderMap, body: axum::body::Bytes) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    Json(json!({"received": body.len(), "content_type": content_type})).into_response()
}

async fn list_grades(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([{"id": 900, "student": "sam", "score": 87}])).into_response()
}

async fn broken() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": {"message": "boom"}})),
    )
        .into_response()
}

async fn invalid() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({"error": "bad input"})),
    )
        .into_response()
}

async fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"message": "insufficient role"})),
    )
        .into_response()
}

async fn expired_msg() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "token expired"})),
    )
        .into_response()
}

async fn expired_text() -> Response {
    (StatusCode::UNAUTHORIZED, "token expired").into_response()
}
