//! Integration test: run a stand-in chat backend on a free port and drive the
//! real HTTP backend and controller against it.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use lib::dispatch::{ChatController, SessionSync, SyncEvent};
use lib::gateway::{Gateway, HttpBackend, OFFLINE_TEXT};
use lib::session::{Message, Session};
use lib::telemetry::TelemetrySampler;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Stored {
    chats: Arc<Mutex<Vec<Value>>>,
}

async fn get_chats(State(stored): State<Stored>) -> Json<Value> {
    let mut chats = stored.chats.lock().unwrap().clone();
    chats.sort_by(|a, b| b["id"].as_str().cmp(&a["id"].as_str()));
    Json(Value::Array(chats))
}

async fn save_chat(State(stored): State<Stored>, Json(chat): Json<Value>) -> Json<Value> {
    let mut chats = stored.chats.lock().unwrap();
    chats.retain(|c| c["id"] != chat["id"]);
    chats.push(chat);
    Json(json!({"ok": true}))
}

async fn delete_chat(State(stored): State<Stored>, Path(id): Path<String>) -> Json<Value> {
    stored.chats.lock().unwrap().retain(|c| c["id"] != id.as_str());
    Json(json!({"ok": true}))
}

async fn models() -> Json<Value> {
    Json(json!(["unsloth/Llama-3.2-1B-Instruct", "qwen2.5-0.5b"]))
}

async fn generate(Json(req): Json<Value>) -> Json<Value> {
    Json(json!({
        "response": format!("{} via {}", req["prompt"].as_str().unwrap_or(""), req["model"].as_str().unwrap_or(""))
    }))
}

async fn system_stats() -> Json<Value> {
    Json(json!({
        "global": {"cpu": 12.5, "ram_pct": 41.0, "ram_gb": "6.4/15.6 GB"},
        "app": {"cpu": 0.7, "ram_gb": "0.11 GB"}
    }))
}

fn backend_router() -> Router {
    Router::new()
        .route("/get_chats", get(get_chats))
        .route("/save_chat", post(save_chat))
        .route("/delete_chat/:id", delete(delete_chat))
        .route("/models", get(models))
        .route("/generate", post(generate))
        .route("/system_stats", get(system_stats))
        .with_state(Stored::default())
}

/// Serve the router on a free loopback port; returns the base URL. The server task
/// is left running when the test ends.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn controller(base_url: &str) -> ChatController {
    let backend = HttpBackend::new(Some(base_url.to_string()));
    ChatController::new(Gateway::new(Arc::new(backend)), SessionSync::Remote)
}

async fn wait_for(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("sync event within 5s")
        .expect("event channel open")
}

#[tokio::test]
async fn session_round_trips_through_backend() {
    let url = serve(backend_router()).await;
    let ctl = controller(&url);
    assert_eq!(ctl.load_all().await, 0);
    assert_eq!(ctl.load_models().await, 2);
    assert_eq!(ctl.selected_model(), "unsloth/Llama-3.2-1B-Instruct");

    let mut rx = ctl.subscribe();
    let outcome = ctl.send_message("ping").await.expect("turn runs");
    assert_eq!(outcome.reply, "ping via unsloth/Llama-3.2-1B-Instruct");
    assert!(!ctl.is_loading());
    assert_eq!(
        wait_for(&mut rx).await,
        SyncEvent::Persisted {
            session_id: outcome.session_id.clone()
        }
    );
    let saved = ctl.active_session().expect("active session");
    assert_eq!(saved.title, "ping");

    let reloaded = controller(&url);
    assert_eq!(reloaded.load_all().await, 1);
    assert_eq!(reloaded.sessions(), vec![saved.clone()]);

    let mut rx = reloaded.subscribe();
    assert!(reloaded.delete_session(&saved.id));
    assert_eq!(
        wait_for(&mut rx).await,
        SyncEvent::Deleted {
            session_id: saved.id.clone()
        }
    );
    assert_eq!(controller(&url).load_all().await, 0);
}

#[tokio::test]
async fn delete_targets_ids_with_reserved_characters() {
    let url = serve(backend_router()).await;
    let gateway = Gateway::new(Arc::new(HttpBackend::new(Some(url))));
    let odd = Session {
        id: "a/b?c#d".to_string(),
        title: "odd".to_string(),
        messages: vec![Message::user("hi")],
    };
    gateway.persist_session(&odd).await.expect("save");
    assert_eq!(gateway.sessions().await, vec![odd.clone()]);

    gateway.delete_session(&odd.id).await.expect("delete");
    assert!(gateway.sessions().await.is_empty());
}

#[tokio::test]
async fn generate_error_payload_becomes_offline_reply() {
    let router = Router::new().route(
        "/generate",
        post(|| async { Json(json!({"error": "model not loaded"})) }),
    );
    let url = serve(router).await;
    let ctl = controller(&url);
    let outcome = ctl.send_message("hello").await.expect("turn runs");
    assert!(outcome.offline);
    assert_eq!(outcome.reply, OFFLINE_TEXT);
    let messages = ctl.active_session().unwrap().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text, OFFLINE_TEXT);
    assert!(!ctl.is_loading());
}

#[tokio::test]
async fn malformed_listings_load_empty() {
    let router = Router::new()
        .route("/get_chats", get(|| async { Json(json!({"detail": "Not Found"})) }))
        .route("/models", get(|| async { Json(json!("one-model")) }));
    let url = serve(router).await;
    let ctl = controller(&url);
    assert_eq!(ctl.load_all().await, 0);
    assert_eq!(ctl.load_models().await, 0);
    assert_eq!(ctl.selected_model(), "");
}

#[tokio::test]
async fn unreachable_backend_is_not_fatal() {
    let url = format!("http://127.0.0.1:{}", free_port());
    let ctl = controller(&url);
    let mut rx = ctl.subscribe();
    assert_eq!(ctl.load_all().await, 0);
    let outcome = ctl.send_message("anyone there?").await.expect("turn runs");
    assert!(outcome.offline);
    assert_eq!(outcome.reply, OFFLINE_TEXT);
    assert!(!ctl.is_loading());
    assert!(matches!(wait_for(&mut rx).await, SyncEvent::GenerateFailed { .. }));
    assert!(matches!(wait_for(&mut rx).await, SyncEvent::PersistFailed { .. }));
}

#[tokio::test]
async fn sampler_reads_system_stats() {
    let url = serve(backend_router()).await;
    let gateway = Gateway::new(Arc::new(HttpBackend::new(Some(url))));
    let stats = gateway.telemetry().await.expect("stats");
    assert_eq!(stats.global.ram_gb, "6.4/15.6 GB");

    let mut sampler = TelemetrySampler::new(gateway, Duration::from_millis(50));
    sampler.start();
    let mut waited = 0;
    while sampler.history().len() < 2 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += 1;
    }
    sampler.stop();
    let history = sampler.history();
    assert!(history.len() >= 2, "expected samples, got {}", history.len());
    let latest = sampler.latest();
    assert_eq!(latest.cpu, 12.5);
    assert_eq!(latest.ram_gb, "6.4/15.6 GB");
    assert_eq!(latest.app_cpu, 0.7);
    assert_eq!(latest.app_ram, "0.11 GB");
}
