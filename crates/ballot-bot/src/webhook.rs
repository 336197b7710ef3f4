use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use ballot::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::telegram::{self, Outbox, Routed, Update, UNKNOWN_ACTION};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub struct AppState {
    pub engine: Arc<Engine>,
    pub outbox: Arc<dyn Outbox>,
    pub webhook_secret: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/webhook", post(webhook_handler))
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "ballot-bot",
        "active_sessions": state.engine.active_sessions(),
    }))
}

fn secrets_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let given = headers
        .get(SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if !secrets_match(&state.webhook_secret, given) {
        warn!("Rejected webhook call with a bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    // Anything but 200 makes Telegram redeliver, so bad payloads are dropped.
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Dropping unparseable update: {}", e);
            return StatusCode::OK;
        }
    };

    match telegram::route(&update, state.engine.config()) {
        Routed::Ignored => {}
        Routed::UnknownAction { callback_id } => {
            info!(update_id = update.update_id, "unknown callback action");
            if let Err(e) = state
                .outbox
                .answer_callback(&callback_id, Some(UNKNOWN_ACTION))
                .await
            {
                error!("Failed to answer callback: {:#}", e);
            }
        }
        Routed::Event { event, callback_id } => {
            if let Some(id) = callback_id {
                if let Err(e) = state.outbox.answer_callback(&id, None).await {
                    error!("Failed to answer callback: {:#}", e);
                }
            }
            let voter = event.voter().clone();
            for reply in state.engine.handle(event).await {
                if let Err(e) = state.outbox.deliver(&voter, &reply).await {
                    error!(voter = %voter, "Failed to deliver reply: {:#}", e);
                }
            }
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use ballot::{CodeRecord, ElectionConfig, InMemoryRowStore, Reply, VoterId};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingOutbox {
        delivered: Mutex<Vec<(VoterId, Reply)>>,
        answered: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        async fn deliver(&self, chat: &VoterId, reply: &Reply) -> Result<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((chat.clone(), reply.clone()));
            Ok(())
        }

        async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
            self.answered
                .lock()
                .unwrap()
                .push((callback_id.to_string(), text.map(str::to_string)));
            Ok(())
        }
    }

    fn app() -> (Router, Arc<RecordingOutbox>) {
        let store = Arc::new(InMemoryRowStore::with_codes(vec![
            CodeRecord::issued("7-А", 25, "AB12CD34").to_row(),
        ]));
        let engine = Arc::new(Engine::new(store, Arc::new(ElectionConfig::default())));
        let outbox = Arc::new(RecordingOutbox::default());
        let state = Arc::new(AppState {
            engine,
            outbox: outbox.clone(),
            webhook_secret: "s3cret".into(),
        });
        (router(state), outbox)
    }

    fn post_update(secret: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn start_update() -> Value {
        json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "is_bot": false, "first_name": "Lesia"},
                "chat": {"id": 42, "type": "private"},
                "date": 1700000000,
                "text": "/start"
            }
        })
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_secret() {
        let (app, outbox) = app();
        let response = app
            .clone()
            .oneshot(post_update(None, start_update()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(post_update(Some("guess"), start_update()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(outbox.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_drives_engine_and_delivers() {
        let (app, outbox) = app();
        let response = app
            .oneshot(post_update(Some("s3cret"), start_update()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let delivered = outbox.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, VoterId::from(42));
        assert!(delivered[0].1.text().contains("Lesia"));
    }

    #[tokio::test]
    async fn test_unknown_callback_never_reaches_engine() {
        let (app, outbox) = app();
        let response = app
            .oneshot(post_update(
                Some("s3cret"),
                json!({
                    "update_id": 2,
                    "callback_query": {
                        "id": "cb-9",
                        "from": {"id": 42, "is_bot": false, "first_name": "Lesia"},
                        "chat_instance": "x",
                        "data": "admin_reset"
                    }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(outbox.delivered.lock().unwrap().is_empty());
        assert_eq!(
            outbox.answered.lock().unwrap().as_slice(),
            &[("cb-9".to_string(), Some(UNKNOWN_ACTION.to_string()))]
        );
    }

    #[tokio::test]
    async fn test_garbage_payload_is_acknowledged() {
        let (app, outbox) = app();
        let response = app
            .oneshot(post_update(Some("s3cret"), json!({"not": "an update"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(outbox.delivered.lock().unwrap().is_empty());
    }
}
