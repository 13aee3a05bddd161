use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::db::DbHandle;
use super::models::LessonQuery;
use super::ws::{WsMessage, broadcast_message};
use crate::errors::LessonStoreError;
use crate::generate::ModelService;
use crate::pipeline::{LessonRequest, Orchestrator, Phase, PipelineSettings};
use crate::sandbox::{RenderOutcome, RenderRequest, render_module};

/// Header carrying the caller's owner reference. Identity is verified upstream.
pub const OWNER_HEADER: &str = "x-owner-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub model: Arc<dyn ModelService>,
    pub settings: PipelineSettings,
    pub ws_tx: broadcast::Sender<String>,
    /// Cancelled on shutdown; every run observes a child token.
    pub cancel: CancellationToken,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<LessonStoreError> for ApiError {
    fn from(err: LessonStoreError) -> Self {
        match &err {
            LessonStoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/generation", post(create_generation))
        .route("/api/lessons", get(list_lessons))
        .route("/api/lessons/{id}", get(get_lesson).delete(delete_lesson))
        .route("/api/lessons/{id}/render", get(render_lesson))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

/// Pull `{ prompt, audience?, tone? }` out of an arbitrary JSON body.
fn parse_generation_body(body: &Value, owner: Option<String>) -> Result<LessonRequest, ApiError> {
    let prompt = match body.get("prompt") {
        Some(Value::String(prompt)) if !prompt.trim().is_empty() => prompt.trim().to_string(),
        _ => {
            return Err(ApiError::BadRequest(
                "Invalid prompt: expected a non-empty string".into(),
            ));
        }
    };
    let hint = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Ok(LessonRequest {
        prompt,
        audience: hint("audience"),
        tone: hint("tone"),
        owner,
    })
}

async fn create_generation(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let owner = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let request = parse_generation_body(&body, owner)?;

    let orchestrator = Orchestrator::new(
        state.model.clone(),
        Arc::new(state.db.clone()),
        state.settings.clone(),
    )
    .with_events(state.ws_tx.clone())
    .with_cancellation(state.cancel.child_token());

    // A dropped client connection must not abandon a run between validation and the store write.
    let outcome = tokio::spawn(async move { orchestrator.run(request).await })
        .await
        .map_err(|e| ApiError::Internal(format!("Generation task failed: {e}")))?;

    let response = match (outcome.phase, outcome.record_id) {
        (Phase::Completed, Some(lesson_id)) => serde_json::json!({
            "success": true,
            "lessonId": lesson_id,
            "title": outcome.title,
            "message": "Lesson generated successfully!",
        }),
        (Phase::Rejected, _) => serde_json::json!({
            "success": false,
            "error": outcome
                .failure_reason
                .unwrap_or_else(|| "This topic is not suitable for a lesson".into()),
        }),
        _ => serde_json::json!({
            "success": false,
            "error": outcome
                .failure_reason
                .unwrap_or_else(|| "Failed to generate lesson".into()),
        }),
    };
    Ok(Json(response))
}

async fn list_lessons(
    State(state): State<SharedState>,
    Query(query): Query<LessonQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let lessons = state
        .db
        .call(move |db| db.list_lessons(&query))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(lessons))
}

async fn get_lesson(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lesson = state.db.fetch(&id).await?;
    Ok(Json(lesson))
}

async fn render_lesson(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let lesson = state.db.fetch(&id).await?;
    let outcome = render_module(&RenderRequest {
        source_text: lesson.source_text,
        module_id: lesson.id,
    });
    Ok(match outcome {
        RenderOutcome::Rendered { html, .. } => Html(html).into_response(),
        RenderOutcome::Failed { module_id, error } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": error, "moduleId": module_id })),
        )
            .into_response(),
    })
}

async fn delete_lesson(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let deleted = state
        .db
        .call(move |db| db.delete_lesson(&lookup))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !deleted {
        return Err(LessonStoreError::NotFound { id }.into());
    }
    tracing::info!(lesson_id = %id, "Lesson deleted");
    broadcast_message(&state.ws_tx, &WsMessage::LessonDeleted { lesson_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lessons::db::LessonDb;
    use crate::lessons::models::NewLesson;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const LESSON: &str = r#""use client";
import React, { useState } from 'react';

export default function LessonComponent() {
  const [count, setCount] = useState(2);
  return <div className="bg-blue-200"><h1>Fractions</h1><p>{count} halves</p></div>;
}
"#;

    struct ScriptedModel(Mutex<VecDeque<String>>);

    #[async_trait]
    impl ModelService for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply"))
        }
    }

    fn test_state(replies: &[&str]) -> SharedState {
        let (ws_tx, _) = broadcast::channel(64);
        Arc::new(AppState {
            db: DbHandle::new(LessonDb::new_in_memory().unwrap()),
            model: Arc::new(ScriptedModel(Mutex::new(
                replies.iter().map(|r| r.to_string()).collect(),
            ))),
            settings: PipelineSettings::default(),
            ws_tx,
            cancel: CancellationToken::new(),
        })
    }

    fn test_app(state: SharedState) -> Router {
        api_router().with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_generation(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/generation")
            .header("content-type", "application/json")
            .header(OWNER_HEADER, "user-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn seed(state: &SharedState, source: &str) -> String {
        let source = source.to_string();
        state
            .db
            .call(move |db| {
                db.insert_lesson(&NewLesson {
                    title: "Fractions".into(),
                    prompt: "teach me fractions".into(),
                    source_text: source,
                    owner_id: Some("user-1".into()),
                    ..Default::default()
                })
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(test_state(&[]));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_generation_rejects_bad_prompts() {
        for body in [
            serde_json::json!({}),
            serde_json::json!({"prompt": ""}),
            serde_json::json!({"prompt": "   "}),
            serde_json::json!({"prompt": 42}),
        ] {
            let app = test_app(test_state(&[]));
            let response = app.oneshot(post_generation(body.clone())).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
            let json: Value = body_json(response.into_body()).await;
            assert!(json["error"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn test_generation_rejects_malformed_json() {
        let app = test_app(test_state(&[]));
        let request = Request::builder()
            .method("POST")
            .uri("/api/generation")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generation_success_persists_lesson() {
        let state = test_state(&[r#"{"isValid": true, "title": "Fractions"}"#, LESSON]);
        let app = test_app(state.clone());
        let response = app
            .oneshot(post_generation(
                serde_json::json!({"prompt": "teach me fractions", "audience": "kids"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = body_json(response.into_body()).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["title"], "Fractions");

        let id = json["lessonId"].as_str().unwrap().to_string();
        let record = state.db.fetch(&id).await.unwrap();
        assert_eq!(record.owner_id.as_deref(), Some("user-1"));
        assert_eq!(record.audience.as_deref(), Some("kids"));
    }

    #[tokio::test]
    async fn test_generation_rejection_is_not_an_http_error() {
        let state = test_state(&[r#"{"isValid": false, "reason": "Not a learning topic"}"#]);
        let response = test_app(state)
            .oneshot(post_generation(serde_json::json!({"prompt": "hello there"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = body_json(response.into_body()).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Not a learning topic");
    }

    #[tokio::test]
    async fn test_list_get_and_delete_lessons() {
        let state = test_state(&[]);
        let mut rx = state.ws_tx.subscribe();
        let id = seed(&state, LESSON).await;
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/lessons?owner=user-1&q=fraction&sort=oldest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let lessons: Vec<Value> = body_json(response.into_body()).await;
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0]["id"], id.as_str());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/lessons/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let lesson: Value = body_json(response.into_body()).await;
        assert_eq!(lesson["source_text"], LESSON);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/lessons/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let event: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "LessonDeleted");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/lessons/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_render_lesson_html() {
        let state = test_state(&[]);
        let id = seed(&state, LESSON).await;
        let response = test_app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/lessons/{id}/render"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("<p>2 halves</p>"), "got {html}");
    }

    #[tokio::test]
    async fn test_render_tampered_lesson_fails_closed() {
        let state = test_state(&[]);
        let id = seed(&state, &LESSON.replace("<h1>", "<h1 onClick={() => eval('x')}>")).await;
        let response = test_app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/lessons/{id}/render"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json: Value = body_json(response.into_body()).await;
        assert_eq!(json["moduleId"], id.as_str());
        assert!(json["error"].as_str().unwrap().contains("eval"));
    }

    #[tokio::test]
    async fn test_missing_lesson_is_404() {
        let response = test_app(test_state(&[]))
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/lessons/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: Value = body_json(response.into_body()).await;
        assert_eq!(json["error"], "Lesson nope not found");
    }
}
