//! HTTP surface over [`TranslatorPipeline`].

pub mod error;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::TranslatorPipeline;

/// WordPress posts with inline markup routinely exceed axum's 2 MB default.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TranslatorPipeline>,
}

pub fn router(pipeline: Arc<TranslatorPipeline>) -> Router {
    let state = AppState { pipeline };
    Router::new()
        .route("/translate", post(routes::translate))
        .route("/translate/chunk", post(routes::translate_chunk))
        .route("/qa", post(routes::qa))
        .route("/title", post(routes::title))
        .route("/item", get(routes::get_item).delete(routes::delete_item))
        .route("/history", get(routes::history))
        .route("/save", post(routes::save))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn serve(pipeline: Arc<TranslatorPipeline>, listen: &str) -> anyhow::Result<()> {
    let app = router(pipeline)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::models::testing::{MockModel, MockReply};
    use crate::pipeline::{PipelineConfig, RetryPolicy};
    use crate::store::MemoryStore;

    fn app_with(model: MockModel) -> Router {
        let cfg = PipelineConfig {
            retry: RetryPolicy {
                max_retries: 0,
                base_delay_ms: 0,
                jitter_ms: 0,
            },
            ..PipelineConfig::default()
        };
        let pipeline = TranslatorPipeline::new(cfg, Arc::new(model), Arc::new(MemoryStore::new()));
        router(Arc::new(pipeline))
    }

    fn app() -> Router {
        app_with(MockModel::new(|req, _| {
            if req.system.starts_with("Write a short human title") {
                MockReply::ok("Ein Titel")
            } else if req.system.contains("proof-reader") {
                MockReply::ok("No issues found.")
            } else {
                MockReply::ok(req.user.replace("Привет", "Hallo"))
            }
        }))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn translate_body() -> Value {
        json!({
            "htmlIn": "<p>Привет</p>",
            "srcLang": "Russian",
            "tgtLang": "German",
            "runQA": true
        })
    }

    #[tokio::test]
    async fn health_is_plain_ok() {
        let resp = app().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn translate_then_read_back() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(json_request("POST", "/translate", translate_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["htmlOut"], "<p>Hallo</p>");
        assert_eq!(body["qaReport"], "No issues found.");
        assert_eq!(body["cached"], false);
        assert!(body.get("qaError").is_none());
        let key = body["key"].as_str().unwrap().to_string();

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/translate", translate_body()))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["cached"], true);

        let resp = app
            .clone()
            .oneshot(empty_request("GET", &format!("/item?key={key}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["htmlOut"], "<p>Hallo</p>");

        let resp = app
            .clone()
            .oneshot(empty_request("GET", "/history"))
            .await
            .unwrap();
        let hist = body_json(resp).await;
        assert_eq!(hist["items"][0]["key"], key.as_str());
        assert_eq!(hist["items"][0]["title"], "Ein Titel");
        assert_eq!(hist["items"][0]["tgt"], "German");

        let resp = app
            .clone()
            .oneshot(empty_request("DELETE", &format!("/item?key={key}")))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"ok": true}));

        let resp = app
            .oneshot(empty_request("GET", &format!("/item?key={key}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn dry_run_returns_only_the_key() {
        let mut body = translate_body();
        body["dryRun"] = json!(true);
        let resp = app()
            .oneshot(json_request("POST", "/translate", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["key"].as_str().map(str::len), Some(64));
        assert!(body.get("htmlOut").is_none());
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let resp = app()
            .oneshot(json_request("POST", "/translate", json!({"htmlIn": "<p>x</p>"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "BAD_REQUEST");

        let resp = app()
            .oneshot(json_request("POST", "/qa", json!({"src": "a"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app()
            .oneshot(empty_request("GET", "/item"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn truncated_chunk_is_unprocessable() {
        let app = app_with(MockModel::new(|_, _| MockReply::ok("TRUNCATED")));
        let resp = app
            .oneshot(json_request(
                "POST",
                "/translate/chunk",
                json!({"chunk": "<p>x</p>", "srcLang": "Russian", "tgtLang": "German"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(resp).await["error"]["code"], "CHUNK_TOO_LARGE");
    }

    #[tokio::test]
    async fn model_outage_is_bad_gateway() {
        let app = app_with(MockModel::new(|_, _| {
            MockReply::err(crate::models::ModelError::Http {
                status: 503,
                body: "overloaded".into(),
            })
        }));
        let resp = app
            .oneshot(json_request("POST", "/translate", translate_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn chunk_qa_and_title_endpoints() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/translate/chunk",
                json!({"chunk": "<p>Привет</p>", "srcLang": "Russian", "tgtLang": "German"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"out": "<p>Hallo</p>"}));

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/qa",
                json!({"src": "<p>Привет</p>", "tgt": "<p>Hallo</p>", "srcLang": "Russian", "tgtLang": "German"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"report": "No issues found."}));

        let resp = app
            .oneshot(json_request(
                "POST",
                "/title",
                json!({"htmlIn": "<p>Привет</p>", "tgtLang": "German"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"title": "Ein Titel"}));
    }

    #[tokio::test]
    async fn save_uses_request_key_by_default() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/save",
                json!({
                    "htmlIn": "<p>Привет</p>",
                    "srcLang": "Russian",
                    "tgtLang": "German",
                    "htmlOut": "<p>Hallo</p>",
                    "title": "Gruß"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], true);
        let key = body["key"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 64);

        let resp = app
            .oneshot(empty_request("GET", &format!("/item?key={key}")))
            .await
            .unwrap();
        let item = body_json(resp).await;
        assert_eq!(item["htmlOut"], "<p>Hallo</p>");
        assert_eq!(item["qaReport"], Value::Null);
    }

    #[tokio::test]
    async fn save_rejects_keys_that_collide_on_disk() {
        let resp = app()
            .oneshot(json_request(
                "POST",
                "/save",
                json!({
                    "key": "post.42",
                    "htmlIn": "<p>Привет</p>",
                    "srcLang": "Russian",
                    "tgtLang": "German",
                    "htmlOut": "<p>Hallo</p>"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("post.42"));
    }
}
