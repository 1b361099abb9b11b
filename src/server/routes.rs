use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::ir::{ChunkRequest, HistoryEntry, StoredItem, TranslationRequest};

#[derive(Deserialize)]
pub struct TranslateBody {
    #[serde(flatten)]
    pub request: TranslationRequest,
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub html_out: String,
    pub qa_report: Option<String>,
    pub key: String,
    pub cached: bool,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub key: String,
}

/// `POST /translate`: full document run, or just the cache key when `dryRun` is set.
pub async fn translate(
    State(state): State<AppState>,
    payload: Result<Json<TranslateBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = payload?;
    if body.dry_run {
        let key = state.pipeline.dry_run(&body.request)?;
        return Ok(Json(serde_json::to_value(KeyResponse { key }).map_err(internal)?));
    }
    let outcome = state.pipeline.translate(&body.request).await?;
    let resp = TranslateResponse {
        html_out: outcome.html_out,
        qa_report: outcome.qa_report,
        key: outcome.key,
        cached: outcome.cached,
        title: outcome.title,
        qa_error: outcome.qa_error,
    };
    Ok(Json(serde_json::to_value(resp).map_err(internal)?))
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub out: String,
}

/// `POST /translate/chunk`
pub async fn translate_chunk(
    State(state): State<AppState>,
    payload: Result<Json<ChunkRequest>, JsonRejection>,
) -> Result<Json<ChunkResponse>, ApiError> {
    let Json(req) = payload?;
    let out = state.pipeline.translate_chunk(&req).await?;
    Ok(Json(ChunkResponse { out }))
}

#[derive(Deserialize)]
pub struct QaBody {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub tgt: String,
    #[serde(rename = "srcLang", alias = "sourceLang", default)]
    pub source_lang: String,
    #[serde(rename = "tgtLang", alias = "targetLang", default)]
    pub target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct QaResponse {
    pub report: String,
}

/// `POST /qa`
pub async fn qa(
    State(state): State<AppState>,
    payload: Result<Json<QaBody>, JsonRejection>,
) -> Result<Json<QaResponse>, ApiError> {
    let Json(body) = payload?;
    let missing: Vec<&str> = [
        ("src", &body.src),
        ("tgt", &body.tgt),
        ("srcLang", &body.source_lang),
        ("tgtLang", &body.target_lang),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| k)
    .collect();
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }
    let report = state
        .pipeline
        .run_qa(&body.src, &body.tgt, &body.source_lang, &body.target_lang)
        .await?;
    Ok(Json(QaResponse { report }))
}

#[derive(Deserialize)]
pub struct TitleBody {
    #[serde(rename = "htmlIn", alias = "sourceHtml", default)]
    pub html: String,
    #[serde(rename = "tgtLang", alias = "targetLang", default)]
    pub target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: String,
}

/// `POST /title`: best effort, an empty title is a valid answer.
pub async fn title(
    State(state): State<AppState>,
    payload: Result<Json<TitleBody>, JsonRejection>,
) -> Result<Json<TitleResponse>, ApiError> {
    let Json(body) = payload?;
    let title = state
        .pipeline
        .derive_title(&body.html, &body.target_lang)
        .await;
    Ok(Json(TitleResponse { title }))
}

#[derive(Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

impl KeyQuery {
    fn require(self) -> Result<String, ApiError> {
        self.key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing query parameter: key".into()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResponse {
    pub key: String,
    pub html_out: String,
    pub qa_report: Option<String>,
    pub title: String,
}

/// `GET /item?key=K`
pub async fn get_item(
    State(state): State<AppState>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<ItemResponse>, ApiError> {
    let key = q.require()?;
    let item = state.pipeline.get_item(&key).await?;
    Ok(Json(ItemResponse {
        key: item.key,
        html_out: item.html_out,
        qa_report: item.qa_report,
        title: item.title,
    }))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// `DELETE /item?key=K`
pub async fn delete_item(
    State(state): State<AppState>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<OkResponse>, ApiError> {
    let key = q.require()?;
    state.pipeline.remove_item(&key).await?;
    Ok(Json(OkResponse { ok: true, key: None }))
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryEntry>,
}

/// `GET /history`: newest first.
pub async fn history(State(state): State<AppState>) -> Result<Json<HistoryResponse>, ApiError> {
    let items = state.pipeline.history().await?;
    Ok(Json(HistoryResponse { items }))
}

#[derive(Deserialize)]
pub struct SaveBody {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(flatten)]
    pub request: TranslationRequest,
    #[serde(rename = "htmlOut")]
    pub html_out: String,
    #[serde(rename = "qaReport", default)]
    pub qa_report: Option<String>,
    #[serde(default)]
    pub title: String,
}

/// `POST /save`: stores a result produced elsewhere (e.g. by a client driving chunks).
/// Without an explicit key the cache key of the request is used.
pub async fn save(
    State(state): State<AppState>,
    payload: Result<Json<SaveBody>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(body) = payload?;
    body.request.validate()?;
    let key = body
        .key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| state.pipeline.key_for(&body.request));
    let item = StoredItem {
        key: key.clone(),
        title: body.title,
        created_at: Utc::now(),
        request: body.request,
        html_out: body.html_out,
        qa_report: body.qa_report,
    };
    state.pipeline.save_item(&item).await?;
    Ok(Json(OkResponse {
        ok: true,
        key: Some(key),
    }))
}

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

fn internal(err: serde_json::Error) -> ApiError {
    ApiError::Internal(err.to_string())
}
