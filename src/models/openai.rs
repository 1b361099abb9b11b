use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatModel, CompletionRequest, ModelError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OpenAiChatModel {
    pub fn new(cfg: OpenAiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.filter(|k| !k.trim().is_empty()),
            client,
            timeout_secs: cfg.timeout_secs,
        })
    }

    fn send_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout(self.timeout_secs)
        } else {
            ModelError::Connection(e.to_string())
        }
    }

    /// `preferred` when the provider lists it for this key, otherwise `fallback`.
    pub async fn resolve_model(&self, preferred: &str, fallback: &str) -> String {
        let preferred = preferred.trim();
        if preferred.is_empty() || preferred == fallback {
            return fallback.to_string();
        }
        match self.model_available(preferred).await {
            Ok(true) => preferred.to_string(),
            Ok(false) => {
                tracing::warn!(preferred, fallback, "model not available, falling back");
                fallback.to_string()
            }
            Err(err) => {
                tracing::warn!(preferred, fallback, %err, "model lookup failed, falling back");
                fallback.to_string()
            }
        }
    }

    async fn model_available(&self, id: &str) -> Result<bool, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::MissingCredentials)?;
        let url = format!("{}/models/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(false);
        }
        Err(ModelError::Http {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<String, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::MissingCredentials)?;
        let mut messages = Vec::with_capacity(2);
        if !req.system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: req.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: req.user,
        });
        let body = ChatRequestBody {
            model: req.model,
            messages,
            temperature: req.temperature,
            top_p: req.top_p,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Malformed("no choices in response".into()))
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;

    fn model_at(url: String, key: Option<&str>) -> OpenAiChatModel {
        OpenAiChatModel::new(OpenAiConfig {
            base_url: format!("{url}/"),
            api_key: key.map(str::to_string),
            timeout_secs: 5,
        })
        .expect("client")
    }

    #[test]
    fn transient_classification() {
        assert!(ModelError::Http { status: 429, body: String::new() }.is_transient());
        assert!(ModelError::Http { status: 503, body: String::new() }.is_transient());
        assert!(ModelError::Timeout(30).is_transient());
        assert!(!ModelError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!ModelError::MissingCredentials.is_transient());
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let model = model_at("http://127.0.0.1:9".into(), None);
        let err = model
            .complete(CompletionRequest::deterministic("gpt-4o", "sys", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingCredentials));
    }

    #[tokio::test]
    async fn completion_request_and_reply() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Json(json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "<p>Привет</p>"}
                ],
                "temperature": 0.0,
                "top_p": 0.0
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"<p>Hallo</p>"}}]}"#)
            .create_async()
            .await;

        let out = model_at(server.url(), Some("sk-test"))
            .complete(CompletionRequest::deterministic("gpt-4o", "sys", "<p>Привет</p>"))
            .await
            .expect("completion");
        assert_eq!(out, "<p>Hallo</p>");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn status_codes_map_to_model_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;
        let model = model_at(server.url(), Some("sk-test"));
        let err = model
            .complete(CompletionRequest::deterministic("gpt-4o", "", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Http { status: 429, ref body } if body == "slow down"));
        assert!(err.is_transient());

        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;
        let err = model_at(server.url(), Some("sk-test"))
            .complete(CompletionRequest::deterministic("gpt-4o", "", "hi"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn empty_choices_are_malformed() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;
        let err = model_at(server.url(), Some("sk-test"))
            .complete(CompletionRequest::deterministic("gpt-4o", "", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }

    #[tokio::test]
    async fn preferred_model_is_used_when_listed() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/models/gpt-4.1-mini")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"id":"gpt-4.1-mini","object":"model"}"#)
            .create_async()
            .await;
        let model = model_at(server.url(), Some("sk-test"));
        assert_eq!(model.resolve_model("gpt-4.1-mini", "gpt-4o").await, "gpt-4.1-mini");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_or_unreachable_models_fall_back() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/models/gpt-4-1-mini")
            .with_status(404)
            .with_body(r#"{"error":{"message":"model not found"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/models/gpt-4.1")
            .with_status(500)
            .create_async()
            .await;
        let model = model_at(server.url(), Some("sk-test"));
        assert_eq!(model.resolve_model("gpt-4-1-mini", "gpt-4o").await, "gpt-4o");
        assert_eq!(model.resolve_model("gpt-4.1", "gpt-4o").await, "gpt-4o");
        assert_eq!(model.resolve_model("", "gpt-4o").await, "gpt-4o");

        let offline = model_at(server.url(), None);
        assert_eq!(offline.resolve_model("gpt-4.1", "gpt-4o").await, "gpt-4o");
    }
}
