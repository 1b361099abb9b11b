pub mod openai;

use async_trait::async_trait;

pub use openai::{OpenAiChatModel, OpenAiConfig};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("completion endpoint returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("cannot reach completion endpoint: {0}")]
    Connection(String),
    #[error("completion call timed out after {0}s")]
    Timeout(u64),
    #[error("malformed completion response: {0}")]
    Malformed(String),
    #[error("missing API credential for the completion provider")]
    MissingCredentials,
}

impl ModelError {
    /// Worth another attempt with the same input.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Connection(_) | ModelError::Timeout(_) => true,
            ModelError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            ModelError::Malformed(_) | ModelError::MissingCredentials => false,
        }
    }
}

/// One chat completion: a system instruction plus the user text.
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    pub top_p: f32,
}

impl<'a> CompletionRequest<'a> {
    /// Deterministic sampling, as used for translation and QA.
    pub fn deterministic(model: &'a str, system: &'a str, user: &'a str) -> Self {
        Self {
            model,
            system,
            user,
            temperature: 0.0,
            top_p: 0.0,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<String, ModelError>;
}
