use std::fmt;

use crate::models::ModelError;

/// Pipeline stage named in failures and stage logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    CacheCheck,
    Translate,
    Qa,
    Title,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CacheCheck => "cache_check",
            Stage::Translate => "translate",
            Stage::Qa => "qa",
            Stage::Title => "title",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn chunk_suffix(chunk: &Option<usize>) -> String {
    match chunk {
        Some(i) => format!(" (chunk {})", i + 1),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("remote store: {0}")]
    Remote(String),
    #[error("invalid item key: {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{stage} failed{}: {source}", chunk_suffix(.chunk))]
    Upstream {
        stage: Stage,
        chunk: Option<usize>,
        #[source]
        source: ModelError,
    },
    #[error("{stage}: chunk too large for the model output budget{} ({chars} chars)", chunk_suffix(.chunk))]
    ChunkTooLarge {
        stage: Stage,
        chunk: Option<usize>,
        chars: usize,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Attaches the chunk index to a chunk-level failure.
    pub fn in_chunk(self, index: usize) -> Self {
        match self {
            PipelineError::Upstream { stage, source, .. } => PipelineError::Upstream {
                stage,
                chunk: Some(index),
                source,
            },
            PipelineError::ChunkTooLarge { stage, chars, .. } => PipelineError::ChunkTooLarge {
                stage,
                chunk: Some(index),
                chars,
            },
            other => other,
        }
    }
}
