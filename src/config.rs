use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::models::OpenAiConfig;
use crate::pipeline::PipelineConfig;
use crate::store::{RestKvConfig, StoreSettings};

pub const CONFIG_FILE_NAME: &str = "wp-html-translator.toml";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

/// Raw `wp-html-translator.toml` contents. Every field is optional; defaults are applied
/// when resolving into [`RuntimeConfig`].
#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Translation chunk budget in characters, before the safety margin.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_margin: Option<f64>,
    #[serde(default)]
    pub chunk_floor: Option<usize>,

    /// Chunks translated concurrently per batch.
    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub jitter_ms: Option<u64>,

    /// Split a chunk in half and retry when the model reports truncation.
    #[serde(default)]
    pub halve_on_truncation: Option<bool>,
    #[serde(default)]
    pub min_halving_chars: Option<usize>,

    /// Combined source + output length above which QA samples sections.
    #[serde(default)]
    pub qa_sample_threshold: Option<usize>,
    #[serde(default)]
    pub qa_size_limit: Option<usize>,

    #[serde(default)]
    pub derive_titles: Option<bool>,

    /// Deadline for one call made by the single-chunk endpoint.
    #[serde(default)]
    pub chunk_timeout_secs: Option<u64>,

    /// When set, prompts and chunk texts are written here per request.
    #[serde(default)]
    pub trace_dir: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub translate: Option<String>,
    #[serde(default)]
    pub qa: Option<String>,
    /// Tried first at startup; `translate` is the fallback when it is not available.
    #[serde(default)]
    pub prefer_translate: Option<String>,
    #[serde(default)]
    pub prefer_qa: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StoreSection {
    /// Directory for the file-backed store. Relative paths resolve against the config file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub rest_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ServerSection {
    #[serde(default)]
    pub listen: Option<String>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Fully resolved settings: config file, then environment, then built-in defaults.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub config_path: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub model: OpenAiConfig,
    pub prefer_translate: Option<String>,
    pub prefer_qa: Option<String>,
    pub store: StoreSettings,
    pub listen: String,
}

impl RuntimeConfig {
    /// Loads the config named explicitly, by `WPT_CONFIG`, or found upwards from the
    /// working directory, and applies process environment overrides.
    pub fn load(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg_file = explicit
            .or_else(|| std::env::var("WPT_CONFIG").ok().map(PathBuf::from))
            .or_else(|| find_default_config(CONFIG_FILE_NAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let base_dir = cfg_file
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut resolved = Self::resolve(&file_cfg, &base_dir, |k| std::env::var(k).ok());
        resolved.config_path = cfg_file.filter(|p| p.exists());
        Ok(resolved)
    }

    pub fn resolve(
        file_cfg: &AppConfig,
        base_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let env = |k: &str| env(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut pipeline = PipelineConfig::from_section(&file_cfg.pipeline, base_dir);
        if let Some(m) = env("WPT_MODEL_TRANSLATE").or_else(|| file_cfg.model.translate.clone()) {
            pipeline.model_translate = m;
        }
        if let Some(m) = env("WPT_MODEL_QA").or_else(|| file_cfg.model.qa.clone()) {
            pipeline.model_qa = m;
        }

        let model = OpenAiConfig {
            base_url: env("OPENAI_BASE_URL")
                .or_else(|| file_cfg.model.base_url.clone())
                .unwrap_or_else(|| crate::models::openai::DEFAULT_BASE_URL.to_string()),
            api_key: env("OPENAI_API_KEY"),
            timeout_secs: file_cfg.model.timeout_secs.unwrap_or(180),
        };

        let prefer_translate =
            env("WPT_MODEL_TRANSLATE_PREFERRED").or_else(|| file_cfg.model.prefer_translate.clone());
        let prefer_qa = env("WPT_MODEL_QA_PREFERRED").or_else(|| file_cfg.model.prefer_qa.clone());

        let rest = match (
            env("WPT_KV_REST_URL").or_else(|| file_cfg.store.rest_url.clone()),
            env("WPT_KV_REST_TOKEN").or_else(|| file_cfg.store.rest_token.clone()),
        ) {
            (Some(url), Some(token)) => Some(RestKvConfig {
                url,
                token,
                timeout_secs: file_cfg.store.timeout_secs.unwrap_or(15),
            }),
            _ => None,
        };
        let dir = env("WPT_STORE_DIR")
            .map(PathBuf::from)
            .or_else(|| file_cfg.store.dir.clone())
            .map(|p| if p.is_relative() { base_dir.join(p) } else { p });

        let listen = env("WPT_LISTEN")
            .or_else(|| file_cfg.server.listen.clone())
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

        Self {
            config_path: None,
            pipeline,
            model,
            prefer_translate,
            prefer_qa,
            store: StoreSettings { rest, dir },
            listen,
        }
    }
}
