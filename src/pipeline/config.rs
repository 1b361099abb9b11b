use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::chunker::ChunkBudget;
use crate::config::{PipelineSection, CONFIG_FILE_NAME};

pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Backoff for transient model failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first call.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            jitter_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Exponential part of the delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub model_translate: String,
    pub model_qa: String,

    pub chunk_budget: ChunkBudget,
    pub batch_size: usize,
    pub retry: RetryPolicy,

    pub halve_on_truncation: bool,
    pub min_halving_chars: usize,

    pub qa_sample_threshold: usize,
    pub qa_budget: ChunkBudget,

    pub derive_titles: bool,
    pub title_source_chars: usize,
    pub title_max_words: usize,
    pub title_max_chars: usize,

    pub chunk_timeout: Duration,
    pub trace_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_translate: DEFAULT_MODEL.to_string(),
            model_qa: DEFAULT_MODEL.to_string(),
            chunk_budget: ChunkBudget::new(12_000, 0.85, 1_000),
            batch_size: 3,
            retry: RetryPolicy::default(),
            halve_on_truncation: true,
            min_halving_chars: 400,
            qa_sample_threshold: 20_000,
            qa_budget: ChunkBudget::new(24_000, 0.25, 1_000),
            derive_titles: true,
            title_source_chars: 2_000,
            title_max_words: 8,
            title_max_chars: 120,
            chunk_timeout: Duration::from_secs(120),
            trace_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_section(section: &PipelineSection, base_dir: &Path) -> Self {
        let d = Self::default();
        let chunk_budget = ChunkBudget::new(
            section.chunk_size.unwrap_or(d.chunk_budget.size_limit).max(1),
            section
                .chunk_margin
                .filter(|m| *m > 0.0 && *m <= 1.0)
                .unwrap_or(d.chunk_budget.margin),
            section.chunk_floor.unwrap_or(d.chunk_budget.min_floor),
        );
        let qa_budget = ChunkBudget::new(
            section.qa_size_limit.unwrap_or(d.qa_budget.size_limit).max(1),
            d.qa_budget.margin,
            d.qa_budget.min_floor,
        );
        let retry = RetryPolicy {
            max_retries: section.max_retries.unwrap_or(d.retry.max_retries),
            base_delay_ms: section.base_delay_ms.unwrap_or(d.retry.base_delay_ms),
            jitter_ms: section.jitter_ms.unwrap_or(d.retry.jitter_ms),
        };
        let trace_dir = section
            .trace_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .map(|p| if p.is_relative() { base_dir.join(p) } else { p });

        Self {
            chunk_budget,
            batch_size: section.batch_size.unwrap_or(d.batch_size).max(1),
            retry,
            halve_on_truncation: section.halve_on_truncation.unwrap_or(d.halve_on_truncation),
            min_halving_chars: section.min_halving_chars.unwrap_or(d.min_halving_chars),
            qa_sample_threshold: section.qa_sample_threshold.unwrap_or(d.qa_sample_threshold),
            qa_budget,
            derive_titles: section.derive_titles.unwrap_or(d.derive_titles),
            chunk_timeout: section
                .chunk_timeout_secs
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(d.chunk_timeout),
            trace_dir,
            ..d
        }
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
# Characters per translation chunk before the safety margin.
chunk_size = 12000
chunk_margin = 0.85
chunk_floor = 1000

# Chunks sent to the model concurrently; batches run one after another.
batch_size = 3

max_retries = 5
base_delay_ms = 1000
jitter_ms = 500

# On a TRUNCATED reply, split the chunk in half and translate the halves.
halve_on_truncation = true
min_halving_chars = 400

# QA samples first/middle/last sections when source + output exceed this many chars.
qa_sample_threshold = 20000
qa_size_limit = 24000

derive_titles = true
chunk_timeout_secs = 120

# trace_dir = "_trace"

[model]
# OPENAI_API_KEY is read from the environment (or .env).
# base_url = "https://api.openai.com/v1"
translate = "gpt-4o"
qa = "gpt-4o"
# Preferred models, checked once at startup; `translate` / `qa` are used when unavailable.
# prefer_translate = "gpt-4.1-mini"
# prefer_qa = "gpt-4.1"
timeout_secs = 180

[store]
# Used when WPT_KV_REST_URL / WPT_KV_REST_TOKEN are not set. Without a dir, items live in memory.
dir = "wpt-store"
# rest_url = "https://<name>.upstash.io"
# rest_token = "..."

[server]
listen = "127.0.0.1:8787"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            jitter_ms: 0,
        };
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(1_600));
    }

    #[test]
    fn section_overrides_defaults() {
        let section = PipelineSection {
            batch_size: Some(0),
            chunk_size: Some(3_000),
            trace_dir: Some("_trace".into()),
            ..Default::default()
        };
        let cfg = PipelineConfig::from_section(&section, Path::new("/tmp/wpt"));
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.chunk_budget.size_limit, 3_000);
        assert_eq!(cfg.chunk_budget.margin, 0.85);
        assert_eq!(cfg.trace_dir, Some(PathBuf::from("/tmp/wpt/_trace")));
        assert_eq!(cfg.retry.max_retries, 5);
    }

    #[test]
    fn written_default_config_parses() {
        let tmp = tempfile::tempdir().expect("tmp");
        let path = init_default_config(tmp.path(), false).expect("init");
        let text = std::fs::read_to_string(&path).expect("read");
        let parsed: AppConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.pipeline.batch_size, Some(3));
        assert_eq!(parsed.model.translate.as_deref(), Some("gpt-4o"));

        std::fs::write(&path, "# edited").expect("edit");
        init_default_config(tmp.path(), false).expect("init again");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "# edited");
    }
}
