pub mod cache_key;
mod config;
pub mod prompts;
pub mod qa;
mod trace;
mod translator;

pub use config::{init_default_config, PipelineConfig, RetryPolicy};
pub use translator::{TranslationOutcome, Translator, TranslatorPipeline};
