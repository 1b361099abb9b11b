use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::textutil::same_language;

/// Everything the pipeline needs to translate one document. Immutable once submitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    #[serde(rename = "htmlIn", alias = "sourceHtml", default)]
    pub source_html: String,
    #[serde(rename = "srcLang", alias = "sourceLang", default)]
    pub source_lang: String,
    #[serde(rename = "tgtLang", alias = "targetLang", default)]
    pub target_lang: String,
    #[serde(rename = "oldDom", alias = "oldDomain", default)]
    pub old_domain: String,
    #[serde(rename = "newDom", alias = "newDomain", default)]
    pub new_domain: String,
    #[serde(rename = "curFrom", alias = "currencyFrom", default)]
    pub currency_from: String,
    #[serde(rename = "curTo", alias = "currencyTo", default)]
    pub currency_to: String,
    #[serde(rename = "curLbl", alias = "currencyLabel", default)]
    pub currency_label: String,
    #[serde(
        rename = "removeConvertBlocks",
        alias = "removeCurrencyShortcodes",
        default
    )]
    pub remove_shortcodes: bool,
    #[serde(rename = "runQA", alias = "runQa", default)]
    pub run_qa: bool,
    #[serde(rename = "useCache", default = "default_true")]
    pub use_cache: bool,
}

fn default_true() -> bool {
    true
}

impl TranslationRequest {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut missing: Vec<&str> = Vec::new();
        if self.source_html.trim().is_empty() {
            missing.push("htmlIn");
        }
        if self.source_lang.trim().is_empty() {
            missing.push("srcLang");
        }
        if self.target_lang.trim().is_empty() {
            missing.push("tgtLang");
        }
        if !missing.is_empty() {
            return Err(PipelineError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        check_languages(&self.source_lang, &self.target_lang)
    }
}

/// One pre-split chunk submitted by a client that drives its own batching.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkRequest {
    #[serde(default)]
    pub chunk: String,
    #[serde(rename = "srcLang", alias = "sourceLang", default)]
    pub source_lang: String,
    #[serde(rename = "tgtLang", alias = "targetLang", default)]
    pub target_lang: String,
    #[serde(rename = "oldDom", alias = "oldDomain", default)]
    pub old_domain: String,
    #[serde(rename = "newDom", alias = "newDomain", default)]
    pub new_domain: String,
    #[serde(rename = "curFrom", alias = "currencyFrom", default)]
    pub currency_from: String,
    #[serde(rename = "curTo", alias = "currencyTo", default)]
    pub currency_to: String,
    #[serde(rename = "curLbl", alias = "currencyLabel", default)]
    pub currency_label: String,
    #[serde(
        rename = "removeConvertBlocks",
        alias = "removeCurrencyShortcodes",
        default
    )]
    pub remove_shortcodes: bool,
}

impl ChunkRequest {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk.trim().is_empty() {
            return Err(PipelineError::Validation("missing required fields: chunk".into()));
        }
        check_languages(&self.source_lang, &self.target_lang)
    }
}

fn check_languages(source_lang: &str, target_lang: &str) -> Result<(), PipelineError> {
    if source_lang.trim().is_empty() || target_lang.trim().is_empty() {
        return Err(PipelineError::Validation(
            "missing required fields: srcLang, tgtLang".into(),
        ));
    }
    if same_language(source_lang, target_lang) {
        return Err(PipelineError::Validation(
            "source and target languages are the same".into(),
        ));
    }
    Ok(())
}

/// Persisted request/response pair addressed by its cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub key: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub request: TranslationRequest,
    pub html_out: String,
    #[serde(default)]
    pub qa_report: Option<String>,
}

impl StoredItem {
    pub fn summary(&self) -> HistoryEntry {
        HistoryEntry {
            key: self.key.clone(),
            tgt: self.request.target_lang.clone(),
            src: self.request.source_lang.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub key: String,
    pub tgt: String,
    pub src: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_short_and_long_field_names() {
        let short: TranslationRequest = serde_json::from_str(
            r#"{"htmlIn":"<p>x</p>","srcLang":"Russian","tgtLang":"German","removeConvertBlocks":true}"#,
        )
        .expect("short names");
        let long: TranslationRequest = serde_json::from_str(
            r#"{"sourceHtml":"<p>x</p>","sourceLang":"Russian","targetLang":"German","removeCurrencyShortcodes":true}"#,
        )
        .expect("long names");
        assert_eq!(short, long);
        assert!(short.use_cache);
        assert!(!short.run_qa);
    }

    #[test]
    fn validation_names_missing_fields() {
        let req = TranslationRequest {
            source_lang: "Russian".into(),
            ..Default::default()
        };
        let err = req.validate().unwrap_err().to_string();
        assert!(err.contains("htmlIn"));
        assert!(err.contains("tgtLang"));
    }

    #[test]
    fn same_language_is_rejected() {
        let req = TranslationRequest {
            source_html: "<p>x</p>".into(),
            source_lang: "English".into(),
            target_lang: "english".into(),
            ..Default::default()
        };
        assert!(matches!(req.validate(), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn chunk_request_needs_text_and_languages() {
        let req: ChunkRequest = serde_json::from_str(
            r#"{"chunk":"<p>x</p>","srcLang":"Russian","tgtLang":"German","curFrom":"rub"}"#,
        )
        .expect("chunk request");
        assert!(req.validate().is_ok());
        assert_eq!(req.currency_from, "rub");

        let blank = ChunkRequest {
            chunk: " ".into(),
            ..req.clone()
        };
        assert!(matches!(blank.validate(), Err(PipelineError::Validation(_))));
        let same = ChunkRequest {
            target_lang: "russian".into(),
            ..req
        };
        assert!(matches!(same.validate(), Err(PipelineError::Validation(_))));
    }
}
