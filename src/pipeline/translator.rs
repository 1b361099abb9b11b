use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use crate::chunker::split_html;
use crate::error::{PipelineError, Stage};
use crate::ir::{ChunkRequest, HistoryEntry, StoredItem, TranslationRequest};
use crate::models::ChatModel;
use crate::progress::Progress;
use crate::sentinels::{
    contains_convert_tag, is_truncation_marker, strip_code_fence, strip_convert_tags,
};
use crate::store::{is_valid_key, Store, HISTORY_LIMIT};
use crate::textutil::{clean_title, swap_domain, take_chars};

use super::cache_key::cache_key;
use super::prompts::{build_title_prompt, build_translate_prompt, PromptParams};
use super::qa;
use super::trace::TraceWriter;
use super::PipelineConfig;

mod chunk;

pub use chunk::Translator;

/// Result of one document run, fresh or served from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslationOutcome {
    pub key: String,
    pub html_out: String,
    pub qa_report: Option<String>,
    /// Set when QA was requested but could not complete.
    pub qa_error: Option<String>,
    pub title: String,
    pub cached: bool,
    pub chunks: usize,
}

pub struct TranslatorPipeline {
    cfg: PipelineConfig,
    model: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
    trace: TraceWriter,
}

impl TranslatorPipeline {
    pub fn new(cfg: PipelineConfig, model: Arc<dyn ChatModel>, store: Arc<dyn Store>) -> Self {
        let trace = TraceWriter::new(cfg.trace_dir.clone());
        Self {
            cfg,
            model,
            store,
            trace,
        }
    }

    pub fn key_for(&self, req: &TranslationRequest) -> String {
        cache_key(req, &self.cfg.model_translate, &self.cfg.model_qa)
    }

    /// Validates the request and returns its cache key without running anything.
    pub fn dry_run(&self, req: &TranslationRequest) -> Result<String, PipelineError> {
        req.validate()?;
        Ok(self.key_for(req))
    }

    fn translator(&self) -> Translator<'_> {
        Translator::new(self.model.as_ref(), &self.cfg.model_translate, self.cfg.retry)
    }

    fn qa_translator(&self) -> Translator<'_> {
        Translator::new(self.model.as_ref(), &self.cfg.model_qa, self.cfg.retry)
    }

    pub async fn translate(
        &self,
        req: &TranslationRequest,
    ) -> Result<TranslationOutcome, PipelineError> {
        req.validate()?;
        let key = self.key_for(req);
        let short = &key[..12.min(key.len())];
        let progress = Progress::new("translate");

        if req.use_cache {
            match self.store.get(&key).await {
                Ok(Some(item)) => {
                    progress.info(format!("cache hit {short}"));
                    return Ok(TranslationOutcome {
                        key,
                        html_out: item.html_out,
                        qa_report: item.qa_report,
                        qa_error: None,
                        title: item.title,
                        cached: true,
                        chunks: 0,
                    });
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    stage = %Stage::CacheCheck,
                    key = short,
                    %err,
                    "store read failed, treating as miss"
                ),
            }
        }

        let html = swap_domain(&req.source_html, &req.old_domain, &req.new_domain);
        let chunks = split_html(&html, &self.cfg.chunk_budget);
        progress.info(format!(
            "{short}: {} {} -> {}, {} chunk(s)",
            self.cfg.model_translate,
            req.source_lang,
            req.target_lang,
            chunks.len()
        ));

        let prompt = build_translate_prompt(&PromptParams::from(req));
        let trace = self.request_trace(&key).await;
        let _ = trace.write_named_text("prompt.txt", &prompt).await;

        let outputs = self.translate_chunks(&chunks, &prompt, &trace, &progress).await?;

        let mut html_out = strip_code_fence(&outputs.join("\n"));
        if req.remove_shortcodes && contains_convert_tag(&html_out) {
            tracing::debug!(key = short, "stripping leftover convert tags");
            html_out = strip_convert_tags(&html_out);
        }
        let _ = trace.write_named_text("output.html", &html_out).await;

        let (qa_report, qa_error) = if req.run_qa {
            progress.info("qa");
            match self
                .run_qa(&req.source_html, &html_out, &req.source_lang, &req.target_lang)
                .await
            {
                Ok(report) => (Some(report), None),
                Err(err) => {
                    tracing::warn!(key = short, %err, "qa failed, keeping translation");
                    (None, Some(err.to_string()))
                }
            }
        } else {
            (None, None)
        };

        let title = self.derive_title(&req.source_html, &req.target_lang).await;

        let item = StoredItem {
            key: key.clone(),
            title: title.clone(),
            created_at: Utc::now(),
            request: req.clone(),
            html_out: html_out.clone(),
            qa_report: qa_report.clone(),
        };
        if let Err(err) = self.store.save(&item).await {
            tracing::error!(
                stage = %Stage::Persist,
                key = short,
                backend = self.store.backend_name(),
                %err,
                "could not persist translation"
            );
        }
        progress.info(format!("done {short} in {}", progress.elapsed()));

        Ok(TranslationOutcome {
            key,
            html_out,
            qa_report,
            qa_error,
            title,
            cached: false,
            chunks: chunks.len(),
        })
    }

    async fn request_trace(&self, key: &str) -> TraceWriter {
        match self.trace.for_request(key).await {
            Ok(t) => t,
            Err(err) => {
                tracing::debug!(%err, "trace disabled for request");
                TraceWriter::default()
            }
        }
    }

    /// Fixed-size batches: calls within a batch run concurrently, batches run in order.
    async fn translate_chunks(
        &self,
        chunks: &[String],
        prompt: &str,
        trace: &TraceWriter,
        progress: &Progress,
    ) -> Result<Vec<String>, PipelineError> {
        let translator = self.translator();
        let batch_size = self.cfg.batch_size.max(1);
        let mut outputs: Vec<String> = Vec::with_capacity(chunks.len());

        for (b, batch) in chunks.chunks(batch_size).enumerate() {
            let base = b * batch_size;
            let calls = batch.iter().enumerate().map(|(i, chunk)| {
                let translator = &translator;
                async move {
                    let index = base + i;
                    let _ = trace.write_chunk_text(index, "in", chunk).await;
                    let result = if self.cfg.halve_on_truncation {
                        translator
                            .translate_halving(chunk, prompt, self.cfg.min_halving_chars)
                            .await
                    } else {
                        translator.translate(chunk, prompt).await
                    };
                    result.map_err(|e| e.in_chunk(index))
                }
            });
            for (i, result) in join_all(calls).await.into_iter().enumerate() {
                let out = result?;
                let _ = trace.write_chunk_text(base + i, "out", &out).await;
                outputs.push(out);
            }
            progress.progress(outputs.len(), chunks.len());
        }
        Ok(outputs)
    }

    /// Translates one chunk submitted by a client, under the per-call deadline.
    pub async fn translate_chunk(&self, req: &ChunkRequest) -> Result<String, PipelineError> {
        req.validate()?;
        let chunk = swap_domain(&req.chunk, &req.old_domain, &req.new_domain);
        let prompt = build_translate_prompt(&PromptParams::from(req));
        let out = self
            .translator()
            .with_timeout(self.cfg.chunk_timeout)
            .translate(&chunk, &prompt)
            .await?;
        Ok(if req.remove_shortcodes {
            strip_convert_tags(&out)
        } else {
            out
        })
    }

    pub async fn run_qa(
        &self,
        source: &str,
        output: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, PipelineError> {
        qa::review(
            &self.qa_translator(),
            source,
            output,
            source_lang,
            target_lang,
            self.cfg.qa_sample_threshold,
            &self.cfg.qa_budget,
        )
        .await
    }

    /// Short title in the target language. Never fails: any problem yields `""`.
    pub async fn derive_title(&self, html: &str, target_lang: &str) -> String {
        if !self.cfg.derive_titles || html.trim().is_empty() || target_lang.trim().is_empty() {
            return String::new();
        }
        let system = build_title_prompt(target_lang, self.cfg.title_max_words);
        let head = take_chars(html, self.cfg.title_source_chars);
        match self.translator().complete(Stage::Title, &system, head).await {
            Ok(raw) if !is_truncation_marker(&raw) => {
                clean_title(&raw, self.cfg.title_max_words, self.cfg.title_max_chars)
            }
            Ok(_) => String::new(),
            Err(err) => {
                tracing::warn!(%err, "title derivation failed");
                String::new()
            }
        }
    }

    pub async fn get_item(&self, key: &str) -> Result<StoredItem, PipelineError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), PipelineError> {
        if self.store.remove(key).await? {
            Ok(())
        } else {
            Err(PipelineError::NotFound(key.to_string()))
        }
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, PipelineError> {
        Ok(self.store.list_recent(HISTORY_LIMIT).await?)
    }

    pub async fn save_item(&self, item: &StoredItem) -> Result<(), PipelineError> {
        if item.key.trim().is_empty() {
            return Err(PipelineError::Validation("missing required fields: key".into()));
        }
        if !is_valid_key(&item.key) {
            return Err(PipelineError::Validation(format!(
                "key may only contain ASCII letters, digits, '-' and '_': {:?}",
                item.key
            )));
        }
        self.store.save(item).await?;
        Ok(())
    }
}
