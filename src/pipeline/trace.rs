use std::path::PathBuf;

use anyhow::Context;

/// Debug dump of prompts and chunk texts. A writer without a directory is a no-op.
#[derive(Clone, Debug, Default)]
pub struct TraceWriter {
    dir: Option<PathBuf>,
}

impl TraceWriter {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Writer for one request, rooted at `<dir>/<key prefix>`.
    pub async fn for_request(&self, key: &str) -> anyhow::Result<Self> {
        let Some(root) = self.dir.as_ref() else {
            return Ok(Self::default());
        };
        let prefix: String = key.chars().take(16).collect();
        let dir = root.join(sanitize_filename(&prefix));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create trace dir: {}", dir.display()))?;
        Ok(Self { dir: Some(dir) })
    }

    pub async fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        let path = dir.join(sanitize_filename(name));
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    pub async fn write_chunk_text(
        &self,
        index: usize,
        kind: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let name = format!("chunk_{index:04}.{kind}.html");
        self.write_named_text(&name, text).await
    }
}

fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            _ => out.push(ch),
        }
    }
    out
}
