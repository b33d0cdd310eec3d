use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use super::errors::CoreError;
use super::models::{RuntimeSettings, SourceFile};
use super::ocr::{OcrEngine, PdfRasterizer};

const MIN_TEXT_LAYER_CHARS: usize = 50;

/// Full text of one source document.
#[async_trait]
pub trait DocumentTextSource: Send + Sync {
    async fn document_text(&self, file: &SourceFile) -> anyhow::Result<String>;
}

pub struct PdfTextExtractor {
    rasterizer: PdfRasterizer,
    ocr_engine: Arc<dyn OcrEngine>,
    language: String,
    max_pages: usize,
    prefer_text_layer: bool,
}

impl PdfTextExtractor {
    pub fn new(
        rasterizer: PdfRasterizer,
        ocr_engine: Arc<dyn OcrEngine>,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            rasterizer,
            ocr_engine,
            language: settings.ocr_language.clone(),
            max_pages: settings.ocr_max_pages,
            prefer_text_layer: settings.prefer_text_layer,
        }
    }

    pub async fn extract_text(&self, path: &Path) -> anyhow::Result<String> {
        if self.prefer_text_layer {
            match extract_text_layer(path).await {
                Ok(text) if non_whitespace_len(&text) >= MIN_TEXT_LAYER_CHARS => {
                    tracing::debug!(file = %path.display(), "using embedded text layer");
                    return Ok(text);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(file = %path.display(), "no usable text layer: {err:#}");
                }
            }
        }

        self.ocr_pages(path).await
    }

    async fn ocr_pages(&self, path: &Path) -> anyhow::Result<String> {
        let temp_dir = tempfile::Builder::new()
            .prefix("talentdeck-ocr-")
            .tempdir()
            .context("failed to create OCR temp dir")?;

        let pages = self
            .rasterizer
            .render_pages(path, temp_dir.path(), self.max_pages)
            .await?;
        if pages.is_empty() {
            anyhow::bail!("no pages rendered from {}", path.display());
        }

        let total = pages.len();
        let mut full_text = Vec::with_capacity(total);
        for (index, page) in pages.iter().enumerate() {
            match self.ocr_engine.recognize_image(page, &self.language).await {
                Ok(text) => {
                    tracing::debug!(page = index + 1, total, chars = text.len(), "page recognised");
                    full_text.push(text);
                }
                Err(err) if matches!(
                    err.downcast_ref::<CoreError>(),
                    Some(CoreError::OcrUnavailable(_))
                ) => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(page = index + 1, total, "OCR error: {err:#}");
                    full_text.push(String::new());
                }
            }
        }

        Ok(full_text.join("\n"))
    }
}

#[async_trait]
impl DocumentTextSource for PdfTextExtractor {
    async fn document_text(&self, file: &SourceFile) -> anyhow::Result<String> {
        tracing::info!(file = %file.file_name, "reading document");
        self.extract_text(&file.path).await
    }
}

async fn extract_text_layer(path: &Path) -> anyhow::Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    // pdf-extract panics on some malformed files; keep that inside the blocking task.
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
        .await
        .map_err(|err| anyhow::anyhow!("text layer extraction aborted: {err}"))?
        .map_err(|err| anyhow::anyhow!("text layer extraction failed: {err}"))
}

fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_visible_characters() {
        assert_eq!(non_whitespace_len(" a b\n\tc "), 3);
        assert_eq!(non_whitespace_len(""), 0);
    }

    #[tokio::test]
    async fn unreadable_pdf_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        tokio::fs::write(&path, b"not a pdf").await.unwrap();

        assert!(extract_text_layer(&path).await.is_err());
    }
}
