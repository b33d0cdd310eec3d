use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::errors::CoreError;

/// Page image to text. Implementations must not panic on unreadable images.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize_image(&self, image_path: &Path, language: &str) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct TesseractCliOcrService {
    pub tesseract_executable_path: String,
    pub timeout: Duration,
}

impl TesseractCliOcrService {
    pub fn new(tesseract_executable_path: String, timeout: Duration) -> Self {
        Self {
            tesseract_executable_path,
            timeout,
        }
    }

    /// Returns the engine's version banner, or an error when it cannot be launched.
    pub async fn version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.tesseract_executable_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| CoreError::OcrUnavailable(err.to_string()))?;

        let banner = String::from_utf8_lossy(&output.stdout);
        let banner = if banner.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            banner.to_string()
        };

        Ok(banner.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl OcrEngine for TesseractCliOcrService {
    async fn recognize_image(&self, image_path: &Path, language: &str) -> anyhow::Result<String> {
        let mut command = Command::new(&self.tesseract_executable_path);
        command
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg("6")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|err| CoreError::OcrUnavailable(err.to_string()))?,
            Err(_) => {
                tracing::warn!(image = %image_path.display(), "OCR timed out");
                return Ok(String::new());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(image = %image_path.display(), "OCR failed: {}", stderr.trim());
            return Ok(String::new());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Renders PDF pages to grayscale PNG files with poppler's `pdftoppm`.
#[derive(Clone)]
pub struct PdfRasterizer {
    pub pdftoppm_executable_path: String,
    pub dpi: u32,
    pub timeout: Duration,
}

impl PdfRasterizer {
    pub fn new(pdftoppm_executable_path: String, dpi: u32, timeout: Duration) -> Self {
        Self {
            pdftoppm_executable_path,
            dpi,
            timeout,
        }
    }

    /// Writes at most `max_pages` page images into `out_dir` and returns them in page order.
    pub async fn render_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let prefix = out_dir.join("page");
        let mut command = Command::new(&self.pdftoppm_executable_path);
        command
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(max_pages.max(1).to_string())
            .arg("-gray")
            .arg("-png")
            .arg(pdf_path)
            .arg(&prefix)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow::anyhow!("PDF rendering timed out"))?
            .map_err(|err| CoreError::OcrUnavailable(format!("pdftoppm: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("PDF rendering failed: {}", stderr.trim());
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .with_context(|| format!("failed to list rendered pages in {}", out_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .extension()
                .and_then(|v| v.to_str())
                .is_some_and(|v| v.eq_ignore_ascii_case("png"))
            {
                pages.push(path);
            }
        }

        // pdftoppm zero-pads page numbers to a common width, so name order is page order.
        pages.sort();
        pages.truncate(max_pages.max(1));
        Ok(pages)
    }
}
