use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::name_normalizer;
use super::report::RunStats;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentKind {
    Cv,
    Assessment,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: DocumentKind,
}

impl SourceFile {
    /// Display-style person name derived from the file name.
    pub fn name_token(&self) -> String {
        name_normalizer::normalize_file_name(&self.file_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedIdentity {
    pub identifier: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyRecord {
    pub competency_type: String,
    pub code: String,
    pub label: String,
    pub level: i64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPerson {
    pub key: String,
    pub identifier: Option<String>,
    pub canonical_name: String,
    pub cv_file: Option<SourceFile>,
    pub assessment_file: Option<SourceFile>,
    pub match_score: f64,
}

/// One row of the result table. Every text column is an empty string when
/// its source is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersonRecord {
    #[serde(rename = "nik")]
    pub identifier: String,
    #[serde(rename = "nama")]
    pub name: String,
    #[serde(rename = "jabatan terakhir")]
    pub position: String,
    #[serde(rename = "summary executive")]
    pub executive_summary: String,
    pub education: String,
    pub competency: String,
    pub experience: String,
    #[serde(rename = "business impact")]
    pub business_impact: String,
    #[serde(rename = "match_score")]
    pub match_score: f64,
}

/// A matched person together with the row produced for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPerson {
    pub person: MatchedPerson,
    pub record: PersonRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub input_dir: PathBuf,
    pub competency_path: PathBuf,
    pub template_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub output_dir: PathBuf,
    pub workbook_path: PathBuf,
    pub archive_path: PathBuf,
    pub report_path: PathBuf,
    pub decks_generated: usize,
    pub stats: RunStats,
    pub records: Vec<PersonRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct RuntimeSettings {
    pub tesseract_path: String,
    pub pdftoppm_path: String,
    pub ocr_language: String,
    pub ocr_max_pages: usize,
    pub ocr_dpi: u32,
    pub ocr_timeout_seconds: u64,
    pub prefer_text_layer: bool,
    pub match_threshold: f64,
    pub name_scan_lines: usize,
    pub name_max_words: usize,
    pub name_min_chars: usize,
    pub competency_identifier_column: String,
    pub competency_level_column: String,
    pub competency_label_column: String,
    pub competency_min_level: i64,
    pub competency_top_n: usize,
    pub gemini_model: String,
    pub gemini_base_url: String,
    #[serde(skip)]
    pub gemini_api_key: Option<String>,
    pub generation_timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_seconds: f64,
    pub request_pause_millis: u64,
    pub max_source_chars: usize,
    pub temperature: f64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tesseract_path: "tesseract".to_string(),
            pdftoppm_path: "pdftoppm".to_string(),
            ocr_language: "ind".to_string(),
            ocr_max_pages: 10,
            ocr_dpi: 200,
            ocr_timeout_seconds: 120,
            prefer_text_layer: true,
            match_threshold: 0.6,
            name_scan_lines: 10,
            name_max_words: 4,
            name_min_chars: 3,
            competency_identifier_column: "nik".to_string(),
            competency_level_column: "level".to_string(),
            competency_label_column: "competency".to_string(),
            competency_min_level: 2,
            competency_top_n: 15,
            gemini_model: "gemini-2.5-flash-lite".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_api_key: None,
            generation_timeout_seconds: 60,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            request_pause_millis: 500,
            max_source_chars: 30_000,
            temperature: 0.3,
        }
    }
}

impl RuntimeSettings {
    /// Clamps values that would make the pipeline stall or misbehave.
    pub fn sanitized(mut self) -> Self {
        self.ocr_max_pages = self.ocr_max_pages.max(1);
        self.ocr_dpi = self.ocr_dpi.clamp(72, 600);
        self.ocr_timeout_seconds = self.ocr_timeout_seconds.max(1);
        self.match_threshold = self.match_threshold.clamp(0.0, 1.0);
        self.competency_top_n = self.competency_top_n.max(1);
        self.generation_timeout_seconds = self.generation_timeout_seconds.max(1);
        self.max_retries = self.max_retries.max(1);
        self.retry_delay_seconds = self.retry_delay_seconds.max(0.1);
        self.max_source_chars = self.max_source_chars.max(1_000);
        if self.tesseract_path.trim().is_empty() {
            self.tesseract_path = "tesseract".to_string();
        }
        if self.pdftoppm_path.trim().is_empty() {
            self.pdftoppm_path = "pdftoppm".to_string();
        }
        self
    }
}
