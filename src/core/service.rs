use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Local;
use tempfile::TempDir;
use tokio::sync::Mutex;

use super::archive::{self, BundleContents, PRESENTATIONS_DIR};
use super::competency_loader::{CompetencyIndex, CompetencyLoader};
use super::document_matcher::{scan_directory, DocumentMatcher, MatchReport};
use super::errors::CoreError;
use super::field_synthesizer::{build_source_bundle, FieldSynthesizer};
use super::llm_client::{GeminiClient, TextGenerator};
use super::models::{
    MatchedPerson, PersonRecord, PipelineOutcome, PipelineRequest, ProcessedPerson,
    RuntimeSettings, SourceFile,
};
use super::ocr::{PdfRasterizer, TesseractCliOcrService};
use super::pdf::{DocumentTextSource, PdfTextExtractor};
use super::report::{detailed_report, RunStats};
use super::result_assembler::{assemble, compare_records, read_rows, write_workbook, ResultRow};
use super::settings_store::{SettingsStore, API_KEY_ENV};
use super::slide_renderer::{render_decks, SlideTemplate};

const DEFAULT_OUTPUT_DIR: &str = "output";

/// Remembers document text for one run so a file is never OCR'd twice.
struct TextCache {
    inner: Arc<dyn DocumentTextSource>,
    texts: Mutex<HashMap<PathBuf, String>>,
}

impl TextCache {
    fn new(inner: Arc<dyn DocumentTextSource>) -> Self {
        Self {
            inner,
            texts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocumentTextSource for TextCache {
    async fn document_text(&self, file: &SourceFile) -> anyhow::Result<String> {
        if let Some(text) = self.texts.lock().await.get(&file.path) {
            return Ok(text.clone());
        }

        let text = self.inner.document_text(file).await?;
        self.texts
            .lock()
            .await
            .insert(file.path.clone(), text.clone());
        Ok(text)
    }
}

/// Per-person text files written during a run. Names are unique within the run.
#[derive(Default)]
struct TextDumps {
    paths: Vec<PathBuf>,
    used_names: HashSet<String>,
}

impl TextDumps {
    fn reserve(&mut self, prefix: &str, person_name: &str) -> String {
        let mut file_name = text_dump_name(prefix, person_name);
        let mut suffix = 2;
        while !self.used_names.insert(file_name.clone()) {
            file_name = text_dump_name(prefix, &format!("{person_name}_{suffix}"));
            suffix += 1;
        }
        file_name
    }
}

/// Input PDFs plus the staging folder holding those expanded from archives.
struct StagedDocuments {
    files: Vec<SourceFile>,
    _staging: TempDir,
}

pub struct CoreService {
    settings: RuntimeSettings,
    text_source: Arc<dyn DocumentTextSource>,
    matcher: DocumentMatcher,
    loader: CompetencyLoader,
    synthesizer: FieldSynthesizer,
}

impl CoreService {
    pub async fn new() -> anyhow::Result<Self> {
        let store = SettingsStore::new();
        let settings = store.load().await?;
        tracing::debug!(settings = %store.path().display(), "settings loaded");
        Self::from_settings(settings).await
    }

    /// Wires the Tesseract/pdftoppm OCR chain and the Gemini client.
    pub async fn from_settings(settings: RuntimeSettings) -> anyhow::Result<Self> {
        let ocr_timeout = Duration::from_secs(settings.ocr_timeout_seconds);
        let ocr = TesseractCliOcrService::new(settings.tesseract_path.clone(), ocr_timeout);
        match ocr.version().await {
            Ok(version) => tracing::info!(%version, "OCR engine ready"),
            Err(err) => tracing::warn!("{err:#}; scanned documents will yield no text"),
        }

        let rasterizer =
            PdfRasterizer::new(settings.pdftoppm_path.clone(), settings.ocr_dpi, ocr_timeout);
        let text_source = Arc::new(PdfTextExtractor::new(rasterizer, Arc::new(ocr), &settings));

        let generator = GeminiClient::from_settings(&settings)?;
        if !generator.has_api_key() {
            tracing::warn!("{API_KEY_ENV} is not set; generated fields will be empty");
        }

        Ok(Self::with_collaborators(
            settings,
            text_source,
            Arc::new(generator),
        ))
    }

    pub fn with_collaborators(
        settings: RuntimeSettings,
        text_source: Arc<dyn DocumentTextSource>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let settings = settings.sanitized();
        Self {
            matcher: DocumentMatcher::from_settings(&settings),
            loader: CompetencyLoader::from_settings(&settings),
            synthesizer: FieldSynthesizer::new(generator, &settings),
            text_source,
            settings,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Pairs the CVs and assessments found in `input_dir` without generating anything.
    pub async fn match_folder(&self, input_dir: &Path) -> anyhow::Result<MatchReport> {
        let documents = self.collect_documents(input_dir).await?;
        let texts = TextCache::new(Arc::clone(&self.text_source));
        Ok(self.matcher.match_documents(&documents.files, &texts).await)
    }

    pub async fn run(&self, request: PipelineRequest) -> anyhow::Result<PipelineOutcome> {
        let started = Local::now();
        let stamp = started.format("%Y%m%d_%H%M%S").to_string();

        let documents = self.collect_documents(&request.input_dir).await?;
        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| request.input_dir.join(DEFAULT_OUTPUT_DIR));
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("failed to create output folder {}", output_dir.display()))?;

        let competencies = self.loader.load(&request.competency_path);

        let texts = TextCache::new(Arc::clone(&self.text_source));
        let report = self.matcher.match_documents(&documents.files, &texts).await;
        tracing::info!(
            persons = report.persons.len(),
            paired = report.paired_count(),
            unresolved = report.unresolved.len(),
            "matching complete"
        );

        let total = report.persons.len();
        let mut processed = Vec::with_capacity(total);
        let mut text_dumps = TextDumps::default();
        for (index, person) in report.persons.iter().enumerate() {
            tracing::info!(
                person = %person.canonical_name,
                progress = %format_args!("{}/{}", index + 1, total),
                "processing"
            );
            processed.push(
                self.process_person(person, &competencies, &texts, &output_dir, &mut text_dumps)
                    .await,
            );
        }

        if processed.is_empty() {
            return Err(CoreError::NoRecords.into());
        }
        processed.sort_by(|a, b| compare_records(&a.record, &b.record));
        let records: Vec<PersonRecord> = processed.iter().map(|entry| entry.record.clone()).collect();

        let workbook_path = output_dir.join(format!("hasil_analisis_{stamp}.xlsx"));
        write_workbook(&records, &workbook_path)?;
        tracing::info!(workbook = %workbook_path.display(), rows = records.len(), "results saved");

        let presentations = match &request.template_path {
            Some(template_path) => {
                let rows = records.iter().map(PersonRecord::to_row).collect();
                render_presentations(template_path, rows, &output_dir.join(PRESENTATIONS_DIR))
                    .await
                    .unwrap_or_else(|err| {
                        tracing::error!("presentations were not generated: {err:#}");
                        Vec::new()
                    })
            }
            None => Vec::new(),
        };

        let stats = RunStats::collect(&processed, report.unresolved.len(), presentations.len());
        let report_path = output_dir.join(format!("detailed_report_{stamp}.txt"));
        let report_text = detailed_report(
            &processed,
            &report.unresolved,
            &self.settings.gemini_model,
            started,
        );
        tokio::fs::write(&report_path, report_text)
            .await
            .with_context(|| format!("failed to write {}", report_path.display()))?;

        let archive_path = output_dir.join(format!("cv_summary_results_{stamp}.zip"));
        let contents = BundleContents {
            workbook: Some(workbook_path.clone()),
            presentations,
            text_dumps: text_dumps.paths,
            reports: vec![report_path.clone()],
        };
        archive::write_bundle(&archive_path, &contents)?;
        tracing::info!(archive = %archive_path.display(), "results archived");

        Ok(PipelineOutcome {
            output_dir,
            workbook_path,
            archive_path,
            report_path,
            decks_generated: contents.presentations.len(),
            stats,
            records,
        })
    }

    async fn collect_documents(&self, input_dir: &Path) -> anyhow::Result<StagedDocuments> {
        if !input_dir.is_dir() {
            return Err(CoreError::InvalidRequest(format!(
                "{} is not a folder",
                input_dir.display()
            ))
            .into());
        }

        let staging = tempfile::Builder::new()
            .prefix("talentdeck-input-")
            .tempdir()
            .context("failed to create staging folder")?;
        let expanded = archive::extract_pdf_archives(input_dir, staging.path())?;

        let mut files = scan_directory(input_dir).await?;
        if expanded > 0 {
            files.extend(scan_directory(staging.path()).await?);
        }
        if files.is_empty() {
            return Err(CoreError::NoDocuments(input_dir.display().to_string()).into());
        }

        tracing::info!(documents = files.len(), from_archives = expanded, "documents found");
        Ok(StagedDocuments {
            files,
            _staging: staging,
        })
    }

    async fn process_person(
        &self,
        person: &MatchedPerson,
        competencies: &CompetencyIndex,
        texts: &TextCache,
        output_dir: &Path,
        text_dumps: &mut TextDumps,
    ) -> ProcessedPerson {
        let cv_text = read_text(texts, person.cv_file.as_ref()).await;
        let assessment_text = read_text(texts, person.assessment_file.as_ref()).await;

        for (prefix, text) in [("hasil_cv", &cv_text), ("hasil_assessment", &assessment_text)] {
            let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let path = output_dir.join(text_dumps.reserve(prefix, &person.canonical_name));
            match tokio::fs::write(&path, text).await {
                Ok(()) => text_dumps.paths.push(path),
                Err(err) => tracing::warn!(file = %path.display(), "failed to save text: {err}"),
            }
        }

        let ratings = person
            .identifier
            .as_ref()
            .and_then(|identifier| competencies.get(identifier))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let source = build_source_bundle(cv_text.as_deref(), assessment_text.as_deref());
        let fields = self
            .synthesizer
            .synthesize(&person.canonical_name, &source, ratings)
            .await;

        ProcessedPerson {
            record: assemble(person, fields),
            person: person.clone(),
        }
    }
}

async fn read_text(texts: &TextCache, file: Option<&SourceFile>) -> Option<String> {
    let file = file?;
    match texts.document_text(file).await {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(file = %file.file_name, "failed to read document: {err:#}");
            None
        }
    }
}

fn text_dump_name(prefix: &str, name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\' | ':') {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{prefix}_{safe}.txt")
}

/// Opens the template, warns about missing placeholders and writes one deck per row.
pub async fn render_presentations(
    template_path: &Path,
    rows: Vec<ResultRow>,
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let template_path = template_path.to_path_buf();
    let output_dir = output_dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PathBuf>> {
        let template = SlideTemplate::open(&template_path)?;
        let missing = template.missing_placeholders()?;
        if !missing.is_empty() {
            tracing::warn!(
                template = %template_path.display(),
                missing = %missing.join(", "),
                "template lacks placeholders"
            );
        }
        render_decks(&template, &rows, &output_dir)
    })
    .await
    .context("presentation rendering aborted")?
}

/// Regenerates decks from an existing (possibly hand-edited) results table.
pub async fn render_from_table(
    table_path: &Path,
    template_path: &Path,
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let rows = read_rows(table_path)?;
    if rows.is_empty() {
        return Err(CoreError::NoRecords.into());
    }
    tracing::info!(rows = rows.len(), table = %table_path.display(), "table loaded");
    render_presentations(template_path, rows, output_dir).await
}
