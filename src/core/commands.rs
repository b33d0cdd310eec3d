use std::path::{Path, PathBuf};

use super::document_matcher::MatchReport;
use super::errors::CoreError;
use super::models::{PipelineOutcome, PipelineRequest};
use super::service::{self, CoreService};

/// One-line message for the user; never a backtrace.
pub fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::NoDocuments(dir)) => format!(
            "No PDF files were found in {dir}. Add CV and assessment PDFs (or ZIP archives of them) and try again."
        ),
        Some(CoreError::NoRecords) => {
            "Nothing was produced: no person could be built from the input.".to_string()
        }
        Some(core_error) => core_error.to_string(),
        None => format!("{err:#}"),
    }
}

pub async fn run_pipeline(
    core: &CoreService,
    request: PipelineRequest,
) -> Result<PipelineOutcome, String> {
    core.run(request).await.map_err(|err| user_message(&err))
}

pub async fn match_documents(core: &CoreService, input_dir: &Path) -> Result<MatchReport, String> {
    core.match_folder(input_dir)
        .await
        .map_err(|err| user_message(&err))
}

pub async fn render_presentations(
    table_path: &Path,
    template_path: &Path,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, String> {
    service::render_from_table(table_path, template_path, output_dir)
        .await
        .map_err(|err| user_message(&err))
}

pub fn outcome_message(outcome: &PipelineOutcome) -> String {
    format!(
        "{}\n\nResults:  {}\nReport:   {}\nArchive:  {}",
        outcome.stats.summary(),
        outcome.workbook_path.display(),
        outcome.report_path.display(),
        outcome.archive_path.display(),
    )
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn fatal_conditions_get_friendly_messages() {
        let no_docs = anyhow::Error::from(CoreError::NoDocuments("/data/in".to_string()));
        assert!(user_message(&no_docs).starts_with("No PDF files were found in /data/in."));

        let no_records = anyhow::Error::from(CoreError::NoRecords);
        assert!(user_message(&no_records).starts_with("Nothing was produced"));
    }

    #[test]
    fn other_errors_keep_their_context_on_one_line() {
        let err = std::fs::read("/definitely/not/here")
            .context("failed to read table")
            .unwrap_err();
        let message = user_message(&err);
        assert!(message.starts_with("failed to read table: "));
        assert!(!message.contains('\n'));
    }
}
