use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::competency_loader::format_competencies;
use super::llm_client::{GenerationOptions, TextGenerator};
use super::models::{CompetencyRecord, RuntimeSettings};
use super::prompts::{competency_prompt, NarrativeField};

const COMPETENCY_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedFields {
    pub education: String,
    pub experience: String,
    pub business_impact: String,
    pub position: String,
    pub executive_summary: String,
    pub competency: String,
}

impl SynthesizedFields {
    fn slot(&mut self, field: NarrativeField) -> &mut String {
        match field {
            NarrativeField::Education => &mut self.education,
            NarrativeField::Experience => &mut self.experience,
            NarrativeField::BusinessImpact => &mut self.business_impact,
            NarrativeField::Position => &mut self.position,
            NarrativeField::ExecutiveSummary => &mut self.executive_summary,
        }
    }
}

/// CV text first, then assessment text, each under its own heading.
pub fn build_source_bundle(cv_text: Option<&str>, assessment_text: Option<&str>) -> String {
    let mut bundle = String::new();
    if let Some(text) = cv_text.filter(|text| !text.trim().is_empty()) {
        bundle.push_str("\n\n=== CV ===\n");
        bundle.push_str(text);
    }
    if let Some(text) = assessment_text.filter(|text| !text.trim().is_empty()) {
        bundle.push_str("\n\n=== ASSESSMENT ===\n");
        bundle.push_str(text);
    }
    bundle
}

/// Cuts `text` to `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

pub struct FieldSynthesizer {
    generator: Arc<dyn TextGenerator>,
    max_source_chars: usize,
    request_pause: Duration,
    narrative_options: GenerationOptions,
    competency_options: GenerationOptions,
}

impl FieldSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: &RuntimeSettings) -> Self {
        Self {
            generator,
            max_source_chars: settings.max_source_chars,
            request_pause: Duration::from_millis(settings.request_pause_millis),
            narrative_options: GenerationOptions::with_temperature(settings.temperature),
            competency_options: GenerationOptions::with_temperature(COMPETENCY_TEMPERATURE),
        }
    }

    /// One request per narrative field plus one for competencies. A failed
    /// request leaves its field empty; a failed competency request falls back
    /// to the plain bullet formatter.
    pub async fn synthesize(
        &self,
        person: &str,
        source_text: &str,
        competencies: &[CompetencyRecord],
    ) -> SynthesizedFields {
        let mut fields = SynthesizedFields::default();
        let mut requests_sent = 0_usize;

        if source_text.trim().is_empty() {
            tracing::warn!(person, "no document text, skipping narrative fields");
        } else {
            let source = truncate_chars(source_text, self.max_source_chars);
            for field in NarrativeField::ALL {
                self.pause_between(&mut requests_sent).await;
                tracing::info!(person, field = field.key(), "generating field");

                match self
                    .generator
                    .generate(&field.prompt(&source), &self.narrative_options)
                    .await
                {
                    Ok(text) => *fields.slot(field) = text.trim().to_string(),
                    Err(err) => {
                        tracing::warn!(person, field = field.key(), "generation failed: {err:#}");
                    }
                }
            }
        }

        if competencies.is_empty() {
            tracing::info!(person, "no competency data");
            return fields;
        }

        self.pause_between(&mut requests_sent).await;
        fields.competency = match self
            .generator
            .generate(&competency_prompt(competencies), &self.competency_options)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!(person, "competency generation failed, using plain list: {err:#}");
                format_competencies(competencies)
            }
        };

        fields
    }

    async fn pause_between(&self, requests_sent: &mut usize) {
        if *requests_sent > 0 && !self.request_pause.is_zero() {
            tokio::time::sleep(self.request_pause).await;
        }
        *requests_sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::core::errors::CoreError;

    /// Answers with the first prompt line; fails when the prompt contains a marker.
    struct ScriptedGenerator {
        fail_when_contains: Vec<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(fail_when_contains: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                fail_when_contains,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail_when_contains.iter().any(|m| prompt.contains(m)) {
                return Err(CoreError::GenerationApi {
                    status: 500,
                    body: "boom".to_string(),
                }
                .into());
            }
            Ok(format!("  generated: {}  ", prompt.lines().next().unwrap_or_default()))
        }
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            request_pause_millis: 0,
            ..RuntimeSettings::default()
        }
    }

    fn record(label: &str, level: i64) -> CompetencyRecord {
        CompetencyRecord {
            competency_type: String::new(),
            code: String::new(),
            label: label.to_string(),
            level,
            source: String::new(),
        }
    }

    #[tokio::test]
    async fn failed_experience_call_leaves_only_that_field_empty() {
        let generator = ScriptedGenerator::new(vec!["pengalaman kerja"]);
        let synthesizer = FieldSynthesizer::new(generator.clone(), &settings());

        let fields = synthesizer
            .synthesize("Jane Doe", "CV text of Jane", &[record("Planning", 4)])
            .await;

        assert_eq!(fields.experience, "");
        assert!(fields.education.starts_with("generated:"));
        assert!(fields.business_impact.starts_with("generated:"));
        assert!(fields.position.starts_with("generated:"));
        assert!(fields.executive_summary.starts_with("generated:"));
        assert!(fields.competency.starts_with("generated:"));
        assert_eq!(generator.calls(), 6);
    }

    #[tokio::test]
    async fn competency_falls_back_to_plain_list() {
        let generator = ScriptedGenerator::new(vec!["Data Competency"]);
        let synthesizer = FieldSynthesizer::new(generator, &settings());

        let fields = synthesizer
            .synthesize("Jane Doe", "text", &[record("Planning", 4), record("Payroll", 2)])
            .await;

        assert_eq!(fields.competency, "• Planning (Lvl. 4/5)\n• Payroll (Lvl. 2/5)");
    }

    #[tokio::test]
    async fn no_competency_records_means_no_competency_request() {
        let generator = ScriptedGenerator::new(Vec::new());
        let synthesizer = FieldSynthesizer::new(generator.clone(), &settings());

        let fields = synthesizer.synthesize("John Smith", "text", &[]).await;

        assert_eq!(fields.competency, "");
        assert_eq!(generator.calls(), NarrativeField::ALL.len());
    }

    #[tokio::test]
    async fn blank_source_skips_narrative_requests() {
        let generator = ScriptedGenerator::new(Vec::new());
        let synthesizer = FieldSynthesizer::new(generator.clone(), &settings());

        let fields = synthesizer.synthesize("Nobody", "  \n", &[]).await;

        assert_eq!(fields, SynthesizedFields::default());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_spaced_out() {
        let generator = ScriptedGenerator::new(Vec::new());
        let synthesizer = FieldSynthesizer::new(
            generator,
            &RuntimeSettings {
                request_pause_millis: 500,
                ..RuntimeSettings::default()
            },
        );

        let started = tokio::time::Instant::now();
        synthesizer
            .synthesize("Jane Doe", "text", &[record("Planning", 3)])
            .await;

        assert!(started.elapsed() >= Duration::from_millis(2_500));
    }

    #[test]
    fn source_bundle_labels_each_document() {
        assert_eq!(
            build_source_bundle(Some("cv"), Some("asm")),
            "\n\n=== CV ===\ncv\n\n=== ASSESSMENT ===\nasm"
        );
        assert_eq!(build_source_bundle(None, Some("asm")), "\n\n=== ASSESSMENT ===\nasm");
        assert_eq!(build_source_bundle(Some(" "), None), "");
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("ééé", 2), "éé...");
    }
}
