use std::fmt::Write as _;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::document_matcher::UnresolvedFile;
use super::models::ProcessedPerson;

/// Scores below this are listed for manual review.
pub const GOOD_MATCH_SCORE: f64 = 0.7;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total: usize,
    pub with_identifier: usize,
    pub with_competency: usize,
    pub with_summary: usize,
    pub good_matches: usize,
    pub decks_generated: usize,
    pub unresolved_files: usize,
    pub average_match_score: f64,
}

impl RunStats {
    pub fn collect(processed: &[ProcessedPerson], unresolved: usize, decks_generated: usize) -> Self {
        let total = processed.len();
        let count = |predicate: fn(&ProcessedPerson) -> bool| {
            processed.iter().filter(|entry| predicate(entry)).count()
        };
        let score_sum: f64 = processed.iter().map(|entry| entry.record.match_score).sum();

        Self {
            total,
            with_identifier: count(|entry| !entry.record.identifier.is_empty()),
            with_competency: count(|entry| !entry.record.competency.trim().is_empty()),
            with_summary: count(|entry| !entry.record.executive_summary.trim().is_empty()),
            good_matches: count(|entry| entry.record.match_score >= GOOD_MATCH_SCORE),
            decks_generated,
            unresolved_files: unresolved,
            average_match_score: if total == 0 { 0.0 } else { score_sum / total as f64 },
        }
    }

    /// Short multi-line summary shown when a run finishes.
    pub fn summary(&self) -> String {
        format!(
            "Processed {} candidates\n\
             - with identifier: {}\n\
             - with competency data: {}\n\
             - with executive summary: {}\n\
             - presentations generated: {}\n\
             - unresolved files: {}\n\
             - average match score: {:.2}",
            self.total,
            self.with_identifier,
            self.with_competency,
            self.with_summary,
            self.decks_generated,
            self.unresolved_files,
            self.average_match_score,
        )
    }
}

fn file_label(file: Option<&super::models::SourceFile>) -> &str {
    file.map(|f| f.file_name.as_str()).unwrap_or("-")
}

pub fn detailed_report(
    processed: &[ProcessedPerson],
    unresolved: &[UnresolvedFile],
    model: &str,
    generated_at: DateTime<Local>,
) -> String {
    let stats = RunStats::collect(processed, unresolved.len(), 0);
    let rule = "-".repeat(40);
    let mut out = String::new();

    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "DETAILED ANALYSIS REPORT");
    let _ = writeln!(out, "{}\n", "=".repeat(60));
    let _ = writeln!(out, "Date: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Total: {} people", stats.total);
    let _ = writeln!(out, "Model: {model}\n");

    let _ = writeln!(out, "MATCHING\n{rule}");
    let _ = writeln!(out, "With identifier: {}", stats.with_identifier);
    let _ = writeln!(out, "Without identifier: {}", stats.total - stats.with_identifier);
    let _ = writeln!(out, "Match score >= {GOOD_MATCH_SCORE}: {}", stats.good_matches);
    let _ = writeln!(out, "Match score < {GOOD_MATCH_SCORE}: {}\n", stats.total - stats.good_matches);

    let _ = writeln!(out, "DATA\n{rule}");
    let _ = writeln!(out, "With competency data: {}", stats.with_competency);
    let _ = writeln!(out, "Without competency data: {}", stats.total - stats.with_competency);
    let _ = writeln!(out, "With executive summary: {}\n", stats.with_summary);

    let without_identifier: Vec<&ProcessedPerson> = processed
        .iter()
        .filter(|entry| entry.record.identifier.is_empty())
        .collect();
    if !without_identifier.is_empty() {
        let _ = writeln!(out, "WITHOUT IDENTIFIER (check manually)\n{rule}");
        for entry in without_identifier {
            let _ = writeln!(
                out,
                "- {} (CV: {})",
                entry.record.name,
                file_label(entry.person.cv_file.as_ref())
            );
        }
        let _ = writeln!(out);
    }

    let weak_matches: Vec<&ProcessedPerson> = processed
        .iter()
        .filter(|entry| entry.record.match_score > 0.0 && entry.record.match_score < GOOD_MATCH_SCORE)
        .collect();
    if !weak_matches.is_empty() {
        let _ = writeln!(out, "LOW MATCH SCORE (<{GOOD_MATCH_SCORE})\n{rule}");
        for entry in weak_matches {
            let _ = writeln!(out, "- {} (Score: {:.2})", entry.record.name, entry.record.match_score);
            let _ = writeln!(out, "  CV: {}", file_label(entry.person.cv_file.as_ref()));
            let _ = writeln!(
                out,
                "  Assessment: {}\n",
                file_label(entry.person.assessment_file.as_ref())
            );
        }
    }

    if !unresolved.is_empty() {
        let _ = writeln!(out, "UNRESOLVED FILES\n{rule}");
        for item in unresolved {
            let _ = writeln!(out, "- {} ({})", item.file.file_name, item.reason);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeZone;

    use super::*;
    use crate::core::models::{DocumentKind, MatchedPerson, PersonRecord, SourceFile};

    fn file(name: &str, kind: DocumentKind) -> SourceFile {
        SourceFile {
            path: PathBuf::from(name),
            file_name: name.to_string(),
            kind,
        }
    }

    fn entry(name: &str, identifier: &str, score: f64, competency: &str) -> ProcessedPerson {
        ProcessedPerson {
            person: MatchedPerson {
                key: format!("{identifier}_{name}"),
                identifier: (!identifier.is_empty()).then(|| identifier.to_string()),
                canonical_name: name.to_string(),
                cv_file: Some(file(&format!("CV_{name}.pdf"), DocumentKind::Cv)),
                assessment_file: (score > 0.0)
                    .then(|| file(&format!("Assessment_{name}.pdf"), DocumentKind::Assessment)),
                match_score: score,
            },
            record: PersonRecord {
                identifier: identifier.to_string(),
                name: name.to_string(),
                competency: competency.to_string(),
                match_score: score,
                ..PersonRecord::default()
            },
        }
    }

    #[test]
    fn counts_are_derived_from_records() {
        let processed = vec![
            entry("Jane", "1", 1.0, "• Planning (Lvl. 4/5)"),
            entry("Budi", "2", 0.65, ""),
            entry("John", "", 0.0, ""),
        ];
        let stats = RunStats::collect(&processed, 1, 2);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.with_identifier, 2);
        assert_eq!(stats.with_competency, 1);
        assert_eq!(stats.good_matches, 1);
        assert_eq!(stats.decks_generated, 2);
        assert!((stats.average_match_score - 0.55).abs() < 1e-9);
        assert!(stats.summary().contains("presentations generated: 2"));
    }

    #[test]
    fn detailed_report_lists_people_needing_review() {
        let processed = vec![
            entry("Jane", "1", 1.0, ""),
            entry("Budi", "2", 0.65, ""),
            entry("John", "", 0.0, ""),
        ];
        let unresolved = vec![UnresolvedFile {
            file: file("scan.pdf", DocumentKind::Other),
            reason: "not recognised as a CV or assessment".to_string(),
        }];
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

        let report = detailed_report(&processed, &unresolved, "gemini-test", at);

        assert!(report.contains("Date: 2024-05-01 09:30:00"));
        assert!(report.contains("- John (CV: CV_John.pdf)"));
        assert!(report.contains("- Budi (Score: 0.65)"));
        assert!(report.contains("  Assessment: Assessment_Budi.pdf"));
        assert!(!report.contains("- Jane (Score"));
        assert!(report.contains("- scan.pdf (not recognised as a CV or assessment)"));
    }
}
