use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::identity_extractor::IdentityExtractor;
use super::models::{DocumentKind, MatchedPerson, RuntimeSettings, SourceFile};
use super::pdf::DocumentTextSource;
use super::similarity::similarity;

pub const STANDALONE_KEY_PREFIX: &str = "NO_NIK_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedFile {
    pub file: SourceFile,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub persons: Vec<MatchedPerson>,
    pub unresolved: Vec<UnresolvedFile>,
}

impl MatchReport {
    pub fn paired_count(&self) -> usize {
        self.persons
            .iter()
            .filter(|p| p.cv_file.is_some() && p.assessment_file.is_some())
            .count()
    }
}

/// An assessment whose text yielded an identifier.
#[derive(Debug, Clone)]
pub struct AssessmentCandidate {
    pub file: SourceFile,
    pub identifier: String,
    pub filename_name: String,
    pub extracted_name: Option<String>,
}

struct PoolEntry {
    file: SourceFile,
    name: String,
    available: bool,
}

/// CVs awaiting assignment. Each entry is claimed at most once.
struct CvPool {
    entries: Vec<PoolEntry>,
}

impl CvPool {
    fn new(cvs: &[SourceFile]) -> Self {
        Self {
            entries: cvs
                .iter()
                .map(|file| PoolEntry {
                    name: file.name_token(),
                    file: file.clone(),
                    available: true,
                })
                .collect(),
        }
    }

    /// Highest-scoring available CV at or above `threshold`; the earliest wins a tie.
    fn best_match(&self, candidate: &AssessmentCandidate, threshold: f64) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;

        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.available {
                continue;
            }

            let by_filename = similarity(&entry.name, &candidate.filename_name);
            let by_text = candidate
                .extracted_name
                .as_deref()
                .map(|name| similarity(&entry.name, name))
                .unwrap_or(0.0);
            let score = by_filename.max(by_text);

            let beats_best = best.map_or(true, |(_, best_score)| score > best_score);
            if score >= threshold && beats_best {
                best = Some((index, score));
            }
        }

        best
    }

    fn claim(&mut self, index: usize) -> &PoolEntry {
        let entry = &mut self.entries[index];
        debug_assert!(entry.available, "CV claimed twice");
        entry.available = false;
        entry
    }

    fn remaining(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.iter().filter(|entry| entry.available)
    }
}

pub fn classify(file_name: &str) -> DocumentKind {
    let lower = file_name.to_lowercase();
    if lower.contains("cv") {
        DocumentKind::Cv
    } else if lower.contains("assessment") || lower.contains("penilaian") {
        DocumentKind::Assessment
    } else {
        DocumentKind::Other
    }
}

/// Lists the PDF files directly inside `dir`, ordered by file name.
pub async fn scan_directory(dir: &Path) -> anyhow::Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read input folder {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|v| v.to_str())
            .is_some_and(|v| v.eq_ignore_ascii_case("pdf"));
        if !is_pdf || !entry.file_type().await?.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        files.push(SourceFile {
            kind: classify(&file_name),
            path,
            file_name,
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

pub struct DocumentMatcher {
    threshold: f64,
    extractor: IdentityExtractor,
}

impl DocumentMatcher {
    pub fn new(threshold: f64, extractor: IdentityExtractor) -> Self {
        Self {
            threshold,
            extractor,
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(
            settings.match_threshold,
            IdentityExtractor::from_settings(settings),
        )
    }

    /// Reads every assessment, then pairs assessments with CVs.
    /// A file that cannot be read is reported as unresolved and the batch continues.
    pub async fn match_documents(
        &self,
        files: &[SourceFile],
        text_source: &dyn DocumentTextSource,
    ) -> MatchReport {
        let mut unresolved = Vec::new();
        let mut candidates = Vec::new();
        let mut cvs = Vec::new();

        for file in files {
            match file.kind {
                DocumentKind::Cv => cvs.push(file.clone()),
                DocumentKind::Other => unresolved.push(UnresolvedFile {
                    file: file.clone(),
                    reason: "not recognised as a CV or assessment".to_string(),
                }),
                DocumentKind::Assessment => {
                    let text = match text_source.document_text(file).await {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::warn!(file = %file.file_name, "failed to read assessment: {err:#}");
                            unresolved.push(UnresolvedFile {
                                file: file.clone(),
                                reason: format!("unreadable: {err}"),
                            });
                            continue;
                        }
                    };

                    let identity = self.extractor.extract(&text);
                    match identity.identifier {
                        Some(identifier) => {
                            tracing::info!(file = %file.file_name, %identifier, "identifier found");
                            candidates.push(AssessmentCandidate {
                                filename_name: file.name_token(),
                                file: file.clone(),
                                identifier,
                                extracted_name: identity.name,
                            });
                        }
                        None => {
                            tracing::warn!(file = %file.file_name, "no identifier found in assessment");
                            unresolved.push(UnresolvedFile {
                                file: file.clone(),
                                reason: "no identifier found".to_string(),
                            });
                        }
                    }
                }
            }
        }

        tracing::info!(
            cvs = cvs.len(),
            assessments = candidates.len(),
            "matching CVs with assessments"
        );

        let persons = self.pair(&candidates, &cvs);
        MatchReport {
            persons,
            unresolved,
        }
    }

    /// Greedy assignment in candidate order. Each CV goes to at most one
    /// assessment and is never reconsidered once claimed.
    pub fn pair(&self, candidates: &[AssessmentCandidate], cvs: &[SourceFile]) -> Vec<MatchedPerson> {
        let mut pool = CvPool::new(cvs);
        let mut keys = KeyRegistry::default();
        let mut matched = Vec::new();
        let mut assessment_only = Vec::new();

        for candidate in candidates {
            match pool.best_match(candidate, self.threshold) {
                Some((index, score)) => {
                    let entry = pool.claim(index);
                    tracing::info!(
                        identifier = %candidate.identifier,
                        assessment = %candidate.file.file_name,
                        cv = %entry.file.file_name,
                        score = %format_args!("{score:.2}"),
                        "match found"
                    );
                    matched.push(MatchedPerson {
                        key: keys.register(format!("{}_{}", candidate.identifier, entry.name)),
                        identifier: Some(candidate.identifier.clone()),
                        canonical_name: entry.name.clone(),
                        cv_file: Some(entry.file.clone()),
                        assessment_file: Some(candidate.file.clone()),
                        match_score: score,
                    });
                }
                None => {
                    tracing::warn!(
                        assessment = %candidate.file.file_name,
                        "no CV above threshold for assessment"
                    );
                    assessment_only.push(candidate);
                }
            }
        }

        let mut persons = matched;
        for candidate in assessment_only {
            let name = if candidate.filename_name.is_empty() {
                candidate.extracted_name.clone().unwrap_or_default()
            } else {
                candidate.filename_name.clone()
            };
            persons.push(MatchedPerson {
                key: keys.register(format!("{}_{}", candidate.identifier, name)),
                identifier: Some(candidate.identifier.clone()),
                canonical_name: name,
                cv_file: None,
                assessment_file: Some(candidate.file.clone()),
                match_score: 0.0,
            });
        }

        for entry in pool.remaining() {
            tracing::warn!(cv = %entry.file.file_name, "CV without matching assessment");
            persons.push(MatchedPerson {
                key: keys.register(format!("{STANDALONE_KEY_PREFIX}{}", entry.name)),
                identifier: None,
                canonical_name: entry.name.clone(),
                cv_file: Some(entry.file.clone()),
                assessment_file: None,
                match_score: 0.0,
            });
        }

        persons
    }
}

#[derive(Default)]
struct KeyRegistry {
    used: HashSet<String>,
}

impl KeyRegistry {
    fn register(&mut self, base: String) -> String {
        let mut key = base.clone();
        let mut suffix = 2;
        while !self.used.insert(key.clone()) {
            key = format!("{base}_{suffix}");
            suffix += 1;
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;

    struct FakeTexts(HashMap<String, anyhow::Result<String>>);

    impl FakeTexts {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(name, text)| (name.to_string(), Ok(text.to_string())))
                    .collect(),
            )
        }

        fn failing(mut self, name: &str) -> Self {
            self.0
                .insert(name.to_string(), Err(anyhow::anyhow!("OCR engine missing")));
            self
        }
    }

    #[async_trait]
    impl DocumentTextSource for FakeTexts {
        async fn document_text(&self, file: &SourceFile) -> anyhow::Result<String> {
            match self.0.get(&file.file_name) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(err)) => Err(anyhow::anyhow!("{err}")),
                None => Ok(String::new()),
            }
        }
    }

    fn source(name: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/input").join(name),
            file_name: name.to_string(),
            kind: classify(name),
        }
    }

    fn candidate(name: &str, identifier: &str, extracted: Option<&str>) -> AssessmentCandidate {
        let file = source(name);
        AssessmentCandidate {
            filename_name: file.name_token(),
            file,
            identifier: identifier.to_string(),
            extracted_name: extracted.map(str::to_string),
        }
    }

    #[test]
    fn classifies_by_file_name_markers() {
        assert_eq!(classify("CV_Jane_Doe.pdf"), DocumentKind::Cv);
        assert_eq!(classify("Assessment_Jane_Doe.pdf"), DocumentKind::Assessment);
        assert_eq!(classify("Hasil PENILAIAN Budi.pdf"), DocumentKind::Assessment);
        assert_eq!(classify("notes.pdf"), DocumentKind::Other);
    }

    #[tokio::test]
    async fn pairs_cv_and_assessment_for_same_person() {
        let files = vec![source("Assessment_Jane_Doe.pdf"), source("CV_Jane_Doe.pdf")];
        let texts = FakeTexts::new(&[("Assessment_Jane_Doe.pdf", "NIK: 123456789\n")]);

        let report = DocumentMatcher::from_settings(&RuntimeSettings::default())
            .match_documents(&files, &texts)
            .await;

        assert_eq!(report.persons.len(), 1);
        let person = &report.persons[0];
        assert_eq!(person.identifier.as_deref(), Some("123456789"));
        assert_eq!(person.canonical_name, "Jane Doe");
        assert_eq!(person.key, "123456789_Jane Doe");
        assert!(person.match_score >= 0.6);
        assert_eq!(person.cv_file.as_ref().unwrap().file_name, "CV_Jane_Doe.pdf");
        assert!(report.unresolved.is_empty());
    }

    #[tokio::test]
    async fn lone_cv_becomes_standalone_person() {
        let files = vec![source("CV_John_Smith.pdf")];
        let report = DocumentMatcher::from_settings(&RuntimeSettings::default())
            .match_documents(&files, &FakeTexts::new(&[]))
            .await;

        assert_eq!(report.persons.len(), 1);
        let person = &report.persons[0];
        assert_eq!(person.identifier, None);
        assert_eq!(person.match_score, 0.0);
        assert_eq!(person.key, "NO_NIK_John Smith");
        assert!(person.assessment_file.is_none());
    }

    #[tokio::test]
    async fn unreadable_or_anonymous_assessments_do_not_abort_the_batch() {
        let files = vec![
            source("Assessment_Broken.pdf"),
            source("Assessment_Nobody.pdf"),
            source("CV_Jane_Doe.pdf"),
            source("cover letter.pdf"),
        ];
        let texts = FakeTexts::new(&[("Assessment_Nobody.pdf", "Laporan tanpa nomor")])
            .failing("Assessment_Broken.pdf");

        let report = DocumentMatcher::from_settings(&RuntimeSettings::default())
            .match_documents(&files, &texts)
            .await;

        assert_eq!(report.persons.len(), 1);
        assert_eq!(report.unresolved.len(), 3);
        assert!(report.unresolved[0].reason.starts_with("unreadable"));
        assert_eq!(report.unresolved[1].reason, "no identifier found");
    }

    #[tokio::test]
    async fn every_file_lands_in_exactly_one_place() {
        let files = vec![
            source("Assessment_Jane_Doe.pdf"),
            source("Assessment_Zed_Unknown.pdf"),
            source("Assessment_Noid.pdf"),
            source("CV_Jane_Doe.pdf"),
            source("CV_John_Smith.pdf"),
            source("readme.pdf"),
        ];
        let texts = FakeTexts::new(&[
            ("Assessment_Jane_Doe.pdf", "NIK: 111111111"),
            ("Assessment_Zed_Unknown.pdf", "NIK: 222222222"),
            ("Assessment_Noid.pdf", "no id"),
        ]);

        let report = DocumentMatcher::from_settings(&RuntimeSettings::default())
            .match_documents(&files, &texts)
            .await;

        let mut seen: Vec<&str> = Vec::new();
        for person in &report.persons {
            assert!(person.cv_file.is_some() || person.assessment_file.is_some());
            seen.extend(person.cv_file.iter().map(|f| f.file_name.as_str()));
            seen.extend(person.assessment_file.iter().map(|f| f.file_name.as_str()));
        }
        seen.extend(report.unresolved.iter().map(|u| u.file.file_name.as_str()));
        seen.sort();

        let mut expected: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(report.paired_count(), 1);
    }

    #[test]
    fn a_cv_is_never_assigned_twice() {
        let matcher = DocumentMatcher::from_settings(&RuntimeSettings::default());
        let candidates = vec![
            candidate("Assessment_Jane_Doe.pdf", "1", None),
            candidate("Assessment_Jane_Doe (copy).pdf", "2", None),
        ];
        let cvs = vec![source("CV_Jane_Doe.pdf")];

        let persons = matcher.pair(&candidates, &cvs);
        let cv_assignments = persons.iter().filter(|p| p.cv_file.is_some()).count();

        assert_eq!(cv_assignments, 1);
        assert_eq!(persons[0].identifier.as_deref(), Some("1"));
        assert_eq!(persons[1].cv_file, None);
        assert_eq!(persons[1].identifier.as_deref(), Some("2"));
    }

    #[test]
    fn extracted_name_can_rescue_a_poor_file_name() {
        let matcher = DocumentMatcher::from_settings(&RuntimeSettings::default());
        let candidates = vec![candidate("Assessment_0042.pdf", "42", Some("Siti Rahma"))];
        let cvs = vec![source("CV_John_Smith.pdf"), source("CV_Siti_Rahma.pdf")];

        let persons = matcher.pair(&candidates, &cvs);

        assert_eq!(persons[0].canonical_name, "Siti Rahma");
        assert_eq!(persons[0].match_score, 1.0);
        assert_eq!(persons[1].key, "NO_NIK_John Smith");
    }

    #[test]
    fn threshold_is_respected() {
        let strict = DocumentMatcher::new(0.99, IdentityExtractor::default());
        let candidates = vec![candidate("Assessment_Jon_Smyth.pdf", "7", None)];
        let cvs = vec![source("CV_John_Smith.pdf")];

        let persons = strict.pair(&candidates, &cvs);
        assert!(persons.iter().all(|p| p.match_score == 0.0));
        assert_eq!(persons.len(), 2);
    }

    #[test]
    fn pairing_is_deterministic() {
        let matcher = DocumentMatcher::from_settings(&RuntimeSettings::default());
        let candidates = vec![
            candidate("Assessment_Jon_Smith.pdf", "1", None),
            candidate("Assessment_John_Smyth.pdf", "2", None),
        ];
        let cvs = vec![source("CV_John_Smith.pdf"), source("CV_Jon_Smyth.pdf")];

        let first = matcher.pair(&candidates, &cvs);
        for _ in 0..5 {
            assert_eq!(matcher.pair(&candidates, &cvs), first);
        }
    }

    #[test]
    fn duplicate_keys_get_a_suffix() {
        let matcher = DocumentMatcher::from_settings(&RuntimeSettings::default());
        let cvs = vec![source("CV_Jane_Doe.pdf"), source("Jane Doe CV.pdf")];

        let persons = matcher.pair(&[], &cvs);
        assert_eq!(persons[0].key, "NO_NIK_Jane Doe");
        assert_eq!(persons[1].key, "NO_NIK_Jane Doe_2");
    }
}
