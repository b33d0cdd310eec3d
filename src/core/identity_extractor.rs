use once_cell::sync::Lazy;
use regex::Regex;

use super::models::{ExtractedIdentity, RuntimeSettings};
use super::name_normalizer::title_case;

struct PatternRule {
    label: &'static str,
    regex: Regex,
}

impl PatternRule {
    fn new(label: &'static str, pattern: &str) -> Self {
        Self {
            label,
            regex: Regex::new(pattern).unwrap(),
        }
    }

    fn first_capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str())
    }
}

// Labelled fields first, bare digit runs last.
static IDENTIFIER_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new("nik", r"(?i)\bNIK\s*[:\.]?\s*(\d+)"),
        PatternRule::new(
            "nomor-induk-karyawan",
            r"(?i)\bNomor\s+Induk\s+Karyawan\s*[:\.]?\s*(\d+)",
        ),
        PatternRule::new("employee-id", r"(?i)\bEmployee\s+ID\s*[:\.]?\s*(\d+)"),
        PatternRule::new("id-karyawan", r"(?i)\bID\s+Karyawan\s*[:\.]?\s*(\d+)"),
        PatternRule::new("digit-run", r"\b(\d{8,15})\b"),
    ]
});

static NAME_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new("nama", r"(?i)\bNama\s*[:\.]?\s*([A-Za-z \t\.]+)(?:\r?\n|$)"),
        PatternRule::new("name", r"(?i)\bName\s*[:\.]?\s*([A-Za-z \t\.]+)(?:\r?\n|$)"),
        PatternRule::new("peserta", r"(?i)\bPeserta\s*[:\.]?\s*([A-Za-z \t\.]+)(?:\r?\n|$)"),
        PatternRule::new(
            "candidate",
            r"(?i)\bCandidate\s*[:\.]?\s*([A-Za-z \t\.]+)(?:\r?\n|$)",
        ),
    ]
});

static NAME_NOISE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z\s\.]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Finds an employee identifier and a person name in noisy OCR text.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    scan_lines: usize,
    max_words: usize,
    min_chars: usize,
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

impl IdentityExtractor {
    pub fn new(scan_lines: usize, max_words: usize, min_chars: usize) -> Self {
        Self {
            scan_lines,
            max_words,
            min_chars,
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(
            settings.name_scan_lines,
            settings.name_max_words,
            settings.name_min_chars,
        )
    }

    pub fn extract(&self, text: &str) -> ExtractedIdentity {
        ExtractedIdentity {
            identifier: extract_identifier(text),
            name: extract_labelled_name(text).or_else(|| self.guess_name_from_header(text)),
        }
    }

    /// Best-effort fallback: the first short line near the top of the document.
    /// This can pick up a heading instead of a name.
    fn guess_name_from_header(&self, text: &str) -> Option<String> {
        text.lines()
            .take(self.scan_lines)
            .map(str::trim)
            .find(|line| {
                line.chars().count() > self.min_chars
                    && line.split_whitespace().count() <= self.max_words
            })
            .map(title_case)
    }
}

pub fn extract_identifier(text: &str) -> Option<String> {
    IDENTIFIER_RULES.iter().find_map(|rule| {
        let value = rule.first_capture(text)?;
        tracing::debug!(rule = rule.label, "identifier pattern matched");
        Some(value.to_string())
    })
}

pub fn extract_labelled_name(text: &str) -> Option<String> {
    NAME_RULES.iter().find_map(|rule| {
        let raw = rule.first_capture(text)?;
        let cleaned = NAME_NOISE_RE.replace_all(raw, "");
        let collapsed = WHITESPACE_RE.replace_all(cleaned.trim(), " ");
        if collapsed.is_empty() {
            return None;
        }

        tracing::debug!(rule = rule.label, "name pattern matched");
        Some(title_case(&collapsed))
    })
}
