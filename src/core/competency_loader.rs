use std::collections::HashMap;
use std::path::Path;

use super::models::{CompetencyRecord, RuntimeSettings};
use super::spreadsheet::{read_table, Table};

const TYPE_COLUMN: &str = "competency_type";
const CODE_COLUMN: &str = "competency_code";
const SOURCE_COLUMN: &str = "source";

/// Ranked competency ratings keyed by employee identifier.
pub type CompetencyIndex = HashMap<String, Vec<CompetencyRecord>>;

#[derive(Debug, Clone)]
pub struct CompetencyLoader {
    pub identifier_column: String,
    pub level_column: String,
    pub label_column: String,
    pub min_level: i64,
    pub top_n: usize,
}

impl CompetencyLoader {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            identifier_column: settings.competency_identifier_column.clone(),
            level_column: settings.competency_level_column.clone(),
            label_column: settings.competency_label_column.clone(),
            min_level: settings.competency_min_level,
            top_n: settings.competency_top_n,
        }
    }

    /// Never fails: an unreadable or malformed sheet yields an empty index.
    pub fn load(&self, path: &Path) -> CompetencyIndex {
        let table = match read_table(path) {
            Ok(table) => table,
            Err(err) => {
                tracing::error!(file = %path.display(), "failed to read competency sheet: {err:#}");
                return CompetencyIndex::new();
            }
        };

        match self.index_table(&table) {
            Some(index) => {
                tracing::info!(
                    identifiers = index.len(),
                    min_level = self.min_level,
                    "competency data loaded"
                );
                index
            }
            None => CompetencyIndex::new(),
        }
    }

    pub fn index_table(&self, table: &Table) -> Option<CompetencyIndex> {
        let header_map = table.header_index_map();
        let column = |name: &str| header_map.get(&name.trim().to_lowercase()).copied();

        let Some(identifier_idx) = column(&self.identifier_column) else {
            tracing::error!(column = %self.identifier_column, "competency sheet has no identifier column");
            return None;
        };
        let Some(level_idx) = column(&self.level_column) else {
            tracing::error!(column = %self.level_column, "competency sheet has no level column");
            return None;
        };
        let label_idx = column(&self.label_column);
        let type_idx = column(TYPE_COLUMN);
        let code_idx = column(CODE_COLUMN);
        let source_idx = column(SOURCE_COLUMN);

        let cell = |row: &[String], idx: Option<usize>| -> String {
            idx.and_then(|i| row.get(i)).cloned().unwrap_or_default()
        };

        let mut index = CompetencyIndex::new();
        for row in &table.rows {
            let identifier = cell(row, Some(identifier_idx));
            if identifier.is_empty() {
                continue;
            }
            let Some(level) = parse_level(&cell(row, Some(level_idx))) else {
                continue;
            };
            if level < self.min_level {
                continue;
            }

            index.entry(identifier).or_default().push(CompetencyRecord {
                competency_type: cell(row, type_idx),
                code: cell(row, code_idx),
                label: cell(row, label_idx),
                level,
                source: cell(row, source_idx),
            });
        }

        for records in index.values_mut() {
            records.sort_by(|a, b| b.level.cmp(&a.level));
            records.truncate(self.top_n);
        }

        Some(index)
    }
}

/// Numeric level truncated to an integer; anything non-numeric is missing.
fn parse_level(raw: &str) -> Option<i64> {
    let value = raw.trim().replace(',', ".").parse::<f64>().ok()?;
    value.is_finite().then(|| value.trunc() as i64)
}

/// `• {label} (Lvl. {level}/5)` per record, one per line.
pub fn format_competencies(records: &[CompetencyRecord]) -> String {
    records
        .iter()
        .map(|record| format!("• {} (Lvl. {}/5)", record.label, record.level))
        .collect::<Vec<_>>()
        .join("\n")
}
