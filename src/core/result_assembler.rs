use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use rust_xlsxwriter::{Format, Workbook};

use super::field_synthesizer::SynthesizedFields;
use super::models::{MatchedPerson, PersonRecord};
use super::spreadsheet::read_table;

pub const SHEET_NAME: &str = "Hasil Analisis";
const MAX_COLUMN_WIDTH: usize = 50;

/// Output schema, in column order.
pub const COLUMNS: [&str; 9] = [
    "nik",
    "nama",
    "jabatan terakhir",
    "summary executive",
    "education",
    "competency",
    "experience",
    "business impact",
    "match_score",
];

// Alternative headers accepted when reading an edited table back.
const COLUMN_ALIASES: [(&str, &[&str]); 9] = [
    ("nik", &["id", "employee_id", "employee id", "no_induk", "nomor induk"]),
    ("nama", &["name", "candidate_name"]),
    (
        "jabatan terakhir",
        &["jabatan", "position", "jabatan_terakhir", "current_position"],
    ),
    (
        "summary executive",
        &["summary_executive", "executive_summary", "summary"],
    ),
    ("education", &["pendidikan"]),
    ("competency", &["skills", "competency_data"]),
    ("experience", &["pengalaman", "pengalaman_kerja"]),
    (
        "business impact",
        &["business_impact", "impact", "business_impact_data"],
    ),
    ("match_score", &["match score", "score"]),
];

/// One table row keyed by lower-case column name.
pub type ResultRow = BTreeMap<String, String>;

/// The column itself followed by its accepted aliases.
pub fn column_candidates(column: &str) -> Vec<&str> {
    let mut candidates = vec![column];
    if let Some((_, aliases)) = COLUMN_ALIASES.iter().find(|(name, _)| *name == column) {
        candidates.extend(aliases.iter().copied());
    }
    candidates
}

/// First non-empty value among `candidates`: exact key first, then a
/// case-insensitive key match.
pub fn lookup<'a>(row: &'a ResultRow, candidates: &[&str]) -> Option<&'a str> {
    let non_empty = |value: &'a String| {
        let trimmed = value.trim();
        (!trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("nan")).then_some(trimmed)
    };

    for candidate in candidates {
        if let Some(value) = row.get(*candidate).and_then(non_empty) {
            return Some(value);
        }
    }
    for candidate in candidates {
        let found = row
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(candidate))
            .and_then(|(_, value)| non_empty(value));
        if found.is_some() {
            return found;
        }
    }
    None
}

pub fn assemble(person: &MatchedPerson, fields: SynthesizedFields) -> PersonRecord {
    PersonRecord {
        identifier: person.identifier.clone().unwrap_or_default(),
        name: person.canonical_name.clone(),
        position: fields.position,
        executive_summary: fields.executive_summary,
        education: fields.education,
        competency: fields.competency,
        experience: fields.experience,
        business_impact: fields.business_impact,
        match_score: round_score(person.match_score),
    }
}

fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Highest match score first, then by name.
pub fn compare_records(a: &PersonRecord, b: &PersonRecord) -> Ordering {
    b.match_score
        .partial_cmp(&a.match_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.name.cmp(&b.name))
}

pub fn sort_records(records: &mut [PersonRecord]) {
    records.sort_by(compare_records);
}

impl PersonRecord {
    /// Cell text in `COLUMNS` order.
    pub fn cells(&self) -> [String; 9] {
        [
            self.identifier.clone(),
            self.name.clone(),
            self.position.clone(),
            self.executive_summary.clone(),
            self.education.clone(),
            self.competency.clone(),
            self.experience.clone(),
            self.business_impact.clone(),
            format_score(self.match_score),
        ]
    }

    pub fn to_row(&self) -> ResultRow {
        COLUMNS
            .iter()
            .map(|column| column.to_string())
            .zip(self.cells())
            .collect()
    }

    pub fn from_row(row: &ResultRow) -> Self {
        let text = |column: &str| {
            lookup(row, &column_candidates(column))
                .unwrap_or_default()
                .to_string()
        };

        Self {
            identifier: text("nik"),
            name: text("nama"),
            position: text("jabatan terakhir"),
            executive_summary: text("summary executive"),
            education: text("education"),
            competency: text("competency"),
            experience: text("experience"),
            business_impact: text("business impact"),
            match_score: text("match_score").parse().unwrap_or(0.0),
        }
    }
}

fn format_score(score: f64) -> String {
    format!("{}", round_score(score))
}

pub fn write_workbook(records: &[PersonRecord], path: &Path) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name(SHEET_NAME)
        .context("unable to configure the results worksheet")?;

    let header_format = Format::new().set_bold();
    let mut widths: Vec<usize> = COLUMNS.iter().map(|c| c.chars().count()).collect();

    for (col_index, header) in COLUMNS.iter().enumerate() {
        sheet
            .write_string_with_format(0, col_index as u16, *header, &header_format)
            .context("unable to write the results header")?;
    }

    for (row_index, record) in records.iter().enumerate() {
        let row = (row_index + 1) as u32;
        for (col_index, value) in record.cells().iter().enumerate() {
            let col = col_index as u16;
            let written = if COLUMNS[col_index] == "match_score" {
                sheet.write_number(row, col, record.match_score)
            } else {
                sheet.write_string(row, col, value)
            };
            written.context("unable to write a results row")?;

            let longest_line = value.lines().map(|l| l.chars().count()).max().unwrap_or(0);
            widths[col_index] = widths[col_index].max(longest_line);
        }
    }

    for (col_index, width) in widths.iter().enumerate() {
        let width = (width + 2).min(MAX_COLUMN_WIDTH);
        sheet
            .set_column_width(col_index as u16, width as f64)
            .context("unable to size a results column")?;
    }

    workbook
        .save(path)
        .with_context(|| format!("unable to save the workbook {}", path.display()))?;
    Ok(())
}

pub fn write_csv(records: &[PersonRecord], path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("unable to create {}", path.display()))?;
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.write_record(record.cells())?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a results table, lower-casing headers and filling any missing
/// schema column with empty text.
pub fn read_rows(path: &Path) -> anyhow::Result<Vec<ResultRow>> {
    let table = read_table(path)?;
    let headers: Vec<String> = table
        .headers
        .iter()
        .map(|header| header.trim().to_lowercase())
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|values| {
            let mut row = ResultRow::new();
            for (header, value) in headers.iter().zip(values) {
                if !header.is_empty() {
                    row.entry(header.clone()).or_insert_with(|| value.clone());
                }
            }
            for column in COLUMNS {
                row.entry(column.to_string()).or_default();
            }
            row
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, score: f64) -> PersonRecord {
        PersonRecord {
            name: name.to_string(),
            match_score: score,
            ..PersonRecord::default()
        }
    }

    #[test]
    fn missing_sources_still_produce_every_column() {
        let person = MatchedPerson {
            key: "NO_NIK_John Smith".to_string(),
            identifier: None,
            canonical_name: "John Smith".to_string(),
            cv_file: None,
            assessment_file: None,
            match_score: 0.0,
        };

        let row = assemble(&person, SynthesizedFields::default()).to_row();
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        let mut expected = COLUMNS.to_vec();
        expected.sort();
        assert_eq!(keys, expected);
        assert_eq!(row["nik"], "");
        assert_eq!(row["nama"], "John Smith");
        assert_eq!(row["match_score"], "0");
    }

    #[test]
    fn sorts_by_score_then_name() {
        let mut records = vec![
            record("Zed", 0.8),
            record("Budi", 0.0),
            record("Ani", 0.8),
            record("Citra", 1.0),
            record("Ani", 0.0),
        ];
        sort_records(&mut records);

        let order: Vec<(&str, f64)> = records
            .iter()
            .map(|r| (r.name.as_str(), r.match_score))
            .collect();
        assert_eq!(
            order,
            vec![("Citra", 1.0), ("Ani", 0.8), ("Zed", 0.8), ("Ani", 0.0), ("Budi", 0.0)]
        );
    }

    #[test]
    fn scores_are_rounded_to_two_decimals() {
        let person = MatchedPerson {
            key: "1_Jane".to_string(),
            identifier: Some("1".to_string()),
            canonical_name: "Jane".to_string(),
            cv_file: None,
            assessment_file: None,
            match_score: 16.0 / 27.0,
        };
        assert_eq!(assemble(&person, SynthesizedFields::default()).match_score, 0.59);
    }

    #[test]
    fn csv_output_reads_back_with_the_same_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hasil.csv");
        let original = PersonRecord {
            identifier: "123456789".to_string(),
            name: "Jane Doe".to_string(),
            position: "Head of HR".to_string(),
            experience: "Direktur\nPT Contoh\n2021 – Saat ini".to_string(),
            match_score: 0.92,
            ..PersonRecord::default()
        };

        write_csv(&[original.clone()], &path).unwrap();
        let rows = read_rows(&path).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(PersonRecord::from_row(&rows[0]), original);
    }

    #[test]
    fn reading_accepts_aliases_and_fills_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.csv");
        std::fs::write(&path, "Name,Employee_ID,Position\nSiti Rahma,777,Manager\n").unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows[0]["education"], "");

        let record = PersonRecord::from_row(&rows[0]);
        assert_eq!(record.name, "Siti Rahma");
        assert_eq!(record.identifier, "777");
        assert_eq!(record.position, "Manager");
        assert_eq!(record.match_score, 0.0);
    }

    #[test]
    fn workbook_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hasil_analisis.xlsx");
        write_workbook(&[record("Jane Doe", 0.9)], &path).unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["nama"], "Jane Doe");
        assert_eq!(rows[0]["match_score"], "0.9");
    }
}
