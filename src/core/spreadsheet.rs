use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context};
use calamine::{open_workbook_auto, DataType, Reader};

/// Header row plus data rows, every row padded to the header width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Lower-cased header label to its first column index.
    pub fn header_index_map(&self) -> HashMap<String, usize> {
        let mut map = HashMap::new();
        for (index, header) in self.headers.iter().enumerate() {
            let label = header.trim();
            let normalized = if label.is_empty() {
                format!("Column {}", index + 1)
            } else {
                label.to_string()
            };
            map.entry(normalized.to_lowercase()).or_insert(index);
        }
        map
    }
}

pub fn is_excel_path(path: &Path) -> bool {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();
    matches!(extension.as_str(), "xlsx" | "xlsm" | "xls" | "xlsb" | "ods")
}

/// Reads the first worksheet of a workbook, or a delimited text file.
pub fn read_table(path: &Path) -> anyhow::Result<Table> {
    let mut table = if is_excel_path(path) {
        read_workbook(path)?
    } else {
        read_delimited(path)?
    };
    align_row_lengths(&mut table.headers, &mut table.rows);
    Ok(table)
}

fn read_workbook(path: &Path) -> anyhow::Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("unable to open the spreadsheet {}", path.display()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("the workbook does not contain any worksheets"))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .ok_or_else(|| anyhow!("unable to read the worksheet named '{sheet_name}'"))?
        .with_context(|| format!("unable to read the worksheet data of '{sheet_name}'"))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = rows_iter
        .next()
        .ok_or_else(|| anyhow!("the worksheet is empty"))?
        .iter()
        .map(cell_to_string)
        .collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let values: Vec<String> = row.iter().map(cell_to_string).collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(values);
    }

    Ok(Table { headers, rows })
}

fn read_delimited(path: &Path) -> anyhow::Result<Table> {
    let delimiter = detect_delimiter(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("unable to open the spreadsheet {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("unable to read spreadsheet headers")?
        .iter()
        .map(|value| value.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("unable to read spreadsheet rows")?;
        let values: Vec<String> = record.iter().map(|value| value.trim().to_string()).collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(values);
    }

    Ok(Table { headers, rows })
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        _ => cell.to_string().trim().to_string(),
    }
}

fn align_row_lengths(headers: &mut Vec<String>, rows: &mut [Vec<String>]) {
    let column_count = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(headers.len()))
        .max()
        .unwrap_or(0);

    if headers.len() < column_count {
        headers.resize(column_count, String::new());
    }
    for row in rows.iter_mut() {
        row.resize(column_count, String::new());
    }
}

fn detect_delimiter(path: &Path) -> anyhow::Result<u8> {
    let file = File::open(path)
        .with_context(|| format!("unable to open the spreadsheet {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buffer = String::new();

    for _ in 0..5 {
        buffer.clear();
        let bytes_read = reader
            .read_line(&mut buffer)
            .context("unable to inspect the spreadsheet")?;
        if bytes_read == 0 {
            break;
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let counts = [
            (b'\t', buffer.matches('\t').count()),
            (b',', buffer.matches(',').count()),
            (b';', buffer.matches(';').count()),
        ];

        if let Some((delimiter, count)) = counts.iter().max_by_key(|(_, count)| *count) {
            if *count > 0 {
                return Ok(*delimiter);
            }
        }
    }

    Ok(b',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_semicolon_separated_files_and_pads_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.csv");
        std::fs::write(&path, "NIK;Level;Competency\n1;4;Planning\n2;3\n;;\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.headers, vec!["NIK", "Level", "Competency"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["2", "3", ""]);
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_first_wins() {
        let table = Table {
            headers: vec!["NIK".into(), "".into(), "nik".into()],
            rows: Vec::new(),
        };
        let map = table.header_index_map();
        assert_eq!(map.get("nik"), Some(&0));
        assert_eq!(map.get("column 2"), Some(&1));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_table(&dir.path().join("absent.csv")).is_err());
        assert!(read_table(&dir.path().join("absent.xlsx")).is_err());
    }
}
