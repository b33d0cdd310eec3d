use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const PRESENTATIONS_DIR: &str = "presentations";

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|v| v.to_str())
        .is_some_and(|v| v.eq_ignore_ascii_case(wanted))
}

/// Unpacks the PDF entries of every `.zip` directly inside `input_dir` into
/// `dest_dir`, flattening folders. Returns the number of PDFs written.
pub fn extract_pdf_archives(input_dir: &Path, dest_dir: &Path) -> anyhow::Result<usize> {
    let mut archives: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("failed to read input folder {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_extension(path, "zip"))
        .collect();
    archives.sort();

    let mut extracted = 0;
    for archive_path in archives {
        match extract_one(&archive_path, dest_dir) {
            Ok(count) => {
                tracing::info!(archive = %archive_path.display(), pdfs = count, "archive expanded");
                extracted += count;
            }
            Err(err) => {
                tracing::warn!(archive = %archive_path.display(), "failed to expand archive: {err:#}");
            }
        }
    }

    Ok(extracted)
}

fn extract_one(archive_path: &Path, dest_dir: &Path) -> anyhow::Result<usize> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest_dir)?;

    let mut count = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        // enclosed_name rejects absolute paths and `..` components.
        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|path| path.file_name().map(|name| name.to_owned()))
        else {
            tracing::warn!(entry = entry.name(), "skipping unsafe archive entry");
            continue;
        };

        let target = dest_dir.join(&file_name);
        if !has_extension(&target, "pdf") || file_name.to_string_lossy().starts_with('.') {
            continue;
        }
        if target.exists() {
            tracing::warn!(file = %target.display(), "duplicate file name in archives, keeping the first");
            continue;
        }

        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)?;
        count += 1;
    }

    Ok(count)
}

/// Everything that goes into the downloadable results archive.
#[derive(Debug, Clone, Default)]
pub struct BundleContents {
    pub workbook: Option<PathBuf>,
    pub presentations: Vec<PathBuf>,
    pub text_dumps: Vec<PathBuf>,
    pub reports: Vec<PathBuf>,
}

/// Writes the bundle. A second file mapping to an entry name already in the
/// bundle is logged and left out.
pub fn write_bundle(bundle_path: &Path, contents: &BundleContents) -> anyhow::Result<()> {
    let file = File::create(bundle_path)
        .with_context(|| format!("failed to create {}", bundle_path.display()))?;
    let mut writer = BundleWriter {
        zip: ZipWriter::new(file),
        options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        entries: HashSet::new(),
    };

    let root_files = contents
        .workbook
        .iter()
        .chain(&contents.text_dumps)
        .chain(&contents.reports);
    for path in root_files {
        writer.add_file(path, "")?;
    }

    if !contents.presentations.is_empty() {
        writer
            .zip
            .add_directory(format!("{PRESENTATIONS_DIR}/"), writer.options)?;
        for path in &contents.presentations {
            writer.add_file(path, PRESENTATIONS_DIR)?;
        }
    }

    writer.zip.finish()?;
    Ok(())
}

struct BundleWriter {
    zip: ZipWriter<File>,
    options: SimpleFileOptions,
    entries: HashSet<String>,
}

impl BundleWriter {
    fn add_file(&mut self, path: &Path, folder: &str) -> anyhow::Result<()> {
        let name = path
            .file_name()
            .and_then(|v| v.to_str())
            .with_context(|| format!("invalid file name {}", path.display()))?;
        let entry_name = if folder.is_empty() {
            name.to_string()
        } else {
            format!("{folder}/{name}")
        };

        if !self.entries.insert(entry_name.clone()) {
            tracing::warn!(file = %path.display(), entry = %entry_name, "duplicate bundle entry skipped");
            return Ok(());
        }

        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        self.zip.start_file(entry_name, self.options)?;
        self.zip.write_all(&data)?;
        Ok(())
    }
}
