use crate::chunking::normalize_whitespace;
use crate::extractor::PdfExtractor;
use crate::models::{Document, Page};
use crate::IngestError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<FileFailure>,
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn read_upload(path: &Path) -> Result<UploadedFile, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(UploadedFile {
        filename: filename.to_string(),
        bytes: fs::read(path)?,
    })
}

/// Reads every path; unreadable ones become failures instead of aborting the batch.
pub fn read_uploads(paths: &[PathBuf]) -> (Vec<UploadedFile>, Vec<FileFailure>) {
    let mut uploads = Vec::new();
    let mut failures = Vec::new();

    for path in paths {
        match read_upload(path) {
            Ok(upload) => uploads.push(upload),
            Err(error) => failures.push(FileFailure {
                filename: path.display().to_string(),
                reason: error.to_string(),
            }),
        }
    }

    (uploads, failures)
}

pub fn load_document(
    extractor: &dyn PdfExtractor,
    file: &UploadedFile,
) -> Result<Document, IngestError> {
    let pages = extractor
        .extract_pages(&file.filename, &file.bytes)?
        .into_iter()
        .map(|page| Page {
            page_number: page.number,
            raw_text: normalize_whitespace(&page.text),
        })
        .collect::<Vec<_>>();

    if pages.iter().all(|page| page.raw_text.is_empty()) {
        return Err(IngestError::NoText(file.filename.clone()));
    }

    Ok(Document {
        filename: file.filename.clone(),
        pages,
    })
}

/// Best-effort load: every file that fails is reported and left out.
pub fn load_documents(extractor: &dyn PdfExtractor, files: &[UploadedFile]) -> LoadReport {
    let mut report = LoadReport::default();

    for file in files {
        if report
            .documents
            .iter()
            .any(|document| document.filename == file.filename)
        {
            report.failures.push(FileFailure {
                filename: file.filename.clone(),
                reason: "duplicate filename in upload batch".to_string(),
            });
            continue;
        }

        match load_document(extractor, file) {
            Ok(document) => {
                debug!(file = %document.filename, pages = document.page_count(), "pdf loaded");
                report.documents.push(document);
            }
            Err(error) => {
                warn!(file = %file.filename, reason = %error, "skipped pdf");
                report.failures.push(FileFailure {
                    filename: file.filename.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    report
}
