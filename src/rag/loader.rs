//! Text extraction for uploaded documents.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::engine::{decode_entities, strip_html_tags};
use crate::core::errors::ApiError;

/// A file handed over for ingestion.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes,
        }
    }

    /// Name the ingested source is recorded under.
    pub fn source_name(&self) -> String {
        self.filename.trim().to_string()
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type.filter(|ct| !ct.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Text,
    Html,
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn detect(filename: &str, content_type: Option<&str>) -> Option<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        if let Some(ext) = extension.as_deref() {
            match ext {
                "txt" | "md" | "markdown" | "csv" | "json" | "log" => return Some(Self::Text),
                "html" | "htm" => return Some(Self::Html),
                "pdf" => return Some(Self::Pdf),
                "docx" => return Some(Self::Docx),
                _ => {}
            }
        }

        let mime = content_type?
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "application/json" => Some(Self::Text),
            m if m.starts_with("text/") => Some(Self::Text),
            _ => None,
        }
    }
}

/// Extracts the plain text of an upload. Fails on unsupported formats and
/// on documents with no readable text.
pub fn load_document(upload: &DocumentUpload) -> Result<String, ApiError> {
    let format = DocumentFormat::detect(&upload.filename, upload.content_type.as_deref())
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Document type of '{}' not supported",
                upload.filename
            ))
        })?;

    let text = match format {
        DocumentFormat::Text => decode_text(&upload.bytes),
        DocumentFormat::Html => strip_html_tags(&decode_text(&upload.bytes)),
        DocumentFormat::Pdf => extract_pdf(&upload.bytes)?,
        DocumentFormat::Docx => extract_docx(&upload.bytes)?,
    };

    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "No text could be extracted from {}",
            upload.filename
        )));
    }

    tracing::debug!(
        filename = %upload.filename,
        format = ?format,
        chars = text.chars().count(),
        "Document text extracted"
    );
    Ok(text)
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ApiError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ApiError::BadRequest(format!("Failed to read PDF: {}", e)))
}

fn docx_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|</w:p>|<w:tab\s*/>|<w:br\s*/>|<w:cr\s*/>")
            .expect("static regex")
    })
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, ApiError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ApiError::BadRequest(format!("Failed to open DOCX: {}", e)))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ApiError::BadRequest(format!("DOCX has no document body: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| ApiError::BadRequest(format!("Failed to read DOCX: {}", e)))?;

    let mut text = String::new();
    for caps in docx_token_pattern().captures_iter(&xml) {
        if let Some(run) = caps.get(1) {
            text.push_str(&decode_entities(run.as_str()));
            continue;
        }
        match caps.get(0).map(|m| m.as_str()) {
            Some(tag) if tag.starts_with("<w:tab") => text.push('\t'),
            Some(_) => text.push('\n'),
            None => {}
        }
    }

    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer
            .start_file("word/document.xml", options)
            .expect("start file");
        writer
            .write_all(document_xml.as_bytes())
            .expect("write xml");
        writer.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn format_is_detected_by_extension_then_content_type() {
        assert_eq!(
            DocumentFormat::detect("notes.MD", None),
            Some(DocumentFormat::Text)
        );
        assert_eq!(
            DocumentFormat::detect("paper.pdf", Some("text/plain")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::detect("upload", Some("text/html; charset=utf-8")),
            Some(DocumentFormat::Html)
        );
        assert_eq!(DocumentFormat::detect("image.png", Some("image/png")), None);
    }

    #[test]
    fn text_upload_is_returned_without_bom() {
        let upload = DocumentUpload::new("a.txt", b"\xEF\xBB\xBFhello world".to_vec());
        assert_eq!(load_document(&upload).expect("load"), "hello world");
    }

    #[test]
    fn html_upload_is_stripped() {
        let upload = DocumentUpload::new(
            "page.html",
            b"<html><body><p>Alpha</p><p>Beta</p></body></html>".to_vec(),
        );
        assert_eq!(load_document(&upload).expect("load"), "Alpha\nBeta");
    }

    #[test]
    fn docx_paragraphs_and_runs_are_extracted() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Rust &amp; </w:t></w:r><w:r><w:t xml:space="preserve">retrieval</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second</w:t><w:tab/><w:t>line</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let upload = DocumentUpload::new("report.docx", docx_bytes(xml));

        assert_eq!(
            load_document(&upload).expect("load"),
            "Rust & retrieval\nSecond\tline"
        );
    }

    #[test]
    fn invalid_binary_documents_are_bad_requests() {
        let docx = DocumentUpload::new("broken.docx", b"not a zip".to_vec());
        assert!(matches!(load_document(&docx), Err(ApiError::BadRequest(_))));

        let pdf = DocumentUpload::new("broken.pdf", b"not a pdf".to_vec());
        assert!(matches!(load_document(&pdf), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn unsupported_and_empty_uploads_are_rejected() {
        let image = DocumentUpload::new("photo.png", vec![0x89, 0x50]);
        assert!(matches!(load_document(&image), Err(ApiError::BadRequest(_))));

        let empty = DocumentUpload::new("empty.txt", b"  \n ".to_vec());
        assert!(matches!(load_document(&empty), Err(ApiError::BadRequest(_))));
    }
}
