//! Text extraction for corpus and uploaded documents.
//!
//! Returns an ordered sequence of `(page, text)` pairs. PDFs are extracted
//! page by page so chunk provenance can carry page numbers; DOCX and plain
//! text have no page concept and yield a single pageless entry. Extraction
//! failures never panic; callers treat them as an empty page sequence.

use std::io::Read;
use std::path::Path;

/// One extracted page. `page` is `None` for formats without pages.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub page: Option<i64>,
    pub text: String,
}

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error. `UnsupportedExtension` is the one variant callers
/// branch on: uploads reject it with `false` rather than treating it as a
/// degraded extraction.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedExtension(String),
    Pdf(String),
    Docx(String),
    Io(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedExtension(ext) => {
                write!(f, "unsupported file extension: {}", ext)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
            ExtractError::Io(e) => write!(f, "read failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract a file's text as a page sequence, dispatching on extension.
///
/// Supported: `.pdf` (per-page), `.docx`, `.txt`, `.md` (single pageless
/// entry).
pub fn extract_file(path: &Path) -> Result<Vec<ExtractedPage>, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => {
            let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            extract_pdf(&bytes)
        }
        "docx" => {
            let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            extract_docx(&bytes)
        }
        "txt" | "md" => {
            let text =
                std::fs::read_to_string(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            Ok(vec![ExtractedPage { page: None, text }])
        }
        other => Err(ExtractError::UnsupportedExtension(other.to_string())),
    }
}

/// Per-page PDF extraction.
fn extract_pdf(bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _) in doc.get_pages() {
        // A single unreadable page degrades to empty text; the chunker
        // produces no chunks for it.
        let text = doc.extract_text(&[page_no]).unwrap_or_default();
        pages.push(ExtractedPage {
            page: Some(page_no as i64),
            text,
        });
    }

    Ok(pages)
}

/// DOCX extraction: read `word/document.xml` and concatenate `<w:t>` runs,
/// emitting a blank line at each paragraph (`<w:p>`) end so the chunker sees
/// paragraph boundaries.
fn extract_docx(bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    let text = extract_docx_paragraphs(&doc_xml)?;
    Ok(vec![ExtractedPage { page: None, text }])
}

fn extract_docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.is_empty() {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(document.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.xlsx");
        std::fs::write(&path, b"whatever").unwrap();
        let err = extract_file(&path).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedExtension(_)));
    }

    #[test]
    fn test_plain_text_is_single_pageless_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "First.\n\nSecond.").unwrap();
        let pages = extract_file(&path).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, None);
        assert_eq!(pages[0].text, "First.\n\nSecond.");
    }

    #[test]
    fn test_docx_paragraph_boundaries_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.docx");
        std::fs::write(&path, minimal_docx(&["Alpha line", "Beta line"])).unwrap();

        let pages = extract_file(&path).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, None);
        assert!(pages[0].text.contains("Alpha line\n\n"));
        assert!(pages[0].text.contains("Beta line"));
    }

    #[test]
    fn test_invalid_pdf_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = extract_file(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_docx_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = extract_file(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }
}
