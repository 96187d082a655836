//! Paragraph-boundary text chunker with sliding-window splitting.
//!
//! Splits extracted page text into [`Chunk`]s bounded by a configurable
//! character limit. Splitting occurs on blank-line paragraph boundaries to
//! preserve semantic coherence; paragraphs longer than the limit are further
//! split by a fixed-size window with overlap, so consecutive sub-chunks share
//! a span of text across the split boundary.
//!
//! Chunk ids are `"{page}-{n}"` with a per-page running counter. Pageless
//! sources (plain text, DOCX) use the whole-document paragraph index in place
//! of the page number and carry `page: None`.

use crate::extract::ExtractedPage;
use crate::models::Chunk;

/// Split a document's extracted pages into chunks.
///
/// A page with no non-whitespace paragraphs contributes zero chunks. Window
/// arithmetic is done on character boundaries, so multi-byte text never
/// splits inside a code point.
pub fn chunk_document(
    document_name: &str,
    pages: &[ExtractedPage],
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    // Whole-document paragraph counter for pageless sources.
    let mut para_index: i64 = 0;

    for page in pages {
        match page.page {
            Some(page_no) => {
                let mut counter = 0usize;
                for para in paragraphs(&page.text) {
                    for piece in split_windows(para, max_chars, overlap_chars) {
                        chunks.push(Chunk {
                            chunk_id: format!("{}-{}", page_no, counter),
                            text: piece,
                            document_name: document_name.to_string(),
                            page: Some(page_no),
                        });
                        counter += 1;
                    }
                }
            }
            None => {
                for para in paragraphs(&page.text) {
                    for (w, piece) in split_windows(para, max_chars, overlap_chars)
                        .into_iter()
                        .enumerate()
                    {
                        chunks.push(Chunk {
                            chunk_id: format!("{}-{}", para_index, w),
                            text: piece,
                            document_name: document_name.to_string(),
                            page: None,
                        });
                    }
                    para_index += 1;
                }
            }
        }
    }

    chunks
}

/// Non-empty trimmed paragraphs, split on blank lines.
fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// Split a paragraph into overlapping windows of at most `max_chars`
/// characters. A paragraph at or below the limit passes through untouched.
fn split_windows(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return vec![text.to_string()];
    }

    // Byte offset of each character, so windows slice on char boundaries.
    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let step = max_chars.saturating_sub(overlap_chars).max(1);

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_chars).min(char_count);
        let byte_start = offsets[start];
        let byte_end = if end == char_count {
            text.len()
        } else {
            offsets[end]
        };
        out.push(text[byte_start..byte_end].to_string());
        if end == char_count {
            break;
        }
        start += step;
    }

    out
}
