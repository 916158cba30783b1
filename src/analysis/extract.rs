// Document text extraction
// Never fails: anything unreadable comes back as an empty string.

use std::path::Path;

use tracing::{debug, warn};

pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, input_reference: &str) -> String;
}

/// Reads uploaded documents from the local filesystem.
///
/// PDFs are parsed page by page with `lopdf`; anything else, or a PDF that
/// fails to parse, is decoded as lossy UTF-8.
#[derive(Debug, Clone, Default)]
pub struct FileTextExtractor;

impl FileTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for FileTextExtractor {
    fn extract_text(&self, input_reference: &str) -> String {
        let path = Path::new(input_reference);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Document is not readable");
                return String::new();
            }
        };

        if let Some(text) = pdf_text(&bytes) {
            debug!(path = %path.display(), "Extracted text from PDF");
            return text;
        }

        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Text of every page, lines trimmed, blank lines dropped, pages separated by
/// a blank line. `None` when the bytes are not a parseable PDF.
fn pdf_text(bytes: &[u8]) -> Option<String> {
    let doc = lopdf::Document::load_mem(bytes).ok()?;

    let pages: Vec<String> = doc
        .get_pages()
        .keys()
        .map(|page_num| {
            let raw = doc.extract_text(&[*page_num]).unwrap_or_default();
            normalize_lines(&raw)
        })
        .collect();

    Some(pages.join("\n\n"))
}

fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_is_empty() {
        let extractor = FileTextExtractor::new();
        assert_eq!(extractor.extract_text("/definitely/not/here.pdf"), "");
    }

    #[test]
    fn test_plain_text_fallback() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Quarterly revenue: 10M\nNet income: 2M").unwrap();

        let text = FileTextExtractor::new().extract_text(file.path().to_str().unwrap());
        assert!(text.contains("Quarterly revenue"));
        assert!(text.contains("Net income"));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x41, 0xff, 0x42]).unwrap();

        let text = FileTextExtractor::new().extract_text(file.path().to_str().unwrap());
        assert!(text.starts_with('A'));
        assert!(text.ends_with('B'));
    }

    #[test]
    fn test_normalize_lines() {
        assert_eq!(normalize_lines("  a  \n\n   \n b\n"), "a\nb");
    }
}
