//! Reading documents from disk and extracting plain text.

use crate::types::{DocumentMetadata, DocumentType};
use lumen_core::{AppError, AppResult};
use std::path::Path;

/// A file read from disk, ready for ingestion.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Read `path`, detect its type and strip markup.
///
/// Markdown and HTML are reduced to text; everything else is kept verbatim.
/// Files of unknown type that look binary are rejected.
pub async fn read_document(path: &Path) -> AppResult<ParsedDocument> {
    let document_type = DocumentType::from_path(path);
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Validation(format!("Failed to read {:?} as UTF-8 text: {}", path, e))
    })?;

    let content = extract_text(document_type, &raw)
        .ok_or_else(|| AppError::Validation(format!("{:?} looks like a binary file", path)))?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    Ok(ParsedDocument {
        content,
        metadata: DocumentMetadata::new(title, path.display().to_string()).with_type(document_type),
    })
}

/// Text for a document of `document_type`, or `None` for binary content.
pub fn extract_text(document_type: DocumentType, raw: &str) -> Option<String> {
    match document_type {
        DocumentType::Markdown => Some(clean_markdown(raw)),
        DocumentType::Html => Some(clean_html(raw)),
        DocumentType::Unknown if !is_likely_text(raw) => None,
        _ => Some(raw.to_string()),
    }
}

fn clean_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut blank = false;

    for line in text.lines() {
        let trimmed = line.trim_start_matches('#').trim();

        if trimmed.starts_with("---") || trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            continue;
        }

        // Keep paragraph breaks; they are chunk boundaries.
        if trimmed.is_empty() {
            if !blank && !result.is_empty() {
                result.push('\n');
            }
            blank = true;
            continue;
        }

        blank = false;
        result.push_str(trimmed);
        result.push('\n');
    }

    result.trim().to_string()
}

fn clean_html(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    for (i, ch) in text.char_indices() {
        match ch {
            '<' => {
                in_tag = true;
                let rest = &lower[i..];
                if rest.starts_with("<script") {
                    in_script = true;
                } else if rest.starts_with("</script") {
                    in_script = false;
                } else if rest.starts_with("<style") {
                    in_style = true;
                } else if rest.starts_with("</style") {
                    in_style = false;
                }
            }
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag && !in_script && !in_style => result.push(ch),
            _ => {}
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_likely_text(text: &str) -> bool {
    let sample: Vec<char> = text.chars().take(1024).collect();
    if sample.is_empty() {
        return true;
    }
    let control = sample
        .iter()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        .count();
    control * 10 < sample.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_markdown_keeps_paragraphs() {
        let md = "# Title\n\nFirst para.\n\n```rust\nlet x = 1;\n```\n\n## Next\nSecond.";
        let cleaned = clean_markdown(md);
        assert!(cleaned.starts_with("Title\n\nFirst para."));
        assert!(cleaned.contains("Next\nSecond."));
        assert!(!cleaned.contains("```"));
    }

    #[test]
    fn test_clean_html_strips_tags_and_scripts() {
        let html = "<html><head><style>p{}</style><script>var x;</script></head>\
                    <body><p>Olá <b>mundo</b></p></body></html>";
        assert_eq!(clean_html(html), "Olá mundo");
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_likely_text("plain text\nwith lines"));
        assert!(!is_likely_text("\u{0}\u{1}\u{2}\u{3}abc"));
        assert!(extract_text(DocumentType::Unknown, "\u{0}\u{0}\u{0}").is_none());
        assert_eq!(extract_text(DocumentType::Csv, "a,b\n1,2").unwrap(), "a,b\n1,2");
    }

    #[tokio::test]
    async fn test_read_document_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        tokio::fs::write(&path, "# Guide\n\nHello.").await.unwrap();

        let doc = read_document(&path).await.unwrap();
        assert_eq!(doc.content, "Guide\n\nHello.");
        assert_eq!(doc.metadata.title, "guide.md");
        assert_eq!(doc.metadata.document_type, DocumentType::Markdown);
    }
}
