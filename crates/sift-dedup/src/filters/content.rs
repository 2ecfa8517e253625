//! Single-purpose content filters.
//!
//! Each one inspects the current text or metadata and may reject the
//! document. None of them touch rejected documents.

use crate::document::Document;
use crate::pipeline::{Filter, FilterError, Result};
use serde_json::Value;
use std::path::Path;

/// Rejects documents whose length in characters is outside `[min, max]`.
#[derive(Clone, Debug)]
pub struct DocumentLengthFilter {
    min_chars: usize,
    max_chars: usize,
}

impl DocumentLengthFilter {
    #[must_use]
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
        }
    }
}

impl Filter for DocumentLengthFilter {
    fn name(&self) -> &str {
        "document_length"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() {
            return Ok(());
        }
        let len = doc.text.chars().count();
        if len < self.min_chars || len > self.max_chars {
            doc.reject();
        }
        Ok(())
    }
}

/// Rejects long texts padded with runs of spaces (typically layout debris).
#[derive(Clone, Debug)]
pub struct SpaceFilter {
    min_chars: usize,
    max_spaces: usize,
}

impl SpaceFilter {
    #[must_use]
    pub fn new(min_chars: usize, max_spaces: usize) -> Self {
        Self {
            min_chars,
            max_spaces,
        }
    }
}

impl Default for SpaceFilter {
    fn default() -> Self {
        Self::new(100, 20)
    }
}

impl Filter for SpaceFilter {
    fn name(&self) -> &str {
        "space"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() || doc.text.chars().count() <= self.min_chars {
            return Ok(());
        }
        let ascii = doc.text.matches(' ').count();
        let ideographic = doc.text.matches('\u{3000}').count();
        if ascii > self.max_spaces || ideographic > self.max_spaces {
            doc.reject();
        }
        Ok(())
    }
}

/// Rejects documents carrying any of the configured quality warnings.
///
/// Reads a list (or a single string) of tags from the metadata field `key`;
/// a document without the field passes.
#[derive(Clone, Debug)]
pub struct QualityWarningsFilter {
    key: String,
    rejected: Vec<String>,
}

impl QualityWarningsFilter {
    #[must_use]
    pub fn new(key: impl Into<String>, rejected: Vec<String>) -> Self {
        Self {
            key: key.into(),
            rejected,
        }
    }

    fn flagged(&self, value: &Value) -> bool {
        match value {
            Value::String(tag) => self.rejected.iter().any(|r| r == tag),
            Value::Array(tags) => tags.iter().any(|t| self.flagged(t)),
            _ => false,
        }
    }
}

impl Default for QualityWarningsFilter {
    fn default() -> Self {
        Self::new(
            "quality_warnings",
            vec!["header".into(), "footer".into(), "noisy".into()],
        )
    }
}

impl Filter for QualityWarningsFilter {
    fn name(&self) -> &str {
        "quality_warnings"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() {
            return Ok(());
        }
        if doc.metadata.get(&self.key).is_some_and(|v| self.flagged(v)) {
            doc.reject();
        }
        Ok(())
    }
}

/// Rejects documents containing any word from a block list.
#[derive(Clone, Debug, Default)]
pub struct NgWordsFilter {
    words: Vec<String>,
}

impl NgWordsFilter {
    #[must_use]
    pub fn new(words: Vec<String>) -> Self {
        let words = words.into_iter().filter(|w| !w.is_empty()).collect();
        Self { words }
    }

    /// Load a newline-delimited word list. Blank lines are ignored.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FilterError::InvalidConfig(format!("cannot read word list {}: {e}", path.display()))
        })?;
        Ok(Self::new(
            content.lines().map(|l| l.trim().to_string()).collect(),
        ))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Filter for NgWordsFilter {
    fn name(&self) -> &str {
        "ng_words"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() {
            return Ok(());
        }
        if self.words.iter().any(|w| doc.text.contains(w.as_str())) {
            doc.reject();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_length_filter_bounds() {
        let filter = DocumentLengthFilter::new(3, 5);

        let mut short = Document::new("ab");
        let mut ok = Document::new("日本語の");
        let mut long = Document::new("abcdef");
        filter.apply(&mut short).unwrap();
        filter.apply(&mut ok).unwrap();
        filter.apply(&mut long).unwrap();

        assert!(short.is_rejected());
        assert!(!ok.is_rejected());
        assert!(long.is_rejected());
    }

    #[test]
    fn test_space_filter() {
        let filter = SpaceFilter::new(10, 3);

        let mut spaced = Document::new("a b c d e f g h i j k");
        filter.apply(&mut spaced).unwrap();
        assert!(spaced.is_rejected());

        let mut wide = Document::new("あ\u{3000}い\u{3000}う\u{3000}え\u{3000}おかきくけこ");
        filter.apply(&mut wide).unwrap();
        assert!(wide.is_rejected());

        // Short texts are never judged.
        let mut short = Document::new("a b c d e");
        filter.apply(&mut short).unwrap();
        assert!(!short.is_rejected());
    }

    #[test]
    fn test_quality_warnings_filter() {
        let filter = QualityWarningsFilter::default();

        let mut noisy = Document::new("x");
        noisy
            .metadata
            .insert("quality_warnings".into(), serde_json::json!(["tiny", "noisy"]));
        filter.apply(&mut noisy).unwrap();
        assert!(noisy.is_rejected());

        let mut clean = Document::new("x");
        clean
            .metadata
            .insert("quality_warnings".into(), serde_json::json!(["tiny"]));
        filter.apply(&mut clean).unwrap();
        assert!(!clean.is_rejected());

        let mut missing = Document::new("x");
        filter.apply(&mut missing).unwrap();
        assert!(!missing.is_rejected());
    }

    #[test]
    fn test_ng_words_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "申し訳ありませんが\n\n作成中\n").unwrap();

        let filter = NgWordsFilter::from_file(file.path()).unwrap();
        assert_eq!(filter.len(), 2);

        let mut hit = Document::new("この記事は作成中です");
        filter.apply(&mut hit).unwrap();
        assert!(hit.is_rejected());

        let mut miss = Document::new("普通の文章");
        filter.apply(&mut miss).unwrap();
        assert!(!miss.is_rejected());
    }

    #[test]
    fn test_ng_words_missing_file() {
        let result = NgWordsFilter::from_file("/nonexistent/words.txt");
        assert!(matches!(result, Err(FilterError::InvalidConfig(_))));
    }
}
