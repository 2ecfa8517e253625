//! Composable document filters.
//!
//! A [`Filter`] is one single-purpose stage over a [`Document`]. A
//! [`Compose`] runs an ordered list of them against the same document.
//! Compose never skips stages itself: each filter is responsible for being a
//! no-op on documents that are already rejected.
//!
//! ```rust
//! use sift_dedup::filters::{JsonDumper, JsonLoader};
//! use sift_dedup::pipeline::Compose;
//!
//! let pipeline = Compose::new(vec![
//!     Box::new(JsonLoader::new("text")),
//!     Box::new(JsonDumper::new()),
//! ]);
//! let out = pipeline.call(r#"{"text": "hello", "id": 3}"#, 1).unwrap();
//! assert_eq!(out.as_deref(), Some(r#"{"text":"hello"}"#));
//! ```

use crate::document::Document;
use crate::store::StoreError;
use thiserror::Error;

/// Errors raised by filter stages.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Field '{field}' not found or not a scalar at line {line}")]
    MissingField { field: String, line: usize },

    /// A dedup stage ran before the signature stage.
    #[error("Document at line {line} reached '{stage}' without a signature; the signature stage must run first")]
    MissingSignature { stage: String, line: usize },

    #[error("Dedup store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for filter operations.
pub type Result<T> = std::result::Result<T, FilterError>;

/// A single pipeline stage.
///
/// Filters are shared between worker threads, so any state they own must be
/// internally synchronized.
pub trait Filter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Transform the document in place.
    ///
    /// Returning an error aborts processing of the whole input; recoverable
    /// per-document problems should reject the document instead.
    fn apply(&self, doc: &mut Document) -> Result<()>;
}

/// An ordered chain of filters.
pub struct Compose {
    filters: Vec<Box<dyn Filter>>,
}

impl Compose {
    #[must_use]
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Append a stage.
    #[must_use]
    pub fn then(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run every stage over `doc`, in order.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        for filter in &self.filters {
            filter.apply(doc)?;
        }
        Ok(())
    }

    /// Run one input line through the pipeline.
    pub fn run_line(&self, line: &str, line_number: usize) -> Result<Document> {
        let mut doc = Document::from_line(line, line_number);
        self.apply(&mut doc)?;
        Ok(doc)
    }

    /// Run one input line and return the serialized survivor.
    ///
    /// `None` is the drop sentinel for rejected documents.
    pub fn call(&self, line: &str, line_number: usize) -> Result<Option<String>> {
        let doc = self.run_line(line, line_number)?;
        Ok(if doc.is_rejected() {
            None
        } else {
            Some(doc.text)
        })
    }
}

impl Filter for Compose {
    fn name(&self) -> &str {
        "compose"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        Compose::apply(self, doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RejectAll;

    impl Filter for RejectAll {
        fn name(&self) -> &str {
            "reject_all"
        }

        fn apply(&self, doc: &mut Document) -> Result<()> {
            doc.reject();
            Ok(())
        }
    }

    struct Uppercase {
        calls: Arc<AtomicUsize>,
    }

    impl Filter for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn apply(&self, doc: &mut Document) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            doc.text = doc.text.to_uppercase();
            Ok(())
        }
    }

    struct Fail;

    impl Filter for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn apply(&self, doc: &mut Document) -> Result<()> {
            Err(FilterError::Parse {
                line: doc.line_number().unwrap_or(0),
                message: "boom".into(),
            })
        }
    }

    #[test]
    fn test_stages_run_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Compose::new(vec![]).then(Uppercase {
            calls: calls.clone(),
        });

        assert_eq!(pipeline.call("abc", 1).unwrap().as_deref(), Some("ABC"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stage_names(), vec!["uppercase"]);
    }

    #[test]
    fn test_compose_does_not_short_circuit() {
        // Later stages still see rejected documents; they decide what to do.
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Compose::new(vec![])
            .then(RejectAll)
            .then(Uppercase {
                calls: calls.clone(),
            });

        let doc = pipeline.run_line("abc", 1).unwrap();
        assert!(doc.is_rejected());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_yields_drop_sentinel() {
        let pipeline = Compose::new(vec![Box::new(RejectAll)]);
        assert_eq!(pipeline.call("abc", 1).unwrap(), None);
    }

    #[test]
    fn test_error_propagates_with_line() {
        let pipeline = Compose::new(vec![Box::new(Fail)]);
        match pipeline.call("abc", 12).unwrap_err() {
            FilterError::Parse { line, .. } => assert_eq!(line, 12),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_stage_unrejects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Compose::new(vec![])
            .then(RejectAll)
            .then(Uppercase { calls })
            .then(crate::filters::JsonDumper::new());

        let doc = pipeline.run_line("abc", 1).unwrap();
        assert!(doc.is_rejected());
    }
}
