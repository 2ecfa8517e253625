//! The unit of work flowing through a pipeline.

use crate::signature::Signature;
use serde_json::{Map, Value};

/// A document being filtered.
///
/// `text` starts out as the raw input line and is rewritten by the stages
/// of a [`Compose`](crate::pipeline::Compose). Rejection is one-way: there is
/// no API that clears it.
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// Current payload.
    pub text: String,
    /// Fields lifted from the source record by the loader.
    pub metadata: Map<String, Value>,
    rejected: bool,
    signature: Signature,
    line_number: Option<usize>,
}

impl Document {
    /// Create a new document.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Create a document from an input line, remembering its 1-based line number.
    #[must_use]
    pub fn from_line(line: impl Into<String>, line_number: usize) -> Self {
        Self {
            text: line.into(),
            line_number: Some(line_number),
            ..Self::default()
        }
    }

    /// Whether some stage has rejected this document.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Mark the document rejected. Idempotent.
    pub fn reject(&mut self) {
        self.rejected = true;
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Attach a signature.
    ///
    /// Signatures are write-once: returns `false` and leaves the existing
    /// signature untouched if one is already set.
    pub fn set_signature(&mut self, signature: Signature) -> bool {
        if !self.signature.is_empty() {
            return false;
        }
        self.signature = signature;
        true
    }

    /// Line number in the source file, if known.
    #[must_use]
    pub fn line_number(&self) -> Option<usize> {
        self.line_number
    }
}
