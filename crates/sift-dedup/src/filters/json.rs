//! JSON-Lines codec stages.

use crate::document::Document;
use crate::pipeline::{Filter, FilterError, Result};
use serde_json::Value;
use tracing::debug;

/// Default name of the metadata object when metadata is nested.
pub const DEFAULT_METADATA_ROOT: &str = "metadata";

/// Parses a raw JSON line into document text and metadata.
///
/// With `ignore_errors` set, malformed lines reject the document instead of
/// failing the run.
#[derive(Clone, Debug)]
pub struct JsonLoader {
    key: String,
    metadata_keys: Vec<String>,
    metadata_root: Option<String>,
    ignore_errors: bool,
}

impl JsonLoader {
    /// Loader reading text from `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            metadata_keys: Vec::new(),
            metadata_root: None,
            ignore_errors: false,
        }
    }

    /// Copy these fields into [`Document::metadata`].
    #[must_use]
    pub fn with_metadata_keys(mut self, keys: Vec<String>) -> Self {
        self.metadata_keys = keys;
        self
    }

    /// Read metadata keys from this nested object instead of the top level.
    #[must_use]
    pub fn with_metadata_root(mut self, root: Option<String>) -> Self {
        self.metadata_root = root;
        self
    }

    #[must_use]
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    fn load(&self, doc: &mut Document) -> Result<()> {
        let line = doc.line_number().unwrap_or(0);
        let json: Value = serde_json::from_str(&doc.text).map_err(|e| FilterError::Parse {
            line,
            message: e.to_string(),
        })?;

        let missing = |field: &str| FilterError::MissingField {
            field: field.to_string(),
            line,
        };

        let text = match json.get(&self.key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None | Some(Value::Array(_)) | Some(Value::Object(_)) => {
                return Err(missing(self.key.as_str()))
            }
            Some(other) => other.to_string(),
        };

        let source = match &self.metadata_root {
            Some(root) => json.get(root).ok_or_else(|| missing(root.as_str()))?,
            None => &json,
        };
        for key in &self.metadata_keys {
            let value = source.get(key).ok_or_else(|| missing(key.as_str()))?;
            doc.metadata.insert(key.clone(), value.clone());
        }

        doc.text = text;
        Ok(())
    }
}

impl Filter for JsonLoader {
    fn name(&self) -> &str {
        "json_loader"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        match self.load(doc) {
            Ok(()) => Ok(()),
            Err(e) if self.ignore_errors => {
                debug!(error = %e, "Rejecting malformed record");
                doc.reject();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Re-wraps surviving documents as `{"text": ...}`.
#[derive(Clone, Debug, Default)]
pub struct JsonDumper;

impl JsonDumper {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Filter for JsonDumper {
    fn name(&self) -> &str {
        "json_dumper"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() {
            return Ok(());
        }
        doc.text = serde_json::json!({ "text": doc.text }).to_string();
        Ok(())
    }
}
