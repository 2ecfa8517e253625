//! The pipeline's dedup stage.

use crate::document::Document;
use crate::pipeline::{Filter, FilterError, Result};
use crate::store::DedupBackend;
use std::sync::Arc;
use tracing::trace;

/// Rejects documents whose signature collides with earlier ones.
///
/// The whole decision is one [`DedupBackend::decide`] call, so concurrent
/// workers see each document's check and update as a single step. In online
/// mode each document is registered with the backend. In every mode a
/// document with a blacklisted component is rejected, so a blacklist loaded
/// from an earlier run filters new input even with `online = false`.
#[derive(Clone)]
pub struct LshDeduplicator {
    backend: Arc<dyn DedupBackend>,
    online: bool,
}

impl LshDeduplicator {
    /// Online deduplicator over `backend`.
    pub fn new(backend: Arc<dyn DedupBackend>) -> Self {
        Self {
            backend,
            online: true,
        }
    }

    #[must_use]
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }
}

impl std::fmt::Debug for LshDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LshDeduplicator")
            .field("online", &self.online)
            .finish_non_exhaustive()
    }
}

impl Filter for LshDeduplicator {
    fn name(&self) -> &str {
        "lsh_dedup"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() {
            return Ok(());
        }
        let signature = doc.signature();
        if signature.is_empty() {
            return Err(FilterError::MissingSignature {
                stage: self.name().to_string(),
                line: doc.line_number().unwrap_or(0),
            });
        }

        if self.backend.decide(signature, self.online)? {
            trace!(line = ?doc.line_number(), "Rejected near-duplicate");
            doc.reject();
        }
        Ok(())
    }
}
