//! sift-dedup: JSON-Lines corpus filtering with online near-duplicate removal.
//!
//! Documents flow through a [`Compose`] of [`Filter`] stages: a JSON loader,
//! optional content filters, the [`LshSignatureGenerator`], the
//! [`LshDeduplicator`] and a JSON dumper. The deduplicator consults a
//! [`DedupBackend`], either a mutex-guarded [`SharedStore`] or a
//! [`StoreBroker`] thread, so several workers can share one `seen` set
//! without racing. The blacklist of colliding signature components is
//! persisted between runs.
//!
//! [`FileOrchestrator`] runs all of this over many files.
//!
//! ```rust
//! use sift_dedup::{
//!     Compose, JsonDumper, JsonLoader, LshDeduplicator, LshSignatureGenerator, SharedStore,
//! };
//! use std::sync::Arc;
//!
//! let store = SharedStore::default();
//! let pipeline = Compose::new(vec![
//!     Box::new(JsonLoader::new("text")),
//!     Box::new(LshSignatureGenerator::default()),
//!     Box::new(LshDeduplicator::new(Arc::new(store))),
//!     Box::new(JsonDumper::new()),
//! ]);
//!
//! let line = r#"{"text": "the same sentence, twice over"}"#;
//! assert!(pipeline.call(line, 1).unwrap().is_some());
//! assert!(pipeline.call(line, 2).unwrap().is_none());
//! ```

pub mod broker;
pub mod config;
pub mod dedup;
pub mod document;
pub mod filters;
pub mod io;
pub mod orchestrator;
pub mod parallel;
pub mod pipeline;
pub mod signature;
pub mod store;

pub use broker::{BrokerHandle, StoreBroker};
pub use config::{ConfigError, ContentFilterConfig, DedupMode, RunConfig, StoreBackendKind};
pub use dedup::LshDeduplicator;
pub use document::Document;
pub use filters::{
    DocumentLengthFilter, JsonDumper, JsonLoader, NgWordsFilter, QualityWarningsFilter,
    SpaceFilter,
};
pub use io::IoError;
pub use orchestrator::{Counts, FileOrchestrator, FileStats, RunError, RunSummary};
pub use parallel::{PoolError, WorkerPool};
pub use pipeline::{Compose, Filter, FilterError};
pub use signature::{LshSignatureGenerator, Signature, SignatureConfig};
pub use store::{
    DedupBackend, DedupStore, SharedStore, StoreConfig, StoreError, StoreSnapshot, StoreStats,
};
