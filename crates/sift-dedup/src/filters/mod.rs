//! Built-in pipeline stages other than signature generation and dedup.

mod content;
mod json;

pub use content::{DocumentLengthFilter, NgWordsFilter, QualityWarningsFilter, SpaceFilter};
pub use json::{JsonDumper, JsonLoader, DEFAULT_METADATA_ROOT};
