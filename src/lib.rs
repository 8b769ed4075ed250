//! Landing Zone
//!
//! Incremental, watermarked extraction of relational tables into an
//! object-storage landing zone

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod etl;
pub mod format;
pub mod source;
pub mod storage;
pub mod watermark;

// Re-exports for convenience
pub use config::{ExtractMethod, SourceConfig, TableConfig};
pub use error::{ErrorKind, ExtractError, Result};
pub use etl::{Pipeline, RunSummary};
pub use format::Format;
pub use storage::Landing;
pub use watermark::WatermarkStore;
