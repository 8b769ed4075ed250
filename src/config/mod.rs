//! Run configuration
//!
//! Sources and their tables come from YAML sources files. Backend locations
//! and credentials come from the environment (see `cli`).

mod sources;

pub use sources::{
    ExtractMethod, SourceConfig, SourcesFile, TableConfig, expand_env, load_sources,
    validate_sources,
};
