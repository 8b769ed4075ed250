//! Extraction pipeline
//!
//! - [`Connector`] / [`Session`]: open a source and run queries against it
//! - [`build`]: turn a table's configuration and watermark into a [`Query`]
//! - [`Sink`] / [`SinkWriter`]: encode results and deliver them
//! - [`Pipeline`]: drive every configured table through extraction and
//!   report the outcome in a [`RunSummary`]

mod extract;
mod load;
mod pipeline;
pub(crate) mod query;
mod report;

pub use extract::{Connector, Session, execute};
pub use load::{Delivery, Sink, SinkWriter};
pub use pipeline::{
    DEFAULT_DELIVERY_TIMEOUT, DEFAULT_QUERY_TIMEOUT, Pipeline, PlannedQuery, TableState,
};
pub use query::{Boundary, Query, build, quote_ident};
pub use report::{RunSummary, Step, TableOutcome, TableReport};
