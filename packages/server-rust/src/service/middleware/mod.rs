//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`metrics`]: Request timing and counting via `tracing` and `metrics`
//! - [`pipeline`]: Composes all layers around the dispatcher

pub mod metrics;
pub mod pipeline;

pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, run_pipeline, DispatchPipeline};
