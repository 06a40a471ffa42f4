//! Pipeline stages, element handles, and metrics.

mod handle;
mod metrics;
mod stages;
mod transform;


pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use stages::{Pipeline, PipelineBuilder};
