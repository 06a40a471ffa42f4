//! Parallel Pipeline
//!
//! Multi-stage, data-parallel computations over Tokio tasks: every element of
//! the input is transformed concurrently, the stage waits for all of them, then
//! the results feed the next stage, and so on until the final stage is
//! collected in input order.
//!
//! # Architecture
//!
//! - **Pipeline**: Typed chain builder; each stage fans out one task per element
//!   and the next stage starts only after a barrier over all of them
//! - **Config**: Concurrency cap, error policy, runtime and metrics settings
//! - **Metrics**: Atomic counters for elements, barriers and timing
//! - **Demo**: Random-delay walkthrough used by the CLI
//!
//! # Usage
//!
//! ```no_run
//! use parallel_pipeline::{ErrorPolicy, PipelineBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let results = PipelineBuilder::new()
//!         .max_concurrency(64)
//!         .error_policy(ErrorPolicy::FailFast)
//!         .start(vec![1, 2, 3], |x| x + 1)
//!         .next(|x| x * 2)
//!         .await
//!         .collect()
//!         .await?;
//!     assert_eq!(results, vec![4, 6, 8]);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{BoxError, ErrorPolicy, PipelineError};
pub use pipeline::{Metrics, MetricsReporter, MetricsSnapshot, Pipeline, PipelineBuilder};

use anyhow::Result;

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_runtime_runs_pipeline() {
        let runtime = build_runtime(Some(2)).unwrap();
        let results = runtime
            .block_on(async {
                Pipeline::start(vec![1, 2, 3], |x: i32| x + 1)
                    .next(|x| x * 2)
                    .await
                    .collect()
                    .await
            })
            .unwrap();
        assert_eq!(results, vec![4, 6, 8]);
    }
}
