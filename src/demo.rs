//! Random-delay walkthrough of a multi-stage pipeline.
//!
//! Each stage sleeps a random interval per element and passes the value
//! through unchanged, so the log shows elements finishing out of order while
//! the collected result keeps input order.

use crate::config::PipelineConfig;
use crate::pipeline::{Metrics, PipelineBuilder};
use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Shape of the demo run.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Inputs are `1..=count`
    pub count: u64,

    /// Number of stages, including the first
    pub stages: usize,

    /// Lower bound of the per-element sleep
    pub min_delay_ms: u64,

    /// Upper bound of the per-element sleep
    pub max_delay_ms: u64,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            count: 10,
            stages: 3,
            min_delay_ms: 1000,
            max_delay_ms: 2000,
        }
    }
}

impl DemoOptions {
    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.stages == 0 {
            anyhow::bail!("Demo needs at least one stage");
        }
        if self.min_delay_ms > self.max_delay_ms {
            anyhow::bail!(
                "min_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.min_delay_ms,
                self.max_delay_ms
            );
        }
        Ok(())
    }
}

/// Block the current thread for a random duration in `[min_ms, max_ms]`.
pub fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    let ms = if min_ms >= max_ms {
        min_ms
    } else {
        rand::rng().random_range(min_ms..=max_ms)
    };
    let delay = Duration::from_millis(ms);
    std::thread::sleep(delay);
    delay
}

/// Run the demo chain and return the collected values.
pub async fn run_demo(
    config: &PipelineConfig,
    options: &DemoOptions,
    metrics: Option<Arc<Metrics>>,
) -> Result<Vec<u64>> {
    options.validate()?;

    let mut builder = PipelineBuilder::from_config(config);
    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }

    let (min, max) = (options.min_delay_ms, options.max_delay_ms);
    let inputs: Vec<u64> = (1..=options.count).collect();

    let mut pipeline = builder.start(inputs, move |x| step(x, 0, min, max));
    for n in 1..options.stages {
        pipeline = pipeline.next(move |x| step(x, n, min, max)).await;
    }

    Ok(pipeline.collect().await?)
}

fn step(x: u64, n: usize, min_ms: u64, max_ms: u64) -> u64 {
    random_delay(min_ms, max_ms);
    tracing::info!("{} did step {}...", x, n);
    x
}
