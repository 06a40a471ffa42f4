//! Per-element task handles and the positional barrier over them.

use crate::error::PipelineError;
use crate::pipeline::Metrics;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// One slot of a stage: either a spawned transform or a failure carried
/// forward from an earlier stage.
pub(crate) enum ElementHandle<T> {
    Running {
        stage: usize,
        index: usize,
        task: JoinHandle<anyhow::Result<T>>,
    },
    Failed(PipelineError),
}

impl<T> ElementHandle<T> {
    /// Wait for the element and classify its outcome.
    pub(crate) async fn join(self) -> Result<T, PipelineError> {
        match self {
            ElementHandle::Running { stage, index, task } => {
                let error = match task.await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => PipelineError::element_failed(stage, index, e),
                    Err(e) => PipelineError::from_join(stage, index, e),
                };
                tracing::warn!("Stage {} element {} failed: {}", stage, index, error);
                Err(error)
            }
            ElementHandle::Failed(error) => Err(error),
        }
    }
}

/// Suspend until every handle of `stage` has finished, returning outcomes in
/// input order regardless of completion order.
pub(crate) async fn barrier<T>(
    handles: Vec<ElementHandle<T>>,
    stage: usize,
    metrics: Option<&Arc<Metrics>>,
) -> Vec<Result<T, PipelineError>> {
    let started = Instant::now();
    let results = join_all(handles.into_iter().map(ElementHandle::join)).await;

    let waited = started.elapsed();
    if let Some(metrics) = metrics {
        metrics.add_stage_completed(waited);
    }
    tracing::debug!(
        "Stage {} barrier passed: {} elements in {:.3}s",
        stage,
        results.len(),
        waited.as_secs_f64()
    );

    results
}

/// Records one transform's lifetime in the metrics, including when the task
/// unwinds or is dropped mid-flight.
pub(crate) struct ElementTimer {
    metrics: Option<Arc<Metrics>>,
    started: Instant,
    success: bool,
}

impl ElementTimer {
    pub(crate) fn start(metrics: Option<Arc<Metrics>>) -> Self {
        if let Some(m) = &metrics {
            m.add_element_started();
        }
        Self {
            metrics,
            started: Instant::now(),
            success: false,
        }
    }

    pub(crate) fn succeeded(&mut self) {
        self.success = true;
    }
}

impl Drop for ElementTimer {
    fn drop(&mut self) {
        if let Some(m) = &self.metrics {
            m.add_element_finished(self.success, self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_barrier_keeps_positions() {
        let handles: Vec<ElementHandle<usize>> = (0..4)
            .map(|index| ElementHandle::Running {
                stage: 0,
                index,
                task: tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis((4 - index as u64) * 10)).await;
                    Ok(index)
                }),
            })
            .collect();

        let results = barrier(handles, 0, None).await;
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_join_classifies_outcomes() {
        let failed = ElementHandle::<u8>::Running {
            stage: 1,
            index: 2,
            task: tokio::spawn(async { Err(anyhow::anyhow!("nope")) }),
        };
        assert!(matches!(
            failed.join().await,
            Err(PipelineError::ElementFailed { stage: 1, index: 2, .. })
        ));

        let panicked = ElementHandle::<u8>::Running {
            stage: 0,
            index: 5,
            task: tokio::spawn(async {
                if true {
                    panic!("kaboom");
                }
                Ok(0u8)
            }),
        };
        match panicked.join().await {
            Err(PipelineError::ElementPanicked { index, message, .. }) => {
                assert_eq!(index, 5);
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }

        let cancelled_task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1u8)
        });
        cancelled_task.abort();
        let cancelled = ElementHandle::Running {
            stage: 3,
            index: 0,
            task: cancelled_task,
        };
        assert!(matches!(
            cancelled.join().await,
            Err(PipelineError::ElementCancelled { stage: 3, index: 0 })
        ));
    }

    #[tokio::test]
    async fn test_barrier_records_metrics() {
        let metrics = Metrics::new();
        let carried = ElementHandle::<u8>::Failed(PipelineError::ElementCancelled {
            stage: 0,
            index: 0,
        });

        let results = barrier(vec![carried], 1, Some(&metrics)).await;
        assert!(results[0].is_err());
        assert_eq!(metrics.snapshot().stages_completed, 1);
    }

    #[test]
    fn test_timer_counts_drop_as_failure() {
        let metrics = Metrics::new();
        {
            let _timer = ElementTimer::start(Some(metrics.clone()));
            assert_eq!(metrics.snapshot().in_flight, 1);
        }
        {
            let mut timer = ElementTimer::start(Some(metrics.clone()));
            timer.succeeded();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.elements_failed, 1);
        assert_eq!(snapshot.elements_succeeded, 1);
    }
}
