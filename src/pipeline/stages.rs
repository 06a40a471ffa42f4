//! Barrier-synchronized fan-out/fan-in stages.
//!
//! A chain is built one stage at a time:
//!
//! ```text
//!   inputs ──▶ stage 0 ──┤barrier├──▶ stage 1 ──┤barrier├──▶ ... ──┤collect├──▶ Vec<Out>
//!              (N tasks)              (N tasks)
//! ```
//!
//! Every element of a stage is its own Tokio task, spawned without waiting on
//! any sibling. A stage only starts once every task of the previous stage has
//! finished, and slot `i` of each stage is always fed by slot `i` of the one
//! before it, so output order matches input order no matter which task
//! finishes first.
//!
//! Failures follow the chain's [`ErrorPolicy`], fixed when the chain starts:
//! - `FailFast`: the lowest-index failure at a barrier aborts the chain and no
//!   later stage is scheduled.
//! - `CarryForward`: failed slots skip later stages and the lowest-index
//!   failure is reported by [`Pipeline::collect`].

use crate::config::PipelineConfig;
use crate::error::{ErrorPolicy, PipelineError};
use crate::pipeline::handle::{barrier, ElementHandle, ElementTimer};
use crate::pipeline::transform::{blocking, infallible_async, try_async, try_blocking, StageFn};
use crate::pipeline::Metrics;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Options shared by every stage of one chain.
#[derive(Debug, Clone, Default)]
struct ChainOptions {
    max_concurrency: Option<usize>,
    error_policy: ErrorPolicy,
    metrics: Option<Arc<Metrics>>,
}

/// Builder for pipeline chains with non-default options.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    options: ChainOptions,
}

impl PipelineBuilder {
    /// Create a builder with unbounded fan-out and fail-fast error handling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from loaded configuration.
    ///
    /// Metrics are not attached here; pass a shared instance with
    /// [`PipelineBuilder::metrics`] so the caller can read them afterwards.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            options: ChainOptions {
                max_concurrency: config.max_concurrency,
                error_policy: config.error_policy,
                metrics: None,
            },
        }
    }

    /// Cap the number of transforms running at once within each stage.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.options.max_concurrency = Some(limit);
        self
    }

    /// Set the failure handling applied at every barrier.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.options.error_policy = policy;
        self
    }

    /// Record element and barrier activity into `metrics`.
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.options.metrics = Some(metrics);
        self
    }

    /// Run a blocking `transform` on every input concurrently.
    pub fn start<In, Out, I, F>(self, inputs: I, transform: F) -> Pipeline<In, Out>
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Out + Send + Sync + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.seed(inputs, blocking(transform))
    }

    /// Run a fallible blocking `transform` on every input concurrently.
    pub fn try_start<In, Out, E, I, F>(self, inputs: I, transform: F) -> Pipeline<In, Out>
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Result<Out, E> + Send + Sync + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.seed(inputs, try_blocking(transform))
    }

    /// Run an async `transform` on every input concurrently.
    pub fn start_async<In, Out, I, F, Fut>(self, inputs: I, transform: F) -> Pipeline<In, Out>
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Out> + Send + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.seed(inputs, infallible_async(transform))
    }

    /// Run a fallible async `transform` on every input concurrently.
    pub fn try_start_async<In, Out, E, I, F, Fut>(
        self,
        inputs: I,
        transform: F,
    ) -> Pipeline<In, Out>
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.seed(inputs, try_async(transform))
    }

    fn seed<In, Out, I>(self, inputs: I, transform: StageFn<In, Out>) -> Pipeline<In, Out>
    where
        I: IntoIterator<Item = In>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let options = Arc::new(self.options);
        let inputs: Vec<In> = inputs.into_iter().collect();
        let len = inputs.len();

        if options.max_concurrency == Some(0) {
            return Pipeline::halted(
                len,
                0,
                options,
                PipelineError::InvalidConfig("max_concurrency must be > 0".to_string()),
            );
        }

        tracing::debug!(
            "Starting pipeline: {} elements, policy {}, concurrency {}",
            len,
            options.error_policy,
            options
                .max_concurrency
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );

        let handles = fan_out(inputs.into_iter().map(Ok), 0, &options, transform);
        Pipeline {
            handles,
            len,
            stage: 0,
            options,
            halted: None,
            _input: PhantomData,
        }
    }
}

/// A chain of concurrent per-element stages.
///
/// `In` is the element type the current stage consumed and `Out` the type it
/// produces. Each call to a `next*` method consumes the pipeline, waits for the
/// current stage to finish, and returns a new pipeline for the following stage.
///
/// Must be created inside a Tokio runtime.
///
/// ```no_run
/// use parallel_pipeline::Pipeline;
///
/// # async fn run() -> Result<(), parallel_pipeline::PipelineError> {
/// let results = Pipeline::start(vec![1, 2, 3], |x| x + 1)
///     .next(|x| x * 2)
///     .await
///     .collect()
///     .await?;
/// assert_eq!(results, vec![4, 6, 8]);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<In, Out> {
    handles: Vec<ElementHandle<Out>>,
    len: usize,
    stage: usize,
    options: Arc<ChainOptions>,
    halted: Option<PipelineError>,
    _input: PhantomData<fn(In)>,
}

impl<In, Out> Pipeline<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Run a blocking `transform` on every input concurrently with default options.
    pub fn start<I, F>(inputs: I, transform: F) -> Self
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Out + Send + Sync + 'static,
    {
        PipelineBuilder::new().start(inputs, transform)
    }

    /// Run a fallible blocking `transform` on every input concurrently with default options.
    pub fn try_start<E, I, F>(inputs: I, transform: F) -> Self
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Result<Out, E> + Send + Sync + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        PipelineBuilder::new().try_start(inputs, transform)
    }

    /// Run an async `transform` on every input concurrently with default options.
    pub fn start_async<I, F, Fut>(inputs: I, transform: F) -> Self
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Out> + Send + 'static,
    {
        PipelineBuilder::new().start_async(inputs, transform)
    }

    /// Run a fallible async `transform` on every input concurrently with default options.
    pub fn try_start_async<E, I, F, Fut>(inputs: I, transform: F) -> Self
    where
        I: IntoIterator<Item = In>,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        PipelineBuilder::new().try_start_async(inputs, transform)
    }
}

impl<In, Out> Pipeline<In, Out>
where
    Out: Send + 'static,
{
    /// Wait for the current stage, then run a blocking `transform` on each result.
    pub async fn next<Next, F>(self, transform: F) -> Pipeline<Out, Next>
    where
        F: Fn(Out) -> Next + Send + Sync + 'static,
        Next: Send + 'static,
    {
        self.then(blocking(transform)).await
    }

    /// Wait for the current stage, then run a fallible blocking `transform` on each result.
    pub async fn try_next<Next, E, F>(self, transform: F) -> Pipeline<Out, Next>
    where
        F: Fn(Out) -> Result<Next, E> + Send + Sync + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        Next: Send + 'static,
    {
        self.then(try_blocking(transform)).await
    }

    /// Wait for the current stage, then run an async `transform` on each result.
    pub async fn next_async<Next, F, Fut>(self, transform: F) -> Pipeline<Out, Next>
    where
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Next> + Send + 'static,
        Next: Send + 'static,
    {
        self.then(infallible_async(transform)).await
    }

    /// Wait for the current stage, then run a fallible async `transform` on each result.
    pub async fn try_next_async<Next, E, F, Fut>(self, transform: F) -> Pipeline<Out, Next>
    where
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Next, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
        Next: Send + 'static,
    {
        self.then(try_async(transform)).await
    }

    /// Wait for the last stage and return its values in input order.
    pub async fn collect(self) -> Result<Vec<Out>, PipelineError> {
        let Pipeline {
            handles,
            stage,
            options,
            halted,
            ..
        } = self;

        if let Some(error) = halted {
            return Err(error);
        }

        let results = barrier(handles, stage, options.metrics.as_ref()).await;
        match results.into_iter().collect::<Result<Vec<Out>, _>>() {
            Ok(values) => Ok(values),
            Err(cause) => match options.error_policy {
                ErrorPolicy::FailFast => Err(abort(stage, cause, &options)),
                ErrorPolicy::CarryForward => Err(cause),
            },
        }
    }

    async fn then<Next>(self, transform: StageFn<Out, Next>) -> Pipeline<Out, Next>
    where
        Next: Send + 'static,
    {
        let Pipeline {
            handles,
            len,
            stage,
            options,
            halted,
            ..
        } = self;
        let next_stage = stage + 1;

        if let Some(error) = halted {
            return Pipeline::halted(len, next_stage, options, error);
        }

        let results = barrier(handles, stage, options.metrics.as_ref()).await;

        let handles = match options.error_policy {
            ErrorPolicy::FailFast => match results.into_iter().collect::<Result<Vec<Out>, _>>() {
                Ok(values) => fan_out(values.into_iter().map(Ok), next_stage, &options, transform),
                Err(cause) => {
                    let error = abort(stage, cause, &options);
                    return Pipeline::halted(len, next_stage, options, error);
                }
            },
            ErrorPolicy::CarryForward => fan_out(results.into_iter(), next_stage, &options, transform),
        };

        Pipeline {
            handles,
            len,
            stage: next_stage,
            options,
            halted: None,
            _input: PhantomData,
        }
    }
}

impl<In, Out> Pipeline<In, Out> {
    /// A pipeline that will only report `error`.
    fn halted(len: usize, stage: usize, options: Arc<ChainOptions>, error: PipelineError) -> Self {
        Self {
            handles: Vec::new(),
            len,
            stage,
            options,
            halted: Some(error),
            _input: PhantomData,
        }
    }

    /// Number of elements flowing through the chain.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chain was started with no inputs.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero-based index of the stage this pipeline's elements belong to.
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Failure handling applied by this chain.
    pub fn error_policy(&self) -> ErrorPolicy {
        self.options.error_policy
    }

    /// Whether an earlier barrier already stopped the chain.
    pub fn is_aborted(&self) -> bool {
        self.halted.is_some()
    }
}

impl<In, Out> fmt::Debug for Pipeline<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("len", &self.len)
            .field("stage", &self.stage)
            .field("error_policy", &self.options.error_policy)
            .field("max_concurrency", &self.options.max_concurrency)
            .field("halted", &self.halted)
            .finish()
    }
}

/// Spawn one task per slot. Failed slots are carried through untouched.
fn fan_out<T, U, I>(
    values: I,
    stage: usize,
    options: &ChainOptions,
    transform: StageFn<T, U>,
) -> Vec<ElementHandle<U>>
where
    I: Iterator<Item = Result<T, PipelineError>>,
    T: Send + 'static,
    U: Send + 'static,
{
    let limiter = options
        .max_concurrency
        .map(|n| Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS))));

    let handles: Vec<ElementHandle<U>> = values
        .enumerate()
        .map(|(index, value)| match value {
            Ok(value) => {
                let transform = Arc::clone(&transform);
                let limiter = limiter.clone();
                let metrics = options.metrics.clone();

                let task = tokio::spawn(run_element(transform, value, limiter, metrics));

                ElementHandle::Running { stage, index, task }
            }
            Err(error) => ElementHandle::Failed(error),
        })
        .collect();

    tracing::debug!("Stage {} fanned out {} elements", stage, handles.len());
    handles
}

/// Body of one element task: wait for a permit if capped, then transform.
async fn run_element<T, U>(
    transform: StageFn<T, U>,
    value: T,
    limiter: Option<Arc<Semaphore>>,
    metrics: Option<Arc<Metrics>>,
) -> anyhow::Result<U> {
    let _permit = match limiter {
        Some(limiter) => Some(limiter.acquire_owned().await?),
        None => None,
    };

    let mut timer = ElementTimer::start(metrics);
    let result = transform(value).await;
    if result.is_ok() {
        timer.succeeded();
    }
    result
}

/// Stop the chain on `cause`, seen at the barrier closing `stage`.
fn abort(stage: usize, cause: PipelineError, options: &ChainOptions) -> PipelineError {
    if let Some(metrics) = &options.metrics {
        metrics.add_chain_aborted();
    }
    tracing::info!("Pipeline aborted at stage {}: {}", stage, cause);
    PipelineError::ChainAborted {
        stage,
        cause: Box::new(cause),
    }
}
