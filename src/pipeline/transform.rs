//! Adapters turning caller closures into the single stage function shape.
//!
//! Every stage runs a [`StageFn`]: an async, fallible function from one element
//! to the next. Synchronous closures are moved onto Tokio's blocking pool so a
//! blocking transform never occupies an async worker.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

/// Shared per-element transform used by every task of a stage.
pub(crate) type StageFn<T, U> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<U>> + Send + Sync>;

/// Wrap a fallible async closure.
pub(crate) fn try_async<T, U, E, F, Fut>(f: F) -> StageFn<T, U>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
    T: 'static,
    U: 'static,
{
    Arc::new(move |value: T| -> BoxFuture<'static, anyhow::Result<U>> {
        let fut = f(value);
        async move { fut.await.map_err(Into::into) }.boxed()
    })
}

/// Wrap an infallible async closure.
pub(crate) fn infallible_async<T, U, F, Fut>(f: F) -> StageFn<T, U>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
    T: 'static,
    U: 'static,
{
    Arc::new(move |value: T| -> BoxFuture<'static, anyhow::Result<U>> {
        let fut = f(value);
        async move { Ok(fut.await) }.boxed()
    })
}

/// Wrap a fallible blocking closure; it runs under `spawn_blocking`.
pub(crate) fn try_blocking<T, U, E, F>(f: F) -> StageFn<T, U>
where
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    E: Into<anyhow::Error> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |value: T| -> BoxFuture<'static, anyhow::Result<U>> {
        let f = Arc::clone(&f);
        async move {
            match tokio::task::spawn_blocking(move || f(value)).await {
                Ok(result) => result.map_err(Into::into),
                // Re-raise so the element task itself reports the panic.
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(anyhow::anyhow!("Blocking transform cancelled: {}", e)),
            }
        }
        .boxed()
    })
}

/// Wrap an infallible blocking closure; it runs under `spawn_blocking`.
pub(crate) fn blocking<T, U, F>(f: F) -> StageFn<T, U>
where
    F: Fn(T) -> U + Send + Sync + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    try_blocking(move |value| Ok::<U, anyhow::Error>(f(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocking_runs_closure() {
        let double = blocking(|x: u32| x * 2);
        assert_eq!(double(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_try_blocking_propagates_error() {
        let parse = try_blocking(|s: String| s.parse::<i64>());
        assert_eq!(parse("17".to_string()).await.unwrap(), 17);
        assert!(parse("seventeen".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_async_adapters() {
        let inc = infallible_async(|x: i32| async move { x + 1 });
        assert_eq!(inc(1).await.unwrap(), 2);

        let checked = try_async(|x: i32| async move {
            if x < 0 {
                anyhow::bail!("negative input {}", x);
            }
            Ok(x)
        });
        assert_eq!(checked(3).await.unwrap(), 3);
        let err = checked(-1).await.unwrap_err();
        assert!(err.to_string().contains("negative input -1"));
    }
}
