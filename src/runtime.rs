//! Component runtime — shared scaffolding for the bot's long-running tasks.
//!
//! A [`Component`] is any independently-runnable unit: the console channel,
//! the bot event loop, a future platform channel. Components capture their
//! shared state at construction time, then [`spawn_components`] runs each on
//! its own Tokio task. Any component error cancels the shared
//! [`CancellationToken`] so siblings shut down cooperatively; the returned
//! [`RuntimeHandle`] resolves when all components have exited.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture =
    Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit.
///
/// Implementors capture all shared state at construction time.
/// [`Component::run`] is called once and should run until `shutdown` is
/// cancelled or the component's own work is done.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its async run-loop as a boxed future.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// An opaque handle to the running task set. `.await` via [`join`] blocks
/// until every component has exited.
///
/// [`join`]: RuntimeHandle::join
pub struct RuntimeHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl RuntimeHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Transport(format!("runtime task panicked: {e}"))),
        }
    }
}

/// Spawn each [`Component`] as an independent Tokio task.
///
/// Behaviour on error:
/// - If any component returns `Err`, `shutdown` is cancelled so all siblings
///   receive the cancellation signal and stop cooperatively.
/// - The manager task then drains the remaining components and returns the
///   first error encountered.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> RuntimeHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let shutdown = shutdown.clone();
            debug!(component = %id, "spawning component");
            set.spawn(component.run(shutdown));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                // Component panicked.
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| {
                        AppError::Transport(format!("component panicked: {e}"))
                    });
                }
                // Component returned an error.
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                // Component exited cleanly.
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    RuntimeHandle { inner: handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Trivial {
        id: String,
        fail: bool,
    }

    impl Component for Trivial {
        fn id(&self) -> &str {
            &self.id
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                if self.fail {
                    Err(AppError::Transport("boom".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct WaitsForShutdown;

    impl Component for WaitsForShutdown {
        fn id(&self) -> &str {
            "waiter"
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn all_clean_components_join_ok() {
        let components: Vec<Box<dyn Component>> = vec![
            Box::new(Trivial { id: "a".into(), fail: false }),
            Box::new(Trivial { id: "b".into(), fail: false }),
        ];
        let handle = spawn_components(components, CancellationToken::new());
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test]
    async fn failing_component_cancels_siblings() {
        let shutdown = CancellationToken::new();
        let components: Vec<Box<dyn Component>> = vec![
            Box::new(WaitsForShutdown),
            Box::new(Trivial { id: "bad".into(), fail: true }),
        ];
        let handle = spawn_components(components, shutdown.clone());
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(shutdown.is_cancelled());
    }
}
