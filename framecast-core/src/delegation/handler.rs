//! Completion handlers for delegated tasks.

use async_trait::async_trait;

use crate::task::{TaskId, TaskOutcome};

/// Receives the outcome of a delegated task, once.
///
/// The handler is consumed by the call, so it can never fire twice.
/// Closures taking `(TaskId, TaskOutcome)` implement this trait.
///
/// # Example
/// ```
/// use framecast_core::{CompletionHandler, TaskId, TaskOutcome};
///
/// let handler = |id: TaskId, outcome: TaskOutcome| match outcome {
///     Ok(value) => println!("{} finished: {}", id, value),
///     Err(e) => println!("{} did not finish: {}", id, e),
/// };
///
/// fn assert_handler(_: impl CompletionHandler) {}
/// assert_handler(handler);
/// ```
#[async_trait]
pub trait CompletionHandler: Send + 'static {
    /// Called when the task reaches a terminal state.
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome);
}

/// Blanket implementation for closures
#[async_trait]
impl<F> CompletionHandler for F
where
    F: FnOnce(TaskId, TaskOutcome) + Send + 'static,
{
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome) {
        (*self)(id, outcome)
    }
}

/// A handler that drops the outcome.
///
/// Useful when the caller only polls the task through the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreOutcome;

#[async_trait]
impl CompletionHandler for IgnoreOutcome {
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome) {
        if let Err(e) = outcome {
            log::debug!("task {} ended without a result: {}", id, e);
        }
    }
}

pub(crate) type BoxedCompletionHandler = Box<dyn CompletionHandler>;
