//! Background delegation of long-running work.
//!
//! [`DelegationManager::start`] registers a task, spawns a supervisor and
//! returns the task id without waiting. The supervisor polls the work itself,
//! racing it against its timeout and against cancellation. It applies the
//! terminal transition through the [`TaskRegistry`] and hands the outcome to
//! the completion handler exactly once.

mod handler;

pub use handler::{CompletionHandler, IgnoreOutcome};

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::frame::{Frame, ToolCall};
use crate::notify::CompletionNotifier;
use crate::stream::StreamMultiplexer;
use crate::task::{
    RegistryConfig, RegistryError, Task, TaskError, TaskId, TaskOutcome, TaskRegistry,
    TaskStatus, TaskTransition, Transition,
};
use handler::BoxedCompletionHandler;

/// Configuration for a [`DelegationManager`].
#[derive(Debug, Clone, Default)]
pub struct DelegationConfig {
    /// Timeout used when `start` is given `None`.
    pub default_timeout: Option<Duration>,
    pub registry: RegistryConfig,
}

impl DelegationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for delegations that do not specify one.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the retention policy of the underlying registry.
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

/// Handed to work started with [`DelegationManager::start_with`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the task is cancelled.
    ///
    /// Work that should stop early selects on this; work that ignores it keeps
    /// running and its result is recorded but not delivered.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

type Tokens = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

/// Launches work concurrently with the caller and reports its outcome.
///
/// # Example
/// ```
/// use framecast_core::{DelegationManager, TaskId, TaskOutcome, TaskStatus};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let manager = DelegationManager::new();
/// let id = manager.start(
///     async { Ok::<_, String>(json!({"ok": true})) },
///     "lookup",
///     |_id: TaskId, outcome: TaskOutcome| println!("finished: {:?}", outcome),
///     Some(Duration::from_secs(5)),
/// );
///
/// let task = manager.await_completion(&id, Duration::from_secs(5)).await.unwrap();
/// assert_eq!(task.status, TaskStatus::Completed);
/// # }
/// ```
#[derive(Clone)]
pub struct DelegationManager {
    registry: Arc<TaskRegistry>,
    default_timeout: Option<Duration>,
    tokens: Tokens,
}

impl std::fmt::Debug for DelegationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationManager")
            .field("tasks", &self.registry.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl Default for DelegationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegationManager {
    pub fn new() -> Self {
        Self::with_config(DelegationConfig::default())
    }

    pub fn with_config(config: DelegationConfig) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::with_config(config.registry)),
            default_timeout: config.default_timeout,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The registry holding this manager's tasks.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Start `work` in the background and return its task id.
    ///
    /// Never waits for the work. `on_complete` is called exactly once, when
    /// the task reaches its terminal state. With a timeout (from the call or
    /// the manager's default) the task becomes `TimedOut` if the work has not
    /// finished in time; a result that arrives later is recorded on the task
    /// but not delivered.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, E, H>(
        &self,
        work: F,
        description: impl Into<String>,
        on_complete: H,
        timeout: Option<Duration>,
    ) -> TaskId
    where
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
        H: CompletionHandler,
    {
        self.start_with(move |_| work, description, on_complete, timeout)
    }

    /// Like [`start`](Self::start), but builds the work from a [`TaskContext`]
    /// so it can observe cancellation.
    pub fn start_with<W, F, E, H>(
        &self,
        work: W,
        description: impl Into<String>,
        on_complete: H,
        timeout: Option<Duration>,
    ) -> TaskId
    where
        W: FnOnce(TaskContext) -> F,
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
        H: CompletionHandler,
    {
        let id = self.registry.register(description);
        let token = CancellationToken::new();
        self.tokens.lock().insert(id.clone(), token.clone());

        let work = work(TaskContext {
            id: id.clone(),
            cancellation: token.clone(),
        });
        let supervisor = Supervisor {
            registry: self.registry.clone(),
            tokens: self.tokens.clone(),
            id: id.clone(),
            token,
            timeout: timeout.or(self.default_timeout),
            handler: Box::new(on_complete),
        };
        tokio::spawn(supervisor.run(work));

        id
    }

    /// Write the tool call to `stream` and delegate its work.
    ///
    /// The outcome is delivered as the matching tool result while the stream
    /// is open, and to `fallback` otherwise. If the tool call itself cannot be
    /// written the work still runs and reports to `fallback`.
    pub async fn delegate_tool_call<F, E, H>(
        &self,
        stream: &StreamMultiplexer,
        call: ToolCall,
        work: F,
        fallback: H,
        timeout: Option<Duration>,
    ) -> TaskId
    where
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
        H: CompletionHandler,
    {
        let call_id = call.call_id.clone();
        let description = call.name.clone();

        let notifier = match stream.write(&Frame::ToolCall(call)).await {
            Ok(()) => CompletionNotifier::attached(call_id, stream.clone(), fallback),
            Err(e) => {
                log::debug!("tool call {} not written ({}); delegating detached", call_id, e);
                CompletionNotifier::detached(fallback)
            }
        };
        self.start(work, description, notifier, timeout)
    }

    /// Cancel a pending or running task.
    ///
    /// Returns `true` if this call moved the task to `Cancelled`, `false` if it
    /// had already finished. The work is signalled through its cancellation
    /// token; the completion handler receives [`TaskError::Cancelled`].
    pub fn cancel(&self, id: &TaskId) -> Result<bool, RegistryError> {
        let transition = self.registry.transition(id, TaskTransition::Cancel)?;
        if !transition.is_applied() {
            return Ok(false);
        }
        if let Some(token) = self.tokens.lock().get(id) {
            token.cancel();
        }
        log::debug!("cancelled task {}", id);
        Ok(true)
    }

    /// Snapshot of a task.
    pub fn status(&self, id: &TaskId) -> Result<Task, RegistryError> {
        self.registry.get(id)
    }

    /// Wait for a task to finish; see [`TaskRegistry::await_completion`].
    pub async fn await_completion(
        &self,
        id: &TaskId,
        timeout: Duration,
    ) -> Result<Task, RegistryError> {
        self.registry.await_completion(id, timeout).await
    }

    /// Evict a finished task; see [`TaskRegistry::acknowledge`].
    pub fn acknowledge(&self, id: &TaskId) -> Result<bool, RegistryError> {
        self.registry.acknowledge(id)
    }
}

/// What the work produced, or the payload it panicked with.
type Ran<E> = Result<Result<Value, E>, Box<dyn Any + Send>>;

enum Exit<E> {
    Finished(Ran<E>),
    Cancelled,
    TimedOut(Duration),
}

struct Supervisor {
    registry: Arc<TaskRegistry>,
    tokens: Tokens,
    id: TaskId,
    token: CancellationToken,
    timeout: Option<Duration>,
    handler: BoxedCompletionHandler,
}

impl Supervisor {
    async fn run<F, E>(self, work: F)
    where
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Supervisor {
            registry,
            tokens,
            id,
            token,
            timeout,
            handler,
        } = self;

        match registry.transition(&id, TaskTransition::Start) {
            Ok(Transition::Applied(_)) => {}
            Ok(Transition::Ignored(task)) => {
                // Cancelled before it was scheduled; the work never runs.
                tokens.lock().remove(&id);
                handler.on_complete(id, outcome_of(&task, timeout)).await;
                return;
            }
            Err(e) => {
                log::warn!("cannot start delegated task: {}", e);
                tokens.lock().remove(&id);
                handler.on_complete(id, Err(TaskError::Cancelled)).await;
                return;
            }
        }

        // Polled in place: a result ready in the tick its deadline fires is
        // seen before the timer.
        let mut work = std::pin::pin!(AssertUnwindSafe(work).catch_unwind());
        let exit = tokio::select! {
            biased;
            ran = &mut work => Exit::Finished(ran),
            _ = token.cancelled() => Exit::Cancelled,
            elapsed = expire(timeout) => Exit::TimedOut(elapsed),
        };

        let finished = matches!(exit, Exit::Finished(_));
        let terminal = match exit {
            Exit::Finished(ran) => registry.transition(&id, completion(ran)),
            Exit::TimedOut(elapsed) => {
                let timed_out = registry.transition(
                    &id,
                    TaskTransition::TimeOut(TaskError::TimedOut(elapsed).to_string()),
                );
                // Cooperative work may stop; its late result is still recorded.
                token.cancel();
                timed_out
            }
            Exit::Cancelled => registry.get(&id).map(Transition::Ignored),
        };
        tokens.lock().remove(&id);

        let outcome = match terminal {
            Ok(transition) => outcome_of(transition.task(), timeout),
            // Only an external cancel can finish the task and let it be
            // evicted behind the supervisor's back.
            Err(_) => Err(TaskError::Cancelled),
        };
        log::debug!("task {} finished: {}", id, describe(&outcome));
        handler.on_complete(id.clone(), outcome).await;

        if !finished {
            let ran = work.await;
            if let Err(e) = registry.transition(&id, completion(ran)) {
                log::debug!("late result for task {} dropped: {}", id, e);
            }
        }
    }
}

/// Resolves after `timeout`, or never without one.
async fn expire(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep(timeout).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

fn completion<E: Display>(ran: Ran<E>) -> TaskTransition {
    match ran {
        Ok(Ok(value)) => TaskTransition::Complete(value),
        Ok(Err(e)) => TaskTransition::Fail(e.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskTransition::Fail(format!("task panicked: {}", message))
        }
    }
}

/// The outcome a handler receives for a terminal snapshot.
fn outcome_of(task: &Task, timeout: Option<Duration>) -> TaskOutcome {
    match task.status {
        TaskStatus::Completed => Ok(task.result.clone().unwrap_or(Value::Null)),
        TaskStatus::TimedOut => Err(TaskError::TimedOut(timeout.unwrap_or_default())),
        TaskStatus::Cancelled => Err(TaskError::Cancelled),
        TaskStatus::Failed | TaskStatus::Pending | TaskStatus::Running => Err(TaskError::Failed(
            task.error
                .clone()
                .unwrap_or_else(|| "task did not finish".to_string()),
        )),
    }
}

fn describe(outcome: &TaskOutcome) -> String {
    match outcome {
        Ok(_) => "completed".to_string(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
#[path = "delegation_tests.rs"]
mod tests;
