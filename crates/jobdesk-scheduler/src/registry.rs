//! Name-resolved task table.
//!
//! Tasks are registered at startup under `module.function` together with
//! their arity. A blocking task runs on the blocking pool; an async task runs
//! as its own tokio task. Either way the caller awaits a single result, and
//! a panic inside the task surfaces as an error.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinError;

use crate::error::TaskResolutionError;
use crate::target::{ArgValue, InvokeTarget};

/// What a task returns: a display message on success.
pub type TaskResult = anyhow::Result<String>;

type BlockingFn = dyn Fn(&[ArgValue]) -> TaskResult + Send + Sync;
type AsyncFn = dyn Fn(Vec<ArgValue>) -> BoxFuture<'static, TaskResult> + Send + Sync;

#[derive(Clone)]
pub enum TaskHandler {
    Blocking(Arc<BlockingFn>),
    Async(Arc<AsyncFn>),
}

impl std::fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Blocking"),
            Self::Async(_) => f.write_str("Async"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub arity: usize,
    pub handler: TaskHandler,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    modules: HashMap<String, HashMap<String, TaskSpec>>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in `sample_task` module.
    #[must_use]
    pub fn with_builtin_tasks() -> Self {
        let mut registry = Self::new();
        crate::tasks::register_sample_tasks(&mut registry);
        registry
    }

    /// Registers a synchronous task, replacing any task with the same name.
    pub fn register_blocking<F>(
        &mut self,
        module: &str,
        function: &str,
        arity: usize,
        task: F,
    ) -> &mut Self
    where
        F: Fn(&[ArgValue]) -> TaskResult + Send + Sync + 'static,
    {
        self.insert(module, function, arity, TaskHandler::Blocking(Arc::new(task)))
    }

    /// Registers an async task, replacing any task with the same name.
    pub fn register_async<F, Fut>(
        &mut self,
        module: &str,
        function: &str,
        arity: usize,
        task: F,
    ) -> &mut Self
    where
        F: Fn(Vec<ArgValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let boxed = move |args: Vec<ArgValue>| task(args).boxed();
        self.insert(module, function, arity, TaskHandler::Async(Arc::new(boxed)))
    }

    fn insert(
        &mut self,
        module: &str,
        function: &str,
        arity: usize,
        handler: TaskHandler,
    ) -> &mut Self {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(function.to_string(), TaskSpec { arity, handler });
        self
    }

    /// Looks up the task a target names and checks the argument count.
    ///
    /// # Errors
    ///
    /// Returns [`TaskResolutionError`] for an unknown module or function, or
    /// when the argument count does not match the registered arity.
    pub fn resolve(&self, target: &InvokeTarget) -> Result<&TaskSpec, TaskResolutionError> {
        let functions = self
            .modules
            .get(&target.module)
            .ok_or_else(|| TaskResolutionError::UnknownModule(target.module.clone()))?;

        let spec = functions.get(&target.function).ok_or_else(|| {
            TaskResolutionError::UnknownFunction {
                module: target.module.clone(),
                function: target.function.clone(),
            }
        })?;

        if spec.arity != target.args.len() {
            return Err(TaskResolutionError::Arity {
                module: target.module.clone(),
                function: target.function.clone(),
                expected: spec.arity,
                actual: target.args.len(),
            });
        }

        Ok(spec)
    }

    /// Resolves and runs a target to completion.
    ///
    /// # Errors
    ///
    /// Returns the resolution error, the task's own error, or a description
    /// of the panic if the task panicked.
    pub async fn invoke(&self, target: &InvokeTarget) -> TaskResult {
        let spec = self.resolve(target)?;
        let args = target.args.clone();

        match &spec.handler {
            TaskHandler::Blocking(task) => {
                let task = Arc::clone(task);
                tokio::task::spawn_blocking(move || task(&args))
                    .await
                    .map_err(join_failure)?
            }
            TaskHandler::Async(task) => tokio::spawn(task(args)).await.map_err(join_failure)?,
        }
    }

    /// Registered names grouped by module, sorted.
    #[must_use]
    pub fn task_names(&self) -> BTreeMap<&str, Vec<&str>> {
        self.modules
            .iter()
            .map(|(module, functions)| {
                let mut names: Vec<&str> = functions.keys().map(String::as_str).collect();
                names.sort_unstable();
                (module.as_str(), names)
            })
            .collect()
    }
}

fn join_failure(err: JoinError) -> anyhow::Error {
    if !err.is_panic() {
        return anyhow::anyhow!("task was cancelled");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("task panicked: {message}")
}
