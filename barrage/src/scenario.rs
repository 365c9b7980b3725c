//! Exec functions: the user code each iteration runs.
use crate::http::HttpError;
use crate::sample::ErrorTag;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Whatever the run's setup hook returned, shared by every iteration.
pub type SetupData = Arc<dyn Any + Send + Sync>;

/// Identifies the iteration an exec function is running.
#[derive(Clone)]
pub struct ExecContext {
    pub scenario: Arc<str>,
    pub worker_id: usize,
    /// Sequence number of this iteration within the scenario.
    pub iteration: u64,
    pub setup: Option<SetupData>,
}

impl ExecContext {
    /// The setup hook's result, if there was one and it is a `T`.
    pub fn setup_data<T: Any>(&self) -> Option<&T> {
        self.setup.as_deref()?.downcast_ref()
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("scenario", &self.scenario)
            .field("worker_id", &self.worker_id)
            .field("iteration", &self.iteration)
            .field("setup", &self.setup.is_some())
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("{0}")]
    Message(String),
}

impl ExecError {
    pub fn msg(message: impl Into<String>) -> Self {
        ExecError::Message(message.into())
    }

    pub fn tag(&self) -> ErrorTag {
        match self {
            ExecError::Http(err) => err.tag(),
            ExecError::Status(code) => ErrorTag::HttpStatus(*code),
            ExecError::Message(_) => ErrorTag::Exec,
        }
    }
}

/// One iteration of user work.
///
/// Anything that records requests through [`transaction`](crate::transaction::transaction) is
/// attributed to the scenario running it.
pub trait Exec: Send + Sync + 'static {
    fn exec(&self, ctx: ExecContext) -> BoxFuture<'static, Result<(), ExecError>>;
}

/// Adapter turning an async closure into an [`Exec`].
pub struct ExecFn<F>(F);

/// ```
/// use barrage::prelude::*;
///
/// let exec = exec_fn(|ctx: ExecContext| async move {
///     assert!(!ctx.scenario.is_empty());
///     Ok::<(), ExecError>(())
/// });
/// let registry = ExecRegistry::new().register("default", exec);
/// assert!(registry.get("default").is_some());
/// ```
pub fn exec_fn<F, Fut>(func: F) -> ExecFn<F>
where
    F: Fn(ExecContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ExecError>> + Send + 'static,
{
    ExecFn(func)
}

impl<F, Fut> Exec for ExecFn<F>
where
    F: Fn(ExecContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ExecError>> + Send + 'static,
{
    fn exec(&self, ctx: ExecContext) -> BoxFuture<'static, Result<(), ExecError>> {
        Box::pin((self.0)(ctx))
    }
}

/// Named exec functions that scenarios refer to by their `exec` field.
#[derive(Clone, Default)]
pub struct ExecRegistry {
    execs: HashMap<String, Arc<dyn Exec>>,
}

impl ExecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Exec>(mut self, name: &str, exec: E) -> Self {
        self.insert(name, Arc::new(exec));
        self
    }

    pub fn insert(&mut self, name: &str, exec: Arc<dyn Exec>) {
        if self.execs.insert(name.to_string(), exec).is_some() {
            tracing::warn!("Exec function {name} registered twice; keeping the latest.");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Exec>> {
        self.execs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.execs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.execs.keys().map(String::as_str)
    }
}

impl fmt::Debug for ExecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ExecRegistry").field("execs", &names).finish()
    }
}
