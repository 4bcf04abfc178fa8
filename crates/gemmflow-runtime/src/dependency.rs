use crate::{DependencyId, server::ServerError};
use std::sync::Arc;

/// Token representing in-flight asynchronous work that can later be waited on.
///
/// Completion is signaled by closing a channel: the producer stores the outcome first, then drops
/// its sender, which wakes every waiter at once.
#[derive(Clone)]
pub struct Dependency {
    id: DependencyId,
    state: Arc<DependencyState>,
}

struct DependencyState {
    outcome: spin::Mutex<Option<Result<(), ServerError>>>,
    signal: async_channel::Receiver<()>,
}

/// Producer side of a [dependency](Dependency), owned by the queue until the task ran.
pub struct Completion {
    state: Arc<DependencyState>,
    _signal: async_channel::Sender<()>,
}

/// Creates a pending dependency with its completion.
pub fn dependency() -> (Dependency, Completion) {
    let (sender, receiver) = async_channel::bounded(1);
    let state = Arc::new(DependencyState {
        outcome: spin::Mutex::new(None),
        signal: receiver,
    });

    (
        Dependency {
            id: DependencyId::new(),
            state: state.clone(),
        },
        Completion {
            state,
            _signal: sender,
        },
    )
}

impl Completion {
    /// Stores the outcome of the task and wakes the waiters.
    pub fn complete(self, result: Result<(), ServerError>) {
        *self.state.outcome.lock() = Some(result);
    }
}

impl Dependency {
    /// A dependency that is already satisfied with the given outcome.
    pub fn completed(result: Result<(), ServerError>) -> Self {
        let (dependency, completion) = dependency();
        completion.complete(result);
        dependency
    }

    /// The id of the dependency.
    pub fn id(&self) -> DependencyId {
        self.id
    }

    /// Whether the work finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.state.signal.is_closed()
    }

    /// Blocks until the work finished and returns its outcome.
    pub fn wait(&self) -> Result<(), ServerError> {
        // Nothing is ever sent, so this only returns once the channel is closed.
        let _ = self.state.signal.recv_blocking();
        self.outcome()
    }

    /// Waits asynchronously until the work finished and returns its outcome.
    pub async fn wait_async(&self) -> Result<(), ServerError> {
        let _ = self.state.signal.recv().await;
        self.outcome()
    }

    /// Waits on every dependency, then returns the first failure if any.
    pub fn wait_all<'a>(
        dependencies: impl IntoIterator<Item = &'a Dependency>,
    ) -> Result<(), ServerError> {
        let mut first_error = None;

        for dependency in dependencies {
            if let Err(err) = dependency.wait() {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn outcome(&self) -> Result<(), ServerError> {
        match self.state.outcome.lock().clone() {
            Some(result) => result,
            None => Err(ServerError::unhealthy(format!(
                "{} was dropped before its task completed",
                self.id
            ))),
        }
    }
}

impl core::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}
