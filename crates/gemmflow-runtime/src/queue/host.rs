use super::{ComputeTask, DeviceQueue, HostTask, TaskContext};
use crate::{
    EngineId, QueueId,
    dependency::{Completion, Dependency, dependency},
    native::NativePointer,
    server::{IoError, ServerError},
    storage::BytesStorage,
};
use core::sync::atomic::{AtomicU64, Ordering};
use std::{panic::AssertUnwindSafe, sync::Arc};

/// Context of the tasks executed by a [host queue](HostQueue).
pub struct HostContext {
    engine: EngineId,
    queue: QueueId,
    storage: Arc<spin::Mutex<BytesStorage>>,
}

impl HostContext {
    pub(crate) fn new(
        engine: EngineId,
        queue: QueueId,
        storage: Arc<spin::Mutex<BytesStorage>>,
    ) -> Self {
        Self {
            engine,
            queue,
            storage,
        }
    }

    /// Locks the device memory for the duration of the guard.
    pub fn storage(&self) -> spin::MutexGuard<'_, BytesStorage> {
        self.storage.lock()
    }
}

impl TaskContext for HostContext {
    fn engine_id(&self) -> EngineId {
        self.engine
    }

    fn queue_id(&self) -> QueueId {
        self.queue
    }

    fn copy(&mut self, src: NativePointer, dst: NativePointer, size: u64) -> Result<(), IoError> {
        self.storage.lock().copy(src, dst, size)
    }
}

/// Number of operations a queue received since its creation.
#[derive(new, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Host callbacks enqueued.
    pub host_tasks: u64,
    /// Compute tasks dispatched.
    pub dispatches: u64,
    /// Full queue drains requested.
    pub syncs: u64,
}

/// A device queue executing its tasks in order on a dedicated worker thread.
///
/// The worker drains a multi-producer channel, the same way a compute server runs behind an mpsc
/// channel. Clones share the same worker.
#[derive(Clone)]
pub struct HostQueue {
    state: Arc<HostQueueState>,
}

struct HostQueueState {
    id: QueueId,
    sender: async_channel::Sender<Message>,
    pending: spin::Mutex<Vec<Dependency>>,
    host_tasks: AtomicU64,
    dispatches: AtomicU64,
    syncs: AtomicU64,
}

enum Message {
    Host(HostTask<HostContext>, Completion),
    Compute(Box<dyn ComputeTask<HostContext>>, Completion),
    Sync(async_channel::Sender<()>),
}

impl HostQueue {
    pub(crate) fn new(engine: EngineId, storage: Arc<spin::Mutex<BytesStorage>>) -> Self {
        let id = QueueId::new();
        let (sender, receiver) = async_channel::unbounded();
        let context = HostContext::new(engine, id, storage);

        std::thread::Builder::new()
            .name(format!("gemmflow-{id}"))
            .spawn(move || run(receiver, context))
            .expect("Should be able to spawn the queue worker");

        Self {
            state: Arc::new(HostQueueState {
                id,
                sender,
                pending: spin::Mutex::new(Vec::new()),
                host_tasks: AtomicU64::new(0),
                dispatches: AtomicU64::new(0),
                syncs: AtomicU64::new(0),
            }),
        }
    }

    /// The operations this queue received so far.
    pub fn stats(&self) -> QueueStats {
        QueueStats::new(
            self.state.host_tasks.load(Ordering::Acquire),
            self.state.dispatches.load(Ordering::Acquire),
            self.state.syncs.load(Ordering::Acquire),
        )
    }

    fn submit(&self, build: impl FnOnce(Completion) -> Message) -> Dependency {
        let (dependency, completion) = dependency();

        if let Err(err) = self.state.sender.try_send(build(completion)) {
            let completion = match err.into_inner() {
                Message::Host(_, completion) | Message::Compute(_, completion) => completion,
                Message::Sync(_) => unreachable!("Sync messages don't carry a completion"),
            };
            completion.complete(Err(ServerError::unhealthy(format!(
                "the worker of {} stopped",
                self.state.id
            ))));
            return dependency;
        }

        let mut pending = self.state.pending.lock();
        pending.retain(|dep| !dep.is_complete());
        pending.push(dependency.clone());

        dependency
    }
}

impl DeviceQueue for HostQueue {
    type Context = HostContext;

    fn id(&self) -> QueueId {
        self.state.id
    }

    fn host_task(&self, task: HostTask<HostContext>) -> Dependency {
        self.state.host_tasks.fetch_add(1, Ordering::AcqRel);
        self.submit(|completion| Message::Host(task, completion))
    }

    fn dispatch(&self, task: Box<dyn ComputeTask<HostContext>>) -> Dependency {
        self.state.dispatches.fetch_add(1, Ordering::AcqRel);
        self.submit(|completion| Message::Compute(task, completion))
    }

    fn sync(&self) -> Result<(), ServerError> {
        self.state.syncs.fetch_add(1, Ordering::AcqRel);

        let (callback, response) = async_channel::bounded(1);
        let unhealthy = || ServerError::unhealthy(format!("the worker of {} stopped", self.state.id));

        self.state
            .sender
            .try_send(Message::Sync(callback))
            .map_err(|_| unhealthy())?;
        response.recv_blocking().map_err(|_| unhealthy())?;

        self.state.pending.lock().retain(|dep| !dep.is_complete());

        Ok(())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        let mut pending = self.state.pending.lock();
        pending.retain(|dep| !dep.is_complete());
        pending.clone()
    }
}

impl core::fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostQueue")
            .field("id", &self.state.id)
            .field("stats", &self.stats())
            .finish()
    }
}

fn run(receiver: async_channel::Receiver<Message>, mut context: HostContext) {
    while let Ok(message) = receiver.recv_blocking() {
        match message {
            Message::Host(task, completion) => {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| task(&mut context)));
                completion.complete(result.unwrap_or_else(|_| {
                    Err(ServerError::generic("a host task panicked"))
                }));
            }
            Message::Compute(task, completion) => {
                let name = task.name().to_string();
                log::trace!("{} runs {name}", context.queue);

                let result =
                    std::panic::catch_unwind(AssertUnwindSafe(|| task.compute(&mut context)));
                completion.complete(result.unwrap_or_else(|_| {
                    Err(ServerError::generic(format!("compute task {name} panicked")))
                }));
            }
            Message::Sync(callback) => {
                let _ = callback.try_send(());
            }
        }
    }

    log::debug!("The worker of {} stopped", context.queue);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKind;

    fn queue() -> (HostQueue, Arc<spin::Mutex<BytesStorage>>) {
        let storage = Arc::new(spin::Mutex::new(BytesStorage::default()));
        (HostQueue::new(EngineId::new(), storage.clone()), storage)
    }

    struct Noop;

    impl ComputeTask<HostContext> for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn compute(self: Box<Self>, _context: &mut HostContext) -> Result<(), ServerError> {
            Ok(())
        }
    }

    #[test_log::test]
    fn tasks_run_in_submission_order() {
        let (queue, _) = queue();
        let order = Arc::new(spin::Mutex::new(Vec::new()));

        for i in 0..8 {
            let order = order.clone();
            queue.host_task(Box::new(move |_| {
                order.lock().push(i);
                Ok(())
            }));
        }
        queue.sync().unwrap();

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test_log::test]
    fn copy_through_the_context() {
        let (queue, storage) = queue();
        let (src, dst) = {
            let mut storage = storage.lock();
            let src = storage.alloc(4, MemoryKind::Device).unwrap();
            let dst = storage.alloc(4, MemoryKind::Shared).unwrap();
            storage.get_mut(&src).unwrap().copy_from_slice(&[9, 8, 7, 6]);
            (src, dst)
        };

        let (src_id, dst_id) = (src.id, dst.id);
        let dep = queue.host_task(Box::new(move |context: &mut HostContext| {
            context.copy(
                NativePointer::new(src_id, 0),
                NativePointer::new(dst_id, 0),
                4,
            )?;
            Ok(())
        }));

        dep.wait().unwrap();
        assert_eq!(storage.lock().get(&dst).unwrap(), &[9, 8, 7, 6]);
    }

    #[test_log::test]
    fn failing_task_reports_on_its_dependency() {
        let (queue, _) = queue();

        let failed = queue.host_task(Box::new(|_| Err(ServerError::generic("boom"))));
        let next = queue.dispatch(Box::new(Noop));

        assert!(matches!(failed.wait(), Err(ServerError::Generic { .. })));
        assert!(next.wait().is_ok());
    }

    #[test_log::test]
    fn panicking_task_keeps_the_queue_alive() {
        let (queue, _) = queue();

        let failed = queue.host_task(Box::new(|_| panic!("host task panic")));
        let next = queue.host_task(Box::new(|_| Ok(())));

        assert!(failed.wait().is_err());
        assert!(next.wait().is_ok());
    }

    #[test_log::test]
    fn dependencies_only_lists_pending_work() {
        let (queue, _) = queue();
        let (release, gate) = async_channel::bounded::<()>(1);

        let blocked = queue.host_task(Box::new(move |_| {
            let _ = gate.recv_blocking();
            Ok(())
        }));

        let pending = queue.dependencies();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), blocked.id());

        release.send_blocking(()).unwrap();
        queue.sync().unwrap();
        assert!(queue.dependencies().is_empty());
    }

    #[test_log::test]
    fn stats_count_each_kind_of_submission() {
        let (queue, _) = queue();

        queue.host_task(Box::new(|_| Ok(())));
        queue.dispatch(Box::new(Noop));
        queue.dispatch(Box::new(Noop));
        queue.sync().unwrap();

        assert_eq!(queue.stats(), QueueStats::new(1, 2, 1));
    }
}
