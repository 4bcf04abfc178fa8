use std::sync::Arc;

use gemmflow_runtime::{
    dependency::Dependency,
    logging::RuntimeLogger,
    memory_management::ScratchBuffer,
    queue::DeviceQueue,
    runtime::Runtime,
    server::Handle,
};
use hashbrown::HashSet;

use crate::components::{ArgKind, MatmulError, MemoryDescriptor, PostOp};

/// States of a call. [Done](CallState::Done) and [Failed](CallState::Failed) are terminal.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum CallState {
    Start,
    ParamsResolved,
    ScaleReady,
    Dispatched,
    Drained,
    Cleaned,
    Done,
    Failed,
}

/// Memory bound to an argument for the duration of a call.
#[derive(new, Clone, Debug)]
pub struct BoundArg {
    pub handle: Handle,
    pub descriptor: MemoryDescriptor,
}

/// State owned by one call, dropped when it returns.
pub struct CallContext<'a, R: Runtime> {
    queue: &'a R::Queue,
    src: BoundArg,
    weights: BoundArg,
    dst: BoundArg,
    bias: Option<BoundArg>,
    post_ops: &'a [PostOp],
    output_scale: Option<&'a Handle>,
    scratchpad: Option<Arc<ScratchBuffer>>,
    dependencies: Vec<Dependency>,
}

impl<'a, R: Runtime> CallContext<'a, R> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        queue: &'a R::Queue,
        src: BoundArg,
        weights: BoundArg,
        dst: BoundArg,
        bias: Option<BoundArg>,
        post_ops: &'a [PostOp],
        output_scale: Option<&'a Handle>,
        scratchpad: Option<Arc<ScratchBuffer>>,
    ) -> Self {
        Self {
            queue,
            src,
            weights,
            dst,
            bias,
            post_ops,
            output_scale,
            scratchpad,
            dependencies: Vec::new(),
        }
    }

    /// The queue the call submits to.
    pub fn queue(&self) -> &'a R::Queue {
        self.queue
    }

    /// The memory bound to `kind`, if any.
    ///
    /// The output scale source is only read by the scale fetcher and never bound here.
    pub fn arg(&self, kind: ArgKind) -> Option<&BoundArg> {
        match kind {
            ArgKind::Src => Some(&self.src),
            ArgKind::Weights => Some(&self.weights),
            ArgKind::Dst => Some(&self.dst),
            ArgKind::Bias => self.bias.as_ref(),
            ArgKind::AttrOutputScales => None,
        }
    }

    pub fn src(&self) -> &BoundArg {
        &self.src
    }

    pub fn weights(&self) -> &BoundArg {
        &self.weights
    }

    pub fn dst(&self) -> &BoundArg {
        &self.dst
    }

    pub fn bias(&self) -> Option<&BoundArg> {
        self.bias.as_ref()
    }

    pub fn post_ops(&self) -> &'a [PostOp] {
        self.post_ops
    }

    /// The host-visible slot the output scale is copied into.
    pub fn output_scale_slot(&self) -> Option<&'a Handle> {
        self.output_scale
    }

    /// The scratchpad booked when the primitive was built, if any.
    pub fn booked_scratchpad(&self) -> Option<&Arc<ScratchBuffer>> {
        self.scratchpad.as_ref()
    }

    /// Registers asynchronous work enqueued by this call.
    pub fn register(&mut self, dependency: Dependency) {
        self.dependencies.push(dependency);
    }

    /// The asynchronous work registered by this call so far.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub(crate) fn into_dependencies(self) -> Vec<Dependency> {
        self.dependencies
    }
}

/// Waits for the asynchronous work of a call before its resolved state is discarded.
pub struct DependencyTracker;

impl DependencyTracker {
    /// Waits on every dependency registered by the call and every dependency still pending on
    /// its queue. Returns how many were waited on.
    ///
    /// Only the call's own work decides the outcome: pending work of other submitters is waited
    /// on for ordering, its failures are theirs to observe.
    pub fn drain<R: Runtime>(context: &CallContext<'_, R>) -> Result<usize, MatmulError> {
        let mut seen = HashSet::new();
        let own = context
            .dependencies
            .iter()
            .filter(|dependency| seen.insert(dependency.id()))
            .count();

        let pending = context.queue.dependencies();
        let others = pending
            .iter()
            .filter(|dependency| seen.insert(dependency.id()))
            .collect::<Vec<_>>();

        let outcome = Dependency::wait_all(&context.dependencies);
        for dependency in others.iter() {
            if let Err(err) = dependency.wait() {
                log::debug!("Work pending on the queue failed outside the call: {err}");
            }
        }
        outcome.map_err(MatmulError::ExecutionError)?;

        Ok(own + others.len())
    }
}

/// What a successful call went through.
#[derive(Debug, Clone)]
pub struct CallSummary {
    /// Every state visited, in order, from [Start](CallState::Start) to [Done](CallState::Done).
    pub states: Vec<CallState>,
    /// The output scale the executor received.
    pub output_scale: f32,
    /// The scratchpad size the executor received, in bytes.
    pub scratchpad_size: u64,
    /// The work enqueued by the call. Already complete when the call drained its queue.
    pub dependencies: Vec<Dependency>,
}

impl CallSummary {
    /// Waits for the work enqueued by the call.
    pub fn wait(&self) -> Result<(), MatmulError> {
        Dependency::wait_all(&self.dependencies).map_err(MatmulError::ExecutionError)
    }
}

/// Records the states of a call and logs its transitions.
pub(crate) struct CallTrace<'a> {
    name: &'a str,
    states: Vec<CallState>,
    logger: &'a spin::Mutex<RuntimeLogger>,
}

impl<'a> CallTrace<'a> {
    pub(crate) fn new(name: &'a str, logger: &'a spin::Mutex<RuntimeLogger>) -> Self {
        let mut trace = Self {
            name,
            states: Vec::new(),
            logger,
        };
        trace.enter(CallState::Start);
        trace
    }

    pub(crate) fn enter(&mut self, state: CallState) {
        self.logger
            .lock()
            .log_step(format_args!("[{}] {:?}", self.name, state));
        self.states.push(state);
    }

    pub(crate) fn done(mut self) -> Vec<CallState> {
        self.enter(CallState::Done);
        self.logger
            .lock()
            .log_call(format_args!("[{}] done: {:?}", self.name, self.states));
        self.states
    }

    pub(crate) fn fail(mut self, err: &MatmulError) {
        self.enter(CallState::Failed);
        self.logger.lock().log_call(format_args!(
            "[{}] failed after {:?}: {err}",
            self.name, self.states
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DataType;
    use gemmflow_runtime::{
        config::GlobalConfig,
        engine::{Engine, HostEngine},
        runtime::HostRuntime,
        server::ServerError,
    };

    fn bound(engine: &HostEngine) -> BoundArg {
        BoundArg::new(
            engine.empty(4).unwrap(),
            MemoryDescriptor::contiguous(DataType::F32, &[1, 1]),
        )
    }

    #[test_log::test]
    fn tracker_waits_on_call_and_queue_dependencies() {
        let engine = HostEngine::from_config(Arc::new(GlobalConfig::default()));
        let queue = engine.create_queue();
        let (release, gate) = async_channel::bounded::<()>(1);

        // Work the call didn't register, still pending on the queue.
        let unrelated = queue.host_task(Box::new(move |_| {
            let _ = gate.recv_blocking();
            Ok(())
        }));

        let mut context = CallContext::<HostRuntime>::new(
            &queue,
            bound(&engine),
            bound(&engine),
            bound(&engine),
            None,
            &[],
            None,
            None,
        );
        let registered = queue.host_task(Box::new(|_| Ok(())));
        context.register(registered.clone());
        context.register(registered);

        release.send_blocking(()).unwrap();
        let waited = DependencyTracker::drain(&context).unwrap();

        assert!(waited >= 1);
        assert!(unrelated.is_complete());
        assert!(context.dependencies().iter().all(Dependency::is_complete));
    }

    #[test_log::test]
    fn tracker_reports_failed_work() {
        let engine = HostEngine::from_config(Arc::new(GlobalConfig::default()));
        let queue = engine.create_queue();

        let mut context = CallContext::<HostRuntime>::new(
            &queue,
            bound(&engine),
            bound(&engine),
            bound(&engine),
            None,
            &[],
            None,
            None,
        );
        context.register(queue.host_task(Box::new(|_| Err(ServerError::generic("boom")))));

        assert!(matches!(
            DependencyTracker::drain(&context),
            Err(MatmulError::ExecutionError(_))
        ));
    }

    #[test_log::test]
    fn tracker_ignores_failures_of_unrelated_work() {
        let engine = HostEngine::from_config(Arc::new(GlobalConfig::default()));
        let queue = engine.create_queue();
        let (release, gate) = async_channel::bounded::<()>(1);

        let unrelated = queue.host_task(Box::new(move |_| {
            let _ = gate.recv_blocking();
            Err(ServerError::generic("unrelated work failed"))
        }));

        let mut context = CallContext::<HostRuntime>::new(
            &queue,
            bound(&engine),
            bound(&engine),
            bound(&engine),
            None,
            &[],
            None,
            None,
        );
        context.register(queue.host_task(Box::new(|_| Ok(()))));

        release.send_blocking(()).unwrap();
        let waited = DependencyTracker::drain(&context).unwrap();

        assert!(waited >= 1);
        assert!(unrelated.is_complete());
        assert!(unrelated.wait().is_err());
    }
}
