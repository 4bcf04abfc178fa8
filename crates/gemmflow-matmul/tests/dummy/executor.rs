use std::sync::Arc;

use gemmflow_matmul::{
    call::CallContext,
    components::{MatmulError, MatmulParams, MatmulProblem},
    executor::MatmulExecutor,
};
use gemmflow_runtime::{
    queue::DeviceQueue,
    runtime::{Runtime, RuntimeContext},
    server::ServerError,
};

/// What an executor received.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    pub problem: MatmulProblem,
    pub output_scale: f32,
    pub scratchpad_size: u64,
}

/// Records its calls and enqueues an empty host task for each.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    pub calls: Arc<spin::Mutex<Vec<ExecutorCall>>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().clone()
    }
}

impl<R: Runtime> MatmulExecutor<R> for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    fn execute(
        &self,
        context: &mut CallContext<'_, R>,
        _engine: &R::Engine,
        params: &MatmulParams,
        output_scale: f32,
        scratchpad_size: u64,
    ) -> Result<(), MatmulError> {
        self.calls.lock().push(ExecutorCall {
            problem: params.problem,
            output_scale,
            scratchpad_size,
        });

        let dependency = context
            .queue()
            .host_task(Box::new(|_: &mut RuntimeContext<R>| Ok(())));
        context.register(dependency);

        Ok(())
    }
}

/// Enqueues work blocked until `gate` is closed, then reports a failure.
pub struct FailingExecutor {
    pub gate: async_channel::Receiver<()>,
}

impl<R: Runtime> MatmulExecutor<R> for FailingExecutor {
    fn name(&self) -> &str {
        "failing"
    }

    fn execute(
        &self,
        context: &mut CallContext<'_, R>,
        _engine: &R::Engine,
        _params: &MatmulParams,
        _output_scale: f32,
        _scratchpad_size: u64,
    ) -> Result<(), MatmulError> {
        let gate = self.gate.clone();
        let dependency = context
            .queue()
            .host_task(Box::new(move |_: &mut RuntimeContext<R>| {
                let _ = gate.recv_blocking();
                Ok(())
            }));
        context.register(dependency);

        Err(MatmulError::ExecutionError(ServerError::generic(
            "the executor rejected the call",
        )))
    }
}
