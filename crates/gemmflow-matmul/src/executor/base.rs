use gemmflow_runtime::runtime::Runtime;

use crate::{
    call::CallContext,
    components::{MatmulError, MatmulParams},
};

/// Submits the numeric work of a matmul to the device queue.
///
/// Receives everything fully resolved and only enqueues work: it must not wait for it. Failures
/// are returned as they are, without retrying.
pub trait MatmulExecutor<R: Runtime>: Send + Sync + 'static {
    /// Name of the executor, used for logging.
    fn name(&self) -> &str;

    /// Enqueues the computation and registers its dependencies on the call context.
    ///
    /// The scratchpad of `scratchpad_size` bytes is either the one booked on the context or
    /// reserved by the executor from the engine.
    fn execute(
        &self,
        context: &mut CallContext<'_, R>,
        engine: &R::Engine,
        params: &MatmulParams,
        output_scale: f32,
        scratchpad_size: u64,
    ) -> Result<(), MatmulError>;
}
