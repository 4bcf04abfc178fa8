use gemmflow_runtime::{
    config::execution::ScaleSyncMode,
    engine::Engine,
    native::NativePointerAccessor,
    queue::{DeviceQueue, TaskContext},
    runtime::{Runtime, RuntimeContext},
    server::{Handle, ServerError},
};

use crate::{call::CallContext, components::MatmulError};

/// Size in bytes of an output scale.
pub const SCALE_SIZE: u64 = size_of::<f32>() as u64;

/// Brings an output scale stored in device memory to the host before the executor runs.
#[derive(new, Debug, Clone, Copy)]
pub struct ScaleFetcher {
    sync: ScaleSyncMode,
}

impl ScaleFetcher {
    /// Copies the scale at `source` into the host-visible slot of the call, waits for the copy and
    /// returns the value.
    ///
    /// With [ScaleSyncMode::FullBarrier] the whole queue is drained right after the copy is
    /// enqueued, so any work submitted before it completes as well.
    pub fn fetch<R: Runtime>(
        &self,
        engine: &R::Engine,
        context: &mut CallContext<'_, R>,
        source: &Handle,
    ) -> Result<f32, MatmulError> {
        let slot = context.output_scale_slot().ok_or_else(|| {
            MatmulError::DeviceTransferError(ServerError::generic(
                "no host-visible slot was allocated for the output scale",
            ))
        })?;

        let task_engine = engine.clone();
        let task_source = source.clone();
        let task_slot = slot.clone();

        let copy = context.queue().host_task(Box::new(move |task: &mut RuntimeContext<R>| {
            let _scope = task_engine.activate();
            let src = task_engine.native_pointer(&task_source, task)?;
            let dst = task_engine.native_pointer(&task_slot, task)?;
            task.copy(src, dst, SCALE_SIZE)?;
            Ok(())
        }));
        context.register(copy.clone());

        if let ScaleSyncMode::FullBarrier = self.sync {
            context
                .queue()
                .sync()
                .map_err(MatmulError::DeviceTransferError)?;
        }
        copy.wait().map_err(MatmulError::DeviceTransferError)?;

        let bytes = engine
            .read_host(slot)
            .map_err(|err| MatmulError::DeviceTransferError(err.into()))?;
        let bytes = bytes.get(..SCALE_SIZE as usize).ok_or_else(|| {
            MatmulError::DeviceTransferError(ServerError::generic(format!(
                "the output scale slot holds {} bytes",
                bytes.len()
            )))
        })?;

        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}
