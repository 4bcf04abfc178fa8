use std::sync::Arc;

use gemmflow_runtime::{
    engine::{Engine, HostEngine},
    memory_management::ScratchBuffer,
    native::NativePointerAccessor,
    queue::{ComputeTask, DeviceQueue, HostContext},
    runtime::HostRuntime,
    server::{Handle, ServerError},
};

use super::MatmulExecutor;
use crate::{
    call::CallContext,
    components::{MatmulError, MatmulParams, PostOp},
};

/// Reference executor of the host backend: one compute task looping over every output element.
///
/// Products are accumulated in f64, then written to the scratchpad in the accumulation type when
/// one is needed, and finally converted to the output type.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveExecutor;

impl MatmulExecutor<HostRuntime> for NaiveExecutor {
    fn name(&self) -> &str {
        "naive"
    }

    fn execute(
        &self,
        context: &mut CallContext<'_, HostRuntime>,
        engine: &HostEngine,
        params: &MatmulParams,
        output_scale: f32,
        scratchpad_size: u64,
    ) -> Result<(), MatmulError> {
        let scratchpad = match scratchpad_size {
            0 => Scratchpad::None,
            size => match context.booked_scratchpad() {
                Some(booked) if booked.size() >= size => Scratchpad::Booked(booked.clone()),
                _ => Scratchpad::Reserved(
                    engine
                        .scratch_allocator()
                        .reserve(size)
                        .map_err(|err| MatmulError::ExecutionError(err.into()))?,
                ),
            },
        };

        let task = NaiveTask {
            engine: engine.clone(),
            params: params.clone(),
            src: context.src().handle.clone(),
            weights: context.weights().handle.clone(),
            dst: context.dst().handle.clone(),
            bias: context.bias().map(|bias| bias.handle.clone()),
            output_scale,
            post_ops: context.post_ops().to_vec(),
            scratchpad,
        };

        let dependency = context.queue().dispatch(Box::new(task));
        context.register(dependency);

        Ok(())
    }
}

/// Scratchpad lent to a task, released when the task is dropped.
enum Scratchpad {
    None,
    Booked(Arc<ScratchBuffer>),
    Reserved(ScratchBuffer),
}

impl Scratchpad {
    fn handle(&self) -> Option<&Handle> {
        match self {
            Scratchpad::None => None,
            Scratchpad::Booked(buffer) => Some(buffer.handle()),
            Scratchpad::Reserved(buffer) => Some(buffer.handle()),
        }
    }
}

struct NaiveTask {
    engine: HostEngine,
    params: MatmulParams,
    src: Handle,
    weights: Handle,
    dst: Handle,
    bias: Option<Handle>,
    output_scale: f32,
    post_ops: Vec<PostOp>,
    scratchpad: Scratchpad,
}

impl ComputeTask<HostContext> for NaiveTask {
    fn name(&self) -> &str {
        "naive matmul"
    }

    fn compute(self: Box<Self>, context: &mut HostContext) -> Result<(), ServerError> {
        let _scope = self.engine.activate();

        for handle in [&self.src, &self.weights, &self.dst]
            .into_iter()
            .chain(self.bias.as_ref())
            .chain(self.scratchpad.handle())
        {
            self.engine.native_pointer(handle, context)?;
        }

        let params = &self.params;
        let problem = params.problem;
        let mut storage = context.storage();

        let src = storage.get(&self.src.memory)?.to_vec();
        let weights = storage.get(&self.weights.memory)?.to_vec();
        let previous = storage.get(&self.dst.memory)?.to_vec();
        let bias = match &self.bias {
            Some(bias) => Some(storage.get(&bias.memory)?.to_vec()),
            None => None,
        };

        check_extent(
            "src",
            src.len(),
            params.src.extent_bytes(problem.batch, problem.m, problem.k),
        )?;
        check_extent(
            "weights",
            weights.len(),
            params.weights.extent_bytes(problem.batch, problem.k, problem.n),
        )?;
        check_extent(
            "dst",
            previous.len(),
            params.dst.extent_bytes(problem.batch, problem.m, problem.n),
        )?;
        if let (Some(bias), Some(bias_params)) = (&bias, &params.bias) {
            check_extent("bias", bias.len(), bias_params.extent_bytes())?;
        }

        let scale = self.output_scale as f64;
        let value = |batch: usize, row: usize, col: usize| {
            let mut acc = 0.0;
            for k in 0..problem.k {
                let lhs = params
                    .src
                    .data_type
                    .read(&src, params.src.offset(batch, row, k));
                let rhs = params
                    .weights
                    .data_type
                    .read(&weights, params.weights.offset(batch, k, col));
                acc += lhs * rhs;
            }

            let mut value = scale * acc;
            if let (Some(bias), Some(bias_params)) = (&bias, &params.bias) {
                value += bias_params
                    .data_type
                    .read(bias, bias_params.offset(batch, row, col));
            }

            for post_op in self.post_ops.iter() {
                match post_op {
                    PostOp::Sum { scale } => {
                        let offset = params.dst.offset(batch, row, col);
                        value += *scale as f64 * params.dst.data_type.read(&previous, offset);
                    }
                    PostOp::Relu => value = value.max(0.0),
                }
            }

            value
        };

        let dense = |batch: usize, row: usize, col: usize| {
            (batch * problem.m + row) * problem.n + col
        };

        match self.scratchpad.handle() {
            Some(scratchpad) => {
                let accumulation = params.src.data_type.accumulation();
                check_extent(
                    "scratchpad",
                    scratchpad.size() as usize,
                    problem
                        .dst_elements()
                        .checked_mul(accumulation.size() as u64),
                )?;

                let buffer = storage.get_mut(&scratchpad.memory)?;
                for_each_output(problem.batch, problem.m, problem.n, |b, i, j| {
                    accumulation.write(buffer, dense(b, i, j), value(b, i, j))
                });

                let accumulated = storage.get(&scratchpad.memory)?.to_vec();
                let dst = storage.get_mut(&self.dst.memory)?;
                for_each_output(problem.batch, problem.m, problem.n, |b, i, j| {
                    let value = accumulation.read(&accumulated, dense(b, i, j));
                    params.dst.data_type.write(dst, params.dst.offset(b, i, j), value)
                });
            }
            None => {
                let dst = storage.get_mut(&self.dst.memory)?;
                for_each_output(problem.batch, problem.m, problem.n, |b, i, j| {
                    params
                        .dst
                        .data_type
                        .write(dst, params.dst.offset(b, i, j), value(b, i, j))
                });
            }
        }

        Ok(())
    }
}

fn for_each_output(batch: usize, m: usize, n: usize, mut func: impl FnMut(usize, usize, usize)) {
    for b in 0..batch {
        for i in 0..m {
            for j in 0..n {
                func(b, i, j);
            }
        }
    }
}

fn check_extent(name: &str, len: usize, needed: Option<u64>) -> Result<(), ServerError> {
    let needed = needed.ok_or_else(|| {
        ServerError::generic(format!("{name} spans more memory than can be addressed"))
    })?;
    if (len as u64) < needed {
        return Err(ServerError::generic(format!(
            "{name} holds {len} bytes but {needed} are accessed"
        )));
    }
    Ok(())
}
