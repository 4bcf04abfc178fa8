use std::sync::{Arc, Mutex, PoisonError};

use gemmflow_runtime::{
    config::GlobalConfig,
    dependency::Dependency,
    engine::Engine,
    logging::RuntimeLogger,
    memory_management::ScratchBuffer,
    runtime::{HostRuntime, Runtime},
    server::Handle,
};

use crate::{
    call::{BoundArg, CallContext, CallState, CallSummary, CallTrace, DependencyTracker},
    components::{
        ArgKind, ExecArgs, MatmulDescriptor, MatmulError, MatmulParams, MatmulSetupError,
        MemoryDescriptor, OperationConfig, OutputScale, ParamsMode, ResolvedParams,
    },
    executor::{MatmulExecutor, NaiveExecutor},
    resolver,
    scale::{SCALE_SIZE, ScaleFetcher},
    scratchpad::scratchpad_size,
};

/// A configured matrix multiplication that can be executed repeatedly.
///
/// Primitives built from descriptors with runtime dimensions resolve their parameters at every
/// call and hold them until the work of that call completed. Calls on such primitives are
/// serialized, calls on primitives with static parameters are not.
pub struct MatmulPrimitive<R: Runtime, E: MatmulExecutor<R>> {
    engine: R::Engine,
    descriptor: MatmulDescriptor,
    config: OperationConfig,
    executor: E,
    resolved: Mutex<Option<ResolvedParams>>,
    output_scale: Option<Handle>,
    scratchpad: Option<Arc<ScratchBuffer>>,
    scale: ScaleFetcher,
    logger: spin::Mutex<RuntimeLogger>,
    name: String,
}

/// A primitive running on the host backend.
pub type HostMatmul<E = NaiveExecutor> = MatmulPrimitive<HostRuntime, E>;

impl<R: Runtime, E: MatmulExecutor<R>> MatmulPrimitive<R, E> {
    /// Builds a primitive configured from the [global config](GlobalConfig).
    pub fn new(
        engine: R::Engine,
        descriptor: MatmulDescriptor,
        executor: E,
    ) -> Result<Self, MatmulError> {
        Self::from_config(engine, descriptor, executor, GlobalConfig::get())
    }

    /// Builds a primitive with an explicit configuration.
    pub fn from_config(
        engine: R::Engine,
        descriptor: MatmulDescriptor,
        executor: E,
        config: Arc<GlobalConfig>,
    ) -> Result<Self, MatmulError> {
        let operation = OperationConfig::from_descriptor(&descriptor)?;
        let descriptor = descriptor.resolve_any();

        let output_scale = match descriptor.attributes.output_scale {
            OutputScale::Runtime => Some(
                engine
                    .shared(SCALE_SIZE)
                    .map_err(MatmulSetupError::OutputScale)?,
            ),
            OutputScale::Constant(_) => None,
        };

        let scratchpad = match &operation.params {
            ParamsMode::Static(params) if operation.scratch.required => {
                let size = scratchpad_size(
                    params.problem.dst_elements(),
                    operation.scratch.data_type,
                    true,
                );
                let buffer = engine
                    .scratch_allocator()
                    .reserve(size)
                    .map_err(MatmulSetupError::Scratchpad)?;
                Some(Arc::new(buffer))
            }
            _ => None,
        };

        let name = format!("matmul<{}, {}>", R::name(), executor.name());
        let mut logger = RuntimeLogger::from_config(config.clone());
        logger.log_step(format_args!("[{name}] built: {operation:?}"));

        Ok(Self {
            engine,
            descriptor,
            config: operation,
            executor,
            resolved: Mutex::new(None),
            output_scale,
            scratchpad,
            scale: ScaleFetcher::new(config.execution.scale_sync),
            logger: spin::Mutex::new(logger),
            name,
        })
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// The descriptor the primitive was built with, with any layout picked.
    pub fn descriptor(&self) -> &MatmulDescriptor {
        &self.descriptor
    }

    pub fn engine(&self) -> &R::Engine {
        &self.engine
    }

    /// Whether parameters resolved by a call are currently held.
    ///
    /// Only a call that failed before its cleanup leaves them behind, the next call replaces them.
    pub fn has_resolved_params(&self) -> bool {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Executes the matmul on `queue` with the memory bound in `args`.
    ///
    /// Returns once the work is enqueued, or once it completed when the parameters are resolved
    /// at execution.
    pub fn execute(&self, queue: &R::Queue, args: &ExecArgs) -> Result<CallSummary, MatmulError> {
        let mut trace = CallTrace::new(&self.name, &self.logger);

        let result = match &self.config.params {
            ParamsMode::Static(params) => {
                self.run(queue, args, CallParams::Static(params), &mut trace)
            }
            ParamsMode::Runtime => {
                // Held until the work of the call completed: one call at a time owns the slot.
                // A call that panicked only leaves parameters the next resolution replaces.
                let mut slot = self
                    .resolved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                self.run(queue, args, CallParams::Runtime(&mut *slot), &mut trace)
            }
        };

        match result {
            Ok((output_scale, scratchpad_size, dependencies)) => Ok(CallSummary {
                states: trace.done(),
                output_scale,
                scratchpad_size,
                dependencies,
            }),
            Err(err) => {
                trace.fail(&err);
                Err(err)
            }
        }
    }

    fn run(
        &self,
        queue: &R::Queue,
        args: &ExecArgs,
        call_params: CallParams<'_>,
        trace: &mut CallTrace<'_>,
    ) -> Result<(f32, u64, Vec<Dependency>), MatmulError> {
        let src = self.bind(args, ArgKind::Src, &self.descriptor.src)?;
        let weights = self.bind(args, ArgKind::Weights, &self.descriptor.weights)?;
        let dst = self.bind(args, ArgKind::Dst, &self.descriptor.dst)?;
        let bias = match &self.descriptor.bias {
            Some(built) => Some(self.bind(args, ArgKind::Bias, built)?),
            None => None,
        };
        let scale_source = match self.descriptor.attributes.output_scale {
            OutputScale::Runtime => Some(&args.require(ArgKind::AttrOutputScales)?.handle),
            OutputScale::Constant(_) => None,
        };

        let mut slot = None;
        let params = match call_params {
            CallParams::Static(params) => params,
            CallParams::Runtime(resolved) => {
                let resolved = slot.insert(resolved).insert(resolver::resolve(
                    &src.descriptor,
                    &weights.descriptor,
                    &dst.descriptor,
                    bias.as_ref().map(|bias| &bias.descriptor),
                )?);
                trace.enter(CallState::ParamsResolved);
                resolved.params()
            }
        };
        check_extents(params, &src, &weights, &dst, bias.as_ref())?;

        let mut context = CallContext::new(
            queue,
            src,
            weights,
            dst,
            bias,
            &self.descriptor.attributes.post_ops,
            self.output_scale.as_ref(),
            self.scratchpad.clone(),
        );

        let output_scale = match (self.descriptor.attributes.output_scale, scale_source) {
            (OutputScale::Constant(value), _) => value,
            (OutputScale::Runtime, Some(source)) => {
                let value = self.scale.fetch(&self.engine, &mut context, source)?;
                trace.enter(CallState::ScaleReady);
                value
            }
            (OutputScale::Runtime, None) => {
                return Err(MatmulError::MissingArgument(ArgKind::AttrOutputScales));
            }
        };

        let scratchpad_size = scratchpad_size(
            params.problem.dst_elements(),
            self.config.scratch.data_type,
            self.config.scratch.required,
        );

        self.executor.execute(
            &mut context,
            &self.engine,
            params,
            output_scale,
            scratchpad_size,
        )?;
        trace.enter(CallState::Dispatched);

        if let Some(resolved) = slot {
            let waited = DependencyTracker::drain(&context)?;
            log::debug!("{} waited on {waited} dependencies", self.name);
            trace.enter(CallState::Drained);

            *resolved = None;
            trace.enter(CallState::Cleaned);
        }

        Ok((output_scale, scratchpad_size, context.into_dependencies()))
    }

    /// Binds the memory of an argument with the descriptor it is used with.
    fn bind(
        &self,
        args: &ExecArgs,
        kind: ArgKind,
        built: &MemoryDescriptor,
    ) -> Result<BoundArg, MatmulError> {
        let arg = args.require(kind)?;

        let descriptor = match &arg.descriptor {
            None => built.clone(),
            Some(descriptor) => {
                let valid = match self.config.params {
                    ParamsMode::Runtime => built.accepts(descriptor),
                    ParamsMode::Static(_) => built == descriptor,
                };
                if !valid {
                    return Err(MatmulError::invalid_shape(format!(
                        "the {kind:?} descriptor {descriptor:?} doesn't match the primitive's {built:?}"
                    )));
                }
                descriptor.clone()
            }
        };

        Ok(BoundArg::new(arg.handle.clone(), descriptor))
    }
}

/// Where the parameters of a call come from.
enum CallParams<'a> {
    Static(&'a MatmulParams),
    /// The slot holding the parameters resolved by the call.
    Runtime(&'a mut Option<ResolvedParams>),
}

fn check_extents(
    params: &MatmulParams,
    src: &BoundArg,
    weights: &BoundArg,
    dst: &BoundArg,
    bias: Option<&BoundArg>,
) -> Result<(), MatmulError> {
    let problem = params.problem;
    let mut operands = vec![
        (
            "src",
            src,
            params.src.extent_bytes(problem.batch, problem.m, problem.k),
        ),
        (
            "weights",
            weights,
            params.weights.extent_bytes(problem.batch, problem.k, problem.n),
        ),
        (
            "dst",
            dst,
            params.dst.extent_bytes(problem.batch, problem.m, problem.n),
        ),
    ];
    if let (Some(bias), Some(bias_params)) = (bias, &params.bias) {
        operands.push(("bias", bias, bias_params.extent_bytes()));
    }

    for (name, arg, needed) in operands {
        let Some(needed) = needed else {
            return Err(MatmulError::invalid_shape(format!(
                "{name} spans more memory than can be addressed"
            )));
        };
        if arg.handle.size() < needed {
            return Err(MatmulError::invalid_shape(format!(
                "{name} memory holds {} bytes but {needed} are needed",
                arg.handle.size()
            )));
        }
    }

    Ok(())
}
