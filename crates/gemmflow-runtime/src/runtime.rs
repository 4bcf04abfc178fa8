use crate::{
    engine::{Engine, HostEngine},
    native::NativePointerAccessor,
    queue::{DeviceQueue, HostQueue},
};

/// The context type of the tasks running on the queues of a runtime.
pub type RuntimeContext<R> = <<R as Runtime>::Queue as DeviceQueue>::Context;

/// Runtime for a backend: ties an engine to the queues it creates.
pub trait Runtime: Send + Sync + 'static + core::fmt::Debug {
    /// The engine of the backend, able to resolve native pointers inside its tasks.
    type Engine: Engine<Queue = Self::Queue>
        + NativePointerAccessor<<Self::Queue as DeviceQueue>::Context>;

    /// The device queue of the backend.
    type Queue: DeviceQueue;

    /// The name of the runtime.
    fn name() -> &'static str;
}

/// Runtime of the host reference backend.
#[derive(Debug)]
pub struct HostRuntime;

impl Runtime for HostRuntime {
    type Engine = HostEngine;
    type Queue = HostQueue;

    fn name() -> &'static str {
        "host"
    }
}
