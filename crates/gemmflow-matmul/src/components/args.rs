use gemmflow_runtime::server::Handle;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{MatmulError, MemoryDescriptor};

/// Role of a memory argument of a matmul call.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ArgKind {
    Src,
    Weights,
    Bias,
    Dst,
    /// Device memory holding the output scale, one f32.
    AttrOutputScales,
}

/// Memory bound to an argument, with an optional descriptor overriding the primitive's.
#[derive(new, Clone, Debug)]
pub struct MemoryArg {
    pub handle: Handle,
    pub descriptor: Option<MemoryDescriptor>,
}

/// The memory arguments of one call.
#[derive(Clone, Debug, Default)]
pub struct ExecArgs {
    args: HashMap<ArgKind, MemoryArg>,
}

impl ExecArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds memory described by `descriptor`.
    pub fn with(mut self, kind: ArgKind, handle: Handle, descriptor: MemoryDescriptor) -> Self {
        self.args
            .insert(kind, MemoryArg::new(handle, Some(descriptor)));
        self
    }

    /// Binds memory described by the descriptor the primitive was built with.
    pub fn with_handle(mut self, kind: ArgKind, handle: Handle) -> Self {
        self.args.insert(kind, MemoryArg::new(handle, None));
        self
    }

    pub fn get(&self, kind: ArgKind) -> Option<&MemoryArg> {
        self.args.get(&kind)
    }

    /// The argument bound to `kind`, or a [missing argument](MatmulError::MissingArgument) error.
    pub fn require(&self, kind: ArgKind) -> Result<&MemoryArg, MatmulError> {
        self.get(kind).ok_or(MatmulError::MissingArgument(kind))
    }
}
