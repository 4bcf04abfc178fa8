use gemmflow_runtime::server::{IoError, ServerError};
use thiserror::Error;

use super::{ArgKind, DataType, Operand};

/// Errors returned by a matmul primitive, at build time or when executed.
///
/// Every stage of a call is fail-fast: the first error aborts the remaining stages and is returned
/// as is.
#[derive(Error, Clone)]
pub enum MatmulError {
    /// The descriptors don't describe a valid matrix multiplication.
    #[error("Invalid shape: {reason}")]
    InvalidShape { reason: String },

    /// The layout of an operand can't be mapped to a row-major or col-major matrix.
    #[error("Unsupported layout for {operand}: {reason}")]
    UnsupportedLayout { operand: Operand, reason: String },

    /// The copy of the output scale to the host failed.
    #[error("Unable to transfer the output scale to the host\nCaused by:\n  {0}")]
    DeviceTransferError(ServerError),

    /// The executor or the work it enqueued failed.
    #[error("Unable to execute the matmul\nCaused by:\n  {0}")]
    ExecutionError(ServerError),

    /// An argument needed by the call wasn't provided.
    #[error("Missing argument {0:?}")]
    MissingArgument(ArgKind),

    /// The primitive can't be built from its descriptor.
    #[error("Unable to build the matmul primitive: {0}")]
    Setup(MatmulSetupError),
}

/// Reasons a primitive is rejected when built.
#[derive(Error, Debug, Clone)]
pub enum MatmulSetupError {
    /// The combination of element types isn't supported.
    #[error("types src={src}, weights={weights}, dst={dst} are not supported together")]
    TypesUnavailable {
        src: DataType,
        weights: DataType,
        dst: DataType,
    },

    /// The bias type is neither f32 nor the output type.
    #[error("bias of type {bias} can't be added to an output of type {dst}")]
    BiasType { bias: DataType, dst: DataType },

    /// The scratchpad booked at build time couldn't be allocated.
    #[error("scratchpad allocation failed: {0}")]
    Scratchpad(IoError),

    /// The output scale slot couldn't be allocated.
    #[error("output scale allocation failed: {0}")]
    OutputScale(IoError),
}

impl MatmulError {
    pub(crate) fn invalid_shape(reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported_layout(operand: Operand, reason: impl Into<String>) -> Self {
        Self::UnsupportedLayout {
            operand,
            reason: reason.into(),
        }
    }
}

impl From<MatmulSetupError> for MatmulError {
    fn from(value: MatmulSetupError) -> Self {
        Self::Setup(value)
    }
}

impl core::fmt::Debug for MatmulError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}
