use serde::{Deserialize, Serialize};

use super::{DataType, MatmulError, MatmulParams, MatmulSetupError, MemoryDescriptor};
use crate::resolver;

/// Factor applied to the product of src and weights.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum OutputScale {
    /// Known when the primitive is built.
    Constant(f32),
    /// Read from device memory at every call, see [ArgKind::AttrOutputScales](super::ArgKind).
    Runtime,
}

impl Default for OutputScale {
    fn default() -> Self {
        Self::Constant(1.0)
    }
}

/// Operation applied to the output after the product and the bias.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PostOp {
    /// Accumulates into the previous content of dst: `dst = scale * dst + result`.
    Sum { scale: f32 },
    /// `max(0, x)`.
    Relu,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatmulAttributes {
    pub output_scale: OutputScale,
    pub post_ops: Vec<PostOp>,
}

/// Describes the matmul a primitive computes: `dst = post_ops(scale * src @ weights + bias)`.
#[derive(Clone, Debug, PartialEq)]
pub struct MatmulDescriptor {
    pub src: MemoryDescriptor,
    pub weights: MemoryDescriptor,
    pub bias: Option<MemoryDescriptor>,
    pub dst: MemoryDescriptor,
    pub attributes: MatmulAttributes,
}

impl MatmulDescriptor {
    pub fn new(src: MemoryDescriptor, weights: MemoryDescriptor, dst: MemoryDescriptor) -> Self {
        Self {
            src,
            weights,
            bias: None,
            dst,
            attributes: MatmulAttributes::default(),
        }
    }

    pub fn with_bias(mut self, bias: MemoryDescriptor) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_output_scale(mut self, output_scale: OutputScale) -> Self {
        self.attributes.output_scale = output_scale;
        self
    }

    pub fn with_post_op(mut self, post_op: PostOp) -> Self {
        self.attributes.post_ops.push(post_op);
        self
    }

    /// The descriptors with any [any](super::LayoutTag::Any) layout resolved.
    pub(crate) fn resolve_any(&self) -> Self {
        Self {
            src: self.src.resolve_any(),
            weights: self.weights.resolve_any(),
            bias: self.bias.as_ref().map(MemoryDescriptor::resolve_any),
            dst: self.dst.resolve_any(),
            attributes: self.attributes.clone(),
        }
    }

    fn has_runtime_dims(&self) -> bool {
        self.src.has_runtime_dims()
            || self.weights.has_runtime_dims()
            || self.dst.has_runtime_dims()
            || self.bias.as_ref().is_some_and(MemoryDescriptor::has_runtime_dims)
    }
}

/// When the parameters of a primitive are known.
///
/// Drives both the resolution of the parameters at the start of a call and the cleanup at its
/// end, so one never happens without the other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamsMode {
    /// Derived once when the primitive is built.
    Static(MatmulParams),
    /// Resolved from the descriptors of every call, then discarded.
    Runtime,
}

/// The scratchpad a primitive needs.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchSpec {
    pub data_type: DataType,
    pub required: bool,
}

/// Configuration of a primitive, fixed once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationConfig {
    pub with_bias: bool,
    pub params: ParamsMode,
    pub scratch: ScratchSpec,
}

impl OperationConfig {
    /// Validates the descriptor and derives the configuration.
    ///
    /// Descriptors without runtime dimensions get their parameters derived right away.
    pub fn from_descriptor(descriptor: &MatmulDescriptor) -> Result<Self, MatmulError> {
        check_types(descriptor)?;

        let ranks = [
            descriptor.src.rank(),
            descriptor.weights.rank(),
            descriptor.dst.rank(),
        ];
        if ranks.iter().any(|rank| *rank != ranks[0]) || !(2..=3).contains(&ranks[0]) {
            return Err(MatmulError::invalid_shape(format!(
                "src, weights and dst must all have rank 2 or 3, got {ranks:?}"
            )));
        }

        let params = match descriptor.has_runtime_dims() {
            true => ParamsMode::Runtime,
            false => {
                let descriptor = descriptor.resolve_any();
                ParamsMode::Static(resolver::derive_params(
                    &descriptor.src,
                    &descriptor.weights,
                    &descriptor.dst,
                    descriptor.bias.as_ref(),
                )?)
            }
        };

        let accumulation = descriptor.src.data_type.accumulation();

        Ok(Self {
            with_bias: descriptor.bias.is_some(),
            params,
            scratch: ScratchSpec::new(accumulation, descriptor.dst.data_type != accumulation),
        })
    }

    pub fn has_runtime_params(&self) -> bool {
        matches!(self.params, ParamsMode::Runtime)
    }
}

fn check_types(descriptor: &MatmulDescriptor) -> Result<(), MatmulError> {
    let src = descriptor.src.data_type;
    let weights = descriptor.weights.data_type;
    let dst = descriptor.dst.data_type;

    let supported = match src {
        DataType::F32 | DataType::F16 | DataType::BF16 => weights == src && dst.is_float(),
        DataType::S8 | DataType::U8 => weights == DataType::S8,
        DataType::S32 => false,
    };
    if !supported {
        return Err(MatmulSetupError::TypesUnavailable { src, weights, dst }.into());
    }

    if let Some(bias) = &descriptor.bias {
        if bias.data_type != DataType::F32 && bias.data_type != dst {
            return Err(MatmulSetupError::BiasType {
                bias: bias.data_type,
                dst,
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(src: DataType, weights: DataType, dst: DataType) -> MatmulDescriptor {
        MatmulDescriptor::new(
            MemoryDescriptor::contiguous(src, &[4, 8]),
            MemoryDescriptor::contiguous(weights, &[8, 2]),
            MemoryDescriptor::contiguous(dst, &[4, 2]),
        )
    }

    #[test]
    fn defined_descriptors_build_static_params() {
        let config = OperationConfig::from_descriptor(&desc(
            DataType::F32,
            DataType::F32,
            DataType::F32,
        ))
        .unwrap();

        assert!(!config.has_runtime_params());
        assert!(!config.scratch.required);
        assert!(!config.with_bias);
    }

    #[test]
    fn runtime_dims_defer_params() {
        let descriptor = MatmulDescriptor::new(
            MemoryDescriptor::runtime(DataType::F16, 2),
            MemoryDescriptor::runtime(DataType::F16, 2),
            MemoryDescriptor::runtime(DataType::F16, 2),
        );

        let config = OperationConfig::from_descriptor(&descriptor).unwrap();

        assert_eq!(config.params, ParamsMode::Runtime);
        assert_eq!(config.scratch, ScratchSpec::new(DataType::F32, true));
    }

    #[test]
    fn int8_accumulates_in_s32() {
        let config =
            OperationConfig::from_descriptor(&desc(DataType::U8, DataType::S8, DataType::S32))
                .unwrap();

        assert_eq!(config.scratch, ScratchSpec::new(DataType::S32, false));
    }

    #[test]
    fn mixed_float_inputs_are_rejected() {
        let result =
            OperationConfig::from_descriptor(&desc(DataType::F32, DataType::F16, DataType::F32));

        assert!(matches!(
            result,
            Err(MatmulError::Setup(MatmulSetupError::TypesUnavailable { .. }))
        ));
    }

    #[test]
    fn bias_type_must_match() {
        let descriptor = desc(DataType::F16, DataType::F16, DataType::F16)
            .with_bias(MemoryDescriptor::contiguous(DataType::S8, &[1, 2]));

        assert!(matches!(
            OperationConfig::from_descriptor(&descriptor),
            Err(MatmulError::Setup(MatmulSetupError::BiasType { .. }))
        ));
    }

    #[test]
    fn rank_mismatch_is_invalid() {
        let descriptor = MatmulDescriptor::new(
            MemoryDescriptor::contiguous(DataType::F32, &[2, 4, 8]),
            MemoryDescriptor::contiguous(DataType::F32, &[8, 2]),
            MemoryDescriptor::contiguous(DataType::F32, &[2, 4, 2]),
        );

        assert!(matches!(
            OperationConfig::from_descriptor(&descriptor),
            Err(MatmulError::InvalidShape { .. })
        ));
    }
}
