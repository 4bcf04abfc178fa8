//! Derivation of the parameters of a matmul from the memory descriptors of its operands.

use crate::components::{
    BiasParams, LayoutTag, MatmulError, MatmulParams, MatmulProblem, MatrixLayout,
    MemoryDescriptor, Operand, OperandLayout, RUNTIME_DIM, ResolvedParams,
};

/// Resolves the parameters of a call from the descriptors it was given.
///
/// Only used by primitives whose shapes are known at execution. The descriptors are kept in the
/// returned state for the duration of the call.
pub fn resolve(
    src: &MemoryDescriptor,
    weights: &MemoryDescriptor,
    dst: &MemoryDescriptor,
    bias: Option<&MemoryDescriptor>,
) -> Result<ResolvedParams, MatmulError> {
    let params = derive_params(src, weights, dst, bias)?;

    let mut descriptors = vec![src.clone(), weights.clone(), dst.clone()];
    descriptors.extend(bias.cloned());

    Ok(ResolvedParams::new(params, descriptors))
}

/// Derives shapes, strides and layouts from fully defined descriptors.
pub(crate) fn derive_params(
    src: &MemoryDescriptor,
    weights: &MemoryDescriptor,
    dst: &MemoryDescriptor,
    bias: Option<&MemoryDescriptor>,
) -> Result<MatmulParams, MatmulError> {
    let rank = src.rank();
    if !(2..=3).contains(&rank) || weights.rank() != rank || dst.rank() != rank {
        return Err(MatmulError::invalid_shape(format!(
            "src, weights and dst must all have rank 2 or 3, got {}, {} and {}",
            src.rank(),
            weights.rank(),
            dst.rank()
        )));
    }

    let src_shape = dims(Operand::Src, src)?;
    let weights_shape = dims(Operand::Weights, weights)?;
    let dst_shape = dims(Operand::Dst, dst)?;

    let (batch, m, k) = split(&src_shape);
    let (weights_batch, weights_k, n) = split(&weights_shape);

    if weights_k != k {
        return Err(MatmulError::invalid_shape(format!(
            "inner dimensions mismatch: src has k={k}, weights has k={weights_k}"
        )));
    }
    if weights_batch != batch {
        return Err(MatmulError::invalid_shape(format!(
            "batch mismatch: src has {batch} matrices, weights has {weights_batch}"
        )));
    }

    let problem = MatmulProblem::new(batch, m, n, k);
    let expected = problem.shape(Operand::Dst, rank);
    if dst_shape != expected {
        return Err(MatmulError::invalid_shape(format!(
            "dst has shape {dst_shape:?}, expected {expected:?}"
        )));
    }

    Ok(MatmulParams {
        problem,
        src: operand_layout(Operand::Src, src, batch, m, k)?,
        weights: operand_layout(Operand::Weights, weights, batch, k, n)?,
        dst: operand_layout(Operand::Dst, dst, batch, m, n)?,
        bias: bias
            .map(|bias| bias_params(bias, &dst_shape))
            .transpose()?,
    })
}

/// The dimensions of a descriptor that must be fully defined by now.
fn dims(operand: Operand, desc: &MemoryDescriptor) -> Result<Vec<usize>, MatmulError> {
    if desc.layout == LayoutTag::Any {
        return Err(MatmulError::unsupported_layout(
            operand,
            "the layout must be strided at execution",
        ));
    }
    if desc.has_runtime_dims() {
        return Err(MatmulError::invalid_shape(format!(
            "{operand} still has runtime dimensions at execution"
        )));
    }
    if desc.strides.len() != desc.rank() {
        return Err(MatmulError::invalid_shape(format!(
            "{operand} has {} strides for {} dimensions",
            desc.strides.len(),
            desc.rank()
        )));
    }

    desc.shape
        .iter()
        .map(|dim| {
            usize::try_from(*dim).map_err(|_| {
                MatmulError::invalid_shape(format!("{operand} has a negative dimension: {dim}"))
            })
        })
        .collect()
}

fn split(shape: &[usize]) -> (usize, usize, usize) {
    match shape {
        [batch, rows, cols] => (*batch, *rows, *cols),
        [rows, cols] => (1, *rows, *cols),
        _ => unreachable!("Ranks are checked before splitting"),
    }
}

fn strides(operand: Operand, desc: &MemoryDescriptor) -> Result<Vec<usize>, MatmulError> {
    desc.strides
        .iter()
        .map(|stride| match *stride {
            RUNTIME_DIM => unreachable!("Runtime strides are checked before"),
            stride => usize::try_from(stride).map_err(|_| {
                MatmulError::unsupported_layout(operand, format!("negative stride {stride}"))
            }),
        })
        .collect()
}

fn operand_layout(
    operand: Operand,
    desc: &MemoryDescriptor,
    batch: usize,
    rows: usize,
    cols: usize,
) -> Result<OperandLayout, MatmulError> {
    let strides = strides(operand, desc)?;
    let rank = strides.len();
    let (row_stride, col_stride) = (strides[rank - 2], strides[rank - 1]);

    let (layout, leading_dim) = if col_stride == 1 && row_stride >= cols.max(1) {
        (MatrixLayout::RowMajor, row_stride)
    } else if row_stride == 1 && col_stride >= rows.max(1) {
        (MatrixLayout::ColMajor, col_stride)
    } else {
        return Err(MatmulError::unsupported_layout(
            operand,
            format!("strides {:?} are neither row-major nor col-major", &strides[rank - 2..]),
        ));
    };

    let batch_stride = match rank {
        3 => strides[0],
        _ => 0,
    };
    let layout = OperandLayout::new(desc.data_type, layout, leading_dim, batch_stride);

    let (Some(matrix), Some(_)) = (
        layout.matrix_extent(rows, cols),
        layout.extent_bytes(batch, rows, cols),
    ) else {
        return Err(MatmulError::unsupported_layout(
            operand,
            format!("strides {strides:?} span more memory than can be addressed"),
        ));
    };
    if batch > 1 && batch_stride < matrix {
        return Err(MatmulError::unsupported_layout(
            operand,
            format!("batch stride {batch_stride} makes matrices overlap"),
        ));
    }

    Ok(layout)
}

fn bias_params(bias: &MemoryDescriptor, dst_shape: &[usize]) -> Result<BiasParams, MatmulError> {
    if bias.rank() != dst_shape.len() {
        return Err(MatmulError::invalid_shape(format!(
            "bias has rank {}, dst has rank {}",
            bias.rank(),
            dst_shape.len()
        )));
    }

    let shape = dims(Operand::Bias, bias)?;
    let mut mask = 0;

    for (dim, (bias_dim, dst_dim)) in shape.iter().zip(dst_shape.iter()).enumerate() {
        match *bias_dim {
            1 => {}
            bias_dim if bias_dim == *dst_dim => mask |= 1 << dim,
            _ => {
                return Err(MatmulError::invalid_shape(format!(
                    "bias shape {shape:?} can't be broadcast to dst shape {dst_shape:?}"
                )));
            }
        }
    }

    let params = BiasParams {
        data_type: bias.data_type,
        mask,
        strides: strides(Operand::Bias, bias)?,
        shape,
    };
    if params.extent_bytes().is_none() {
        return Err(MatmulError::unsupported_layout(
            Operand::Bias,
            format!(
                "strides {:?} span more memory than can be addressed",
                params.strides
            ),
        ));
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DataType;

    fn f32(shape: &[usize]) -> MemoryDescriptor {
        MemoryDescriptor::contiguous(DataType::F32, shape)
    }

    #[test]
    fn resolves_a_plain_matmul() {
        let resolved = resolve(&f32(&[32, 64]), &f32(&[64, 128]), &f32(&[32, 128]), None).unwrap();
        let params = resolved.params();

        assert_eq!(params.problem, MatmulProblem::new(1, 32, 128, 64));
        assert_eq!(params.src.layout, MatrixLayout::RowMajor);
        assert_eq!(params.src.leading_dim, 64);
        assert_eq!(params.dst.leading_dim, 128);
        assert_eq!(resolved.descriptors().len(), 3);
    }

    #[test]
    fn inner_dimension_mismatch_is_invalid() {
        let result = resolve(&f32(&[32, 64]), &f32(&[63, 128]), &f32(&[32, 128]), None);

        assert!(matches!(result, Err(MatmulError::InvalidShape { .. })));
    }

    #[test]
    fn wrong_dst_is_invalid() {
        let result = resolve(&f32(&[4, 8]), &f32(&[8, 2]), &f32(&[2, 4]), None);

        assert!(matches!(result, Err(MatmulError::InvalidShape { .. })));
    }

    #[test]
    fn batches_are_not_broadcast() {
        let result = resolve(
            &f32(&[2, 4, 8]),
            &f32(&[1, 8, 2]),
            &f32(&[2, 4, 2]),
            None,
        );

        assert!(matches!(result, Err(MatmulError::InvalidShape { .. })));
    }

    #[test]
    fn transposed_weights_are_col_major() {
        let weights = MemoryDescriptor::with_strides(DataType::F32, &[8, 2], &[1, 8]);

        let params = derive_params(&f32(&[4, 8]), &weights, &f32(&[4, 2]), None).unwrap();

        assert_eq!(params.weights.layout, MatrixLayout::ColMajor);
        assert_eq!(params.weights.leading_dim, 8);
    }

    #[test]
    fn padded_rows_are_accepted() {
        let src = MemoryDescriptor::with_strides(DataType::F32, &[4, 8], &[16, 1]);

        let params = derive_params(&src, &f32(&[8, 2]), &f32(&[4, 2]), None).unwrap();

        assert_eq!(params.src.leading_dim, 16);
    }

    #[test]
    fn scattered_strides_are_unsupported() {
        let src = MemoryDescriptor::with_strides(DataType::F32, &[4, 8], &[16, 2]);

        let result = derive_params(&src, &f32(&[8, 2]), &f32(&[4, 2]), None);

        assert!(matches!(
            result,
            Err(MatmulError::UnsupportedLayout {
                operand: Operand::Src,
                ..
            })
        ));
    }

    #[test]
    fn strides_past_the_address_space_are_unsupported() {
        let src = MemoryDescriptor::with_strides(DataType::F32, &[3, 8], &[i64::MAX as usize, 1]);

        let result = resolve(&src, &f32(&[8, 2]), &f32(&[3, 2]), None);

        assert!(matches!(
            result,
            Err(MatmulError::UnsupportedLayout {
                operand: Operand::Src,
                ..
            })
        ));
    }

    #[test]
    fn huge_batch_strides_are_unsupported() {
        let weights =
            MemoryDescriptor::with_strides(DataType::F32, &[3, 8, 2], &[i64::MAX as usize, 2, 1]);

        let result = derive_params(&f32(&[3, 4, 8]), &weights, &f32(&[3, 4, 2]), None);

        assert!(matches!(
            result,
            Err(MatmulError::UnsupportedLayout {
                operand: Operand::Weights,
                ..
            })
        ));
    }

    #[test]
    fn huge_bias_strides_are_unsupported() {
        let bias = MemoryDescriptor::with_strides(DataType::F32, &[4, 2], &[i64::MAX as usize, 1]);

        let result = derive_params(&f32(&[4, 8]), &f32(&[8, 2]), &f32(&[4, 2]), Some(&bias));

        assert!(matches!(
            result,
            Err(MatmulError::UnsupportedLayout {
                operand: Operand::Bias,
                ..
            })
        ));
    }

    #[test]
    fn overlapping_batches_are_unsupported() {
        let src = MemoryDescriptor::with_strides(DataType::F32, &[2, 4, 8], &[16, 8, 1]);

        let result = derive_params(&src, &f32(&[2, 8, 2]), &f32(&[2, 4, 2]), None);

        assert!(matches!(result, Err(MatmulError::UnsupportedLayout { .. })));
    }

    #[test]
    fn any_layout_is_unsupported_at_execution() {
        let src = MemoryDescriptor::any(DataType::F32, &[4, 8]);

        let result = resolve(&src, &f32(&[8, 2]), &f32(&[4, 2]), None);

        assert!(matches!(result, Err(MatmulError::UnsupportedLayout { .. })));
    }

    #[test]
    fn runtime_dims_left_are_invalid() {
        let result = resolve(
            &MemoryDescriptor::runtime(DataType::F32, 2),
            &f32(&[8, 2]),
            &f32(&[4, 2]),
            None,
        );

        assert!(matches!(result, Err(MatmulError::InvalidShape { .. })));
    }

    #[test]
    fn bias_mask_follows_dst() {
        let params = derive_params(
            &f32(&[2, 4, 8]),
            &f32(&[2, 8, 3]),
            &f32(&[2, 4, 3]),
            Some(&f32(&[1, 1, 3])),
        )
        .unwrap();

        let bias = params.bias.unwrap();
        assert_eq!(bias.mask, 0b100);
        assert_eq!(bias.offset(1, 2, 2), 2);
    }

    #[test]
    fn bias_must_broadcast() {
        let result = derive_params(
            &f32(&[4, 8]),
            &f32(&[8, 3]),
            &f32(&[4, 3]),
            Some(&f32(&[1, 2])),
        );

        assert!(matches!(result, Err(MatmulError::InvalidShape { .. })));
    }
}
