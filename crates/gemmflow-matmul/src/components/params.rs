use super::{DataType, MatmulProblem, MatrixLayout, MemoryDescriptor};

/// Where the elements of one matrix operand live in its buffer.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandLayout {
    pub data_type: DataType,
    pub layout: MatrixLayout,
    /// Distance in elements between two rows (row-major) or two columns (col-major).
    pub leading_dim: usize,
    /// Distance in elements between two matrices of the batch.
    pub batch_stride: usize,
}

impl OperandLayout {
    /// Element offset of `(row, col)` in matrix `batch`.
    pub fn offset(&self, batch: usize, row: usize, col: usize) -> usize {
        let in_matrix = match self.layout {
            MatrixLayout::RowMajor => row * self.leading_dim + col,
            MatrixLayout::ColMajor => col * self.leading_dim + row,
        };
        batch * self.batch_stride + in_matrix
    }

    /// Number of elements spanned by a `rows` x `cols` matrix, from its first element to its last.
    ///
    /// `None` when the span doesn't fit in `usize`.
    pub fn matrix_extent(&self, rows: usize, cols: usize) -> Option<usize> {
        if rows == 0 || cols == 0 {
            return Some(0);
        }
        let (outer, inner) = match self.layout {
            MatrixLayout::RowMajor => (rows, cols),
            MatrixLayout::ColMajor => (cols, rows),
        };
        (outer - 1)
            .checked_mul(self.leading_dim)?
            .checked_add(inner)
    }

    /// Number of bytes spanned by `batch` matrices of `rows` x `cols`, `None` on overflow.
    pub fn extent_bytes(&self, batch: usize, rows: usize, cols: usize) -> Option<u64> {
        let matrix = self.matrix_extent(rows, cols)?;
        if batch == 0 || matrix == 0 {
            return Some(0);
        }
        let elements = (batch - 1)
            .checked_mul(self.batch_stride)?
            .checked_add(matrix)?;
        (elements as u64).checked_mul(self.data_type.size() as u64)
    }
}

/// How the bias is broadcast over the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BiasParams {
    pub data_type: DataType,
    /// Bit `i` is set when dimension `i` of the bias follows the output instead of being broadcast.
    pub mask: u32,
    /// Strides of the bias, in elements, with the batch dimension first when batched.
    pub strides: Vec<usize>,
    pub shape: Vec<usize>,
}

impl BiasParams {
    /// Element offset of the bias value added to output `(batch, row, col)`.
    pub fn offset(&self, batch: usize, row: usize, col: usize) -> usize {
        let index: &[usize] = match self.strides.len() {
            3 => &[batch, row, col],
            _ => &[row, col],
        };

        index
            .iter()
            .zip(self.strides.iter())
            .enumerate()
            .filter(|(dim, _)| self.mask & (1 << dim) != 0)
            .map(|(_, (index, stride))| index * stride)
            .sum()
    }

    /// Number of bytes spanned by the bias, `None` on overflow.
    pub fn extent_bytes(&self) -> Option<u64> {
        if self.shape.contains(&0) {
            return Some(0);
        }
        let last = self
            .shape
            .iter()
            .zip(self.strides.iter())
            .try_fold(0usize, |acc, (dim, stride)| {
                (dim - 1).checked_mul(*stride)?.checked_add(acc)
            })?;
        (last as u64 + 1).checked_mul(self.data_type.size() as u64)
    }
}

/// Every shape, stride and layout the executor needs, fully known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatmulParams {
    pub problem: MatmulProblem,
    pub src: OperandLayout,
    pub weights: OperandLayout,
    pub dst: OperandLayout,
    pub bias: Option<BiasParams>,
}

/// Parameters resolved at execution from the descriptors of one call.
///
/// Only created by the [resolver](crate::resolver) for primitives whose shapes are only known at
/// execution, and discarded once the work of the call completed.
#[derive(Debug)]
pub struct ResolvedParams {
    params: MatmulParams,
    descriptors: Vec<MemoryDescriptor>,
}

impl ResolvedParams {
    pub(crate) fn new(params: MatmulParams, descriptors: Vec<MemoryDescriptor>) -> Self {
        Self {
            params,
            descriptors,
        }
    }

    pub fn params(&self) -> &MatmulParams {
        &self.params
    }

    /// The call descriptors the parameters were derived from.
    pub fn descriptors(&self) -> &[MemoryDescriptor] {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn col_major_offsets() {
        let layout = OperandLayout::new(DataType::F32, MatrixLayout::ColMajor, 4, 16);

        assert_eq!(layout.offset(1, 2, 3), 16 + 3 * 4 + 2);
        assert_eq!(layout.matrix_extent(4, 4), Some(16));
        assert_eq!(layout.extent_bytes(2, 4, 4), Some(32 * 4));
    }

    #[test]
    fn bias_broadcasts_masked_dims() {
        let bias = BiasParams {
            data_type: DataType::F32,
            mask: 0b10,
            strides: vec![8, 1],
            shape: vec![1, 8],
        };

        assert_eq!(bias.offset(0, 5, 3), 3);
        assert_eq!(bias.extent_bytes(), Some(32));
    }

    #[test]
    fn extents_past_the_address_space_are_none() {
        let layout = OperandLayout::new(DataType::F32, MatrixLayout::RowMajor, usize::MAX / 2, 0);

        assert_eq!(layout.matrix_extent(3, 8), None);
        assert_eq!(layout.extent_bytes(1, 3, 8), None);

        let wide = OperandLayout::new(DataType::F32, MatrixLayout::RowMajor, 8, usize::MAX / 4);
        assert_eq!(wide.matrix_extent(3, 8), Some(24));
        assert_eq!(wide.extent_bytes(2, 3, 8), None);

        let bias = BiasParams {
            data_type: DataType::F32,
            mask: 0b11,
            strides: vec![usize::MAX / 2, 1],
            shape: vec![3, 8],
        };
        assert_eq!(bias.extent_bytes(), None);
    }
}
