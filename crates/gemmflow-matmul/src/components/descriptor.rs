use super::DataType;

/// A dimension or a stride of a [memory descriptor](MemoryDescriptor).
pub type Dim = i64;

/// Marks a dimension or a stride only known when the primitive is executed.
pub const RUNTIME_DIM: Dim = i64::MIN;

/// How the memory of an operand is laid out.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum LayoutTag {
    /// Let the primitive pick the layout. Only valid when building a primitive.
    Any,
    /// The layout is given by the strides.
    Strided,
}

/// Shape, strides and element type of a matmul operand.
#[derive(Hash, Eq, PartialEq, Debug, Clone)]
pub struct MemoryDescriptor {
    /// Element type.
    pub data_type: DataType,
    /// Dimensions, outermost first.
    pub shape: Vec<Dim>,
    /// Stride of each dimension, in elements.
    pub strides: Vec<Dim>,
    /// Layout of the memory.
    pub layout: LayoutTag,
}

impl MemoryDescriptor {
    /// A dense row-major descriptor.
    pub fn contiguous(data_type: DataType, shape: &[usize]) -> Self {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1].max(1) as Dim;
        }

        Self {
            data_type,
            shape: shape.iter().map(|dim| *dim as Dim).collect(),
            strides,
            layout: LayoutTag::Strided,
        }
    }

    /// A descriptor with explicit strides.
    pub fn with_strides(data_type: DataType, shape: &[usize], strides: &[usize]) -> Self {
        Self {
            data_type,
            shape: shape.iter().map(|dim| *dim as Dim).collect(),
            strides: strides.iter().map(|stride| *stride as Dim).collect(),
            layout: LayoutTag::Strided,
        }
    }

    /// A descriptor of the given rank whose shape and strides are provided at execution.
    pub fn runtime(data_type: DataType, rank: usize) -> Self {
        Self {
            data_type,
            shape: vec![RUNTIME_DIM; rank],
            strides: vec![RUNTIME_DIM; rank],
            layout: LayoutTag::Strided,
        }
    }

    /// A descriptor with a known shape whose layout is picked by the primitive.
    pub fn any(data_type: DataType, shape: &[usize]) -> Self {
        Self {
            data_type,
            shape: shape.iter().map(|dim| *dim as Dim).collect(),
            strides: vec![RUNTIME_DIM; shape.len()],
            layout: LayoutTag::Any,
        }
    }

    /// The number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Whether a dimension or a stride is only known at execution.
    pub fn has_runtime_dims(&self) -> bool {
        self.shape.contains(&RUNTIME_DIM)
            || (self.layout == LayoutTag::Strided && self.strides.contains(&RUNTIME_DIM))
    }

    /// Whether the descriptor fully describes its memory.
    pub fn is_defined(&self) -> bool {
        self.layout == LayoutTag::Strided && !self.has_runtime_dims()
    }

    /// Product of the dimensions, none while a dimension is only known at execution.
    pub fn element_count(&self) -> Option<u64> {
        self.shape.iter().try_fold(1u64, |count, dim| match *dim {
            RUNTIME_DIM => None,
            dim => Some(count * dim.max(0) as u64),
        })
    }

    /// Resolves an [any](LayoutTag::Any) layout to dense row-major strides.
    ///
    /// Descriptors that are already strided or have runtime dimensions are returned unchanged.
    pub fn resolve_any(&self) -> Self {
        if self.layout != LayoutTag::Any || self.shape.contains(&RUNTIME_DIM) {
            return self.clone();
        }

        let shape = self
            .shape
            .iter()
            .map(|dim| (*dim).max(0) as usize)
            .collect::<Vec<_>>();
        Self::contiguous(self.data_type, &shape)
    }

    /// Whether `other` can stand for this descriptor at execution: same type and rank, and the
    /// same value for every dimension known at build time.
    pub fn accepts(&self, other: &MemoryDescriptor) -> bool {
        self.data_type == other.data_type
            && self.rank() == other.rank()
            && self
                .shape
                .iter()
                .zip(other.shape.iter())
                .all(|(expected, actual)| *expected == RUNTIME_DIM || expected == actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_strides_are_row_major() {
        let desc = MemoryDescriptor::contiguous(DataType::F32, &[2, 3, 4]);

        assert_eq!(desc.strides, vec![12, 4, 1]);
        assert_eq!(desc.element_count(), Some(24));
        assert!(desc.is_defined());
    }

    #[test]
    fn runtime_descriptor_is_not_defined() {
        let desc = MemoryDescriptor::runtime(DataType::F16, 2);

        assert!(desc.has_runtime_dims());
        assert!(!desc.is_defined());
        assert_eq!(desc.element_count(), None);
    }

    #[test]
    fn any_layout_resolves_to_contiguous() {
        let desc = MemoryDescriptor::any(DataType::S8, &[8, 16]);

        assert!(!desc.has_runtime_dims());
        assert_eq!(
            desc.resolve_any(),
            MemoryDescriptor::contiguous(DataType::S8, &[8, 16])
        );
    }

    #[test]
    fn accepts_checks_known_dims_only() {
        let mut partial = MemoryDescriptor::runtime(DataType::F32, 2);
        partial.shape[1] = 64;

        assert!(partial.accepts(&MemoryDescriptor::contiguous(DataType::F32, &[32, 64])));
        assert!(!partial.accepts(&MemoryDescriptor::contiguous(DataType::F32, &[32, 63])));
        assert!(!partial.accepts(&MemoryDescriptor::contiguous(DataType::F16, &[32, 64])));
    }
}
