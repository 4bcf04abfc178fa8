use crate::components::DataType;

/// Bytes of scratchpad a call needs: one element of `data_type` per output element when
/// `required`, nothing otherwise.
///
/// Only computes the size, allocation is left to the executor and the engine's allocator.
pub fn scratchpad_size(dst_elements: u64, data_type: DataType, required: bool) -> u64 {
    match required {
        true => dst_elements.saturating_mul(data_type.size() as u64),
        false => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_scales_with_type() {
        assert_eq!(scratchpad_size(32 * 128, DataType::F32, true), 32 * 128 * 4);
        assert_eq!(scratchpad_size(10, DataType::F16, true), 20);
    }

    #[test]
    fn not_required_is_zero() {
        for elements in [0, 1, 4096] {
            assert_eq!(scratchpad_size(elements, DataType::S32, false), 0);
        }
    }
}
