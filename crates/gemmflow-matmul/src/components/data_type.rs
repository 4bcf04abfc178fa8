use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Element type of a matmul operand.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit float.
    F32,
    /// 16-bit float.
    F16,
    /// 16-bit brain float.
    BF16,
    /// 32-bit signed integer.
    S32,
    /// 8-bit signed integer.
    S8,
    /// 8-bit unsigned integer.
    U8,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::S32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::S8 | DataType::U8 => 1,
        }
    }

    /// Whether the type is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F16 | DataType::BF16)
    }

    /// The type products of this type are accumulated in.
    pub fn accumulation(&self) -> DataType {
        match self.is_float() {
            true => DataType::F32,
            false => DataType::S32,
        }
    }

    /// Reads the element at `index` from a dense buffer of this type.
    pub(crate) fn read(&self, bytes: &[u8], index: usize) -> f64 {
        let start = index * self.size();
        let bytes = &bytes[start..start + self.size()];

        match self {
            DataType::F32 => bytemuck::pod_read_unaligned::<f32>(bytes) as f64,
            DataType::F16 => bytemuck::pod_read_unaligned::<f16>(bytes).to_f64(),
            DataType::BF16 => bytemuck::pod_read_unaligned::<bf16>(bytes).to_f64(),
            DataType::S32 => bytemuck::pod_read_unaligned::<i32>(bytes) as f64,
            DataType::S8 => bytes[0] as i8 as f64,
            DataType::U8 => bytes[0] as f64,
        }
    }

    /// Writes `value` at `index`, rounding and saturating for integer types.
    pub(crate) fn write(&self, bytes: &mut [u8], index: usize, value: f64) {
        let start = index * self.size();
        let bytes = &mut bytes[start..start + self.size()];

        match self {
            DataType::F32 => bytes.copy_from_slice(bytemuck::bytes_of(&(value as f32))),
            DataType::F16 => bytes.copy_from_slice(bytemuck::bytes_of(&f16::from_f64(value))),
            DataType::BF16 => bytes.copy_from_slice(bytemuck::bytes_of(&bf16::from_f64(value))),
            // Float to int `as` casts saturate.
            DataType::S32 => bytes.copy_from_slice(bytemuck::bytes_of(&(value.round() as i32))),
            DataType::S8 => bytes[0] = value.round() as i8 as u8,
            DataType::U8 => bytes[0] = value.round() as u8,
        }
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::S32 => "s32",
            DataType::S8 => "s8",
            DataType::U8 => "u8",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulation_types() {
        assert_eq!(DataType::BF16.accumulation(), DataType::F32);
        assert_eq!(DataType::U8.accumulation(), DataType::S32);
        assert_eq!(DataType::S32.accumulation(), DataType::S32);
    }

    #[test]
    fn integer_writes_saturate() {
        let mut bytes = [0u8; 2];

        DataType::S8.write(&mut bytes, 0, 300.0);
        DataType::U8.write(&mut bytes, 1, -4.0);

        assert_eq!(DataType::S8.read(&bytes, 0), 127.0);
        assert_eq!(DataType::U8.read(&bytes, 1), 0.0);
    }

    #[test]
    fn unaligned_half_access() {
        let mut bytes = [0u8; 5];

        DataType::F16.write(&mut bytes[1..], 1, 1.5);

        assert_eq!(DataType::F16.read(&bytes[1..], 1), 1.5);
    }
}
