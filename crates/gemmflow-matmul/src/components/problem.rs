use serde::{Deserialize, Serialize};

#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
/// Sizes of a matmul problem, regardless of actual data
pub struct MatmulProblem {
    pub batch: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulProblem {
    /// Number of elements of the output.
    pub fn dst_elements(&self) -> u64 {
        self.batch as u64 * self.m as u64 * self.n as u64
    }

    /// Returns the shape of the identified operand, inferred by the problem definition
    pub fn shape(&self, operand: Operand, rank: usize) -> Vec<usize> {
        let matrix = match operand {
            Operand::Src => [self.m, self.k],
            Operand::Weights => [self.k, self.n],
            Operand::Dst | Operand::Bias => [self.m, self.n],
        };

        match rank {
            3 => vec![self.batch, matrix[0], matrix[1]],
            _ => matrix.to_vec(),
        }
    }

    pub fn kind(&self) -> MatmulKind {
        self.into()
    }
}

/// Identifies one of the matrices of a matmul.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Operand {
    Src,
    Weights,
    Dst,
    Bias,
}

impl core::fmt::Display for Operand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Operand::Src => "src",
            Operand::Weights => "weights",
            Operand::Dst => "dst",
            Operand::Bias => "bias",
        };
        f.write_str(name)
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
/// Layout of a 2D structure such as a tensor, shared memory or slice,
/// used within any type of matmul
pub enum MatrixLayout {
    RowMajor,
    ColMajor,
}

/// Interpretation of matrix multiplication based on input shapes.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum MatmulKind {
    /// (M, K) @ (K, N) → (M, N), with M, K, N > 1
    General,

    /// (M, K) @ (K, 1) → (M, 1)
    MatVec,

    /// (1, K) @ (K, N) → (1, N)
    VecMat,

    /// (1, 1) @ (1, N) → (1, N)
    ScalarVec,

    /// (M, 1) @ (1, 1) → (M, 1)
    VecScalar,

    /// (1, K) @ (K, 1) → (1, 1)
    InnerProduct,

    /// (M, 1) @ (1, N) → (M, N)
    OuterProduct,

    /// (1, 1) @ (1, 1) → (1, 1)
    ScalarProduct,
}

impl From<&MatmulProblem> for MatmulKind {
    fn from(problem: &MatmulProblem) -> Self {
        enum DimKind {
            Scalar,
            Vector,
        }

        impl From<usize> for DimKind {
            fn from(x: usize) -> Self {
                match x {
                    1 => DimKind::Scalar,
                    _ => DimKind::Vector,
                }
            }
        }

        use DimKind::*;
        match (problem.m.into(), problem.n.into(), problem.k.into()) {
            (Scalar, Scalar, Scalar) => MatmulKind::ScalarProduct,
            (Scalar, Scalar, Vector) => MatmulKind::InnerProduct,
            (Scalar, Vector, Scalar) => MatmulKind::ScalarVec,
            (Scalar, Vector, Vector) => MatmulKind::VecMat,
            (Vector, Scalar, Scalar) => MatmulKind::VecScalar,
            (Vector, Scalar, Vector) => MatmulKind::MatVec,
            (Vector, Vector, Scalar) => MatmulKind::OuterProduct,
            (Vector, Vector, Vector) => MatmulKind::General,
        }
    }
}
