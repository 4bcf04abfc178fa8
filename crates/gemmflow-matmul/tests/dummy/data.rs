use std::sync::Arc;

use gemmflow_matmul::components::{DataType, MemoryDescriptor};
use gemmflow_runtime::{
    config::{GlobalConfig, execution::ScaleSyncMode},
    engine::{Engine, HostEngine},
    server::Handle,
};

pub fn test_config(scale_sync: ScaleSyncMode) -> Arc<GlobalConfig> {
    let mut config = GlobalConfig::default();
    config.execution.scale_sync = scale_sync;
    Arc::new(config)
}

pub fn test_engine() -> HostEngine {
    HostEngine::from_config(test_config(ScaleSyncMode::FullBarrier))
}

pub fn f32_desc(shape: &[usize]) -> MemoryDescriptor {
    MemoryDescriptor::contiguous(DataType::F32, shape)
}

pub fn upload_f32(engine: &HostEngine, data: &[f32]) -> Handle {
    engine.create(bytemuck::cast_slice(data)).unwrap()
}

pub fn zeros(engine: &HostEngine, elements: usize, data_type: DataType) -> Handle {
    engine.empty((elements * data_type.size()) as u64).unwrap()
}

pub fn read_f32(engine: &HostEngine, handle: &Handle) -> Vec<f32> {
    engine
        .read(handle)
        .unwrap()
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Row-major reference product of `m x k` and `k x n` matrices.
pub fn reference_matmul(lhs: &[f32], rhs: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            out[i * n + j] = (0..k).map(|p| lhs[i * k + p] * rhs[p * n + j]).sum();
        }
    }
    out
}

pub fn assert_close(actual: &[f32], expected: &[f32], epsilon: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() <= epsilon * e.abs().max(1.0),
            "element {i}: got {a}, expected {e}"
        );
    }
}
