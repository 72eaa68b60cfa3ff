//! CUDA WMMA (tensor core) intrinsics for 16x16x16 fragments.
//!
//! Operand fragments are `float16`, the accumulator is `float32`. Every
//! buffer must be 32-byte aligned and tiles must start on 256-element
//! boundaries, the granularity `wmma::load_matrix_sync` addresses.

use smallvec::smallvec;
use tessel_ir::{DType, MemScope};

use super::{
    BufferDecl, FillFragment, IntrinsicCall, IntrinsicLoop, IntrinsicRegistry, MatrixLayout, TensorIntrinsic,
};

pub const LOAD_MATRIX_A: &str = "intrin_wmma_load_matrix_a";
pub const LOAD_MATRIX_B: &str = "intrin_wmma_load_matrix_b";
pub const GEMM: &str = "intrin_wmma_gemm";
pub const STORE_MATRIX: &str = "intrin_wmma_store_matrix";

const TILE: i64 = 16;
const DATA_ALIGNMENT: usize = 32;
const OFFSET_FACTOR: usize = 256;

fn tile(dtype: DType, scope: MemScope) -> BufferDecl {
    BufferDecl::builder()
        .dtype(dtype)
        .scope(scope)
        .shape(smallvec![TILE, TILE])
        .data_alignment(DATA_ALIGNMENT)
        .offset_factor(OFFSET_FACTOR)
        .build()
}

/// Shared-memory tile into an operand fragment of `scope`.
pub fn load_matrix(name: &str, scope: MemScope) -> TensorIntrinsic {
    TensorIntrinsic::builder()
        .name(name)
        .domain(vec![IntrinsicLoop::spatial(TILE), IntrinsicLoop::spatial(TILE)])
        .inputs(vec![tile(DType::Float16, MemScope::Shared)])
        .output(tile(DType::Float16, scope))
        .call(IntrinsicCall::LoadMatrixSync { layout: MatrixLayout::RowMajor })
        .build()
}

/// `C[i, j] += A[i, k] * B[k, j]` over fragments.
pub fn gemm() -> TensorIntrinsic {
    TensorIntrinsic::builder()
        .name(GEMM)
        .domain(vec![IntrinsicLoop::spatial(TILE), IntrinsicLoop::spatial(TILE), IntrinsicLoop::reduce(TILE)])
        .inputs(vec![tile(DType::Float16, MemScope::WmmaMatrixA), tile(DType::Float16, MemScope::WmmaMatrixB)])
        .output(tile(DType::Float32, MemScope::WmmaAccumulator))
        .call(IntrinsicCall::MmaSync { init: FillFragment { value: 0 } })
        .build()
}

/// Accumulator fragment back to global memory.
pub fn store_matrix() -> TensorIntrinsic {
    TensorIntrinsic::builder()
        .name(STORE_MATRIX)
        .domain(vec![IntrinsicLoop::spatial(TILE), IntrinsicLoop::spatial(TILE)])
        .inputs(vec![tile(DType::Float32, MemScope::WmmaAccumulator)])
        .output(tile(DType::Float32, MemScope::Global))
        .call(IntrinsicCall::StoreMatrixSync { layout: MatrixLayout::RowMajor })
        .build()
}

impl IntrinsicRegistry {
    /// Registry holding the four WMMA intrinsics.
    pub fn wmma() -> Self {
        let mut registry = Self::new();
        for intrinsic in [
            load_matrix(LOAD_MATRIX_A, MemScope::WmmaMatrixA),
            load_matrix(LOAD_MATRIX_B, MemScope::WmmaMatrixB),
            gemm(),
            store_matrix(),
        ] {
            registry.entries.insert(intrinsic.name.clone(), std::sync::Arc::new(intrinsic));
        }
        registry
    }
}
