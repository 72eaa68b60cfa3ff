//! Fundamental type definitions shared by the graph and the schedule layers.

use serde::{Deserialize, Serialize};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    UInt8,
    Int32,
    Int64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl DType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }
}

/// Memory scope a buffer lives in.
///
/// The `wmma.*` scopes are register fragments owned by a warp; only tensor
/// intrinsics may read or write them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::IntoStaticStr, strum::EnumIter)]
pub enum MemScope {
    #[default]
    #[strum(serialize = "global")]
    Global,
    #[strum(serialize = "shared")]
    Shared,
    #[strum(serialize = "local")]
    Local,
    #[strum(serialize = "wmma.matrix_a")]
    WmmaMatrixA,
    #[strum(serialize = "wmma.matrix_b")]
    WmmaMatrixB,
    #[strum(serialize = "wmma.accumulator")]
    WmmaAccumulator,
}

impl MemScope {
    /// Whether this is a warp-level matrix fragment scope.
    pub const fn is_fragment(&self) -> bool {
        matches!(self, Self::WmmaMatrixA | Self::WmmaMatrixB | Self::WmmaAccumulator)
    }
}

/// Kind of a loop dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IterKind {
    /// Data-parallel dimension.
    Spatial,
    /// Reduction dimension.
    Reduction,
    /// Fusion of spatial and reduction dimensions.
    Mixed,
    /// Dimension with no direct correspondence to the computation (e.g. a
    /// tensorized leaf).
    Special,
}

/// One index of a tensor access, expressed against the reader's axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessIndex {
    /// The reader's `i`-th spatial axis.
    Axis(usize),
    /// The reader's `i`-th reduction axis.
    Reduce(usize),
    /// A constant coordinate.
    Const(i64),
    /// Anything else: affine combinations, indirect loads, ...
    Expr,
}

impl AccessIndex {
    pub const fn is_simple(&self) -> bool {
        !matches!(self, Self::Expr)
    }
}

/// Scheduling hints attached to an operation.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(enumset::EnumSetType)]
pub enum OpFlag {
    /// Inline this operation whenever it is legal.
    AlwaysInline,
    /// Never add a cache-write stage for this operation.
    NoCacheWrite,
    /// The body is costly (transcendentals, branches); never inline it.
    Expensive,
}
