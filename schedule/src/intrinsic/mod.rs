//! Tensor intrinsics and the registry tensorization looks them up in.
//!
//! A [`TensorIntrinsic`] describes a hardware or library primitive that
//! replaces a whole loop nest: the iteration domain it covers, the buffers it
//! reads and writes (with the scope, alignment and offset granularity they
//! must have), and the call emitted in place of the nest.
//!
//! The registry is built by the caller before scheduling starts and handed to
//! [`crate::State::tensorize`] explicitly. Lookups take `&self`, so one
//! registry behind an `Arc` serves any number of concurrent branches.

pub mod wmma;

use std::collections::BTreeMap;
use std::sync::Arc;

use bon::bon;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tessel_ir::{DType, IterKind, MemScope};

use crate::error::*;

/// Requirements on one buffer an intrinsic touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDecl {
    pub dtype: DType,
    pub scope: MemScope,
    /// Tile shape accessed by one call; matched against the trailing
    /// dimensions of the stage buffer.
    pub shape: SmallVec<[i64; 4]>,
    /// Required byte alignment of the buffer start.
    pub data_alignment: usize,
    /// Every tile start must be a multiple of this many elements.
    pub offset_factor: usize,
}

#[bon]
impl BufferDecl {
    #[builder]
    pub fn builder(
        dtype: DType,
        scope: MemScope,
        #[builder(into)] shape: SmallVec<[i64; 4]>,
        #[builder(default = 1)] data_alignment: usize,
        #[builder(default = 1)] offset_factor: usize,
    ) -> Self {
        Self { dtype, scope, shape, data_alignment, offset_factor }
    }
}

/// One loop of the iteration domain an intrinsic covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntrinsicLoop {
    pub extent: i64,
    pub kind: IterKind,
}

impl IntrinsicLoop {
    pub const fn spatial(extent: i64) -> Self {
        Self { extent, kind: IterKind::Spatial }
    }

    pub const fn reduce(extent: i64) -> Self {
        Self { extent, kind: IterKind::Reduction }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum MatrixLayout {
    #[strum(serialize = "row_major")]
    RowMajor,
    #[strum(serialize = "col_major")]
    ColMajor,
}

/// Code emitted in place of the collapsed nest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntrinsicCall {
    /// Load a tile from memory into a matrix fragment.
    LoadMatrixSync { layout: MatrixLayout },
    /// Fragment multiply-accumulate. `init` is emitted once, before the
    /// reduction starts.
    MmaSync { init: FillFragment },
    /// Store an accumulator fragment back to memory.
    StoreMatrixSync { layout: MatrixLayout },
    /// Any other extern call, by symbol name.
    Opaque(String),
}

/// Fill an accumulator fragment with a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FillFragment {
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorIntrinsic {
    pub name: String,
    /// Loops covered, outermost first.
    pub domain: SmallVec<[IntrinsicLoop; 4]>,
    /// Buffers read, in the order the matched stage reads them.
    pub inputs: SmallVec<[BufferDecl; 2]>,
    pub output: BufferDecl,
    pub call: IntrinsicCall,
}

#[bon]
impl TensorIntrinsic {
    #[builder]
    pub fn builder(
        #[builder(into)] name: String,
        #[builder(into)] domain: SmallVec<[IntrinsicLoop; 4]>,
        #[builder(into)] inputs: SmallVec<[BufferDecl; 2]>,
        output: BufferDecl,
        call: IntrinsicCall,
    ) -> Self {
        Self { name, domain, inputs, output, call }
    }
}

/// Named intrinsics available to tensorization.
#[derive(Debug, Clone, Default)]
pub struct IntrinsicRegistry {
    entries: BTreeMap<String, Arc<TensorIntrinsic>>,
}

impl IntrinsicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, intrinsic: TensorIntrinsic) -> Result<()> {
        ensure!(!self.entries.contains_key(&intrinsic.name), DuplicateIntrinsicSnafu { name: intrinsic.name.clone() });
        tracing::debug!(intrinsic = %intrinsic.name, loops = intrinsic.domain.len(), "tensor intrinsic registered");
        self.entries.insert(intrinsic.name.clone(), Arc::new(intrinsic));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<TensorIntrinsic>> {
        self.entries.get(name).context(UnknownIntrinsicSnafu { name })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
