use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::OptionExt;
use tessel_ir::IterKind;

use crate::error::*;

/// What a loop is mapped to when code is generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::IntoStaticStr)]
pub enum IterAnnotation {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "unroll")]
    Unroll,
    #[strum(serialize = "vectorize")]
    Vectorize,
    #[strum(serialize = "parallel")]
    Parallel,
    #[strum(serialize = "vthread")]
    VThread,
    #[strum(serialize = "blockIdx.x")]
    BlockX,
    #[strum(serialize = "blockIdx.y")]
    BlockY,
    #[strum(serialize = "blockIdx.z")]
    BlockZ,
    #[strum(serialize = "threadIdx.x")]
    ThreadX,
    #[strum(serialize = "threadIdx.y")]
    ThreadY,
    #[strum(serialize = "threadIdx.z")]
    ThreadZ,
    #[strum(serialize = "tensorize")]
    Tensorize,
}

impl IterAnnotation {
    /// Execution-resource bindings accepted by `bind`.
    pub const fn is_binding(&self) -> bool {
        matches!(
            self,
            Self::VThread | Self::BlockX | Self::BlockY | Self::BlockZ | Self::ThreadX | Self::ThreadY | Self::ThreadZ
        )
    }

    /// Bindings that must not carry a reduction: every block or virtual
    /// thread would produce its own partial result.
    pub const fn is_outer_binding(&self) -> bool {
        matches!(self, Self::VThread | Self::BlockX | Self::BlockY | Self::BlockZ)
    }
}

/// One loop of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoopIter {
    pub name: String,
    /// `None` until a later specialization fills the loop length in.
    pub extent: Option<i64>,
    pub kind: IterKind,
    pub annotation: IterAnnotation,
    /// Intrinsic a tensorized leaf is replaced by.
    pub intrinsic: Option<Arc<str>>,
    /// Extents of the loops folded into a tensorized leaf, outermost first.
    pub collapsed: SmallVec<[i64; 4]>,
    /// Operation axes this loop walks, numbered spatial first then
    /// reduction, each with the share of the axis one pass of the loop
    /// covers. The share is `None` once it cannot be told apart from the
    /// other axes of a fused loop, or while a split length is undecided.
    pub origin: Origin,
}

/// `(axis, share)` pairs of a [`LoopIter`].
pub type Origin = SmallVec<[(usize, Option<i64>); 2]>;

impl LoopIter {
    pub fn new(name: impl Into<String>, extent: Option<i64>, kind: IterKind) -> Self {
        Self {
            name: name.into(),
            extent,
            kind,
            annotation: IterAnnotation::None,
            intrinsic: None,
            collapsed: SmallVec::new(),
            origin: Origin::new(),
        }
    }

    /// Loop walking the whole of operation axis `axis`.
    pub fn for_axis(name: impl Into<String>, axis: usize, extent: i64, kind: IterKind) -> Self {
        Self { origin: [(axis, Some(extent))].into_iter().collect(), ..Self::new(name, Some(extent), kind) }
    }

    /// Share of `axis` this loop covers: `Some(1)` when it does not walk the
    /// axis at all.
    pub fn share_of(&self, axis: usize) -> Option<i64> {
        self.origin.iter().find(|&&(a, _)| a == axis).map_or(Some(1), |&(_, share)| share)
    }

    pub fn walks(&self, axis: usize) -> bool {
        self.origin.iter().any(|&(a, _)| a == axis)
    }

    pub fn is_annotated(&self) -> bool {
        self.annotation != IterAnnotation::None
    }

    pub fn is_tensorized(&self) -> bool {
        self.annotation == IterAnnotation::Tensorize
    }
}

/// Concatenate the origins of `iters`, multiplying the shares of an axis
/// that shows up more than once.
pub(crate) fn merge_origins<'a>(iters: impl IntoIterator<Item = &'a LoopIter>) -> Origin {
    let mut merged = Origin::new();
    for &(axis, share) in iters.into_iter().flat_map(|it| it.origin.iter()) {
        match merged.iter_mut().find(|(a, _)| *a == axis) {
            Some((_, acc)) => *acc = acc.zip(share).and_then(|(a, b)| a.checked_mul(b)),
            None => merged.push((axis, share)),
        }
    }
    merged
}

/// Product of loop extents, `None` if one of them is undecided. Fails for
/// `step` when the product does not fit in an `i64`.
pub(crate) fn extent_product(step: &'static str, extents: impl IntoIterator<Item = Option<i64>>) -> Result<Option<i64>> {
    let mut product = 1i64;
    for extent in extents {
        let Some(extent) = extent else {
            return Ok(None);
        };
        product = product.checked_mul(extent).with_context(|| InvalidTransformSnafu {
            step,
            reason: format!("loop extent {product} * {extent} overflows i64"),
        })?;
    }
    Ok(Some(product))
}

/// `ceil(a / b)` for positive operands, without the `a + b - 1` overflow.
pub(crate) fn ceil_div(a: i64, b: i64) -> i64 {
    a / b + i64::from(a % b != 0)
}
