//! Replacing a loop nest by a tensor intrinsic.
//!
//! Checks run in a fixed order so a caller can tell *why* an intrinsic was
//! rejected and retry with another one:
//!
//! 1. lookup (`UnknownIntrinsic`),
//! 2. structural legality of the nest (`InvalidTransform`),
//! 3. input arity (`TensorizeMismatch`),
//! 4. scope, dtype and alignment of every buffer (`ScopeViolation`),
//! 5. loop count, extents, kinds and tile shapes (`TensorizeMismatch`),
//! 6. tile offset granularity (`ScopeViolation`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::ensure;
use tessel_ir::{DType, IterKind};

use crate::error::*;
use crate::intrinsic::{BufferDecl, IntrinsicRegistry, TensorIntrinsic};
use crate::state::iterator::{extent_product, merge_origins};
use crate::state::{BufferLayout, IterAnnotation, LoopIter, Stage, State};

const STEP: &str = "tensorize";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorizeStep {
    pub stage_id: usize,
    pub iter_id: usize,
    pub intrinsic: String,
}

/// A stage buffer as the intrinsic sees it.
struct BufferView<'a> {
    name: &'a str,
    dtype: DType,
    shape: SmallVec<[i64; 4]>,
    layout: BufferLayout,
}

impl TensorizeStep {
    pub(crate) fn apply_to_state(&self, state: &mut State, registry: &IntrinsicRegistry) -> Result<LoopIter> {
        let intrinsic = registry.get(&self.intrinsic)?;
        let stage = state.stage_checked(STEP, self.stage_id)?;
        state.iter_checked(STEP, self.stage_id, self.iter_id)?;
        let name = stage.name();

        ensure!(
            !stage.is_placeholder() && !stage.is_inlined(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is a {} stage", stage.describe()) }
        );
        ensure!(
            stage.tensorized_iter().is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is already tensorized") }
        );
        let nest = &stage.iters[self.iter_id..];
        if let Some(it) = nest.iter().find(|it| it.is_annotated()) {
            return InvalidTransformSnafu {
                step: STEP,
                reason: format!("iterator {} inside the nest is annotated with {}", it.name, it.annotation),
            }
            .fail();
        }
        if let Some(i) = state.attached_iters(self.stage_id).into_iter().find(|&i| i >= self.iter_id) {
            return InvalidTransformSnafu {
                step: STEP,
                reason: format!("a stage is attached at {}, inside the nest", stage.iters[i].name),
            }
            .fail();
        }

        ensure!(
            stage.op.reads.len() == intrinsic.inputs.len(),
            TensorizeMismatchSnafu {
                intrinsic: intrinsic.name.clone(),
                reason: format!("{name} reads {} buffers, intrinsic takes {}", stage.op.reads.len(), intrinsic.inputs.len()),
            }
        );
        let mut buffers = Vec::with_capacity(intrinsic.inputs.len() + 1);
        for (access, decl) in stage.op.reads.iter().zip(&intrinsic.inputs) {
            let producer = state.stage_id(&access.tensor).and_then(|id| state.stage(id)).ok_or_else(|| {
                InvalidTransformSnafu { step: STEP, reason: format!("{name} reads unknown stage {}", access.tensor) }
                    .build()
            })?;
            buffers.push((view(producer), decl));
        }
        buffers.push((view(stage), &intrinsic.output));

        for (buffer, decl) in &buffers {
            check_scope(intrinsic, buffer, decl)?;
        }
        check_nest(intrinsic, nest)?;
        for (buffer, decl) in &buffers {
            check_shape(intrinsic, buffer, decl)?;
        }
        for (buffer, decl) in &buffers {
            check_offset(intrinsic, buffer, decl)?;
        }

        let leaf = LoopIter {
            name: nest.iter().map(|it| it.name.as_str()).collect::<Vec<_>>().join("@"),
            extent: extent_product(STEP, nest.iter().map(|it| it.extent))?,
            kind: IterKind::Special,
            annotation: IterAnnotation::Tensorize,
            intrinsic: Some(Arc::from(intrinsic.name.as_str())),
            collapsed: nest.iter().filter_map(|it| it.extent).collect(),
            origin: merge_origins(nest),
        };
        state.stage_mut(self.stage_id).iters.splice(self.iter_id.., [leaf.clone()]);
        Ok(leaf)
    }
}

fn view(stage: &Stage) -> BufferView<'_> {
    BufferView { name: stage.name(), dtype: stage.op.dtype, shape: stage.op.shape(), layout: stage.layout }
}

fn mismatch(intrinsic: &TensorIntrinsic, reason: String) -> ScheduleError {
    TensorizeMismatchSnafu { intrinsic: intrinsic.name.clone(), reason }.build()
}

fn violation(intrinsic: &TensorIntrinsic, buffer: &BufferView<'_>, reason: String) -> ScheduleError {
    ScopeViolationSnafu { intrinsic: intrinsic.name.clone(), buffer: buffer.name, reason }.build()
}

fn check_scope(intrinsic: &TensorIntrinsic, buffer: &BufferView<'_>, decl: &BufferDecl) -> Result<()> {
    let layout = buffer.layout;
    if layout.scope != decl.scope {
        return Err(violation(intrinsic, buffer, format!("scope is {}, intrinsic requires {}", layout.scope, decl.scope)));
    }
    if buffer.dtype != decl.dtype {
        return Err(violation(intrinsic, buffer, format!("dtype is {}, intrinsic requires {}", buffer.dtype, decl.dtype)));
    }
    if decl.data_alignment > 0 && layout.data_alignment % decl.data_alignment != 0 {
        return Err(violation(
            intrinsic,
            buffer,
            format!("aligned to {} bytes, intrinsic requires {}", layout.data_alignment, decl.data_alignment),
        ));
    }
    Ok(())
}

fn check_nest(intrinsic: &TensorIntrinsic, nest: &[LoopIter]) -> Result<()> {
    if nest.len() != intrinsic.domain.len() {
        return Err(mismatch(intrinsic, format!("nest has {} loops, intrinsic covers {}", nest.len(), intrinsic.domain.len())));
    }
    for (it, dom) in nest.iter().zip(&intrinsic.domain) {
        match it.extent {
            Some(e) if e == dom.extent => {}
            Some(e) => return Err(mismatch(intrinsic, format!("loop {} has extent {e}, expected {}", it.name, dom.extent))),
            None => return Err(mismatch(intrinsic, format!("loop {} has an unknown extent", it.name))),
        }
        if it.kind != dom.kind {
            return Err(mismatch(intrinsic, format!("loop {} is {}, expected {}", it.name, it.kind, dom.kind)));
        }
    }
    Ok(())
}

fn check_shape(intrinsic: &TensorIntrinsic, buffer: &BufferView<'_>, decl: &BufferDecl) -> Result<()> {
    let shape = buffer.shape.as_slice();
    let tile = decl.shape.as_slice();
    if shape.len() < tile.len() || !shape.ends_with(tile) {
        return Err(mismatch(
            intrinsic,
            format!("buffer {} has shape {shape:?}, its trailing dimensions must be {tile:?}", buffer.name),
        ));
    }
    Ok(())
}

fn check_offset(intrinsic: &TensorIntrinsic, buffer: &BufferView<'_>, decl: &BufferDecl) -> Result<()> {
    let Some(step) = tile_offset_granularity(&buffer.shape, &decl.shape) else {
        return Ok(());
    };
    let factor = decl.offset_factor.max(1) as i64;
    if step % factor != 0 {
        return Err(violation(
            intrinsic,
            buffer,
            format!("tiles start every {step} elements, intrinsic requires a multiple of {factor}"),
        ));
    }
    let bytes = step * buffer.dtype.bytes() as i64;
    if decl.data_alignment > 0 && bytes % decl.data_alignment as i64 != 0 {
        return Err(violation(
            intrinsic,
            buffer,
            format!("tiles start every {bytes} bytes, intrinsic requires {}-byte alignment", decl.data_alignment),
        ));
    }
    Ok(())
}

/// Element distance between consecutive tile starts of a row-major buffer
/// tiled by its trailing `tile` dimensions; `None` if it holds one tile.
pub(crate) fn tile_offset_granularity(shape: &[i64], tile: &[i64]) -> Option<i64> {
    let lead = shape.len().saturating_sub(tile.len());
    let mut stride = 1i64;
    let mut granularity = None;
    for (dim, &extent) in shape.iter().enumerate().rev() {
        if dim < lead && extent > 1 {
            granularity = Some(granularity.map_or(stride, |g| gcd(g, stride)));
        }
        stride *= extent;
    }
    granularity
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}
