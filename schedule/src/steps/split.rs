use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tessel_ir::IterKind;

use super::Step;
use crate::error::*;
use crate::state::iterator::{ceil_div, extent_product};
use crate::state::{LoopIter, Origin, State};

/// Split lengths; `None` is decided later.
pub type Lengths = SmallVec<[Option<i64>; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitStep {
    pub stage_id: usize,
    pub iter_id: usize,
    /// Extent of the split iterator when the step was recorded.
    pub extent: Option<i64>,
    pub lengths: Lengths,
    /// `true`: `lengths` are inner factors and the outermost iterator takes
    /// the remainder. `false`: they are outer extents and the innermost
    /// iterator takes the remainder.
    pub inner_to_outer: bool,
}

impl SplitStep {
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<Vec<LoopIter>> {
        apply_split(state, "split", self.stage_id, self.iter_id, &self.lengths, self.inner_to_outer)
    }
}

/// Split mirroring an earlier one in the log.
///
/// Keeps the first `n_split - 1` lengths of the source split and folds the
/// rest into the last one, producing `n_split + 1` iterators whose extents
/// stay in the same ratio as the source's tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowSplitStep {
    pub stage_id: usize,
    pub iter_id: usize,
    pub src_step_id: usize,
    pub n_split: usize,
}

impl FollowSplitStep {
    pub fn lengths(&self, steps: &[Step]) -> Result<Lengths> {
        let src = source_split(steps, self.src_step_id)?;
        ensure!(
            self.n_split >= 1 && self.n_split <= src.lengths.len() + 1,
            ReplaySnafu {
                step_id: self.src_step_id,
                reason: format!("cannot derive {} lengths from a split with {}", self.n_split, src.lengths.len()),
            }
        );

        let (head, tail) = src.lengths.split_at(self.n_split - 1);
        let mut lengths: Lengths = head.into();
        lengths.push(extent_product("follow_split", tail.iter().copied())?);
        Ok(lengths)
    }

    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<Vec<LoopIter>> {
        let lengths = self.lengths(&state.steps)?;
        apply_split(state, "follow_split", self.stage_id, self.iter_id, &lengths, true)
    }
}

/// One-length split sized by the product of one tiling level across several
/// earlier splits. Aligns a fused loop (typically a cooperative fetch) with
/// the thread extent of the stage it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowFusedSplitStep {
    pub stage_id: usize,
    pub iter_id: usize,
    pub src_step_ids: SmallVec<[usize; 4]>,
    /// Index into each source split's lengths.
    pub level: usize,
    /// `true`: the product is the inner factor. `false`: it is the number of
    /// outer parts.
    pub factor_or_nparts: bool,
}

impl FollowFusedSplitStep {
    pub fn length(&self, steps: &[Step]) -> Result<Option<i64>> {
        ensure!(
            !self.src_step_ids.is_empty(),
            InvalidTransformSnafu { step: "follow_fused_split", reason: "no source steps given" }
        );

        let mut lengths = Lengths::new();
        for &step_id in &self.src_step_ids {
            let src = source_split(steps, step_id)?;
            lengths.push(*src.lengths.get(self.level).context(ReplaySnafu {
                step_id,
                reason: format!("split has {} lengths, level {} requested", src.lengths.len(), self.level),
            })?);
        }
        extent_product("follow_fused_split", lengths)
    }

    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<Vec<LoopIter>> {
        let length = self.length(&state.steps)?;
        apply_split(state, "follow_fused_split", self.stage_id, self.iter_id, &[length], self.factor_or_nparts)
    }
}

fn source_split(steps: &[Step], step_id: usize) -> Result<&SplitStep> {
    match steps.get(step_id) {
        Some(Step::Split(split)) => Ok(split),
        Some(other) => ReplaySnafu { step_id, reason: format!("step is a {}, not a split", other.name()) }.fail(),
        None => ReplaySnafu { step_id, reason: format!("log has only {} steps", steps.len()) }.fail(),
    }
}

fn apply_split(
    state: &mut State,
    step: &'static str,
    stage_id: usize,
    iter_id: usize,
    lengths: &[Option<i64>],
    inner_to_outer: bool,
) -> Result<Vec<LoopIter>> {
    let stage = state.stage_checked(step, stage_id)?;
    ensure!(!stage.is_inlined(), InvalidTransformSnafu { step, reason: format!("stage {} is inlined", stage.name()) });
    let it = state.iter_checked(step, stage_id, iter_id)?.clone();
    ensure!(
        !it.is_annotated(),
        InvalidTransformSnafu { step, reason: format!("iterator {} is annotated with {}", it.name, it.annotation) }
    );
    ensure!(
        it.kind != IterKind::Special,
        InvalidTransformSnafu { step, reason: format!("iterator {} has no direct loop", it.name) }
    );
    ensure!(!lengths.is_empty(), InvalidTransformSnafu { step, reason: "no split lengths given" });
    if let Some(bad) = lengths.iter().flatten().find(|&&l| l <= 0) {
        return InvalidTransformSnafu { step, reason: format!("split length {bad} is not positive") }.fail();
    }

    let parts = split_iter(&it, lengths, inner_to_outer);
    let n = lengths.len();
    state.stage_mut(stage_id).iters.splice(iter_id..=iter_id, parts.iter().cloned());
    state.attach_map.remap_iters(stage_id, |i| if i >= iter_id { i + n } else { i });
    Ok(parts)
}

/// Take `len` out of `remainder`, rounding up.
fn take(remainder: &mut Option<i64>, len: Option<i64>) -> Option<i64> {
    *remainder = remainder.zip(len).map(|(r, l)| ceil_div(r, l));
    len
}

fn split_iter(it: &LoopIter, lengths: &[Option<i64>], inner_to_outer: bool) -> Vec<LoopIter> {
    let n = lengths.len();
    let part = |i: usize, extent: Option<i64>| {
        let origin: Origin = match it.origin.as_slice() {
            &[(axis, _)] => [(axis, extent)].into_iter().collect(),
            many => many.iter().map(|&(axis, _)| (axis, None)).collect(),
        };
        LoopIter { origin, ..LoopIter::new(format!("{}.{i}", it.name), extent, it.kind) }
    };
    let mut remainder = it.extent;
    let mut parts = Vec::with_capacity(n + 1);

    if inner_to_outer {
        for (i, &len) in lengths.iter().enumerate().rev() {
            parts.push(part(i + 1, take(&mut remainder, len)));
        }
        parts.push(part(0, remainder));
        parts.reverse();
    } else {
        for (i, &len) in lengths.iter().enumerate() {
            parts.push(part(i, take(&mut remainder, len)));
        }
        parts.push(part(n, remainder));
    }
    parts
}
