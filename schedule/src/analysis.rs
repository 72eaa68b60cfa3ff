//! Graph queries on a schedule state.
//!
//! Same questions as [`tessel_ir::AccessAnalyzer`], asked against the
//! operations as rewritten by cache stages and with inlined stages looked
//! through: the consumer of an inlined stage's consumer is its consumer.

use smallvec::SmallVec;
use tessel_ir::{OpFlag, OpKind};

use crate::state::State;
use crate::task::SearchTask;

/// Consumers of `stage_id`, seen through inlined stages.
pub fn consumers(state: &State, stage_id: usize) -> SmallVec<[usize; 4]> {
    let analyzer = state.analyzer();
    let mut out = SmallVec::new();
    let mut work: SmallVec<[usize; 4]> = analyzer.consumers(stage_id);
    while let Some(c) = work.pop() {
        if state.stages[c].is_inlined() {
            work.extend(analyzer.consumers(c));
        } else if !out.contains(&c) {
            out.push(c);
        }
    }
    out.sort_unstable();
    out
}

pub fn is_output(state: &State, stage_id: usize) -> bool {
    state.analyzer().is_output(stage_id)
}

pub fn needs_multi_level_tiling(state: &State, stage_id: usize) -> bool {
    state.analyzer().needs_multi_level_tiling(stage_id)
}

/// The only consumer of `stage_id`, if it reads the stage elementwise.
pub fn elementwise_consumer(state: &State, stage_id: usize) -> Option<usize> {
    match consumers(state, stage_id).as_slice() {
        &[c] if state.analyzer().elementwise_match(stage_id, c) => Some(c),
        _ => None,
    }
}

/// Whether `stage_id` is the computing half of a cache-write pair.
pub fn is_cache_write_stage(state: &State, stage_id: usize) -> bool {
    matches!(state.stages[stage_id].op.kind, OpKind::CacheWrite { .. })
}

pub fn is_cache_read_stage(state: &State, stage_id: usize) -> bool {
    matches!(state.stages[stage_id].op.kind, OpKind::CacheRead { .. })
}

/// Whether the stage right before `stage_id` is its cache-write stage.
pub fn has_cache_write_stage(state: &State, stage_id: usize) -> bool {
    let name = state.stages[stage_id].name();
    stage_id.checked_sub(1).and_then(|prev| state.stages.get(prev)).is_some_and(
        |prev| matches!(&prev.op.kind, OpKind::CacheWrite { target, .. } if target == name),
    )
}

/// Whether a partial-reduction stage would expose parallelism the spatial
/// axes lack: the spatial iteration space is smaller than the reduction and
/// too small to feed every core, or the stage is a plain reduction longer
/// than the core count.
pub fn needs_rfactor(task: &SearchTask, state: &State, stage_id: usize) -> bool {
    let op = &state.stages[stage_id].op;
    if op.is_placeholder() || !op.has_reduce() {
        return false;
    }
    let space = op.axes.iter().fold(1i64, |acc, a| acc.saturating_mul(a.extent));
    let reduce = op.reduce_axes.iter().fold(1i64, |acc, a| acc.saturating_mul(a.extent));
    let cores = i64::try_from(task.hardware.num_cores).unwrap_or(i64::MAX);

    if needs_multi_level_tiling(state, stage_id) {
        space <= reduce && space <= cores.saturating_mul(16)
    } else {
        reduce > cores
    }
}

/// Whether inlining the stage is both legal and profitable.
pub fn should_always_be_inlined(state: &State, stage_id: usize) -> bool {
    let stage = &state.stages[stage_id];
    if stage.is_placeholder() || stage.is_inlined() || stage.op.has_reduce() || is_output(state, stage_id) {
        return false;
    }
    if state.attach_map.has_attached(stage_id) || stage.tensorized_iter().is_some() {
        return false;
    }
    let analyzer = state.analyzer();
    let wants_inline = stage.op.has_flag(OpFlag::AlwaysInline) || analyzer.is_strict_inlineable(stage_id);
    wants_inline && elementwise_consumer(state, stage_id).is_some()
}
