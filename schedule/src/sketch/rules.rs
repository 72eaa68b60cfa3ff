//! Built-in sketch rules, in the order they are registered.

use std::sync::Arc;

use tessel_ir::{IterKind, MemScope, OpFlag};

use super::tiling::{follow_tiling, multi_level_tiling};
use super::{ConditionKind, Expansion, SketchRule};
use crate::analysis;
use crate::config::SketchParams;
use crate::error::Result;
use crate::state::State;
use crate::task::SearchTask;

pub fn builtin_rules(params: &SketchParams) -> Vec<Arc<dyn SketchRule>> {
    vec![
        Arc::new(AlwaysInline) as Arc<dyn SketchRule>,
        Arc::new(AddRfactor) as Arc<dyn SketchRule>,
        Arc::new(AddCacheWrite) as Arc<dyn SketchRule>,
        Arc::new(MultiLevelTilingWithFusion { params: params.clone() }) as Arc<dyn SketchRule>,
        Arc::new(MultiLevelTiling { params: params.clone() }) as Arc<dyn SketchRule>,
        Arc::new(SkipStage) as Arc<dyn SketchRule>,
    ]
}

fn skip_or_apply(task: &SearchTask) -> ConditionKind {
    if task.hardware.is_gpu() { ConditionKind::ApplyAndSkipRest } else { ConditionKind::Apply }
}

/// Inline strictly inlineable elementwise stages into their consumer.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysInline;

impl SketchRule for AlwaysInline {
    fn name(&self) -> &str {
        "always_inline"
    }

    fn meet_condition(&self, _task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        if analysis::should_always_be_inlined(state, stage_id) {
            ConditionKind::ApplyAndSkipRest
        } else {
            ConditionKind::Pass
        }
    }

    fn apply(&self, _task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        let mut state = state.clone();
        state.compute_inline(stage_id)?;
        Ok(vec![(state, stage_id.checked_sub(1))])
    }
}

/// Factor the reduction of a stage with little spatial parallelism into a
/// partial stage. CPU only; yields one branch with the outer and one with
/// the inner part of the fused reduction as the factored loop, the latter
/// moved innermost for vectorization.
#[derive(Debug, Clone, Copy)]
pub struct AddRfactor;

impl SketchRule for AddRfactor {
    fn name(&self) -> &str {
        "add_rfactor"
    }

    fn meet_condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        if task.hardware.is_gpu() || state.stages()[stage_id].is_inlined() {
            return ConditionKind::Pass;
        }
        if analysis::needs_rfactor(task, state, stage_id) && !analysis::has_cache_write_stage(state, stage_id) {
            ConditionKind::Apply
        } else {
            ConditionKind::Pass
        }
    }

    fn apply(&self, _task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        let mut base = state.clone();
        let iters = &base.stages()[stage_id].iters;
        let n_space = iters.iter().filter(|it| it.kind == IterKind::Spatial).count();
        let reduce: Vec<usize> = (0..iters.len()).filter(|&i| iters[i].kind == IterKind::Reduction).collect();
        let (Some(&first), Some(&last)) = (reduce.first(), reduce.last()) else {
            return Ok(Vec::new());
        };
        if iters.len() != n_space + reduce.len() || last - first + 1 != reduce.len() {
            tracing::debug!(stage_id, "reduction loops are not one trailing run, rfactor skipped");
            return Ok(Vec::new());
        }

        if reduce.len() > 1 {
            base.fuse(stage_id, &reduce)?;
        }
        base.split(stage_id, first, &[Some(1)], true)?;

        let mut out = Vec::with_capacity(2);
        for (part, factored) in [first, first + 1].into_iter().enumerate() {
            let mut s = base.clone();
            let rf = s.rfactor(stage_id, factored, n_space)?;
            if part == 1 {
                let len = s.stages()[rf].iters.len();
                let order: Vec<usize> = (0..len).filter(|&i| i != n_space).chain([n_space]).collect();
                s.reorder(rf, &order)?;
            }
            out.push((s, rf.checked_sub(1)));
        }
        Ok(out)
    }
}

/// Give a tiled stage without an elementwise consumer a local accumulator,
/// so the fusion rule can tile it together with its write-back.
#[derive(Debug, Clone, Copy)]
pub struct AddCacheWrite;

impl SketchRule for AddCacheWrite {
    fn name(&self) -> &str {
        "add_cache_write"
    }

    fn meet_condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        let stage = &state.stages()[stage_id];
        if stage.is_placeholder() || stage.is_inlined() || stage.op.has_flag(OpFlag::NoCacheWrite) {
            return ConditionKind::Pass;
        }
        if analysis::needs_multi_level_tiling(state, stage_id) && analysis::elementwise_consumer(state, stage_id).is_none()
        {
            return skip_or_apply(task);
        }
        ConditionKind::Pass
    }

    fn apply(&self, _task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        let mut state = state.clone();
        let cache = state.cache_write(stage_id, MemScope::Local)?;
        Ok(vec![(state, Some(cache))])
    }
}

/// Multi-level tiling of a stage fused with its elementwise consumer: the
/// consumer follows the spatial tiling and the stage is attached inside it.
#[derive(Debug, Clone)]
pub struct MultiLevelTilingWithFusion {
    params: SketchParams,
}

/// Tiling levels of the consumer a fused stage may be attached at.
fn follow_levels(task: &SearchTask) -> &'static [usize] {
    if task.hardware.is_gpu() { &[3] } else { &[1, 2] }
}

impl SketchRule for MultiLevelTilingWithFusion {
    fn name(&self) -> &str {
        "multi_level_tiling_with_fusion"
    }

    fn meet_condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        if state.stages()[stage_id].is_inlined()
            || !analysis::needs_multi_level_tiling(state, stage_id)
            || analysis::elementwise_consumer(state, stage_id).is_none()
        {
            return ConditionKind::Pass;
        }
        if analysis::is_cache_write_stage(state, stage_id) {
            return ConditionKind::ApplyAndSkipRest;
        }
        skip_or_apply(task)
    }

    fn apply(&self, task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        let Some(target) = analysis::elementwise_consumer(state, stage_id) else {
            return Ok(Vec::new());
        };
        let mut base = state.clone();
        let split_steps = multi_level_tiling(&mut base, stage_id, &self.params)?;
        if split_steps.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for &level in follow_levels(task) {
            let spatial_level = level.checked_sub(1).and_then(|l| self.params.tiling_structure.chars().nth(l));
            if !spatial_level.is_some_and(|c| c.eq_ignore_ascii_case(&'s')) {
                continue;
            }
            let mut fused = base.clone();
            follow_tiling(&mut fused, target, &split_steps, level)?;
            fused.compute_at(stage_id, target, level * split_steps.len() - 1)?;
            out.push((fused, stage_id.checked_sub(1)));
        }
        Ok(out)
    }
}

/// Plain multi-level tiling.
#[derive(Debug, Clone)]
pub struct MultiLevelTiling {
    params: SketchParams,
}

impl SketchRule for MultiLevelTiling {
    fn name(&self) -> &str {
        "multi_level_tiling"
    }

    fn meet_condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        if !state.stages()[stage_id].is_inlined() && analysis::needs_multi_level_tiling(state, stage_id) {
            skip_or_apply(task)
        } else {
            ConditionKind::Pass
        }
    }

    fn apply(&self, _task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        let mut state = state.clone();
        multi_level_tiling(&mut state, stage_id, &self.params)?;
        Ok(vec![(state, stage_id.checked_sub(1))])
    }
}

/// Leave the stage as it is and move on.
#[derive(Debug, Clone, Copy)]
pub struct SkipStage;

impl SketchRule for SkipStage {
    fn name(&self) -> &str {
        "skip_stage"
    }

    fn meet_condition(&self, _task: &SearchTask, _state: &State, _stage_id: usize) -> ConditionKind {
        ConditionKind::Apply
    }

    fn apply(&self, _task: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
        Ok(vec![(state.clone(), stage_id.checked_sub(1))])
    }
}
