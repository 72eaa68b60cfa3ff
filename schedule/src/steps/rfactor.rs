use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tessel_ir::{Access, AccessIndex, Axis, IterKind, Operation};

use crate::error::*;
use crate::state::{ComputeAtKind, LoopIter, Stage, State};

const STEP: &str = "rfactor";

/// Factor one reduction loop out into a spatial axis of a new partial stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfactorStep {
    pub stage_id: usize,
    /// Reduction loop that becomes a spatial axis of the partial stage.
    pub iter_id: usize,
    /// Position of that axis among the partial stage's spatial axes.
    pub factor_iter_id: usize,
}

impl RfactorStep {
    /// Returns the id of the partial stage.
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<usize> {
        let stage = state.stage_checked(STEP, self.stage_id)?;
        let name = stage.name();
        ensure!(
            !stage.is_placeholder() && !stage.is_inlined(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is a {} stage", stage.describe()) }
        );
        ensure!(
            stage.op.has_reduce(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} has no reduction axes") }
        );
        ensure!(
            !state.attach_map.has_attached(self.stage_id),
            InvalidTransformSnafu { step: STEP, reason: format!("stages are attached to {name}") }
        );
        ensure!(
            stage.tensorized_iter().is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is tensorized") }
        );
        let it = state.iter_checked(STEP, self.stage_id, self.iter_id)?;
        ensure!(
            it.kind == IterKind::Reduction,
            InvalidTransformSnafu { step: STEP, reason: format!("iterator {} is {}", it.name, it.kind) }
        );
        ensure!(
            self.factor_iter_id <= stage.op.axes.len(),
            InvalidTransformSnafu {
                step: STEP,
                reason: format!("factor position {} is past the {} spatial axes", self.factor_iter_id, stage.op.axes.len()),
            }
        );
        if let Some(mixed) = stage.iters.iter().find(|it| it.kind == IterKind::Mixed) {
            return InvalidTransformSnafu {
                step: STEP,
                reason: format!("iterator {} mixes spatial and reduction loops", mixed.name),
            }
            .fail();
        }

        let factor = loop_axis(it)?;
        let remaining_ids: SmallVec<[usize; 4]> = (0..stage.iters.len())
            .filter(|&i| i != self.iter_id && stage.iters[i].kind == IterKind::Reduction)
            .collect();
        let remaining = remaining_ids.iter().map(|&i| loop_axis(&stage.iters[i])).collect::<Result<Vec<_>>>()?;

        // A reduction axis walked by a single loop maps onto that loop's axis
        // in the partial stage; one spread over several loops becomes opaque.
        let n = stage.op.axes.len();
        let reduce_index = |r: usize| {
            let walkers: SmallVec<[usize; 2]> =
                stage.iters.iter().enumerate().filter(|(_, it)| it.walks(n + r)).map(|(i, _)| i).collect();
            match walkers.as_slice() {
                &[i] if i == self.iter_id => AccessIndex::Axis(self.factor_iter_id),
                &[i] => remaining_ids.iter().position(|&j| j == i).map_or(AccessIndex::Expr, AccessIndex::Reduce),
                _ => AccessIndex::Expr,
            }
        };
        let reads = stage
            .op
            .reads
            .iter()
            .map(|access| {
                let indices = access.indices.iter().map(|&idx| match idx {
                    AccessIndex::Axis(a) if a >= self.factor_iter_id => AccessIndex::Axis(a + 1),
                    AccessIndex::Reduce(r) => reduce_index(r),
                    other => other,
                });
                Access::new(access.tensor.clone(), indices)
            })
            .collect();

        let (partial, target) = Operation::rfactor_of(&stage.op, factor, self.factor_iter_id, remaining, reads);
        ensure!(
            state.stage_id(&partial.name).is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} already exists", partial.name) }
        );

        let layout = stage.layout;
        let partial = Stage::new(Arc::new(partial), layout.scope, layout.data_alignment);
        let mut target = Stage::new(Arc::new(target), layout.scope, layout.data_alignment);
        target.compute_at = stage.compute_at;

        state.attach_map.shift_stage_ids(self.stage_id);
        state.stages[self.stage_id] = Arc::new(target);
        state.stages.insert(self.stage_id, Arc::new(partial));
        if state.stages[self.stage_id + 1].compute_at == ComputeAtKind::Iter {
            state.infer_bound(self.stage_id + 1);
        }
        Ok(self.stage_id)
    }
}

fn loop_axis(it: &LoopIter) -> Result<Axis> {
    let extent = it.extent.context(InvalidTransformSnafu {
        step: STEP,
        reason: format!("reduction loop {} has an unknown extent", it.name),
    })?;
    Ok(Axis::new(it.name.clone(), extent))
}
