use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::analysis;
use crate::error::*;
use crate::state::{ComputeAtKind, State};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeAtStep {
    pub stage_id: usize,
    pub target_stage_id: usize,
    pub target_iter_id: usize,
}

impl ComputeAtStep {
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<()> {
        const STEP: &str = "compute_at";
        let stage = state.stage_checked(STEP, self.stage_id)?;
        let target = state.stage_checked(STEP, self.target_stage_id)?;
        let it = state.iter_checked(STEP, self.target_stage_id, self.target_iter_id)?;

        ensure!(
            self.stage_id != self.target_stage_id,
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} cannot be attached to itself", stage.name()) }
        );
        for s in [stage, target] {
            ensure!(
                !s.is_placeholder() && !s.is_inlined(),
                InvalidTransformSnafu { step: STEP, reason: format!("stage {} is a {} stage", s.name(), s.describe()) }
            );
        }
        ensure!(
            !it.is_tensorized(),
            InvalidTransformSnafu { step: STEP, reason: format!("iterator {} of {} is tensorized", it.name, target.name()) }
        );
        ensure!(
            !state.attach_map.ancestors(self.target_stage_id).any(|a| a == self.stage_id),
            InvalidTransformSnafu {
                step: STEP,
                reason: format!("{} is computed inside {}; attaching would form a cycle", target.name(), stage.name()),
            }
        );

        state.stage_mut(self.stage_id).compute_at = ComputeAtKind::Iter;
        state.attach_map.set_compute_at(self.stage_id, self.target_stage_id, self.target_iter_id);
        state.infer_bound(self.stage_id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRootStep {
    pub stage_id: usize,
}

impl ComputeRootStep {
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<()> {
        const STEP: &str = "compute_root";
        let stage = state.stage_checked(STEP, self.stage_id)?;
        ensure!(
            !stage.is_placeholder(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} is a placeholder", stage.name()) }
        );

        let was_attached = stage.compute_at == ComputeAtKind::Iter;
        state.stage_mut(self.stage_id).compute_at = ComputeAtKind::Root;
        state.attach_map.detach(self.stage_id);
        if was_attached {
            state.infer_bound(self.stage_id);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInlineStep {
    pub stage_id: usize,
}

impl ComputeInlineStep {
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<()> {
        const STEP: &str = "compute_inline";
        let stage = state.stage_checked(STEP, self.stage_id)?;
        let name = stage.name();
        ensure!(
            !stage.is_placeholder() && !stage.is_inlined(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is a {} stage", stage.describe()) }
        );
        ensure!(
            !stage.op.has_reduce(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} has reduction axes") }
        );
        ensure!(
            !state.attach_map.has_attached(self.stage_id),
            InvalidTransformSnafu { step: STEP, reason: format!("stages are attached to {name}") }
        );
        ensure!(
            stage.tensorized_iter().is_none(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {name} is tensorized") }
        );

        let consumers = analysis::consumers(state, self.stage_id);
        let [consumer] = consumers.as_slice() else {
            return InvalidTransformSnafu {
                step: STEP,
                reason: format!("stage {name} has {} consumers, inlining needs exactly one", consumers.len()),
            }
            .fail();
        };
        ensure!(
            state.analyzer().elementwise_match(self.stage_id, *consumer),
            InvalidTransformSnafu {
                step: STEP,
                reason: format!("{} does not read {name} elementwise", state.stages[*consumer].name()),
            }
        );

        state.stage_mut(self.stage_id).compute_at = ComputeAtKind::Inlined;
        state.attach_map.detach(self.stage_id);
        Ok(())
    }
}
