use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::state::State;

const STEP: &str = "reorder";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderStep {
    pub stage_id: usize,
    /// Old iterator id of each new position.
    pub after_ids: SmallVec<[usize; 8]>,
}

impl ReorderStep {
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<()> {
        let stage = state.stage_checked(STEP, self.stage_id)?;
        let n = stage.iters.len();
        ensure!(
            self.after_ids.len() == n,
            InvalidTransformSnafu {
                step: STEP,
                reason: format!("order has {} entries, stage {} has {n} iterators", self.after_ids.len(), stage.name()),
            }
        );

        let mut new_pos = vec![usize::MAX; n];
        for (pos, &old) in self.after_ids.iter().enumerate() {
            ensure!(
                old < n && new_pos[old] == usize::MAX,
                InvalidTransformSnafu {
                    step: STEP,
                    reason: format!("{:?} is not a permutation of 0..{n}", self.after_ids.as_slice()),
                }
            );
            new_pos[old] = pos;
        }
        if let Some(t) = stage.tensorized_iter() {
            ensure!(
                new_pos[t] == t,
                InvalidTransformSnafu { step: STEP, reason: format!("tensorized iterator {} cannot move", stage.iters[t].name) }
            );
        }

        let iters = self.after_ids.iter().map(|&old| stage.iters[old].clone()).collect();
        state.stage_mut(self.stage_id).iters = iters;
        state.attach_map.remap_iters(self.stage_id, move |i| new_pos[i]);
        Ok(())
    }
}
