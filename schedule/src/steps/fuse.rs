use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::ensure;
use tessel_ir::IterKind;

use crate::error::*;
use crate::state::iterator::{extent_product, merge_origins};
use crate::state::{LoopIter, State};

const STEP: &str = "fuse";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseStep {
    pub stage_id: usize,
    /// Consecutive iterator ids, outermost first.
    pub iter_ids: SmallVec<[usize; 4]>,
}

impl FuseStep {
    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<LoopIter> {
        let stage = state.stage_checked(STEP, self.stage_id)?;
        let (Some(&first), Some(&last)) = (self.iter_ids.first(), self.iter_ids.last()) else {
            return InvalidTransformSnafu { step: STEP, reason: "no iterators given" }.fail();
        };
        ensure!(
            self.iter_ids.windows(2).all(|w| w[1] == w[0] + 1),
            InvalidTransformSnafu {
                step: STEP,
                reason: format!("iterators {:?} are not consecutive", self.iter_ids.as_slice()),
            }
        );
        ensure!(
            last < stage.iters.len(),
            InvalidTransformSnafu {
                step: STEP,
                reason: format!("stage {} has no iterator {last} (it has {})", stage.name(), stage.iters.len()),
            }
        );
        ensure!(
            !stage.is_inlined(),
            InvalidTransformSnafu { step: STEP, reason: format!("stage {} is inlined", stage.name()) }
        );

        let fused = &stage.iters[first..=last];
        if let Some(it) = fused.iter().find(|it| it.is_annotated()) {
            return InvalidTransformSnafu {
                step: STEP,
                reason: format!("iterator {} is annotated with {}", it.name, it.annotation),
            }
            .fail();
        }
        if let Some(i) = state.attached_iters(self.stage_id).into_iter().find(|&i| i >= first && i < last) {
            return InvalidTransformSnafu {
                step: STEP,
                reason: format!("a stage is attached at {}, inside the fused range", stage.iters[i].name),
            }
            .fail();
        }

        let name = fused.iter().map(|it| it.name.as_str()).collect::<Vec<_>>().join("@");
        let extent = extent_product(STEP, fused.iter().map(|it| it.extent))?;
        let kind = fused.iter().map(|it| it.kind).reduce(|a, b| if a == b { a } else { IterKind::Mixed });
        let fused_iter =
            LoopIter { origin: merge_origins(fused), ..LoopIter::new(name, extent, kind.unwrap_or(IterKind::Mixed)) };

        let removed = last - first;
        state.stage_mut(self.stage_id).iters.splice(first..=last, [fused_iter.clone()]);
        state.attach_map.remap_iters(self.stage_id, |i| if i > last { i - removed } else { i.min(first) });
        Ok(fused_iter)
    }
}
