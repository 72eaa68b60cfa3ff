use serde::{Deserialize, Serialize};
use snafu::ensure;
use tessel_ir::IterKind;

use crate::error::*;
use crate::state::{IterAnnotation, LoopIter, State};

/// Vectorize, parallel, unroll or an execution-resource binding on one
/// iterator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationStep {
    pub stage_id: usize,
    pub iter_id: usize,
    pub annotation: IterAnnotation,
}

impl AnnotationStep {
    /// Name of the primitive that recorded this step.
    pub fn primitive(&self) -> &'static str {
        match self.annotation {
            IterAnnotation::Vectorize => "vectorize",
            IterAnnotation::Parallel => "parallel",
            IterAnnotation::Unroll => "unroll",
            _ => "bind",
        }
    }

    pub(crate) fn apply_to_state(&self, state: &mut State) -> Result<LoopIter> {
        let step = self.primitive();
        let ann = self.annotation;
        let stage = state.stage_checked(step, self.stage_id)?;
        let it = state.iter_checked(step, self.stage_id, self.iter_id)?;

        ensure!(
            ann != IterAnnotation::None && ann != IterAnnotation::Tensorize,
            InvalidTransformSnafu { step, reason: format!("{ann} is not an annotation") }
        );
        ensure!(
            !stage.is_inlined(),
            InvalidTransformSnafu { step, reason: format!("stage {} is inlined", stage.name()) }
        );
        ensure!(
            !it.is_annotated(),
            InvalidTransformSnafu { step, reason: format!("iterator {} is already annotated with {}", it.name, it.annotation) }
        );

        match ann {
            IterAnnotation::Vectorize => {
                ensure!(
                    self.iter_id + 1 == stage.iters.len(),
                    InvalidTransformSnafu { step, reason: format!("iterator {} is not innermost", it.name) }
                );
                ensure!(
                    it.kind == IterKind::Spatial,
                    InvalidTransformSnafu { step, reason: format!("iterator {} is {}", it.name, it.kind) }
                );
                if let (Some(extent), Some(lanes)) = (it.extent, state.limits.max_vector_lanes(stage.op.dtype)) {
                    ensure!(
                        extent <= lanes,
                        InvalidTransformSnafu {
                            step,
                            reason: format!("extent {extent} of {} exceeds {lanes} vector lanes", it.name),
                        }
                    );
                }
            }
            IterAnnotation::Parallel => {
                ensure!(
                    it.kind == IterKind::Spatial,
                    InvalidTransformSnafu { step, reason: format!("iterator {} is {}", it.name, it.kind) }
                );
            }
            IterAnnotation::Unroll => {}
            _ => {
                ensure!(
                    ann.is_binding(),
                    InvalidTransformSnafu { step, reason: format!("{ann} is not an execution resource") }
                );
                if let Some(other) = stage.iters.iter().find(|o| o.annotation == ann) {
                    return InvalidTransformSnafu {
                        step,
                        reason: format!("{ann} is already bound to {} in stage {}", other.name, stage.name()),
                    }
                    .fail();
                }
                ensure!(
                    !ann.is_outer_binding() || it.kind == IterKind::Spatial,
                    InvalidTransformSnafu { step, reason: format!("cannot bind {} iterator {} to {ann}", it.kind, it.name) }
                );
                if let (false, Some(extent), Some(threads)) =
                    (ann.is_outer_binding(), it.extent, state.limits.max_threads_per_block)
                {
                    ensure!(
                        extent <= threads as i64,
                        InvalidTransformSnafu {
                            step,
                            reason: format!("extent {extent} of {} exceeds {threads} threads per block", it.name),
                        }
                    );
                }
            }
        }

        let stage = state.stage_mut(self.stage_id);
        stage.iters[self.iter_id].annotation = ann;
        Ok(stage.iters[self.iter_id].clone())
    }
}
