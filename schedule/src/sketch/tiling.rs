//! Multi-level tiling helpers shared by the built-in rules.

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tessel_ir::IterKind;

use crate::config::SketchParams;
use crate::error::*;
use crate::state::State;

const STEP: &str = "multi_level_tiling";

fn position_of(state: &State, stage_id: usize, name: &str) -> Result<usize> {
    state.stage(stage_id).and_then(|s| s.iters.iter().position(|it| it.name == name)).context(InvalidTransformSnafu {
        step: STEP,
        reason: format!("stage {stage_id} has no iterator {name}"),
    })
}

fn reorder_by_name(state: &mut State, stage_id: usize, names: &[String]) -> Result<()> {
    let order = names.iter().map(|n| position_of(state, stage_id, n)).collect::<Result<Vec<_>>>()?;
    state.reorder(stage_id, &order)
}

/// Tile `stage_id` following the tiling structure of `params` (e.g.
/// `"SSRSRS"`): every spatial iterator is split into as many levels as there
/// are `S`, every reduction iterator into as many as there are `R`, all with
/// unknown lengths, and the pieces are reordered level by level.
///
/// Returns the log ids of the spatial splits, in iterator order.
pub fn multi_level_tiling(state: &mut State, stage_id: usize, params: &SketchParams) -> Result<SmallVec<[usize; 4]>> {
    let structure = params.tiling_structure.as_str();
    ensure!(
        !structure.is_empty() && structure.chars().all(|c| matches!(c, 'S' | 's' | 'R' | 'r')),
        InvalidTransformSnafu { step: STEP, reason: format!("bad tiling structure {structure:?}") }
    );
    let (n_space, n_reduce) = (params.spatial_levels(), params.reduce_levels());

    let iters: Vec<(String, IterKind)> = state
        .stage_checked(STEP, stage_id)?
        .iters
        .iter()
        .map(|it| (it.name.clone(), it.kind))
        .collect();

    let mut space_levels = vec![Vec::new(); n_space];
    let mut reduce_levels = vec![Vec::new(); n_reduce];
    let mut rest = Vec::new();
    let mut split_steps = SmallVec::new();
    for (name, kind) in iters {
        let levels = match kind {
            IterKind::Spatial if n_space > 0 => &mut space_levels,
            IterKind::Reduction if n_reduce > 0 => &mut reduce_levels,
            _ => {
                rest.push(name);
                continue;
            }
        };
        if levels.len() == 1 {
            levels[0].push(name);
            continue;
        }

        let pos = position_of(state, stage_id, &name)?;
        let parts = state.split(stage_id, pos, &vec![None; levels.len() - 1], true)?;
        if kind == IterKind::Spatial {
            split_steps.push(state.steps().len() - 1);
        }
        for (level, part) in levels.iter_mut().zip(parts) {
            level.push(part.name);
        }
    }

    let (mut space, mut reduce) = (space_levels.into_iter(), reduce_levels.into_iter());
    let mut order = Vec::new();
    for c in structure.chars() {
        let level = if c.eq_ignore_ascii_case(&'s') { space.next() } else { reduce.next() };
        order.extend(level.into_iter().flatten());
    }
    order.extend(rest);
    reorder_by_name(state, stage_id, &order)?;
    Ok(split_steps)
}

/// Tile the spatial iterators of `stage_id` by following `split_step_ids`
/// (one per spatial iterator) into `n_split + 1` levels, outermost levels
/// first. Non-spatial iterators go innermost.
pub fn follow_tiling(state: &mut State, stage_id: usize, split_step_ids: &[usize], n_split: usize) -> Result<()> {
    let stage = state.stage_checked(STEP, stage_id)?;
    let (spatial, rest): (Vec<_>, Vec<_>) = stage.iters.iter().partition(|it| it.kind == IterKind::Spatial);
    ensure!(
        spatial.len() == split_step_ids.len(),
        InvalidTransformSnafu {
            step: STEP,
            reason: format!("{} spatial iterators, {} splits to follow", spatial.len(), split_step_ids.len()),
        }
    );
    let spatial: Vec<String> = spatial.into_iter().map(|it| it.name.clone()).collect();
    let rest: Vec<String> = rest.into_iter().map(|it| it.name.clone()).collect();

    let mut levels = vec![Vec::new(); n_split + 1];
    for (name, &step_id) in spatial.iter().zip(split_step_ids) {
        let pos = position_of(state, stage_id, name)?;
        let parts = state.follow_split(stage_id, pos, step_id, n_split)?;
        for (level, part) in levels.iter_mut().zip(parts) {
            level.push(part.name);
        }
    }

    let order: Vec<String> = levels.into_iter().flatten().chain(rest).collect();
    reorder_by_name(state, stage_id, &order)
}
