//! Hand-written sketch for a block-sparse dense layer, registered as a
//! custom rule that takes over the two BSR stages.

use std::sync::Arc;

use crate::analysis;
use crate::config::SketchParams;
use crate::error::Result;
use crate::sketch::{ConditionKind, CustomSketchRule, Expansion, SketchPolicy};
use crate::state::State;
use crate::task::SearchTask;
use crate::test::helpers::*;

fn position(state: &State, stage_id: usize, name: &str) -> usize {
    state.stages()[stage_id].iters.iter().position(|it| it.name == name).unwrap()
}

fn meet_condition(_: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
    match state.stages()[stage_id].op.tag.as_str() {
        SPARSE_TAG | SPARSE_BLOCK_TAG => ConditionKind::ApplyAndSkipRest,
        _ => ConditionKind::Pass,
    }
}

fn apply(_: &SearchTask, state: &State, stage_id: usize) -> Result<Vec<Expansion>> {
    if state.stages()[stage_id].op.tag == SPARSE_BLOCK_TAG {
        return Ok(vec![(state.clone(), stage_id.checked_sub(1))]);
    }

    let mut s = state.clone();
    let block = stage_id - 1;
    let mut consumer = stage_id;
    if let Some(c) = analysis::elementwise_consumer(&s, stage_id) {
        s.compute_inline(stage_id)?;
        consumer = c;
    }

    s.split(block, 0, &[None, None], true)?;
    let i_split = s.steps().len() - 1;
    s.follow_split(consumer, 0, i_split, 1)?;
    let nb_j = position(&s, block, "nb_j");
    s.split(block, nb_j, &[None], true)?;
    let j_split = s.steps().len() - 1;
    s.follow_split(consumer, 2, j_split, 1)?;

    let order: Vec<usize> = ["i.0", "nb_j.0", "i.1", "nb_j.1", "elem_idx", "i.2", "j", "c"]
        .iter()
        .map(|name| position(&s, block, name))
        .collect();
    s.reorder(block, &order)?;
    s.reorder(consumer, &[0, 2, 1, 3])?;
    s.compute_at(block, consumer, 1)?;

    Ok(vec![(s, stage_id.checked_sub(2))])
}

fn sparse_policy() -> SketchPolicy {
    let task = cpu_task("sparse_dense", sparse_dense_dag(128, 512, 256, 64));
    let mut policy = SketchPolicy::new(task, SketchParams::cpu());
    policy.register_rule(Arc::new(CustomSketchRule::new("sparse_dense", meet_condition, apply)));
    policy
}

#[test]
fn test_sparse_sketch() {
    let sketches = sparse_policy().generate_sketches();
    assert_eq!(sketches.len(), 1);

    let sketch = &sketches[0];
    let block = sketch.stage_id("T_block").unwrap();
    let relu = sketch.stage_id("T_relu").unwrap();
    assert!(sketch.stages()[sketch.stage_id("T_bsrmm").unwrap()].is_inlined());
    assert_eq!(sketch.attach_map().attach_point(block), Some((relu, 1)));
    assert_eq!(iter_names(sketch, block), ["i.0", "nb_j.0", "i.1", "nb_j.1", "elem_idx", "i.2", "j", "c"]);
    assert_eq!(iter_names(sketch, relu), ["m.0", "n.0", "m.1", "n.1"]);
}

#[test]
fn test_sparse_sketch_specializes() {
    let policy = sparse_policy();
    let sketch = policy.generate_sketches().remove(0);

    let i_split = sketch.steps().iter().position(|s| s.name() == "split").unwrap();
    let filled = policy.task().fill_split_lengths(&sketch, i_split, &[Some(4), Some(8)]).unwrap();

    let relu = filled.stage_id("T_relu").unwrap();
    assert_eq!(filled.stages()[relu].iters[0].extent, Some(4));
    assert_eq!(filled.stages()[relu].iters[2].extent, Some(32));
}
