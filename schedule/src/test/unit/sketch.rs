use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tessel_ir::AccessIndex::{Axis, Reduce};
use tessel_ir::{ComputeDag, DType, OpFlag, Operation};

use crate::analysis;
use crate::config::{HardwareParams, SketchParams};
use crate::sketch::{ConditionKind, CustomSketchRule, SketchPolicy, SketchRule};
use crate::test::helpers::*;
use crate::{SearchTask, State};

fn x_block_dag() -> ComputeDag {
    ComputeDag::new([
        Operation::placeholder("A", &[16, 16], DType::Float32),
        Operation::compute("X_block", [("i", 16), ("j", 16)], DType::Float32)
            .reduce([("k", 16)])
            .read("A", [Axis(0), Reduce(0)])
            .with_tag("X_block"),
        Operation::compute("X", [("i", 16), ("j", 16)], DType::Float32).read("X_block", [Axis(0), Axis(1)]),
    ])
    .unwrap()
}

fn stage_names(state: &State) -> Vec<&str> {
    state.stages().iter().map(|s| s.name()).collect()
}

// ===== Dispatch =====

#[test]
fn test_apply_and_skip_rest_hides_later_rules() {
    let applied = Arc::new(AtomicUsize::new(0));
    let visited = Arc::new(Mutex::new(Vec::new()));

    let counter = applied.clone();
    let x_block = CustomSketchRule::new(
        "x_block",
        |_, state, stage_id| {
            if state.stages()[stage_id].op.tag == "X_block" {
                ConditionKind::ApplyAndSkipRest
            } else {
                ConditionKind::Pass
            }
        },
        move |_, state, stage_id| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![(state.clone(), stage_id.checked_sub(1))])
        },
    );
    let seen = visited.clone();
    let observer = CustomSketchRule::new(
        "observer",
        move |_, _, stage_id| {
            seen.lock().unwrap().push(stage_id);
            ConditionKind::Pass
        },
        |_, _, _| panic!("observer never applies"),
    );

    let mut policy = SketchPolicy::new(cpu_task("x_block", x_block_dag()), SketchParams::cpu());
    policy.register_rule(Arc::new(x_block));
    policy.register_rule(Arc::new(observer));

    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 1);
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(*visited.lock().unwrap(), [2, 0]);
    assert!(sketches[0].steps().is_empty());
}

#[test]
fn test_apply_branches_are_independent() {
    let split_rule = |name: &'static str, iter_id: usize| {
        Arc::new(CustomSketchRule::new(
            name,
            |_, _, _| ConditionKind::Apply,
            move |_, state, stage_id| {
                let mut state = state.clone();
                state.split(stage_id, iter_id, &[Some(4)], true)?;
                Ok(vec![(state, None)])
            },
        )) as Arc<dyn SketchRule>
    };
    let params = SketchParams::builder().builtin_rules(false).build();
    let task = cpu_task("matmul", matmul_dag(64, 64, 64));
    let mut policy = SketchPolicy::new(task.clone(), params);
    policy.register_rule(split_rule("split_i", 0));
    policy.register_rule(split_rule("split_j", 1));

    let init = task.init_state();
    let out = policy.expand(&init, 2);
    assert_eq!(out.len(), 2);
    assert_eq!(iter_names(&out[0].0, 2), ["i.0", "i.1", "j", "k"]);
    assert_eq!(iter_names(&out[1].0, 2), ["i", "j.0", "j.1", "k"]);
    assert_eq!(out[1].0.steps().len(), 1);
    assert!(init.steps().is_empty());

    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 2);
}

#[test]
fn test_failing_rule_drops_only_its_branch() {
    let broken = CustomSketchRule::new(
        "broken",
        |_, _, _| ConditionKind::Apply,
        |_, state, stage_id| {
            let mut state = state.clone();
            state.fuse(stage_id, &[0, 2])?;
            Ok(vec![(state, stage_id.checked_sub(1))])
        },
    );
    let task = cpu_task("matmul", matmul_dag(64, 64, 64));
    let baseline = SketchPolicy::new(task.clone(), SketchParams::cpu()).generate_sketches();

    let mut policy = SketchPolicy::new(task, SketchParams::cpu());
    policy.register_rule(Arc::new(broken));
    assert_eq!(policy.generate_sketches(), baseline);
}

#[test]
fn test_unmatched_stage_is_skipped() {
    let params = SketchParams::builder().builtin_rules(false).build();
    let task = cpu_task("matmul", matmul_dag(64, 64, 64));
    let mut policy = SketchPolicy::new(task.clone(), params);
    policy.register_rule(Arc::new(CustomSketchRule::new("never", |_, _, _| ConditionKind::Pass, |_, _, _| Ok(vec![]))));

    let init = task.init_state();
    let out = policy.expand(&init, 2);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], (init.clone(), Some(1)));

    let sketches = policy.generate_sketches();
    assert_eq!(sketches, [init]);
}

#[test]
fn test_expand_past_last_stage() {
    let task = cpu_task("matmul", matmul_dag(64, 64, 64));
    let policy = SketchPolicy::new(task.clone(), SketchParams::cpu());
    assert!(policy.expand(&task.init_state(), 9).is_empty());
}

#[test]
fn test_rule_order() {
    let mut policy = SketchPolicy::new(cpu_task("matmul", matmul_dag(8, 8, 8)), SketchParams::cpu());
    policy.register_rule(Arc::new(CustomSketchRule::new("custom", |_, _, _| ConditionKind::Pass, |_, _, _| Ok(vec![]))));

    let names: Vec<&str> = policy.rules().map(|r| r.name()).collect();
    assert_eq!(names, [
        "custom",
        "always_inline",
        "add_rfactor",
        "add_cache_write",
        "multi_level_tiling_with_fusion",
        "multi_level_tiling",
        "skip_stage",
    ]);
    assert_eq!(ConditionKind::ApplyAndSkipRest.to_string(), "apply_and_skip_rest");
}

// ===== Built-in rules =====

#[test]
fn test_matmul_cpu_sketches() {
    let policy = SketchPolicy::new(cpu_task("matmul", matmul_dag(512, 512, 512)), SketchParams::cpu());
    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 4);

    let cached: Vec<_> = sketches.iter().filter(|s| s.stage_id("C.local").is_some()).collect();
    assert_eq!(cached.len(), 2);
    let mut attach: Vec<_> = cached.iter().map(|s| s.attach_map().attach_point(2)).collect();
    attach.sort();
    assert_eq!(attach, [Some((3, 1)), Some((3, 3))]);
    for s in &cached {
        assert_eq!(stage_names(s), ["A", "B", "C.local", "C"]);
        assert_eq!(s.stages()[2].iters.len(), 4 + 4 + 2);
    }

    let tiled = sketches.iter().find(|s| s.stage_id("C.local").is_none() && !s.steps().is_empty()).unwrap();
    assert_eq!(
        iter_names(tiled, 2),
        ["i.0", "j.0", "i.1", "j.1", "k.0", "i.2", "j.2", "k.1", "i.3", "j.3"]
    );
    assert!(sketches.iter().any(|s| s.steps().is_empty()));
}

#[test]
fn test_matmul_gpu_sketch() {
    let policy = SketchPolicy::new(cuda_task("matmul", matmul_dag(512, 512, 512)), SketchParams::gpu());
    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 1);

    let sketch = &sketches[0];
    assert_eq!(stage_names(sketch), ["A", "B", "C.local", "C"]);
    assert_eq!(sketch.attach_map().attach_point(2), Some((3, 5)));
    assert_eq!(sketch.stages()[2].iters.len(), 5 * 2 + 3);
    assert_eq!(sketch.stages()[3].iters.len(), 8);
}

#[test]
fn test_matmul_relu_fuses_into_consumer() {
    let policy = SketchPolicy::new(cpu_task("matmul_relu", matmul_relu_dag(256)), SketchParams::cpu());
    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 4);
    assert!(sketches.iter().all(|s| s.stage_id("C.local").is_none()));
    assert_eq!(sketches.iter().filter(|s| s.attach_map().attach_point(2).is_some()).count(), 2);

    let policy = SketchPolicy::new(cuda_task("matmul_relu", matmul_relu_dag(256)), SketchParams::gpu());
    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 1);
    assert_eq!(sketches[0].attach_map().attach_point(2), Some((3, 5)));
}

#[test]
fn test_elementwise_stage_inlined() {
    let policy = SketchPolicy::new(cpu_task("chain", elementwise_chain_dag(64)), SketchParams::cpu());
    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 1);
    assert!(sketches[0].stages()[1].is_inlined());
    assert_eq!(analysis::consumers(&sketches[0], 0).as_slice(), [2]);
}

#[test]
fn test_no_cache_write_flag() {
    let mut ops = matmul(64, 64, 64);
    let c = ops.pop().unwrap().with_flag(OpFlag::NoCacheWrite);
    ops.push(c);
    let policy = SketchPolicy::new(cpu_task("matmul", ComputeDag::new(ops).unwrap()), SketchParams::cpu());

    let sketches = policy.generate_sketches();
    assert_eq!(sketches.len(), 2);
    assert!(sketches.iter().all(|s| s.stages().len() == 3));
}

#[test]
fn test_max_sketches_truncates() {
    let params = SketchParams::builder().max_sketches(2).build();
    let policy = SketchPolicy::new(cpu_task("matmul", matmul_dag(64, 64, 64)), params);
    assert_eq!(policy.generate_sketches().len(), 2);
}

#[test]
fn test_sketches_replay() {
    let task = cpu_task("matmul_relu", matmul_relu_dag(128));
    let policy = SketchPolicy::new(task.clone(), SketchParams::cpu());
    for sketch in policy.generate_sketches() {
        assert_eq!(task.replay(sketch.steps()).unwrap(), sketch);
    }
}

/// `S[i] = sum_k A[i, k]`: four outputs over a long reduction.
fn row_sum_dag() -> ComputeDag {
    ComputeDag::new([
        Operation::placeholder("A", &[4, 1024], DType::Float32),
        Operation::compute("S", [("i", 4)], DType::Float32).reduce([("k", 1024)]).read("A", [Axis(0), Reduce(0)]),
    ])
    .unwrap()
}

fn row_sum_task(hardware: HardwareParams) -> Arc<SearchTask> {
    Arc::new(SearchTask::builder().name("row_sum").dag(row_sum_dag()).hardware(hardware).build())
}

#[test]
fn test_long_reduction_gets_rfactor_sketches() {
    let task = row_sum_task(HardwareParams::builder().num_cores(4).build());
    let sketches = SketchPolicy::new(task.clone(), SketchParams::cpu()).generate_sketches();
    assert_eq!(sketches.len(), 3);

    let factored: Vec<_> = sketches.iter().filter(|s| s.stage_id("S.rf").is_some()).collect();
    assert_eq!(factored.len(), 2);
    for sketch in &factored {
        assert_eq!(stage_names(sketch), ["A", "S.rf", "S"]);
        assert_eq!(sketch.stages()[2].op.reduce_axes.len(), 1);
        assert_eq!(task.replay(sketch.steps()).unwrap(), **sketch);
    }
    // The inner branch keeps the factored axis innermost.
    let inner = factored.iter().find(|s| s.stages()[1].op.axes[1].name == "k.1").unwrap();
    assert_eq!(iter_names(inner, 1), ["i", "k.0", "k.1"]);
    assert!(sketches.iter().any(|s| s.steps().is_empty()));
}

#[test]
fn test_rfactor_not_added_on_gpu_or_when_spatial_suffices() {
    let gpu = row_sum_task(HardwareParams::cuda());
    let sketches = SketchPolicy::new(gpu, SketchParams::gpu()).generate_sketches();
    assert!(sketches.iter().all(|s| s.stage_id("S.rf").is_none()));

    let many_cores = row_sum_task(HardwareParams::builder().num_cores(2048).build());
    let sketches = SketchPolicy::new(many_cores, SketchParams::cpu()).generate_sketches();
    assert_eq!(sketches.len(), 1);
    assert!(sketches[0].steps().is_empty());
}

#[test]
fn test_fusion_levels_follow_target_hardware() {
    // Same structure spelled differently still tiles for the GPU.
    let task = cuda_task("matmul_relu", matmul_relu_dag(256));
    let params = SketchParams::builder().tiling_structure("sssrrsrs").build();
    let sketches = SketchPolicy::new(task.clone(), params).generate_sketches();
    assert_eq!(sketches, SketchPolicy::new(task, SketchParams::gpu()).generate_sketches());
    assert_eq!(sketches[0].attach_map().attach_point(2), Some((3, 5)));
}
