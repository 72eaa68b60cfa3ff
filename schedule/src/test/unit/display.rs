use tessel_ir::MemScope;

use crate::intrinsic::IntrinsicRegistry;
use crate::test::helpers::*;
use crate::{IterAnnotation, State};

#[test]
fn test_render_attached_stage() {
    let dag = matmul_relu_dag(8);
    let mut state = State::new(&dag);
    state.compute_at(2, 3, 1).unwrap();
    state.parallel(3, 0).unwrap();

    let expected = "\
Placeholder: A, B
parallel i (0,8)
  for j (0,8)
    for i (0,1)
      for j (0,1)
        for k (0,8)
          C = ...
    D = ...
";
    assert_eq!(state.to_string(), expected);
}

#[test]
fn test_render_unknown_extent_and_binding() {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    state.split(2, 0, &[None], true).unwrap();
    state.bind(2, 0, IterAnnotation::BlockY).unwrap();

    let rendered = state.to_string();
    assert!(rendered.contains("blockIdx.y i.0 (0,None)\n"), "{rendered}");
    assert!(rendered.contains("  for i.1 (0,None)\n"), "{rendered}");
}

#[test]
fn test_render_skips_inlined() {
    let dag = elementwise_chain_dag(4);
    let mut state = State::new(&dag);
    state.compute_inline(1).unwrap();
    assert_eq!(state.to_string(), "Placeholder: A\nfor i (0,4)\n  for j (0,4)\n    C = ...\n");
}

#[test]
fn test_step_rendering() {
    let dag = tensor_core_dag();
    let registry = IntrinsicRegistry::wmma();
    let mut state = State::new(&dag);
    state.cache_write(2, MemScope::WmmaAccumulator).unwrap();
    state.split(2, 0, &[None, Some(2)], true).unwrap();
    state.follow_split(3, 0, 1, 1).unwrap();
    state.follow_fused_split(3, 2, &[1], 0, false).unwrap();
    state.fuse(3, &[0, 1]).unwrap();
    state.reorder(3, &[1, 0, 2, 3, 4]).unwrap();
    state.unroll(3, 1).unwrap();
    state.compute_at(2, 3, 2).unwrap();
    let shared = state.cache_read(0, MemScope::Shared, &[2]).unwrap();
    state.cache_read(shared, MemScope::WmmaMatrixA, &[3]).unwrap();
    state.tensorize(2, 2, "intrin_wmma_load_matrix_a", &registry).unwrap();
    state.compute_root(1).unwrap();

    let rendered: Vec<String> = state.steps().iter().map(ToString::to_string).collect();
    assert_eq!(rendered, [
        r#"cache_write(2, "wmma.accumulator")"#,
        "split(2, 0, [None, 2], inner_to_outer=true)",
        "follow_split(3, 0, 1, 1)",
        "follow_fused_split(3, 2, [1], 0, false)",
        "fuse(3, [0, 1])",
        "reorder(3, [1, 0, 2, 3, 4])",
        "unroll(3, 1)",
        "compute_at(2, 3, 2)",
        r#"cache_read(0, "shared", [2])"#,
        r#"cache_read(1, "wmma.matrix_a", [3])"#,
        r#"tensorize(2, 2, "intrin_wmma_load_matrix_a")"#,
        "compute_root(1)",
    ]);
}
