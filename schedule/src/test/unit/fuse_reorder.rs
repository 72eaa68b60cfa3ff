use tessel_ir::IterKind;
use test_case::test_case;

use crate::error::ErrorKind;
use crate::test::helpers::*;
use crate::State;

// ===== Fuse =====

#[test]
fn test_fuse_spatial_pair() {
    let dag = matmul_dag(64, 32, 16);
    let mut state = State::new(&dag);
    let fused = state.fuse(2, &[0, 1]).unwrap();

    assert_eq!(fused.name, "i@j");
    assert_eq!(fused.extent, Some(2048));
    assert_eq!(fused.kind, IterKind::Spatial);
    assert_eq!(iter_names(&state, 2), ["i@j", "k"]);
}

#[test]
fn test_fuse_across_kinds_is_mixed() {
    let dag = matmul_dag(64, 32, 16);
    let mut state = State::new(&dag);
    let fused = state.fuse(2, &[1, 2]).unwrap();
    assert_eq!(fused.kind, IterKind::Mixed);
    assert!(state.stages()[2].has_reduce_iter());
}

#[test]
fn test_fuse_unknown_extent() {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    state.split(2, 0, &[None], true).unwrap();
    assert_eq!(state.fuse(2, &[1, 2]).unwrap().extent, None);
}

#[test]
fn test_fuse_overflow_rejected() {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    state.split(2, 0, &[Some(1 << 40)], true).unwrap();
    state.split(2, 2, &[Some(1 << 40)], true).unwrap();
    let before = state.clone();

    // i.1 and j.1 walk 2^40 each, their product does not fit in an i64.
    let err = state.fuse(2, &[1, 2, 3]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransform);
    assert_eq!(state, before);
}

#[test_case(&[] ; "empty")]
#[test_case(&[0, 2] ; "gap")]
#[test_case(&[1, 0] ; "descending")]
#[test_case(&[2, 3] ; "out of range")]
fn test_fuse_rejected(ids: &[usize]) {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    let before = state.clone();
    assert_eq!(state.fuse(2, ids).unwrap_err().kind(), ErrorKind::InvalidTransform);
    assert_eq!(state, before);
}

#[test]
fn test_fuse_over_attach_point_rejected() {
    let dag = matmul_relu_dag(64);
    let mut state = State::new(&dag);
    state.compute_at(2, 3, 0).unwrap();

    // Attached at the outer iterator of the run: the body would run once per
    // fused iteration instead of once per outer iteration.
    assert!(state.fuse(3, &[0, 1]).is_err());
}

#[test]
fn test_fuse_keeps_attach_on_innermost() {
    let dag = matmul_relu_dag(64);
    let mut state = State::new(&dag);
    state.split(3, 1, &[Some(8)], true).unwrap();
    state.compute_at(2, 3, 2).unwrap();

    state.fuse(3, &[0, 1, 2]).unwrap();
    assert_eq!(state.attach_map().attach_point(2), Some((3, 0)));
}

// ===== Reorder =====

#[test]
fn test_reorder_permutes() {
    let dag = matmul_dag(64, 32, 16);
    let mut state = State::new(&dag);
    state.reorder(2, &[2, 0, 1]).unwrap();
    assert_eq!(iter_names(&state, 2), ["k", "i", "j"]);
    assert_eq!(extents(&state, 2), [Some(16), Some(64), Some(32)]);
}

#[test_case(&[0, 1] ; "too short")]
#[test_case(&[0, 1, 1] ; "duplicate")]
#[test_case(&[0, 1, 3] ; "out of range")]
fn test_reorder_rejects_non_permutation(order: &[usize]) {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    assert_eq!(state.reorder(2, order).unwrap_err().kind(), ErrorKind::InvalidTransform);
    assert!(state.steps().is_empty());
}

#[test]
fn test_reorder_moves_attach_points() {
    let dag = matmul_relu_dag(64);
    let mut state = State::new(&dag);
    state.compute_at(2, 3, 0).unwrap();
    state.reorder(3, &[1, 0]).unwrap();
    assert_eq!(state.attach_map().attach_point(2), Some((3, 1)));
}
