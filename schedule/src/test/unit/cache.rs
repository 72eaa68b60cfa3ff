use tessel_ir::{MemScope, OpKind};

use crate::analysis;
use crate::error::ErrorKind;
use crate::test::helpers::*;
use crate::{ComputeAtKind, State};

fn names(state: &State) -> Vec<&str> {
    state.stages().iter().map(|s| s.name()).collect()
}

// ===== Cache read =====

#[test]
fn test_cache_read_inserts_after_source() {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    let id = state.cache_read(0, MemScope::Shared, &[2]).unwrap();

    assert_eq!(id, 1);
    assert_eq!(names(&state), ["A", "A.shared", "B", "C"]);
    let cache = &state.stages()[1];
    assert_eq!(cache.layout.scope, MemScope::Shared);
    assert_eq!(cache.layout.data_alignment, 64);
    assert_eq!(iter_names(&state, 1), ["i0", "i1"]);
    assert!(analysis::is_cache_read_stage(&state, 1));

    let c = &state.stages()[3].op;
    assert!(c.reads_from("A.shared"));
    assert!(!c.reads_from("A"));
    assert!(c.reads_from("B"));
}

#[test]
fn test_cache_read_shifts_attach_map() {
    let dag = matmul_relu_dag(64);
    let mut state = State::new(&dag);
    state.compute_at(2, 3, 1).unwrap();
    state.cache_read(1, MemScope::Shared, &[2]).unwrap();
    assert_eq!(state.attach_map().attach_point(3), Some((4, 1)));
}

#[test]
fn test_cache_read_chain() {
    let dag = tensor_core_dag();
    let mut state = State::new(&dag);
    let shared = state.cache_read(0, MemScope::Shared, &[2]).unwrap();
    let frag = state.cache_read(shared, MemScope::WmmaMatrixA, &[3]).unwrap();

    assert_eq!(names(&state), ["A", "A.shared", "A.shared.wmma.matrix_a", "B", "C"]);
    assert_eq!(state.stages()[frag].op.kind, OpKind::CacheRead {
        source: "A.shared".into(),
        scope: MemScope::WmmaMatrixA
    });
    assert_eq!(state.analyzer().producers(4).as_slice(), [2, 3]);
}

#[test]
fn test_cache_read_rejections() {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    assert_eq!(state.cache_read(0, MemScope::Shared, &[]).unwrap_err().kind(), ErrorKind::InvalidTransform);
    assert_eq!(state.cache_read(0, MemScope::Shared, &[1]).unwrap_err().kind(), ErrorKind::InvalidTransform);

    state.cache_read(0, MemScope::Shared, &[2]).unwrap();
    // The reader now reads A.shared, not A.
    assert!(state.cache_read(0, MemScope::Shared, &[3]).is_err());
}

// ===== Cache write =====

#[test]
fn test_cache_write_splits_stage() {
    let dag = matmul_dag(64, 64, 64);
    let mut state = State::new(&dag);
    let id = state.cache_write(2, MemScope::Local).unwrap();

    assert_eq!(id, 2);
    assert_eq!(names(&state), ["A", "B", "C.local", "C"]);
    assert!(analysis::is_cache_write_stage(&state, 2));
    assert!(state.stages()[2].has_reduce_iter());
    assert_eq!(state.stages()[2].layout.scope, MemScope::Local);
    assert!(!state.stages()[3].has_reduce_iter());
    assert_eq!(state.stages()[3].layout.scope, MemScope::Global);
    assert_eq!(analysis::elementwise_consumer(&state, 2), Some(3));
}

#[test]
fn test_cache_write_keeps_attachment_on_write_back() {
    let dag = matmul_relu_dag(64);
    let mut state = State::new(&dag);
    state.compute_at(2, 3, 1).unwrap();
    state.cache_write(2, MemScope::Local).unwrap();

    assert_eq!(names(&state), ["A", "B", "C.local", "C", "D"]);
    assert_eq!(state.stages()[3].compute_at, ComputeAtKind::Iter);
    assert_eq!(state.attach_map().attach_point(3), Some((4, 1)));
    assert_eq!(state.stages()[2].compute_at, ComputeAtKind::Root);
    // The write-back copies the single element D's j reads; the cache stage
    // computes the whole buffer.
    assert_eq!(extents(&state, 3), [Some(1), Some(1)]);
    assert_eq!(extents(&state, 2), [Some(64), Some(64), Some(64)]);
}

#[test]
fn test_cache_write_rejections() {
    let dag = matmul_relu_dag(64);
    let mut state = State::new(&dag);
    assert!(state.cache_write(0, MemScope::Local).is_err());

    state.compute_at(2, 3, 0).unwrap();
    assert!(state.cache_write(3, MemScope::Local).is_err());

    state.cache_write(2, MemScope::Local).unwrap();
    assert!(state.cache_write(3, MemScope::Local).is_err());
}
