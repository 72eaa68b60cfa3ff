//! Laws of the schedule primitives over random inputs.

use proptest::prelude::*;

use super::generators::*;
use crate::intrinsic::IntrinsicRegistry;
use crate::steps::tensorize::tile_offset_granularity;
use crate::test::helpers::*;
use crate::State;

// ============================================================================
// Log and Replay
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// A failed primitive leaves the state untouched; a successful one adds
    /// exactly one log entry.
    #[test]
    fn primitives_are_atomic(actions in prop::collection::vec(arb_action(), 1..24)) {
        let dag = matmul_relu_dag(64);
        let mut state = State::new(&dag);
        for action in &actions {
            let before = state.clone();
            match apply(&mut state, action) {
                Ok(()) => prop_assert_eq!(state.steps().len(), before.steps().len() + 1),
                Err(_) => prop_assert_eq!(&state, &before, "{:?} changed the state", action),
            }
        }
    }

    /// Replaying the log of any reachable state rebuilds that state.
    #[test]
    fn replay_rebuilds_state(actions in prop::collection::vec(arb_action(), 1..24)) {
        let dag = matmul_relu_dag(64);
        let mut state = State::new(&dag);
        for action in &actions {
            let _ = apply(&mut state, action);
        }

        let replayed = State::replay(&dag, &IntrinsicRegistry::new(), state.steps()).unwrap();
        prop_assert_eq!(&replayed, &state);
        prop_assert_eq!(replayed.to_string(), state.to_string());
    }

    /// Attach points always name an existing iterator of a live stage.
    #[test]
    fn attach_points_stay_valid(actions in prop::collection::vec(arb_action(), 1..24)) {
        let dag = matmul_relu_dag(32);
        let mut state = State::new(&dag);
        for action in &actions {
            let _ = apply(&mut state, action);
            for stage_id in 0..state.stages().len() {
                if let Some((target, iter)) = state.attach_map().attach_point(stage_id) {
                    prop_assert!(target < state.stages().len());
                    prop_assert!(iter < state.stages()[target].iters.len());
                    prop_assert!(!state.stages()[stage_id].is_inlined());
                }
            }
        }
    }
}

// ============================================================================
// Loop Algebra
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Splitting by an exact factor and fusing the parts back restores the
    /// original extent.
    #[test]
    fn split_then_fuse_restores_extent(outer in 1i64..=32, inner in 1i64..=32, inner_to_outer in any::<bool>()) {
        let dag = matmul_dag(outer * inner, 8, 8);
        let mut state = State::new(&dag);
        let factor = if inner_to_outer { inner } else { outer };
        let parts = state.split(2, 0, &[Some(factor)], inner_to_outer).unwrap();
        prop_assert_eq!(parts[0].extent, Some(outer));
        prop_assert_eq!(parts[1].extent, Some(inner));

        let fused = state.fuse(2, &[0, 1]).unwrap();
        prop_assert_eq!(fused.extent, Some(outer * inner));
    }

    /// Split parts never cover less than the original loop.
    #[test]
    fn split_covers_extent(extent in 1i64..=1024, lengths in prop::collection::vec(1i64..=16, 1..=3)) {
        let dag = matmul_dag(extent, 8, 8);
        let mut state = State::new(&dag);
        let lengths: Vec<_> = lengths.into_iter().map(Some).collect();
        let parts = state.split(2, 0, &lengths, true).unwrap();

        let product: i64 = parts.iter().map(|it| it.extent.unwrap()).product();
        prop_assert!(product >= extent);
        prop_assert!(product - extent < product / parts[0].extent.unwrap());
    }

    /// Reordering by a permutation and then by its inverse is the identity.
    #[test]
    fn reorder_inverse_is_identity(perm in Just((0..6).collect::<Vec<usize>>()).prop_shuffle()) {
        let dag = matmul_dag(64, 64, 64);
        let mut state = State::new(&dag);
        state.split(2, 0, &[Some(4), Some(2)], true).unwrap();
        state.split(2, 3, &[Some(8)], true).unwrap();
        let original = iter_names(&state, 2);

        let mut inverse = vec![0; perm.len()];
        for (new, &old) in perm.iter().enumerate() {
            inverse[old] = new;
        }
        state.reorder(2, &perm).unwrap();
        state.reorder(2, &inverse).unwrap();
        prop_assert_eq!(iter_names(&state, 2), original);
    }

    /// A follower keeps the source's leading lengths and folds the rest into
    /// its innermost part, whatever happened to the source stage since.
    #[test]
    fn follow_split_tracks_source(
        lengths in prop::collection::vec(1i64..=8, 1..=3),
        n_split in 1usize..=3,
        fuse_after in any::<bool>(),
    ) {
        let n_split = n_split.min(lengths.len());
        let dag = matmul_relu_dag(4096);
        let mut state = State::new(&dag);
        let lengths: Vec<_> = lengths.into_iter().map(Some).collect();
        state.split(2, 0, &lengths, true).unwrap();
        if fuse_after {
            state.fuse(2, &[0, 1]).unwrap();
        }

        let parts = state.follow_split(3, 0, 0, n_split).unwrap();
        prop_assert_eq!(parts.len(), n_split + 1);
        for k in 1..n_split {
            prop_assert_eq!(parts[k].extent, lengths[k - 1]);
        }
        let folded: i64 = lengths[n_split - 1..].iter().map(|l| l.unwrap()).product();
        prop_assert_eq!(parts[n_split].extent, Some(folded));
    }

    /// Tiles of a buffer laid out as `[.., 16, 16]` start on multiples of the
    /// tile size.
    #[test]
    fn tile_offsets_are_tile_multiples(leading in prop::collection::vec(1i64..=8, 1..=3)) {
        let shape: Vec<i64> = leading.iter().copied().chain([16, 16]).collect();
        match tile_offset_granularity(&shape, &[16, 16]) {
            Some(g) => prop_assert_eq!(g % 256, 0),
            None => prop_assert!(leading.iter().all(|&d| d == 1)),
        }
    }
}
