//! Cost-weighted partitioning of blocks across ranks (§4.3).

use tracing::warn;

use crate::error::{InsufficientBlocks, MeshError};
use crate::rank_context::RankContext;

/// The result of [`assign`]: a rank per block, plus the derived per-rank
/// start index and count (§3's `ranklist`/`nslist`/`nblist`).
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub ranklist: Vec<i32>,
    pub nslist: Vec<i32>,
    pub nblist: Vec<i32>,
}

/// Converts a per-block cost vector into a rank assignment (§4.3).
///
/// Sweeps blocks from the highest global index downward, accumulating
/// cost, assigning the current rank from `nranks-1` down to `0`. When the
/// running cost reaches the current target and the rank is above 0, the
/// rank is decremented, the consumed cost subtracted from the total, and
/// the target recomputed as `remaining / (rank+1)`. The effect: rank 0
/// (the coordinator) receives slightly less load than an even split.
pub fn assign(costlist: &[f64], ctx: &RankContext) -> Result<Assignment, MeshError> {
    let nbtotal = costlist.len() as i32;
    let nranks = ctx.nranks;

    if nbtotal < nranks {
        let err = InsufficientBlocks { nbtotal, nranks };
        if ctx.test_mode {
            warn!(nbtotal, nranks, "fewer blocks than ranks; proceeding in test mode");
        } else {
            return Err(err.into());
        }
    }

    let total_cost: f64 = costlist.iter().sum();
    let uniform = costlist.iter().all(|&c| (c - costlist[0]).abs() < 1e-12);
    if uniform && nbtotal % nranks.max(1) != 0 {
        warn!(nbtotal, nranks, "block count does not divide evenly across ranks with uniform cost");
    }

    let mut ranklist = vec![0i32; nbtotal.max(0) as usize];
    let mut remaining_cost = total_cost;
    let mut rank = (nranks - 1).max(0);
    let mut target = if rank >= 0 { remaining_cost / (rank + 1) as f64 } else { 0.0 };
    let mut running = 0.0f64;

    for i in (0..ranklist.len()).rev() {
        running += costlist[i];
        ranklist[i] = rank;
        if running >= target && rank > 0 {
            remaining_cost -= running;
            running = 0.0;
            rank -= 1;
            target = remaining_cost / (rank + 1) as f64;
        }
    }

    let mut nblist = vec![0i32; nranks.max(0) as usize];
    for &r in &ranklist {
        if (r as usize) < nblist.len() {
            nblist[r as usize] += 1;
        }
    }
    let mut nslist = vec![0i32; nranks.max(0) as usize];
    let mut acc = 0;
    for r in 0..nslist.len() {
        nslist[r] = acc;
        acc += nblist[r];
    }

    Ok(Assignment { ranklist, nslist, nblist })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_cost_even_split() {
        // S4: 10 blocks, 4 ranks, uniform cost.
        let costs = vec![1.0; 10];
        let ctx = RankContext::for_test(0, 4);
        let a = assign(&costs, &ctx).unwrap();
        let mut counts = a.nblist.clone();
        counts.sort();
        assert_eq!(counts, vec![2, 2, 3, 3]);
        assert_eq!(a.nblist[0], 2);
    }

    #[test]
    fn nslist_and_nblist_are_contiguous() {
        let costs = vec![1.0; 10];
        let ctx = RankContext::for_test(0, 4);
        let a = assign(&costs, &ctx).unwrap();
        assert_eq!(a.nblist.iter().sum::<i32>(), 10);
        let mut expected_start = 0;
        for r in 0..a.nblist.len() {
            assert_eq!(a.nslist[r], expected_start);
            expected_start += a.nblist[r];
        }
    }

    #[test]
    fn rank_zero_never_exceeds_average_with_nonuniform_cost() {
        let costs = vec![5.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let ctx = RankContext::for_test(0, 4);
        let a = assign(&costs, &ctx).unwrap();
        let total: f64 = costs.iter().sum();
        let avg = total / 4.0;
        let rank0_cost: f64 = a
            .ranklist
            .iter()
            .enumerate()
            .filter(|&(_, &r)| r == 0)
            .map(|(i, _)| costs[i])
            .sum();
        assert!(rank0_cost <= avg + 1e-9);
    }

    #[test]
    fn insufficient_blocks_fails_outside_test_mode() {
        let costs = vec![1.0, 1.0];
        let ctx = RankContext { rank: 0, nranks: 4, test_mode: false };
        assert!(assign(&costs, &ctx).is_err());
    }

    #[test]
    fn insufficient_blocks_warns_in_test_mode() {
        let costs = vec![1.0, 1.0];
        let ctx = RankContext::for_test(0, 4);
        assert!(assign(&costs, &ctx).is_ok());
    }
}
