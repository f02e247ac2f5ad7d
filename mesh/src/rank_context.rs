//! Explicit process identity, threaded through construction instead of read
//! from process-wide globals (§9: "Global process state").

use mpi::collective::SystemOperation;
use mpi::topology::{Communicator, SystemCommunicator};
use mpi::traits::*;

use crate::logical_location::LogicalLocation;

/// This rank's identity within the distributed run. Passed explicitly to
/// `Mesh` construction, the `LoadBalancer`, and the refinement cycle,
/// rather than read from `my_rank`/`nranks` globals.
#[derive(Debug, Clone, Copy)]
pub struct RankContext {
    pub rank: i32,
    pub nranks: i32,
    /// When true, `LoadBalancer::assign` downgrades `InsufficientBlocks`
    /// to a warning and proceeds with a degenerate assignment (§4.3, §7).
    pub test_mode: bool,
}

impl RankContext {
    pub fn from_world(world: &SystemCommunicator) -> Self {
        RankContext { rank: world.rank(), nranks: world.size(), test_mode: false }
    }

    /// A single-rank context for unit/integration tests that construct a
    /// `Mesh` without launching an MPI job (§8's "ambient test tooling").
    pub fn single_rank_for_test() -> Self {
        RankContext { rank: 0, nranks: 1, test_mode: true }
    }

    /// A context naming an arbitrary rank/world size, for tests that
    /// exercise the balancer or refinement cycle across many ranks without
    /// actually running under `mpirun` (§4.3's S4 scenario).
    pub fn for_test(rank: i32, nranks: i32) -> Self {
        RankContext { rank, nranks, test_mode: true }
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }
}

/// The collective operations the mesh control loop and refinement cycle
/// need (§4.7, §4.6, §5): dt/conservation reductions and the refinement
/// metadata allgathers. Kept as a trait, rather than a bare
/// `SystemCommunicator` reference, so single-rank tests exercise the exact
/// same call sites without launching a real MPI job (§8's "ambient test
/// tooling").
pub trait Collectives {
    fn all_reduce_min_f64(&self, local: f64) -> f64;
    fn all_reduce_sum_f64(&self, local: f64) -> f64;
    fn all_gather_i32(&self, local: &[i32]) -> Vec<i32>;
    fn all_gather_f64(&self, local: &[f64]) -> Vec<f64>;
    fn all_gather_locations(&self, local: &[LogicalLocation]) -> Vec<LogicalLocation>;
}

/// Identity collectives for a single-rank run: every "reduction" is just
/// the local value, every "gather" is the local slice. Used by unit and
/// single-rank integration tests (§8).
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleRankCollectives;

impl Collectives for SingleRankCollectives {
    fn all_reduce_min_f64(&self, local: f64) -> f64 {
        local
    }
    fn all_reduce_sum_f64(&self, local: f64) -> f64 {
        local
    }
    fn all_gather_i32(&self, local: &[i32]) -> Vec<i32> {
        local.to_vec()
    }
    fn all_gather_f64(&self, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }
    fn all_gather_locations(&self, local: &[LogicalLocation]) -> Vec<LogicalLocation> {
        local.to_vec()
    }
}

/// Collectives backed by a real `SystemCommunicator`, used by the
/// multi-rank scaling/parallel-test binaries.
pub struct MpiCollectives<'a> {
    pub world: &'a SystemCommunicator,
}

impl<'a> MpiCollectives<'a> {
    pub fn new(world: &'a SystemCommunicator) -> Self {
        MpiCollectives { world }
    }
}

impl<'a> Collectives for MpiCollectives<'a> {
    fn all_reduce_min_f64(&self, local: f64) -> f64 {
        let mut global = local;
        self.world.all_reduce_into(&local, &mut global, &SystemOperation::min());
        global
    }

    fn all_reduce_sum_f64(&self, local: f64) -> f64 {
        let mut global = 0.0;
        self.world.all_reduce_into(&local, &mut global, &SystemOperation::sum());
        global
    }

    fn all_gather_i32(&self, local: &[i32]) -> Vec<i32> {
        let nranks = self.world.size() as usize;
        let mut out = vec![0i32; local.len() * nranks];
        self.world.all_gather_into(local, &mut out[..]);
        out
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<f64> {
        let nranks = self.world.size() as usize;
        let mut out = vec![0.0f64; local.len() * nranks];
        self.world.all_gather_into(local, &mut out[..]);
        out
    }

    fn all_gather_locations(&self, local: &[LogicalLocation]) -> Vec<LogicalLocation> {
        let nranks = self.world.size() as usize;
        let mut out = vec![LogicalLocation::default(); local.len() * nranks];
        self.world.all_gather_into(local, &mut out[..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rank_collectives_are_identity() {
        let c = SingleRankCollectives;
        assert_eq!(c.all_reduce_min_f64(3.0), 3.0);
        assert_eq!(c.all_reduce_sum_f64(3.0), 3.0);
        assert_eq!(c.all_gather_i32(&[1, 2]), vec![1, 2]);
    }
}
