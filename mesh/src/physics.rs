//! The capability-trait set a block-local physics object implements (§9:
//! "Polymorphic physics per block"). The core invokes these from its
//! tasks but never depends on a concrete physics crate — a downstream
//! crate supplies the implementation (§6).

/// Advance-step outcome a task uses to decide whether to keep the block's
/// task suspended (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Complete,
    AwaitingBoundary,
}

/// The capability set a block's physics objects (Hydro, Field, EOS,
/// integrators, ...) expose to the task graph. Exactly the operations
/// named in §6; no inheritance hierarchy, just a small set of methods a
/// concrete type implements.
pub trait PhysicsHooks: Send + Sync {
    /// Advances this block's conserved variables by one stage.
    fn step_advance(&mut self) -> StepOutcome;

    /// Packs this block's boundary data for direction-tagged buffer
    /// `buffer_id` into `out`.
    fn pack_boundary(&self, buffer_id: i32, out: &mut Vec<f64>);

    /// Unpacks boundary data received into buffer `buffer_id`.
    fn unpack_boundary(&mut self, buffer_id: i32, data: &[f64]);

    /// Interpolates from a coarse neighbor into this block's ghost zones
    /// at a coarse-fine interface.
    fn prolongate(&mut self, buffer_id: i32);

    /// Averages this block's fine data down into a coarse neighbor's
    /// ghost zones at a coarse-fine interface.
    fn restrict(&mut self, buffer_id: i32);

    /// Runs the problem-specific initial-condition generator.
    fn problem_init(&mut self);

    /// The CFL-limited timestep this block currently proposes.
    fn cfl_dt(&self) -> f64;

    /// This block's locally conserved quantities (mass, momentum, energy,
    /// ...), unweighted by cell volume — the caller applies that weighting
    /// when summing across blocks of differing size.
    fn conserved_sum(&self) -> Vec<f64> {
        Vec::new()
    }

    /// Number of `f64` words this block's restart payload flattens to
    /// (hydro conserved vars; GR primitives/backup if enabled; MHD
    /// face-centered fields if enabled, §6). Must be the same for every
    /// block under one physics configuration, since the restart codec
    /// computes every block's file offset before any payload is written
    /// (§4.4).
    fn restart_payload_len(&self) -> usize {
        0
    }

    /// Flattens this block's restart payload into `out`, in the exact
    /// order [`PhysicsHooks::load_restart_payload`] expects it back (§6).
    fn write_restart_payload(&self, out: &mut Vec<f64>) {
        let _ = out;
    }

    /// Loads a restart payload previously produced by
    /// [`PhysicsHooks::write_restart_payload`].
    fn load_restart_payload(&mut self, data: &[f64]) {
        let _ = data;
    }
}

/// A `PhysicsHooks` implementation that does nothing, used by tests and by
/// binaries that only exercise the mesh subsystem (§6).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPhysics {
    dt: f64,
}

impl NullPhysics {
    pub fn with_dt(dt: f64) -> Self {
        NullPhysics { dt }
    }
}

impl PhysicsHooks for NullPhysics {
    fn step_advance(&mut self) -> StepOutcome {
        StepOutcome::Complete
    }

    fn pack_boundary(&self, _buffer_id: i32, _out: &mut Vec<f64>) {}

    fn unpack_boundary(&mut self, _buffer_id: i32, _data: &[f64]) {}

    fn prolongate(&mut self, _buffer_id: i32) {}

    fn restrict(&mut self, _buffer_id: i32) {}

    fn problem_init(&mut self) {}

    fn cfl_dt(&self) -> f64 {
        if self.dt > 0.0 {
            self.dt
        } else {
            f64::INFINITY
        }
    }
}
