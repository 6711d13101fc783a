//! Mechanical operation descriptors and the dispatcher seam.
//!
//! An integrator expresses each step as a sequence of [`MechanicalOp`]
//! values and hands them to a [`Dispatcher`]. The dispatcher owns the
//! mapping from symbolic [`VecId`]s to concrete state arrays, so the same
//! solver code drives a single body or a whole scene without change.

use crate::error::Result;
use crate::sparse::MatrixSink;
use crate::vecspace::VecId;

/// One mechanical operation, interpreted by a [`Dispatcher`].
///
/// Sink-carrying variants borrow their output for the duration of a single
/// `execute` call; everything else is plain data.
pub enum MechanicalOp<'a> {
    /// Ensure storage exists for vector `v`.
    Alloc { v: VecId },
    /// Drop the storage backing vector `v`.
    Free { v: VecId },
    /// Fused vector arithmetic on `v`. The operand pattern selects the
    /// operation:
    /// - `a: None, b: None`: `v = 0`
    /// - `a: Some, b: None`: `v = a`
    /// - `a: None, b: Some`: `v = factor * b` (`b = v` scales in place)
    /// - `a: Some, b: Some`: `v = a + factor * b` (`a = v` accumulates)
    ///
    /// Operands must match `v` in kind, except that a `Coord` result may
    /// take a `Deriv` as `b` (position integration).
    VectorOp {
        v: VecId,
        a: Option<VecId>,
        b: Option<VecId>,
        factor: f64,
    },
    /// Accumulate the dot product `a · b` into the dispatcher's pending
    /// reduction. Retrieve it with [`Dispatcher::finish`].
    Dot { a: VecId, b: VecId },
    /// Publish `x` and `v` as the mechanical state at time `t`, making them
    /// the vectors force computations read.
    PropagateState { t: f64, x: VecId, v: VecId },
    /// Publish `dx` as the direction differential force computations read.
    PropagateDx { dx: VecId },
    /// Zero the force accumulator `f`.
    ResetForce { f: VecId },
    /// Add every force field's contribution at the propagated state into
    /// `f`.
    AccumulateForce { f: VecId },
    /// Add every force field's differential along the propagated `dx` into
    /// `df`.
    AccumulateDf { df: VecId },
    /// `res += M * dx` with the body's mass.
    AddMdx { res: VecId, dx: VecId },
    /// `a = M⁻¹ * f` with the body's mass.
    AccFromF { a: VecId, f: VecId },
    /// Apply boundary projections to `v` (fixed degrees of freedom are
    /// zeroed on derivative vectors).
    ProjectResponse { v: VecId },
    /// Add this dispatcher's degrees of freedom to the dimension counters.
    /// Callers zero the counters before dispatching.
    SystemDimension {
        rows: &'a mut usize,
        cols: &'a mut usize,
    },
    /// Accumulate `M·m_factor + B·b_factor + K·k_factor` into `matrix`,
    /// with this dispatcher's degrees of freedom starting at `offset`.
    AddMbkToMatrix {
        matrix: &'a mut dyn MatrixSink,
        m_factor: f64,
        b_factor: f64,
        k_factor: f64,
        offset: usize,
    },
    /// Copy the accumulated force into `vector` starting at `offset`.
    GatherSystemVector {
        vector: &'a mut [f64],
        offset: usize,
    },
    /// Add the solved displacement in `vector` (starting at `offset`) onto
    /// the positions.
    ScatterSystemSolution {
        vector: &'a [f64],
        offset: usize,
    },
}

/// Executes mechanical operations against concrete state.
///
/// Implemented by a single deformable body and by a scene that fans
/// operations out over several bodies.
pub trait Dispatcher {
    /// Execute one operation.
    fn execute(&mut self, op: MechanicalOp<'_>) -> Result<()>;

    /// Retrieve the pending reduction result.
    ///
    /// Only meaningful once the matching [`MechanicalOp::Dot`] dispatch has
    /// completed; the value read before that point is stale. Each `Dot`
    /// replaces the previous result.
    fn finish(&mut self) -> f64;
}
