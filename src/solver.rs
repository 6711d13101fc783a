//! Generic time-integration layer.
//!
//! [`IntegratorBase`] owns a [`VectorSpace`] and exposes every stepping
//! primitive as a symbolic operation dispatched through a [`Dispatcher`],
//! so a solver written against it never sees concrete state storage.
//! Concrete schemes live in the [`euler`] and [`cg_implicit`] submodules
//! behind the [`OdeSolver`] trait.

pub mod cg_implicit;
pub mod euler;

use crate::dispatch::{Dispatcher, MechanicalOp};
use crate::error::Result;
use crate::sparse::MatrixSink;
use crate::vecspace::{VecId, VecKind, VectorSpace};

/// A time-integration scheme driving a mechanical system through a
/// dispatcher.
pub trait OdeSolver {
    /// Advance the simulation by `dt`.
    fn step(&mut self, ctx: &mut dyn Dispatcher, dt: f64) -> Result<()>;

    /// Scheme name, for logs.
    fn name(&self) -> &str;
}

/// Symbolic stepping primitives shared by all integrators.
///
/// Pure dispatch wrappers take `&self`; only vector allocation touches the
/// integrator's own state.
#[derive(Debug, Clone, Default)]
pub struct IntegratorBase {
    space: VectorSpace,
}

impl IntegratorBase {
    /// Create a base with an empty vector space.
    pub fn new() -> Self {
        Self::default()
    }

    /// The solver's vector allocator.
    pub fn vector_space(&self) -> &VectorSpace {
        &self.space
    }

    /// Allocate a temporary vector and ensure its storage exists.
    pub fn v_alloc(&mut self, ctx: &mut dyn Dispatcher, kind: VecKind) -> Result<VecId> {
        let id = self.space.alloc(kind);
        ctx.execute(MechanicalOp::Alloc { v: id })?;
        Ok(id)
    }

    /// Release a temporary vector.
    ///
    /// The storage drop is only dispatched when the pool accepts the
    /// release; freeing a reserved or foreign identifier returns
    /// `Ok(false)` and dispatches nothing.
    pub fn v_free(&mut self, ctx: &mut dyn Dispatcher, id: VecId) -> Result<bool> {
        if !self.space.free(id) {
            return Ok(false);
        }
        ctx.execute(MechanicalOp::Free { v: id })?;
        Ok(true)
    }

    /// `v = 0`
    pub fn v_clear(&self, ctx: &mut dyn Dispatcher, v: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::VectorOp { v, a: None, b: None, factor: 0.0 })
    }

    /// `v = a`
    pub fn v_eq(&self, ctx: &mut dyn Dispatcher, v: VecId, a: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::VectorOp { v, a: Some(a), b: None, factor: 0.0 })
    }

    /// `v += factor * a`
    pub fn v_peq(&self, ctx: &mut dyn Dispatcher, v: VecId, a: VecId, factor: f64) -> Result<()> {
        ctx.execute(MechanicalOp::VectorOp { v, a: Some(v), b: Some(a), factor })
    }

    /// `v *= factor`
    pub fn v_teq(&self, ctx: &mut dyn Dispatcher, v: VecId, factor: f64) -> Result<()> {
        ctx.execute(MechanicalOp::VectorOp { v, a: None, b: Some(v), factor })
    }

    /// Issue the dot product `a · b`. Retrieve it with
    /// [`IntegratorBase::finish`] once the dispatch has completed.
    pub fn v_dot(&self, ctx: &mut dyn Dispatcher, a: VecId, b: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::Dot { a, b })
    }

    /// Retrieve the result of the last issued reduction.
    pub fn finish(&self, ctx: &mut dyn Dispatcher) -> f64 {
        ctx.finish()
    }

    /// Publish `(x, v)` as the mechanical state at time `t`.
    pub fn propagate_state(&self, ctx: &mut dyn Dispatcher, t: f64, x: VecId, v: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::PropagateState { t, x, v })
    }

    /// Publish `dx` as the differential direction.
    pub fn propagate_dx(&self, ctx: &mut dyn Dispatcher, dx: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::PropagateDx { dx })
    }

    /// Apply boundary projections to `v`.
    pub fn project_response(&self, ctx: &mut dyn Dispatcher, v: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::ProjectResponse { v })
    }

    /// `res += M * dx`
    pub fn add_mdx(&self, ctx: &mut dyn Dispatcher, res: VecId, dx: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::AddMdx { res, dx })
    }

    /// `a = M⁻¹ * f`
    pub fn acc_from_f(&self, ctx: &mut dyn Dispatcher, a: VecId, f: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::AccFromF { a, f })
    }

    /// Evaluate all forces at the propagated state into `f`.
    pub fn compute_force(&self, ctx: &mut dyn Dispatcher, f: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::ResetForce { f })?;
        // Drain any pending reduction before the force writes start.
        ctx.finish();
        ctx.execute(MechanicalOp::AccumulateForce { f })
    }

    /// Evaluate the force differential along the propagated `dx` into `df`.
    pub fn compute_df(&self, ctx: &mut dyn Dispatcher, df: VecId) -> Result<()> {
        ctx.execute(MechanicalOp::ResetForce { f: df })?;
        ctx.finish();
        ctx.execute(MechanicalOp::AccumulateDf { df })
    }

    /// `a = M⁻¹ f(x, v)` at time `t`, with boundary projections applied.
    pub fn compute_acc(
        &self,
        ctx: &mut dyn Dispatcher,
        t: f64,
        a: VecId,
        x: VecId,
        v: VecId,
    ) -> Result<()> {
        self.propagate_state(ctx, t, x, v)?;
        self.compute_force(ctx, VecId::force())?;
        self.acc_from_f(ctx, a, VecId::force())?;
        self.project_response(ctx, a)
    }

    /// Dimensions of the assembled mechanical system.
    pub fn system_dimension(&self, ctx: &mut dyn Dispatcher) -> Result<(usize, usize)> {
        let mut rows = 0;
        let mut cols = 0;
        ctx.execute(MechanicalOp::SystemDimension { rows: &mut rows, cols: &mut cols })?;
        Ok((rows, cols))
    }

    /// Assemble `M·m_factor + B·b_factor + K·k_factor` into `matrix`.
    pub fn compute_system_matrix(
        &self,
        ctx: &mut dyn Dispatcher,
        matrix: &mut dyn MatrixSink,
        m_factor: f64,
        b_factor: f64,
        k_factor: f64,
        offset: usize,
    ) -> Result<()> {
        ctx.execute(MechanicalOp::AddMbkToMatrix { matrix, m_factor, b_factor, k_factor, offset })
    }

    /// Gather the accumulated force into a flat right-hand side.
    pub fn compute_system_vector(
        &self,
        ctx: &mut dyn Dispatcher,
        vector: &mut [f64],
        offset: usize,
    ) -> Result<()> {
        ctx.execute(MechanicalOp::GatherSystemVector { vector, offset })
    }

    /// Apply a solved displacement onto the positions.
    pub fn apply_system_solution(
        &self,
        ctx: &mut dyn Dispatcher,
        vector: &[f64],
        offset: usize,
    ) -> Result<()> {
        ctx.execute(MechanicalOp::ScatterSystemSolution { vector, offset })
    }
}
