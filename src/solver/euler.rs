//! Symplectic explicit Euler integration.

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::solver::{IntegratorBase, OdeSolver};
use crate::vecspace::{VecId, VecKind};

/// Explicit Euler scheme in its symplectic form: the velocity update runs
/// first and the position update consumes the new velocity.
///
/// Conditionally stable; the time step must stay below the period of the
/// stiffest element mode. Written entirely in symbolic vector operations,
/// so it drives a single body or a scene the same way.
#[derive(Debug, Default)]
pub struct EulerSolver {
    base: IntegratorBase,
    time: f64,
}

impl EulerSolver {
    /// Create a solver starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }
}

impl OdeSolver for EulerSolver {
    fn step(&mut self, ctx: &mut dyn Dispatcher, dt: f64) -> Result<()> {
        let pos = VecId::position();
        let vel = VecId::velocity();

        let acc = self.base.v_alloc(ctx, VecKind::Deriv)?;
        let result = self.base.compute_acc(ctx, self.time, acc, pos, vel).and_then(|()| {
            // v += a·dt, then x += v·dt with the updated velocity.
            self.base.v_peq(ctx, vel, acc, dt)?;
            self.base.v_peq(ctx, pos, vel, dt)
        });
        self.base.v_free(ctx, acc)?;
        result?;

        self.time += dt;
        Ok(())
    }

    fn name(&self) -> &str {
        "EulerSolver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forcefield::{TetrahedronFemConfig, TetrahedronFemForceField};
    use crate::mesh::TetrahedralMesh;
    use crate::object::DeformableBody;
    use crate::types::Vec3;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn stretched_body(factor: f64) -> (DeformableBody, Vec<Vec3>) {
        let mut mesh = TetrahedralMesh::new();
        mesh.add_position(Vector3::new(0.0, 0.0, 0.0));
        mesh.add_position(Vector3::new(1.0, 0.0, 0.0));
        mesh.add_position(Vector3::new(0.0, 1.0, 0.0));
        mesh.add_position(Vector3::new(0.0, 0.0, 1.0));
        mesh.add_tetrahedron([0, 1, 2, 3]).unwrap();

        let mut field = TetrahedronFemForceField::new(TetrahedronFemConfig::default());
        field.init(&mesh).unwrap();
        let rest = mesh.positions().to_vec();
        let mut body = DeformableBody::from_mesh(&mesh, 1.0);
        body.add_force_field(Box::new(field));

        let centroid = body.positions().iter().sum::<Vec3>() / 4.0;
        for p in body.positions_mut() {
            *p = centroid + (*p - centroid) * factor;
        }
        (body, rest)
    }

    #[test]
    fn test_step_moves_stretched_body_toward_rest() {
        let (mut body, rest) = stretched_body(1.2);
        let before = body.positions().to_vec();
        let mut solver = EulerSolver::new();
        solver.step(&mut body, 1e-3).unwrap();

        for (i, after) in body.positions().iter().enumerate() {
            let motion = after - before[i];
            assert!(motion.norm() > 0.0);
            // First step from zero velocity heads back along the restoring
            // force, toward the rest position.
            assert!(motion.dot(&(rest[i] - before[i])) > 0.0);
        }
        assert_relative_eq!(solver.time(), 1e-3, epsilon = 1e-15);
    }

    #[test]
    fn test_step_is_a_no_op_at_rest() {
        let (mut body, _) = stretched_body(1.0);
        let before = body.positions().to_vec();
        let mut solver = EulerSolver::new();
        solver.step(&mut body, 1e-3).unwrap();
        for (after, before) in body.positions().iter().zip(&before) {
            assert_relative_eq!(*after, *before, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fixed_vertex_does_not_move() {
        let (mut body, _) = stretched_body(1.2);
        body.fix_vertex(0);
        let pinned = body.positions()[0];
        let mut solver = EulerSolver::new();
        for _ in 0..5 {
            solver.step(&mut body, 1e-3).unwrap();
        }
        assert_relative_eq!(body.positions()[0], pinned, epsilon = 1e-12);
        assert_eq!(body.velocities()[0], Vec3::zeros());
    }

    #[test]
    fn test_temporaries_are_recycled_across_steps() {
        let (mut body, _) = stretched_body(1.1);
        let mut solver = EulerSolver::new();
        solver.step(&mut body, 1e-3).unwrap();
        solver.step(&mut body, 1e-3).unwrap();
        // Each step frees its acceleration vector, so the next allocation
        // reuses the first dynamic index.
        let probe = solver.base.v_alloc(&mut body, VecKind::Deriv).unwrap();
        assert_eq!(probe.index, crate::vecspace::FIRST_DYNAMIC_INDEX);
    }
}
