//! corofem - Corotational tetrahedral FEM core
//!
//! Internal elastic force computation for tetrahedral deformable bodies
//! under the corotational finite-element method, plus the symbolic
//! vector-algebra layer that time integrators use to drive heterogeneous
//! simulated objects without knowing their storage:
//! - Small / large-displacement / polar corotational formulations
//! - Optional global sparse stiffness assembly for implicit solvers
//! - Typed vector handles with reserved and pool-allocated slots
//! - Operation dispatch through a narrow executor interface
//!
//! # Architecture
//!
//! The crate is organized around these abstractions:
//!
//! - [`ForceField`] trait: additive force, Jacobian action and stiffness
//!   blocks of one internal force contributor
//! - [`TetrahedronFemForceField`]: the corotational implementation
//! - [`Dispatcher`] trait: realizes symbolic [`MechanicalOp`]s against
//!   concrete mechanical state ([`DeformableBody`], [`Scene`])
//! - [`IntegratorBase`] / [`OdeSolver`]: generic stepping primitives and
//!   the schemes built on them

pub mod types;
pub mod error;
pub mod material;
pub mod strain;
pub mod rotation;
pub mod mesh;
pub mod sparse;
pub mod forcefield;
pub mod vecspace;
pub mod dispatch;
pub mod object;
pub mod solver;

pub use types::{Point3, Vec3};
pub use error::{Error, Result};
pub use rotation::Method;
pub use mesh::TetrahedralMesh;
pub use sparse::{CompressedRowMatrix, CsrMatrix, MatrixSink};
pub use forcefield::{ForceField, TetrahedronFemConfig, TetrahedronFemForceField};
pub use vecspace::{VecId, VecKind, VectorSpace};
pub use dispatch::{Dispatcher, MechanicalOp};
pub use object::{DeformableBody, Scene};
pub use solver::{
    cg_implicit::{CgConfig, CgImplicitSolver},
    euler::EulerSolver,
    IntegratorBase, OdeSolver,
};
