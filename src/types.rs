//! Core data types for corotational FEM.
//!
//! Fixed-size nalgebra aliases shared across the crate:
//! - Geometric primitives (points, vectors, rotation frames)
//! - Per-element matrix shapes (strain-displacement, stiffness)

use nalgebra::{Matrix3, Matrix6, SMatrix, SVector, Vector3};

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// A 3D vector (displacement, velocity, force).
pub type Vec3 = Vector3<f64>;

/// Stacked per-vertex 3-vectors of one tetrahedron: 4 × 3 = 12 components.
///
/// Used both for the local displacement fed into the element stiffness
/// operator and for the local force it produces.
pub type Displacement = SVector<f64, 12>;

/// 6×6 material stiffness in Voigt notation.
///
/// Strain components are ordered as [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz].
/// Unlike a plain constitutive matrix, this one already carries the
/// per-element `1/(36V)` volume scale, so `J · K · Jᵗ` is the element
/// stiffness directly.
pub type MaterialStiffness = Matrix6<f64>;

/// 12×6 strain-displacement matrix.
///
/// Row blocks of three per vertex; equals `6V · Bᵗ` for the standard
/// constant-strain B-matrix, so the entries are raw gradient cofactors
/// with no division by volume.
pub type StrainDisplacement = SMatrix<f64, 12, 6>;

/// Orthonormal 3×3 element frame.
///
/// Stored row-major as the frame axes, i.e. it maps world coordinates into
/// the element's local frame; its transpose maps local forces back out.
pub type Rotation = Matrix3<f64>;

/// Assembled 12×12 element stiffness block `J · K · Jᵗ` (optionally
/// rotation-sandwiched).
pub type ElementStiffness = SMatrix<f64, 12, 12>;
