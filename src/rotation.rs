//! Per-element rotation extraction.
//!
//! Three interchangeable strategies, selected once per force field:
//!
//! - `Small`: no rotation (identity frame); displacement is measured
//!   directly against rest positions. Cheap, and deliberately not
//!   rotation-invariant: rigidly rotating an element produces spurious
//!   force. Valid only for infinitesimal deformation.
//! - `Large`: orthonormal frame from two current edges via Gram-Schmidt;
//!   the rest configuration is frozen in the initial frame at setup.
//! - `Polar`: orthogonal factor of the current edge matrix via polar
//!   decomposition; most rotation-accurate, most expensive.
//!
//! Extractors return row-major world→local frames: orthonormal with
//! determinant +1. Degenerate geometry falls back to the identity frame.

use crate::types::{Point3, Rotation};
use serde::{Deserialize, Serialize};

/// Corotational formulation, chosen once at configuration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Identity rotation, linear small-displacement model.
    Small,
    /// Gram-Schmidt edge frame, rest state frozen in the initial frame.
    #[default]
    Large,
    /// Polar decomposition of the edge matrix.
    Polar,
}

/// Orthonormal frame from the first two edges of a tetrahedron.
///
/// The first edge gives the x axis, the second is orthogonalized against
/// it, the z axis is their cross product. Rows are the frame axes, so the
/// returned matrix maps world coordinates into the element frame.
pub fn edge_frame(p0: &Point3, p1: &Point3, p2: &Point3) -> Rotation {
    let Some(edge_x) = (p1 - p0).try_normalize(f64::EPSILON) else {
        return Rotation::identity();
    };
    let Some(edge_z) = edge_x.cross(&(p2 - p0)).try_normalize(f64::EPSILON) else {
        return Rotation::identity();
    };
    let edge_y = edge_z.cross(&edge_x);

    Rotation::from_rows(&[edge_x.transpose(), edge_y.transpose(), edge_z.transpose()])
}

/// Orthogonal polar factor of a 3×3 edge matrix, via SVD.
///
/// For an edge matrix with edges as rows this is the world→local frame of
/// the element, the same convention as [`edge_frame`]. The factor is
/// reflection-corrected so the determinant is +1 even for inverted input.
pub fn polar_rotation(m: &Rotation) -> Rotation {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Rotation::identity();
    };
    let r = u * v_t;
    if r.determinant() < 0.0 {
        // Flip the axis of the smallest singular value (sorted last).
        let mut u = u;
        u.set_column(2, &(-u.column(2)));
        u * v_t
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Rotation3, Vector3};

    fn assert_is_rotation(r: &Rotation) {
        let gram = r.transpose() * r;
        assert_relative_eq!(gram, Matrix3::identity(), epsilon = 1e-10);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_edge_frame_identity_for_canonical_corner() {
        let r = edge_frame(
            &Vector3::new(0.0, 0.0, 0.0),
            &Vector3::new(1.0, 0.0, 0.0),
            &Vector3::new(0.0, 1.0, 0.0),
        );
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_edge_frame_orthonormal_under_stretch_and_rotation() {
        let q = Rotation3::from_euler_angles(0.4, -1.1, 2.2);
        let p0 = q * Vector3::new(0.2, 0.1, -0.3);
        let p1 = q * Vector3::new(1.9, 0.1, -0.3); // stretched first edge
        let p2 = q * Vector3::new(0.4, 0.8, -0.3);
        let r = edge_frame(&p0, &p1, &p2);
        assert_is_rotation(&r);
        // First row is the normalized first edge.
        let edge = (p1 - p0).normalize();
        assert_relative_eq!(r.row(0).transpose(), edge, epsilon = 1e-12);
    }

    #[test]
    fn test_edge_frame_degenerate_falls_back_to_identity() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(edge_frame(&p, &p, &Vector3::new(0.0, 1.0, 0.0)), Matrix3::identity());
        // Parallel edges: zero cross product.
        let r = edge_frame(
            &Vector3::zeros(),
            &Vector3::new(1.0, 0.0, 0.0),
            &Vector3::new(2.0, 0.0, 0.0),
        );
        assert_eq!(r, Matrix3::identity());
    }

    #[test]
    fn test_polar_of_rotation_is_that_rotation() {
        let q = Rotation3::from_euler_angles(0.3, 0.7, -0.2).into_inner();
        let r = polar_rotation(&q);
        assert_relative_eq!(r, q, epsilon = 1e-10);
        assert_is_rotation(&r);
    }

    #[test]
    fn test_polar_strips_symmetric_stretch() {
        let q = Rotation3::from_euler_angles(-0.5, 0.2, 1.3).into_inner();
        let s = Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 0.5));
        let r = polar_rotation(&(q * s));
        assert_relative_eq!(r, q, epsilon = 1e-9);
    }

    #[test]
    fn test_polar_of_reflection_has_positive_determinant() {
        let m = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        let r = polar_rotation(&m);
        assert_is_rotation(&r);
    }
}
