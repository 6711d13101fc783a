//! Strain-displacement matrix for the constant-strain tetrahedron.
//!
//! The 12×6 matrix `J` stacks one 3×6 block per vertex, built from the
//! vertex's shape-function gradient. Gradients are kept in raw cofactor
//! scale (6V times the true derivative), so `J = 6V · Bᵗ` for the textbook
//! B-matrix; the matching `1/(36V)` lives in the element's material
//! stiffness. This keeps the force expression `J · K · Jᵗ · D` free of any
//! per-evaluation division.

use crate::types::{Point3, StrainDisplacement, Vec3};

/// Build the strain-displacement matrix and signed volume of a tetrahedron.
///
/// Returns `(J, volume)` where `volume` is signed by vertex orientation:
/// positive for (a, b, c, d) right-handed, negative for an inverted
/// element, and near zero for degenerate (flat) geometry. Callers must
/// guard on the volume before dividing by it.
pub fn strain_displacement(
    a: &Point3,
    b: &Point3,
    c: &Point3,
    d: &Point3,
) -> (StrainDisplacement, f64) {
    // 6V-scaled shape-function gradients: each is the signed area vector of
    // the face opposite its vertex.
    let ga = -(c - b).cross(&(d - b));
    let gb = (d - c).cross(&(a - c));
    let gc = -(a - d).cross(&(b - d));
    let gd = (b - a).cross(&(c - a));

    let volume = (b - a).dot(&(c - a).cross(&(d - a))) / 6.0;

    let mut j = StrainDisplacement::zeros();
    vertex_block(&mut j, 0, &ga);
    vertex_block(&mut j, 1, &gb);
    vertex_block(&mut j, 2, &gc);
    vertex_block(&mut j, 3, &gd);

    (j, volume)
}

/// Fill one vertex's 3×6 block of `J`.
///
/// Strain columns are Voigt-ordered [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz]:
///
/// ```text
/// x-row: [g_x   0    0   g_y   0   g_z]
/// y-row: [ 0   g_y   0   g_x  g_z   0 ]
/// z-row: [ 0    0   g_z   0   g_y  g_x]
/// ```
fn vertex_block(j: &mut StrainDisplacement, vertex: usize, g: &Vec3) {
    let r = 3 * vertex;
    j[(r, 0)] = g.x;
    j[(r, 3)] = g.y;
    j[(r, 5)] = g.z;
    j[(r + 1, 1)] = g.y;
    j[(r + 1, 3)] = g.x;
    j[(r + 1, 4)] = g.z;
    j[(r + 2, 2)] = g.z;
    j[(r + 2, 4)] = g.y;
    j[(r + 2, 5)] = g.x;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn unit_tet() -> [Point3; 4] {
        [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_unit_tet_volume() {
        let [a, b, c, d] = unit_tet();
        let (_, volume) = strain_displacement(&a, &b, &c, &d);
        assert_relative_eq!(volume, 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unit_tet_gradients() {
        // For the unit tet, 6V = 1 so the entries are the plain shape
        // gradients: ∇N_a = (-1,-1,-1), ∇N_b = x̂, ∇N_c = ŷ, ∇N_d = ẑ.
        let [a, b, c, d] = unit_tet();
        let (j, _) = strain_displacement(&a, &b, &c, &d);

        assert_relative_eq!(j[(0, 0)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(1, 1)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(2, 2)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(3, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(7, 1)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(11, 2)], 1.0, epsilon = 1e-12);
        // Shear coupling for vertex a: y-row carries g_x in the γ_xy column.
        assert_relative_eq!(j[(1, 3)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(j[(2, 4)], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gradients_sum_to_zero() {
        // Translation invariance: the four per-vertex blocks cancel, so a
        // uniform displacement produces zero strain.
        let a = Vector3::new(0.1, -0.3, 0.2);
        let b = Vector3::new(1.2, 0.1, -0.1);
        let c = Vector3::new(-0.2, 1.1, 0.3);
        let d = Vector3::new(0.4, 0.2, 1.5);
        let (j, volume) = strain_displacement(&a, &b, &c, &d);
        assert!(volume.abs() > 1e-6);

        for col in 0..6 {
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            let mut sum_z = 0.0;
            for vertex in 0..4 {
                sum_x += j[(3 * vertex, col)];
                sum_y += j[(3 * vertex + 1, col)];
                sum_z += j[(3 * vertex + 2, col)];
            }
            assert_relative_eq!(sum_x, 0.0, epsilon = 1e-10);
            assert_relative_eq!(sum_y, 0.0, epsilon = 1e-10);
            assert_relative_eq!(sum_z, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_degenerate_flat_tet() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 1.0, 0.0);
        let d = Vector3::new(0.5, 0.5, 0.0); // coplanar
        let (_, volume) = strain_displacement(&a, &b, &c, &d);
        assert_relative_eq!(volume, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_tet_has_negative_volume() {
        let [a, b, c, d] = unit_tet();
        let (_, volume) = strain_displacement(&a, &c, &b, &d);
        assert_relative_eq!(volume, -1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_volume_rotation_invariant() {
        let [a, b, c, d] = unit_tet();
        let (_, v0) = strain_displacement(&a, &b, &c, &d);

        let angle = 0.7;
        let rot = nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), angle);
        let (_, v1) = strain_displacement(&(rot * a), &(rot * b), &(rot * c), &(rot * d));
        assert_relative_eq!(v0, v1, epsilon = 1e-12);
    }
}
