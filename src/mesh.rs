//! Tetrahedral mesh storage.
//!
//! Holds rest positions and validated 4-index connectivity. This is the
//! concrete shape of the topology-provider contract consumed by the force
//! field; hosts with their own mesh structures only need to hand over the
//! same slices.

use crate::error::{Error, Result};
use crate::types::Point3;
use nalgebra::Vector3;

/// Tetrahedral finite element mesh.
#[derive(Debug, Clone, Default)]
pub struct TetrahedralMesh {
    /// Rest positions.
    positions: Vec<Point3>,
    /// Element connectivity, four vertex indices each.
    tetrahedra: Vec<[usize; 4]>,
}

impl TetrahedralMesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(n_points: usize, n_tetrahedra: usize) -> Self {
        Self {
            positions: Vec::with_capacity(n_points),
            tetrahedra: Vec::with_capacity(n_tetrahedra),
        }
    }

    /// Add a vertex position, returning its index.
    pub fn add_position(&mut self, point: Point3) -> usize {
        let idx = self.positions.len();
        self.positions.push(point);
        idx
    }

    /// Add multiple vertex positions at once.
    pub fn add_positions(&mut self, points: impl IntoIterator<Item = Point3>) {
        self.positions.extend(points);
    }

    /// Add a tetrahedron, validating its vertex indices.
    pub fn add_tetrahedron(&mut self, vertices: [usize; 4]) -> Result<usize> {
        for &v in &vertices {
            if v >= self.positions.len() {
                return Err(Error::Topology(format!(
                    "Vertex index {} out of bounds (mesh has {} points)",
                    v,
                    self.positions.len()
                )));
            }
        }
        let idx = self.tetrahedra.len();
        self.tetrahedra.push(vertices);
        Ok(idx)
    }

    /// Number of vertices.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of tetrahedra.
    pub fn tetrahedron_count(&self) -> usize {
        self.tetrahedra.len()
    }

    /// Vertex rest positions.
    pub fn positions(&self) -> &[Point3] {
        &self.positions
    }

    /// Element connectivity.
    pub fn tetrahedra(&self) -> &[[usize; 4]] {
        &self.tetrahedra
    }

    /// Regular box grid of `nx × ny × nz` cells with the given spacing,
    /// each cell split into six positively oriented tetrahedra around its
    /// main diagonal. The uniform split keeps faces between neighboring
    /// cells conforming.
    pub fn regular_grid(nx: usize, ny: usize, nz: usize, spacing: f64) -> Self {
        let mut mesh = Self::with_capacity((nx + 1) * (ny + 1) * (nz + 1), 6 * nx * ny * nz);

        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    mesh.add_position(Vector3::new(
                        i as f64 * spacing,
                        j as f64 * spacing,
                        k as f64 * spacing,
                    ));
                }
            }
        }

        // Cube corners bit-coded x + 2y + 4z; six tets sharing edge 0-7.
        const CELL_TETS: [[usize; 4]; 6] = [
            [0, 1, 3, 7],
            [0, 5, 1, 7],
            [0, 3, 2, 7],
            [0, 2, 6, 7],
            [0, 4, 5, 7],
            [0, 6, 4, 7],
        ];

        let point = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let corner =
                        |n: usize| point(i + (n & 1), j + ((n >> 1) & 1), k + ((n >> 2) & 1));
                    for tet in &CELL_TETS {
                        mesh.tetrahedra
                            .push([corner(tet[0]), corner(tet[1]), corner(tet[2]), corner(tet[3])]);
                    }
                }
            }
        }

        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strain::strain_displacement;

    #[test]
    fn test_mesh_creation() {
        let mut mesh = TetrahedralMesh::new();
        mesh.add_position(Vector3::new(0.0, 0.0, 0.0));
        mesh.add_position(Vector3::new(1.0, 0.0, 0.0));
        mesh.add_position(Vector3::new(0.0, 1.0, 0.0));
        mesh.add_position(Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(mesh.position_count(), 4);

        mesh.add_tetrahedron([0, 1, 2, 3]).unwrap();
        assert_eq!(mesh.tetrahedron_count(), 1);
    }

    #[test]
    fn test_invalid_vertex_index() {
        let mut mesh = TetrahedralMesh::new();
        mesh.add_position(Vector3::new(0.0, 0.0, 0.0));
        let result = mesh.add_tetrahedron([0, 1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_regular_grid_counts() {
        let mesh = TetrahedralMesh::regular_grid(2, 3, 1, 0.5);
        assert_eq!(mesh.position_count(), 3 * 4 * 2);
        assert_eq!(mesh.tetrahedron_count(), 6 * 2 * 3 * 1);
    }

    #[test]
    fn test_regular_grid_tets_positively_oriented() {
        let mesh = TetrahedralMesh::regular_grid(2, 2, 2, 1.0);
        let p = mesh.positions();
        let mut total_volume = 0.0;
        for tet in mesh.tetrahedra() {
            let (_, volume) = strain_displacement(&p[tet[0]], &p[tet[1]], &p[tet[2]], &p[tet[3]]);
            assert!(volume > 1e-12, "cell tetrahedron inverted: volume {volume}");
            total_volume += volume;
        }
        // The six tets of each cell tile it exactly: total = box volume.
        assert!((total_volume - 8.0).abs() < 1e-9);
    }
}
