//! Corotational tetrahedral FEM force field.
//!
//! Each element carries a precomputed material matrix and strain-displacement
//! operator. Every evaluation extracts a per-element rotation frame according
//! to the configured [`Method`], measures the local displacement against the
//! frozen rest shape, and pushes it through the element stiffness `J·K·Jᵗ`
//! before rotating the result back to world coordinates. An optional
//! assembling mode additionally maintains a compressed global stiffness
//! matrix for implicit solvers.

use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::material::{material_stiffness, stiffness_factor};
use crate::mesh::TetrahedralMesh;
use crate::rotation::{edge_frame, polar_rotation, Method};
use crate::sparse::{CompressedRowMatrix, MatrixSink};
use crate::strain::strain_displacement;
use crate::types::{
    Displacement, ElementStiffness, MaterialStiffness, Point3, Rotation, StrainDisplacement, Vec3,
};

/// Elements whose signed rest volume is at or below this threshold (flat
/// or inverted) contribute no stiffness.
const DEGENERATE_VOLUME: f64 = 1e-12;

/// Capabilities of an internal force contributor, as seen by the mechanical
/// state that owns the shared vectors.
///
/// All writes are additive so several force fields can stack on one body.
pub trait ForceField {
    /// Accumulate internal forces at state `(x, v)` into `f`.
    fn add_force(&mut self, f: &mut [Vec3], x: &[Point3], v: &[Vec3]) -> Result<()>;

    /// Accumulate the force differential along `dx` into `df`, using the
    /// rotations cached by the last [`ForceField::add_force`] call.
    fn add_dforce(&mut self, df: &mut [Vec3], dx: &[Vec3]) -> Result<()>;

    /// Elastic potential energy stored at positions `x`.
    fn potential_energy(&self, x: &[Point3]) -> f64;

    /// Accumulate `k_factor` times the force Jacobian into `matrix`, with
    /// this body's degrees of freedom starting at `offset`.
    ///
    /// Of the system factors `M·m_factor + B·b_factor + K·k_factor`, a
    /// force field only ever contributes the stiffness part; the mass and
    /// damping factors are applied by the state owner that dispatches the
    /// assembly, so only `k_factor` reaches this trait.
    fn add_k_to_matrix(&self, matrix: &mut dyn MatrixSink, k_factor: f64, offset: usize);
}

/// Configuration of a [`TetrahedronFemForceField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TetrahedronFemConfig {
    /// Displacement formulation.
    pub method: Method,
    /// Young's modulus of the material.
    pub young_modulus: f64,
    /// Poisson ratio of the material, strictly inside (-1, 0.5).
    pub poisson_ratio: f64,
    /// Optional per-element stiffness scales. With M values for N elements,
    /// element `i` uses entry `i * M / N` (truncating). Empty means 1.
    pub stiffness_factors: Vec<f64>,
    /// Refresh each element's strain-displacement matrix from the deformed
    /// configuration at every force evaluation.
    pub update_stiffness_matrix: bool,
    /// Maintain the compressed global stiffness matrix during force
    /// evaluations.
    pub assembling: bool,
}

impl Default for TetrahedronFemConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            young_modulus: 5000.0,
            poisson_ratio: 0.45,
            stiffness_factors: Vec::new(),
            update_stiffness_matrix: false,
            assembling: false,
        }
    }
}

impl TetrahedronFemConfig {
    /// Check the material parameters.
    ///
    /// Out-of-range values are not fatal to the force field itself (they
    /// degrade to zero stiffness), so hosts that want to reject them early
    /// call this before use.
    pub fn validate(&self) -> Result<()> {
        if self.young_modulus <= 0.0 {
            return Err(Error::InvalidMaterial(format!(
                "Young's modulus must be positive, got {}",
                self.young_modulus
            )));
        }
        if self.poisson_ratio <= -1.0 || self.poisson_ratio >= 0.5 {
            return Err(Error::InvalidMaterial(format!(
                "Poisson ratio must be in (-1, 0.5), got {}",
                self.poisson_ratio
            )));
        }
        Ok(())
    }
}

/// Per-element precomputed data.
#[derive(Debug, Clone)]
struct Element {
    /// Vertex indices into the shared position array.
    vertices: [usize; 4],
    /// Material stiffness, already divided by 36·volume so that
    /// `J·K·Jᵗ` is the element stiffness.
    material: MaterialStiffness,
    /// Strain-displacement matrix from the rest shape (or the deformed
    /// shape when stiffness updates are enabled).
    strain_displacement: StrainDisplacement,
    /// Local-to-world rotation cached by the last force evaluation.
    rotation: Rotation,
    /// Rest corners in the method's reference frame: world coordinates for
    /// `Small`, the initial edge frame with vertex 0 at the origin for
    /// `Large`, the rest polar frame for `Polar`.
    rest_corners: [Point3; 4],
}

/// Corotational linear-elastic force field over a tetrahedral mesh.
#[derive(Debug, Default)]
pub struct TetrahedronFemForceField {
    config: TetrahedronFemConfig,
    rest_positions: Vec<Point3>,
    elements: Vec<Element>,
    /// Global stiffness accumulated during force evaluations when
    /// `config.assembling` is set.
    assembled: CompressedRowMatrix,
}

impl TetrahedronFemForceField {
    /// Create an uninitialized force field with the given configuration.
    pub fn new(config: TetrahedronFemConfig) -> Self {
        Self {
            config,
            rest_positions: Vec::new(),
            elements: Vec::new(),
            assembled: CompressedRowMatrix::new(0),
        }
    }

    /// Capture the rest configuration and precompute per-element data.
    ///
    /// The mesh positions become the rest positions. Fails on a mesh with
    /// no tetrahedra; invalid material parameters are only warned about,
    /// the affected stiffness degrades to zero.
    pub fn init(&mut self, mesh: &TetrahedralMesh) -> Result<()> {
        if mesh.tetrahedron_count() == 0 {
            return Err(Error::Topology(
                "Cannot initialize force field on a mesh with no tetrahedra".into(),
            ));
        }
        self.rest_positions = mesh.positions().to_vec();
        self.rebuild_elements(mesh.tetrahedra())
    }

    /// Recompute all per-element data from the stored rest configuration,
    /// picking up configuration changes made through the setters.
    pub fn reinit(&mut self) -> Result<()> {
        if self.elements.is_empty() {
            return Err(Error::Topology(
                "Cannot reinitialize a force field that was never initialized".into(),
            ));
        }
        let tetrahedra: Vec<[usize; 4]> = self.elements.iter().map(|e| e.vertices).collect();
        self.rebuild_elements(&tetrahedra)
    }

    fn rebuild_elements(&mut self, tetrahedra: &[[usize; 4]]) -> Result<()> {
        if let Err(err) = self.config.validate() {
            warn!("{err}");
        }
        let config = &self.config;
        let rest = &self.rest_positions;
        let count = tetrahedra.len();
        self.elements = tetrahedra
            .par_iter()
            .enumerate()
            .map(|(index, tet)| build_element(config, rest, index, tet, count))
            .collect();
        let size = if self.config.assembling { 3 * self.rest_positions.len() } else { 0 };
        self.assembled.reset(size);
        Ok(())
    }

    /// Change the displacement formulation. Takes effect on
    /// [`TetrahedronFemForceField::reinit`].
    pub fn set_method(&mut self, method: Method) {
        self.config.method = method;
    }

    /// Change Young's modulus. Takes effect on `reinit`.
    pub fn set_young_modulus(&mut self, value: f64) {
        self.config.young_modulus = value;
    }

    /// Change the Poisson ratio. Takes effect on `reinit`.
    pub fn set_poisson_ratio(&mut self, value: f64) {
        self.config.poisson_ratio = value;
    }

    /// Replace the per-element stiffness scales. Takes effect on `reinit`.
    pub fn set_stiffness_factors(&mut self, factors: Vec<f64>) {
        self.config.stiffness_factors = factors;
    }

    /// Toggle per-evaluation strain-displacement refresh.
    pub fn set_update_stiffness_matrix(&mut self, value: bool) {
        self.config.update_stiffness_matrix = value;
    }

    /// Toggle global matrix assembly. Takes effect on `reinit`.
    pub fn set_assembling(&mut self, value: bool) {
        self.config.assembling = value;
    }

    /// Current configuration.
    pub fn config(&self) -> &TetrahedronFemConfig {
        &self.config
    }

    /// Rest positions captured at init.
    pub fn rest_positions(&self) -> &[Point3] {
        &self.rest_positions
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Local-to-world rotation of one element, as cached by the last force
    /// evaluation (the rest frame right after init).
    pub fn element_rotation(&self, element: usize) -> Rotation {
        self.elements[element].rotation
    }

    /// Compressed global stiffness built by the last force evaluation.
    /// Empty unless assembling is enabled.
    pub fn assembled_matrix(&self) -> &CompressedRowMatrix {
        &self.assembled
    }

    fn check_state_len(&self, out_len: usize, in_len: usize) -> Result<()> {
        let n = self.rest_positions.len();
        if out_len != n || in_len != n {
            return Err(Error::Topology(format!(
                "State size mismatch: initialized with {n} points, got {in_len} input and {out_len} output entries"
            )));
        }
        Ok(())
    }
}

impl ForceField for TetrahedronFemForceField {
    fn add_force(&mut self, f: &mut [Vec3], x: &[Point3], _v: &[Vec3]) -> Result<()> {
        self.check_state_len(f.len(), x.len())?;
        let method = self.config.method;
        let update = self.config.update_stiffness_matrix;
        let assembling = self.config.assembling;
        if assembling {
            self.assembled.clear_rows();
        }
        for element in &mut self.elements {
            let frame = extract_frame(method, element, x);
            element.rotation = frame.transpose();
            let depl = local_displacement(method, element, &frame, x);
            if update {
                refresh_strain_displacement(method, element, &frame, x);
            }
            let sink = if assembling { Some(&mut self.assembled) } else { None };
            apply_element_force(element, &depl, f, sink);
        }
        Ok(())
    }

    fn add_dforce(&mut self, df: &mut [Vec3], dx: &[Vec3]) -> Result<()> {
        self.check_state_len(df.len(), dx.len())?;
        for element in &self.elements {
            let frame = element.rotation.transpose();
            let mut local = Displacement::zeros();
            for (k, &vertex) in element.vertices.iter().enumerate() {
                local.fixed_rows_mut::<3>(3 * k).copy_from(&(frame * dx[vertex]));
            }
            let force = local_force(&element.material, &element.strain_displacement, &local);
            for (k, &vertex) in element.vertices.iter().enumerate() {
                df[vertex] -= element.rotation * force.fixed_rows::<3>(3 * k);
            }
        }
        Ok(())
    }

    fn potential_energy(&self, x: &[Point3]) -> f64 {
        if x.len() != self.rest_positions.len() {
            warn!(
                "Skipping energy: got {} positions for a force field initialized with {} points",
                x.len(),
                self.rest_positions.len()
            );
            return 0.0;
        }
        let method = self.config.method;
        self.elements
            .iter()
            .map(|element| {
                let frame = extract_frame(method, element, x);
                let depl = local_displacement(method, element, &frame, x);
                0.5 * depl.dot(&local_force(&element.material, &element.strain_displacement, &depl))
            })
            .sum()
    }

    fn add_k_to_matrix(&self, matrix: &mut dyn MatrixSink, k_factor: f64, offset: usize) {
        for element in &self.elements {
            let local = local_stiffness(&element.material, &element.strain_displacement);
            let world = rotate_stiffness(&local, &element.rotation);
            add_element_block(matrix, &element.vertices, &world, -k_factor, offset);
        }
    }
}

/// Precompute one element from the rest configuration.
fn build_element(
    config: &TetrahedronFemConfig,
    rest: &[Point3],
    index: usize,
    tet: &[usize; 4],
    count: usize,
) -> Element {
    let [a, b, c, d] = *tet;
    let (strain, volume) = strain_displacement(&rest[a], &rest[b], &rest[c], &rest[d]);
    let material = if volume <= DEGENERATE_VOLUME {
        warn!(
            "Tetrahedron {index} is degenerate or inverted (volume {volume:.3e}) and will not contribute"
        );
        MaterialStiffness::zeros()
    } else {
        let factor = stiffness_factor(&config.stiffness_factors, index, count);
        material_stiffness(config.young_modulus, config.poisson_ratio, factor) / (36.0 * volume)
    };

    let (rotation, rest_corners) = match config.method {
        Method::Small => (
            Rotation::identity(),
            [rest[a], rest[b], rest[c], rest[d]],
        ),
        Method::Large => {
            let frame = edge_frame(&rest[a], &rest[b], &rest[c]);
            let corners = [
                Point3::zeros(),
                frame * (rest[b] - rest[a]),
                frame * (rest[c] - rest[a]),
                frame * (rest[d] - rest[a]),
            ];
            (frame.transpose(), corners)
        }
        Method::Polar => {
            let frame = polar_rotation(&edge_matrix(&rest[a], &rest[b], &rest[c], &rest[d]));
            let corners = [
                frame * rest[a],
                frame * rest[b],
                frame * rest[c],
                frame * rest[d],
            ];
            (frame.transpose(), corners)
        }
    };

    Element {
        vertices: *tet,
        material,
        strain_displacement: strain,
        rotation,
        rest_corners,
    }
}

/// Edge matrix with the three edges from `a` as rows.
fn edge_matrix(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> Rotation {
    Rotation::from_rows(&[(b - a).transpose(), (c - a).transpose(), (d - a).transpose()])
}

/// World-to-local frame of one element at positions `x`.
fn extract_frame(method: Method, element: &Element, x: &[Point3]) -> Rotation {
    match method {
        Method::Small => Rotation::identity(),
        Method::Large => {
            let [a, b, c, _] = element.vertices;
            edge_frame(&x[a], &x[b], &x[c])
        }
        Method::Polar => {
            let [a, b, c, d] = element.vertices;
            polar_rotation(&edge_matrix(&x[a], &x[b], &x[c], &x[d]))
        }
    }
}

/// Local displacement of the element corners relative to the rest shape.
///
/// Entries known to vanish by frame construction stay exactly zero.
fn local_displacement(
    method: Method,
    element: &Element,
    frame: &Rotation,
    x: &[Point3],
) -> Displacement {
    let rest = &element.rest_corners;
    let mut depl = Displacement::zeros();
    match method {
        Method::Small => {
            let [a, b, c, d] = element.vertices;
            depl.fixed_rows_mut::<3>(3)
                .copy_from(&((rest[1] - rest[0]) - (x[b] - x[a])));
            depl.fixed_rows_mut::<3>(6)
                .copy_from(&((rest[2] - rest[0]) - (x[c] - x[a])));
            depl.fixed_rows_mut::<3>(9)
                .copy_from(&((rest[3] - rest[0]) - (x[d] - x[a])));
        }
        Method::Large => {
            let [a, b, c, d] = element.vertices;
            let eb = frame * (x[b] - x[a]);
            let ec = frame * (x[c] - x[a]);
            let ed = frame * (x[d] - x[a]);
            depl[3] = rest[1].x - eb.x;
            depl[6] = rest[2].x - ec.x;
            depl[7] = rest[2].y - ec.y;
            depl[9] = rest[3].x - ed.x;
            depl[10] = rest[3].y - ed.y;
            depl[11] = rest[3].z - ed.z;
        }
        Method::Polar => {
            for (k, &vertex) in element.vertices.iter().enumerate() {
                depl.fixed_rows_mut::<3>(3 * k)
                    .copy_from(&(rest[k] - frame * x[vertex]));
            }
        }
    }
    depl
}

/// Rebuild the strain-displacement matrix from the deformed configuration.
/// The polar method keeps its rest operator.
fn refresh_strain_displacement(method: Method, element: &mut Element, frame: &Rotation, x: &[Point3]) {
    match method {
        Method::Small => {
            let [a, b, c, d] = element.vertices;
            element.strain_displacement = strain_displacement(&x[a], &x[b], &x[c], &x[d]).0;
        }
        Method::Large => {
            let [a, b, c, d] = element.vertices;
            let origin = Point3::zeros();
            element.strain_displacement = strain_displacement(
                &origin,
                &(frame * (x[b] - x[a])),
                &(frame * (x[c] - x[a])),
                &(frame * (x[d] - x[a])),
            )
            .0;
        }
        Method::Polar => {}
    }
}

/// `J·K·Jᵗ·depl` in the element frame.
fn local_force(
    material: &MaterialStiffness,
    strain: &StrainDisplacement,
    depl: &Displacement,
) -> Displacement {
    strain * (material * (strain.transpose() * depl))
}

/// Element stiffness `J·K·Jᵗ` in the element frame.
fn local_stiffness(material: &MaterialStiffness, strain: &StrainDisplacement) -> ElementStiffness {
    strain * material * strain.transpose()
}

/// Conjugate each 3x3 vertex block by the element rotation.
fn rotate_stiffness(local: &ElementStiffness, rotation: &Rotation) -> ElementStiffness {
    let mut world = ElementStiffness::zeros();
    for i in 0..4 {
        for j in 0..4 {
            let block = rotation * local.fixed_view::<3, 3>(3 * i, 3 * j) * rotation.transpose();
            world.fixed_view_mut::<3, 3>(3 * i, 3 * j).copy_from(&block);
        }
    }
    world
}

/// Scatter a scaled 12x12 element block into a global matrix sink.
fn add_element_block(
    sink: &mut dyn MatrixSink,
    vertices: &[usize; 4],
    block: &ElementStiffness,
    scale: f64,
    offset: usize,
) {
    for i in 0..12 {
        let row = offset + 3 * vertices[i / 3] + i % 3;
        for j in 0..12 {
            let value = block[(i, j)];
            if value != 0.0 {
                sink.add(row, offset + 3 * vertices[j / 3] + j % 3, scale * value);
            }
        }
    }
}

/// Turn the local displacement into world vertex forces, optionally feeding
/// the assembled global matrix on the way.
fn apply_element_force(
    element: &Element,
    depl: &Displacement,
    f: &mut [Vec3],
    sink: Option<&mut CompressedRowMatrix>,
) {
    let force = match sink {
        Some(matrix) => {
            let local = local_stiffness(&element.material, &element.strain_displacement);
            let world = rotate_stiffness(&local, &element.rotation);
            add_element_block(matrix, &element.vertices, &world, 1.0, 0);
            local * depl
        }
        None => local_force(&element.material, &element.strain_displacement, depl),
    };
    for (k, &vertex) in element.vertices.iter().enumerate() {
        f[vertex] += element.rotation * force.fixed_rows::<3>(3 * k);
    }
}
