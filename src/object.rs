//! Deformable body state and the scene that dispatches over several bodies.
//!
//! [`DeformableBody`] is the concrete mechanical state a force field writes
//! into. It keeps one register file of coordinate vectors and one of
//! derivative vectors, addressed by [`VecId`], and realizes every
//! [`MechanicalOp`] against them. [`Scene`] implements the same dispatcher
//! interface over a list of bodies, so integrators drive one body or many
//! through identical code.

use std::mem;

use log::warn;

use crate::dispatch::{Dispatcher, MechanicalOp};
use crate::error::{Error, Result};
use crate::forcefield::ForceField;
use crate::mesh::TetrahedralMesh;
use crate::types::{Point3, Vec3};
use crate::vecspace::{VecId, VecKind};

fn expect_kind(id: VecId, kind: VecKind) -> Result<()> {
    if id.kind != kind {
        return Err(Error::Dispatch(format!("Expected a {kind:?} vector, got {id:?}")));
    }
    Ok(())
}

/// One simulated deformable object: uniform vertex masses, fixed-vertex
/// constraints and any number of attached force fields.
///
/// Vector storage is lazy. Reserved slots exist from construction; dynamic
/// slots appear on first use and are dropped again on `Free`.
pub struct DeformableBody {
    /// Coordinate register file, slot 0 is the position vector.
    coords: Vec<Vec<Point3>>,
    /// Derivative register file, slots 0..3 are velocity, force and dx.
    derivs: Vec<Vec<Vec3>>,
    /// Slot indices published by the last propagate operations.
    bind_x: usize,
    bind_v: usize,
    bind_f: usize,
    bind_dx: usize,
    /// Lumped mass per vertex, must be positive.
    vertex_mass: f64,
    /// Vertices with all three degrees of freedom constrained.
    fixed: Vec<usize>,
    force_fields: Vec<Box<dyn ForceField>>,
    /// Simulation time published by the last state propagation.
    time: f64,
    dot_result: f64,
}

impl DeformableBody {
    /// Create a body at the given positions with a uniform vertex mass.
    pub fn new(positions: Vec<Point3>, vertex_mass: f64) -> Self {
        let n = positions.len();
        Self {
            coords: vec![positions],
            derivs: vec![vec![Vec3::zeros(); n]; 3],
            bind_x: 0,
            bind_v: 0,
            bind_f: 1,
            bind_dx: 2,
            vertex_mass,
            fixed: Vec::new(),
            force_fields: Vec::new(),
            time: 0.0,
            dot_result: 0.0,
        }
    }

    /// Create a body resting at the mesh positions.
    pub fn from_mesh(mesh: &TetrahedralMesh, vertex_mass: f64) -> Self {
        Self::new(mesh.positions().to_vec(), vertex_mass)
    }

    /// Attach a force field. Its contributions stack with any already
    /// attached.
    pub fn add_force_field(&mut self, field: Box<dyn ForceField>) {
        self.force_fields.push(field);
    }

    /// Constrain all three degrees of freedom of a vertex. Projected
    /// derivative vectors are zeroed there.
    pub fn fix_vertex(&mut self, vertex: usize) {
        if vertex >= self.point_count() {
            warn!("Ignoring fixed vertex {vertex} beyond {} points", self.point_count());
            return;
        }
        if !self.fixed.contains(&vertex) {
            self.fixed.push(vertex);
        }
    }

    /// Number of simulated vertices.
    pub fn point_count(&self) -> usize {
        self.coords[0].len()
    }

    /// Current positions.
    pub fn positions(&self) -> &[Point3] {
        &self.coords[0]
    }

    /// Mutable positions, for scene setup.
    pub fn positions_mut(&mut self) -> &mut [Point3] {
        &mut self.coords[0]
    }

    /// Current velocities.
    pub fn velocities(&self) -> &[Vec3] {
        &self.derivs[0]
    }

    /// Mutable velocities, for scene setup.
    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        &mut self.derivs[0]
    }

    /// Accumulated forces from the last evaluation.
    pub fn forces(&self) -> &[Vec3] {
        &self.derivs[1]
    }

    /// Simulation time published by the last state propagation.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Lumped per-vertex mass.
    pub fn vertex_mass(&self) -> f64 {
        self.vertex_mass
    }

    /// Constrained vertices.
    pub fn fixed_vertices(&self) -> &[usize] {
        &self.fixed
    }

    fn file(&self, kind: VecKind) -> &Vec<Vec<Vec3>> {
        match kind {
            VecKind::Coord => &self.coords,
            VecKind::Deriv => &self.derivs,
        }
    }

    fn file_mut(&mut self, kind: VecKind) -> &mut Vec<Vec<Vec3>> {
        match kind {
            VecKind::Coord => &mut self.coords,
            VecKind::Deriv => &mut self.derivs,
        }
    }

    fn read(&self, id: VecId) -> &[Vec3] {
        &self.file(id.kind)[id.index as usize]
    }

    /// Make sure the slot exists and is sized to the point count.
    fn ensure_slot(&mut self, id: VecId) {
        let n = self.point_count();
        let file = self.file_mut(id.kind);
        let index = id.index as usize;
        if file.len() <= index {
            file.resize_with(index + 1, Vec::new);
        }
        if file[index].len() != n {
            file[index].resize(n, Vec3::zeros());
        }
    }

    fn release_slot(&mut self, id: VecId) {
        if id.is_reserved() {
            warn!("Refusing to release reserved vector {id:?}");
            return;
        }
        let file = self.file_mut(id.kind);
        let index = id.index as usize;
        if index < file.len() {
            file[index] = Vec::new();
        }
    }

    /// Realize one fused vector operation, see
    /// [`MechanicalOp::VectorOp`] for the operand conventions.
    fn apply_vop(&mut self, v: VecId, a: Option<VecId>, b: Option<VecId>, factor: f64) -> Result<()> {
        if let Some(id) = a {
            expect_kind(id, v.kind)?;
        }
        if let Some(id) = b {
            if v.kind == VecKind::Deriv && id.kind == VecKind::Coord {
                return Err(Error::Dispatch(
                    "Cannot add a coordinate vector into a derivative vector".into(),
                ));
            }
        }
        self.ensure_slot(v);
        if let Some(id) = a {
            self.ensure_slot(id);
        }
        if let Some(id) = b {
            self.ensure_slot(id);
        }
        let n = self.point_count();
        let mut dest = mem::take(&mut self.file_mut(v.kind)[v.index as usize]);
        for i in 0..n {
            let base = match a {
                None => Vec3::zeros(),
                Some(id) if id == v => dest[i],
                Some(id) => self.read(id)[i],
            };
            let incr = match b {
                None => Vec3::zeros(),
                Some(id) if id == v => factor * dest[i],
                Some(id) => factor * self.read(id)[i],
            };
            dest[i] = base + incr;
        }
        self.file_mut(v.kind)[v.index as usize] = dest;
        Ok(())
    }

    fn apply_dot(&mut self, a: VecId, b: VecId) -> Result<()> {
        if a.kind != b.kind {
            warn!("Dot product between {a:?} and {b:?} mixes vector kinds, result is 0");
            self.dot_result = 0.0;
            return Ok(());
        }
        self.ensure_slot(a);
        self.ensure_slot(b);
        let sum = self
            .read(a)
            .iter()
            .zip(self.read(b))
            .map(|(x, y)| x.dot(y))
            .sum();
        self.dot_result = sum;
        Ok(())
    }

    fn accumulate_force(&mut self, f: VecId) -> Result<()> {
        expect_kind(f, VecKind::Deriv)?;
        self.ensure_slot(f);
        self.bind_f = f.index as usize;
        let mut force = mem::take(&mut self.derivs[f.index as usize]);
        let x = &self.coords[self.bind_x];
        let v = &self.derivs[self.bind_v];
        let mut result = Ok(());
        for field in &mut self.force_fields {
            result = field.add_force(&mut force, x, v);
            if result.is_err() {
                break;
            }
        }
        self.derivs[f.index as usize] = force;
        result
    }

    fn accumulate_dforce(&mut self, df: VecId) -> Result<()> {
        expect_kind(df, VecKind::Deriv)?;
        self.ensure_slot(df);
        self.ensure_slot(VecId { kind: VecKind::Deriv, index: self.bind_dx as u32 });
        let mut out = mem::take(&mut self.derivs[df.index as usize]);
        let dx = &self.derivs[self.bind_dx];
        let mut result = Ok(());
        for field in &mut self.force_fields {
            result = field.add_dforce(&mut out, dx);
            if result.is_err() {
                break;
            }
        }
        self.derivs[df.index as usize] = out;
        result
    }
}

impl Dispatcher for DeformableBody {
    fn execute(&mut self, op: MechanicalOp<'_>) -> Result<()> {
        match op {
            MechanicalOp::Alloc { v } => {
                self.ensure_slot(v);
                Ok(())
            }
            MechanicalOp::Free { v } => {
                self.release_slot(v);
                Ok(())
            }
            MechanicalOp::VectorOp { v, a, b, factor } => self.apply_vop(v, a, b, factor),
            MechanicalOp::Dot { a, b } => self.apply_dot(a, b),
            MechanicalOp::PropagateState { t, x, v } => {
                expect_kind(x, VecKind::Coord)?;
                expect_kind(v, VecKind::Deriv)?;
                self.ensure_slot(x);
                self.ensure_slot(v);
                self.bind_x = x.index as usize;
                self.bind_v = v.index as usize;
                self.time = t;
                Ok(())
            }
            MechanicalOp::PropagateDx { dx } => {
                expect_kind(dx, VecKind::Deriv)?;
                self.ensure_slot(dx);
                self.bind_dx = dx.index as usize;
                Ok(())
            }
            MechanicalOp::ResetForce { f } => {
                expect_kind(f, VecKind::Deriv)?;
                self.ensure_slot(f);
                self.bind_f = f.index as usize;
                self.derivs[f.index as usize].fill(Vec3::zeros());
                Ok(())
            }
            MechanicalOp::AccumulateForce { f } => self.accumulate_force(f),
            MechanicalOp::AccumulateDf { df } => self.accumulate_dforce(df),
            MechanicalOp::AddMdx { res, dx } => {
                expect_kind(res, VecKind::Deriv)?;
                expect_kind(dx, VecKind::Deriv)?;
                self.ensure_slot(res);
                self.ensure_slot(dx);
                let n = self.point_count();
                let mass = self.vertex_mass;
                let mut out = mem::take(&mut self.derivs[res.index as usize]);
                for i in 0..n {
                    let d = if dx == res { out[i] } else { self.derivs[dx.index as usize][i] };
                    out[i] += mass * d;
                }
                self.derivs[res.index as usize] = out;
                Ok(())
            }
            MechanicalOp::AccFromF { a, f } => {
                expect_kind(a, VecKind::Deriv)?;
                expect_kind(f, VecKind::Deriv)?;
                self.ensure_slot(a);
                self.ensure_slot(f);
                let n = self.point_count();
                let inv_mass = 1.0 / self.vertex_mass;
                let mut out = mem::take(&mut self.derivs[a.index as usize]);
                for i in 0..n {
                    let fv = if f == a { out[i] } else { self.derivs[f.index as usize][i] };
                    out[i] = inv_mass * fv;
                }
                self.derivs[a.index as usize] = out;
                Ok(())
            }
            MechanicalOp::ProjectResponse { v } => {
                if v.kind == VecKind::Deriv {
                    self.ensure_slot(v);
                    let vec = &mut self.derivs[v.index as usize];
                    for &vertex in &self.fixed {
                        vec[vertex] = Vec3::zeros();
                    }
                }
                Ok(())
            }
            MechanicalOp::SystemDimension { rows, cols } => {
                *rows += 3 * self.point_count();
                *cols += 3 * self.point_count();
                Ok(())
            }
            MechanicalOp::AddMbkToMatrix { matrix, m_factor, b_factor: _, k_factor, offset } => {
                for field in &self.force_fields {
                    field.add_k_to_matrix(matrix, k_factor, offset);
                }
                if m_factor != 0.0 {
                    for i in 0..3 * self.point_count() {
                        matrix.add(offset + i, offset + i, self.vertex_mass * m_factor);
                    }
                }
                Ok(())
            }
            MechanicalOp::GatherSystemVector { vector, offset } => {
                let n = self.point_count();
                if offset + 3 * n > vector.len() {
                    return Err(Error::Dispatch(format!(
                        "System vector too short: need {} entries at offset {offset}, got {}",
                        3 * n,
                        vector.len()
                    )));
                }
                let force = &self.derivs[self.bind_f];
                for (i, value) in force.iter().enumerate() {
                    vector[offset + 3 * i] = value.x;
                    vector[offset + 3 * i + 1] = value.y;
                    vector[offset + 3 * i + 2] = value.z;
                }
                Ok(())
            }
            MechanicalOp::ScatterSystemSolution { vector, offset } => {
                let n = self.point_count();
                if offset + 3 * n > vector.len() {
                    return Err(Error::Dispatch(format!(
                        "System solution too short: need {} entries at offset {offset}, got {}",
                        3 * n,
                        vector.len()
                    )));
                }
                let x = &mut self.coords[self.bind_x];
                for (i, position) in x.iter_mut().enumerate() {
                    *position += Vec3::new(
                        vector[offset + 3 * i],
                        vector[offset + 3 * i + 1],
                        vector[offset + 3 * i + 2],
                    );
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> f64 {
        self.dot_result
    }
}

/// An ordered collection of bodies driven as one mechanical system.
///
/// Every operation fans out over the bodies. Reductions combine the
/// per-body partial results, and matrix or flat-vector operations shift
/// each body's offset past the degrees of freedom of those before it.
#[derive(Default)]
pub struct Scene {
    bodies: Vec<DeformableBody>,
    dot_result: f64,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a body, returning its index.
    pub fn add_body(&mut self, body: DeformableBody) -> usize {
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    /// The bodies in dispatch order.
    pub fn bodies(&self) -> &[DeformableBody] {
        &self.bodies
    }

    /// Mutable access to the bodies.
    pub fn bodies_mut(&mut self) -> &mut [DeformableBody] {
        &mut self.bodies
    }

    /// Offset of a body's first degree of freedom in the flat system.
    pub fn body_offset(&self, index: usize) -> usize {
        self.bodies[..index].iter().map(|b| 3 * b.point_count()).sum()
    }

    fn for_each(&mut self, mut op: impl FnMut(&mut DeformableBody) -> Result<()>) -> Result<()> {
        for body in &mut self.bodies {
            op(body)?;
        }
        Ok(())
    }
}

impl Dispatcher for Scene {
    fn execute(&mut self, op: MechanicalOp<'_>) -> Result<()> {
        match op {
            MechanicalOp::Alloc { v } => self.for_each(|body| body.execute(MechanicalOp::Alloc { v })),
            MechanicalOp::Free { v } => self.for_each(|body| body.execute(MechanicalOp::Free { v })),
            MechanicalOp::VectorOp { v, a, b, factor } => {
                self.for_each(|body| body.execute(MechanicalOp::VectorOp { v, a, b, factor }))
            }
            MechanicalOp::Dot { a, b } => {
                let mut sum = 0.0;
                for body in &mut self.bodies {
                    body.execute(MechanicalOp::Dot { a, b })?;
                    sum += body.finish();
                }
                self.dot_result = sum;
                Ok(())
            }
            MechanicalOp::PropagateState { t, x, v } => {
                self.for_each(|body| body.execute(MechanicalOp::PropagateState { t, x, v }))
            }
            MechanicalOp::PropagateDx { dx } => {
                self.for_each(|body| body.execute(MechanicalOp::PropagateDx { dx }))
            }
            MechanicalOp::ResetForce { f } => {
                self.for_each(|body| body.execute(MechanicalOp::ResetForce { f }))
            }
            MechanicalOp::AccumulateForce { f } => {
                self.for_each(|body| body.execute(MechanicalOp::AccumulateForce { f }))
            }
            MechanicalOp::AccumulateDf { df } => {
                self.for_each(|body| body.execute(MechanicalOp::AccumulateDf { df }))
            }
            MechanicalOp::AddMdx { res, dx } => {
                self.for_each(|body| body.execute(MechanicalOp::AddMdx { res, dx }))
            }
            MechanicalOp::AccFromF { a, f } => {
                self.for_each(|body| body.execute(MechanicalOp::AccFromF { a, f }))
            }
            MechanicalOp::ProjectResponse { v } => {
                self.for_each(|body| body.execute(MechanicalOp::ProjectResponse { v }))
            }
            MechanicalOp::SystemDimension { rows, cols } => {
                for body in &mut self.bodies {
                    body.execute(MechanicalOp::SystemDimension { rows: &mut *rows, cols: &mut *cols })?;
                }
                Ok(())
            }
            MechanicalOp::AddMbkToMatrix { matrix, m_factor, b_factor, k_factor, offset } => {
                let mut shift = offset;
                for body in &mut self.bodies {
                    body.execute(MechanicalOp::AddMbkToMatrix {
                        matrix: &mut *matrix,
                        m_factor,
                        b_factor,
                        k_factor,
                        offset: shift,
                    })?;
                    shift += 3 * body.point_count();
                }
                Ok(())
            }
            MechanicalOp::GatherSystemVector { vector, offset } => {
                let mut shift = offset;
                for body in &mut self.bodies {
                    body.execute(MechanicalOp::GatherSystemVector { vector: &mut *vector, offset: shift })?;
                    shift += 3 * body.point_count();
                }
                Ok(())
            }
            MechanicalOp::ScatterSystemSolution { vector, offset } => {
                let mut shift = offset;
                for body in &mut self.bodies {
                    body.execute(MechanicalOp::ScatterSystemSolution { vector, offset: shift })?;
                    shift += 3 * body.point_count();
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> f64 {
        self.dot_result
    }
}
