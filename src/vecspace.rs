//! Symbolic state-vector identifiers and their allocator.
//!
//! Solvers never touch numerical arrays directly. They name vectors with
//! [`VecId`] handles and ask the dispatcher to operate on them, which keeps
//! integration schemes independent of how a mechanical object stores its
//! state. A fixed set of reserved identifiers covers the canonical vectors
//! (position, velocity, force, solver dx); everything above that range is
//! allocated and recycled per solver instance through [`VectorSpace`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// First index available to dynamically allocated vectors. Indices below
/// this are reserved in both kinds.
pub const FIRST_DYNAMIC_INDEX: u32 = 3;

/// The two state-vector kinds.
///
/// Coordinate and derivative vectors live in separate index spaces, so a
/// `Coord` identifier and a `Deriv` identifier with the same index are
/// unrelated vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VecKind {
    /// Degrees of freedom (positions).
    Coord,
    /// Time derivatives of degrees of freedom (velocities, forces, dx).
    Deriv,
}

/// Symbolic identifier of one state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VecId {
    /// Which index space the identifier lives in.
    pub kind: VecKind,
    /// Index within that space.
    pub index: u32,
}

impl VecId {
    /// The reserved position vector.
    pub const fn position() -> Self {
        Self { kind: VecKind::Coord, index: 0 }
    }

    /// The reserved velocity vector.
    pub const fn velocity() -> Self {
        Self { kind: VecKind::Deriv, index: 0 }
    }

    /// The reserved accumulated-force vector.
    pub const fn force() -> Self {
        Self { kind: VecKind::Deriv, index: 1 }
    }

    /// The reserved linear-system unknown (dx) vector.
    pub const fn dx() -> Self {
        Self { kind: VecKind::Deriv, index: 2 }
    }

    /// Whether this identifier is one of the reserved vectors.
    pub fn is_reserved(&self) -> bool {
        self.index < FIRST_DYNAMIC_INDEX
    }

    /// Whether this identifier came from dynamic allocation.
    pub fn is_dynamic(&self) -> bool {
        self.index >= FIRST_DYNAMIC_INDEX
    }
}

/// Ordered recycling pool for one vector kind.
#[derive(Debug, Clone, Default)]
struct IndexPool {
    /// Dynamic indices currently handed out.
    used: BTreeSet<u32>,
    /// Previously released indices, reused smallest-first.
    free: BTreeSet<u32>,
    /// Number of indices ever minted.
    minted: u32,
}

impl IndexPool {
    fn alloc(&mut self) -> u32 {
        let index = match self.free.pop_first() {
            Some(index) => index,
            None => {
                let index = FIRST_DYNAMIC_INDEX + self.minted;
                self.minted += 1;
                index
            }
        };
        self.used.insert(index);
        index
    }

    fn free(&mut self, index: u32) -> bool {
        if index < FIRST_DYNAMIC_INDEX || !self.used.remove(&index) {
            return false;
        }
        self.free.insert(index);
        true
    }

    fn in_use(&self, index: u32) -> bool {
        self.used.contains(&index)
    }
}

/// Per-solver allocator of dynamic vector identifiers.
///
/// Each solver owns its own space, so temporaries of concurrently running
/// solvers can never alias.
#[derive(Debug, Clone, Default)]
pub struct VectorSpace {
    coord: IndexPool,
    deriv: IndexPool,
}

impl VectorSpace {
    /// Create an empty space with no dynamic vectors allocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh identifier of the given kind. Released indices are
    /// reused smallest-first before new ones are minted.
    pub fn alloc(&mut self, kind: VecKind) -> VecId {
        let index = match kind {
            VecKind::Coord => self.coord.alloc(),
            VecKind::Deriv => self.deriv.alloc(),
        };
        VecId { kind, index }
    }

    /// Release a dynamic identifier back to the pool.
    ///
    /// Returns `false` without touching the pool when `id` is reserved or
    /// was not allocated from this space.
    pub fn free(&mut self, id: VecId) -> bool {
        match id.kind {
            VecKind::Coord => self.coord.free(id.index),
            VecKind::Deriv => self.deriv.free(id.index),
        }
    }

    /// Whether `id` currently refers to a live vector (reserved identifiers
    /// always do).
    pub fn is_allocated(&self, id: VecId) -> bool {
        if id.is_reserved() {
            return true;
        }
        match id.kind {
            VecKind::Coord => self.coord.in_use(id.index),
            VecKind::Deriv => self.deriv.in_use(id.index),
        }
    }
}
