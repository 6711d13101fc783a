//! Global sparse stiffness storage.
//!
//! The assembled operator is held row-wise as ordered (column, value) runs,
//! which matches the additive block-writes of element assembly: repeated
//! writes at a coordinate accumulate instead of overwriting. A CSR export
//! is provided for downstream linear algebra.

use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Destination for block-additive stiffness writes.
///
/// Implementors accept scattered `(row, col) += value` contributions at
/// caller-chosen offsets; the matrix itself is owned outside the force
/// core. [`CompressedRowMatrix`] is the in-crate implementation; a dense
/// `DMatrix<f64>` works too and is convenient in tests.
pub trait MatrixSink {
    /// Accumulate `value` at `(row, col)`.
    fn add(&mut self, row: usize, col: usize, value: f64);
}

/// Square sparse matrix as ordered per-row (column, value) runs.
#[derive(Debug, Clone, Default)]
pub struct CompressedRowMatrix {
    rows: Vec<Vec<(usize, f64)>>,
}

impl CompressedRowMatrix {
    /// Create an empty `size` × `size` matrix.
    pub fn new(size: usize) -> Self {
        Self {
            rows: vec![Vec::new(); size],
        }
    }

    /// Number of rows (= columns).
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// One row's (column, value) run, ordered by column.
    pub fn row(&self, row: usize) -> &[(usize, f64)] {
        &self.rows[row]
    }

    /// Drop all stored entries, keeping the dimension and row allocations.
    pub fn clear_rows(&mut self) {
        for row in &mut self.rows {
            row.clear();
        }
    }

    /// Resize to `size` × `size`, clearing all entries.
    pub fn reset(&mut self, size: usize) {
        self.rows.clear();
        self.rows.resize(size, Vec::new());
    }

    /// Convert to CSR format.
    pub fn to_csr(&self) -> CsrMatrix {
        use nalgebra_sparse::coo::CooMatrix;

        let n = self.rows.len();
        let mut coo = CooMatrix::new(n, n);
        for (row, run) in self.rows.iter().enumerate() {
            for &(col, value) in run {
                coo.push(row, col, value);
            }
        }
        CsrMatrix::from(&coo)
    }
}

impl MatrixSink for CompressedRowMatrix {
    fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows.len(), "Row index out of bounds");
        debug_assert!(col < self.rows.len(), "Column index out of bounds");

        let run = &mut self.rows[row];
        match run.binary_search_by(|&(c, _)| c.cmp(&col)) {
            Ok(pos) => run[pos].1 += value,
            Err(pos) => run.insert(pos, (col, value)),
        }
    }
}

impl MatrixSink for nalgebra::DMatrix<f64> {
    fn add(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] += value;
    }
}
