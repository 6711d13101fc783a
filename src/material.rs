//! Isotropic linear-elastic material stiffness.
//!
//! The 6×6 matrix is built in normalized form (unit normal diagonal) and
//! scaled by the Young's-modulus factor, matching the corotational force
//! pipeline where the element stiffness is `J · K · Jᵗ` with `J` carrying
//! raw 6V-scaled gradients. Division by `36V` is applied by the element
//! setup once the rest volume is known.

use crate::types::MaterialStiffness;
use log::warn;

/// Build the 6×6 material stiffness for an isotropic linear-elastic law.
///
/// # Arguments
///
/// * `young_modulus` - Young's modulus E
/// * `poisson_ratio` - Poisson's ratio ν (valid range (-1, 0.5))
/// * `scale` - per-element stiffness scale factor
///
/// A ν outside the valid range yields a zero matrix (the element then
/// contributes nothing); this is reported through the log, not an error.
/// Use [`crate::forcefield::TetrahedronFemConfig::validate`] to reject such
/// parameters up front.
pub fn material_stiffness(young_modulus: f64, poisson_ratio: f64, scale: f64) -> MaterialStiffness {
    let nu = poisson_ratio;
    if nu <= -1.0 || nu >= 0.5 {
        warn!("Poisson ratio {nu} outside (-1, 0.5); material stiffness degraded to zero");
        return MaterialStiffness::zeros();
    }

    let factor = scale * young_modulus * (1.0 - nu) / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let c12 = nu / (1.0 - nu);
    let c44 = (1.0 - 2.0 * nu) / (2.0 * (1.0 - nu));

    factor
        * MaterialStiffness::new(
            1.0, c12, c12, 0.0, 0.0, 0.0,
            c12, 1.0, c12, 0.0, 0.0, 0.0,
            c12, c12, 1.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, c44, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, c44, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, c44,
        )
}

/// Per-element stiffness scale from an optional factor list.
///
/// A list shorter than the element count maps proportionally with
/// truncating integer division: element `i` of `n` reads
/// `factors[i * factors.len() / n]`. An empty list means a uniform 1.0.
pub fn stiffness_factor(factors: &[f64], element_index: usize, element_count: usize) -> f64 {
    if factors.is_empty() || element_count == 0 {
        1.0
    } else {
        factors[element_index * factors.len() / element_count]
    }
}
