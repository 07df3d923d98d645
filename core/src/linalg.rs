//! Fixed-size covariance primitives for the fusion core.
//!
//! Everything in this module operates on the 24×24 navigation covariance in
//! place and on the stack; there is no dynamic sizing. The sequential updater
//! uses [`zero_rows`]/[`zero_cols`] to collapse a state whose variance would
//! go negative, and [`fix_covariance_errors`] after every accepted update to
//! keep the matrix symmetric and its diagonal inside sane bounds.

use crate::Covariance;

/// Upper clamp applied to covariance diagonal entries.
///
/// A variance above this value carries no information the filter can act on;
/// letting it grow further only invites overflow in downstream products.
pub const MAX_VARIANCE: f64 = 1.0e6;

/// Zero rows `first..=last` of the covariance.
pub fn zero_rows(p: &mut Covariance, first: usize, last: usize) {
    for row in first..=last {
        p.row_mut(row).fill(0.0);
    }
}

/// Zero columns `first..=last` of the covariance.
pub fn zero_cols(p: &mut Covariance, first: usize, last: usize) {
    for col in first..=last {
        p.column_mut(col).fill(0.0);
    }
}

/// Force exact symmetry: `P ← (P + Pᵀ)/2`.
pub fn symmetrize(p: &mut Covariance) {
    *p = (*p + p.transpose()) * 0.5;
}

/// Post-update covariance sanitiser.
///
/// Enforces symmetry, clamps negative diagonal entries to zero, and caps
/// runaway variances at [`MAX_VARIANCE`]. Called after every accepted
/// sequential update; the update itself only guarantees that no diagonal
/// went negative, not that rounding left the matrix exactly symmetric.
pub fn fix_covariance_errors(p: &mut Covariance) {
    symmetrize(p);
    for i in 0..p.nrows() {
        p[(i, i)] = p[(i, i)].clamp(0.0, MAX_VARIANCE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn filled(value: f64) -> Covariance {
        Covariance::from_element(value)
    }

    #[test]
    fn zero_rows_clears_inclusive_range() {
        let mut p = filled(1.0);
        zero_rows(&mut p, 4, 6);
        for row in 4..=6 {
            for col in 0..p.ncols() {
                assert_eq!(p[(row, col)], 0.0);
            }
        }
        assert_eq!(p[(3, 0)], 1.0);
        assert_eq!(p[(7, 0)], 1.0);
    }

    #[test]
    fn zero_cols_clears_inclusive_range() {
        let mut p = filled(1.0);
        zero_cols(&mut p, 9, 9);
        for row in 0..p.nrows() {
            assert_eq!(p[(row, 9)], 0.0);
        }
        assert_eq!(p[(0, 8)], 1.0);
        assert_eq!(p[(0, 10)], 1.0);
    }

    #[test]
    fn symmetrize_averages_off_diagonal_pairs() {
        let mut p = Covariance::identity();
        p[(0, 1)] = 2.0;
        p[(1, 0)] = 4.0;
        symmetrize(&mut p);
        assert_approx_eq!(p[(0, 1)], 3.0, 1e-12);
        assert_approx_eq!(p[(1, 0)], 3.0, 1e-12);
    }

    #[test]
    fn fix_covariance_errors_clamps_diagonal() {
        let mut p = Covariance::identity();
        p[(2, 2)] = -0.5;
        p[(3, 3)] = 2.0 * MAX_VARIANCE;
        p[(5, 6)] = 1.0;
        p[(6, 5)] = 3.0;
        fix_covariance_errors(&mut p);
        assert_eq!(p[(2, 2)], 0.0);
        assert_eq!(p[(3, 3)], MAX_VARIANCE);
        assert_approx_eq!(p[(5, 6)], 2.0, 1e-12);
        assert_approx_eq!(p[(6, 5)], 2.0, 1e-12);
    }
}
