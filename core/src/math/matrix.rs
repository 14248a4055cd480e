use crate::prelude::{CleanError, CleanResult};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

/// Pivots of R smaller than this fraction of the largest one count as singular.
const DEGENERACY_TOLERANCE: f64 = 1e-12;

pub struct MatrixHelper;

impl MatrixHelper {
    /// Maps sample indices `0..n` linearly onto `[-1, 1]`.
    pub fn scaled_abscissa(n: usize) -> Vec<f64> {
        if n < 2 {
            return vec![0.0; n];
        }
        let span = (n - 1) as f64;
        (0..n).map(|t| 2.0 * t as f64 / span - 1.0).collect()
    }

    /// Design matrix whose column `k` is the Legendre polynomial `P_k(x)`.
    pub fn legendre_design(x: &[f64], order: usize) -> Array2<f64> {
        let mut design = Array2::zeros((x.len(), order + 1));
        for (row, &xi) in x.iter().enumerate() {
            let mut prev = 1.0;
            design[[row, 0]] = prev;
            if order == 0 {
                continue;
            }
            let mut curr = xi;
            design[[row, 1]] = curr;
            for k in 1..order {
                let kf = k as f64;
                let next = ((2.0 * kf + 1.0) * xi * curr - kf * prev) / (kf + 1.0);
                prev = curr;
                curr = next;
                design[[row, k + 1]] = curr;
            }
        }
        design
    }

    /// Least-squares solution of `design · x ≈ rhs` by Householder QR.
    pub fn least_squares(design: ArrayView2<f64>, rhs: ArrayView1<f64>) -> CleanResult<Array1<f64>> {
        let (rows, cols) = design.dim();
        if rows != rhs.len() {
            return Err(CleanError::InvariantViolation(format!(
                "design has {} rows but rhs has {}",
                rows,
                rhs.len()
            )));
        }
        if rows <= cols {
            return Err(CleanError::DataInsufficient {
                valid: rows,
                required: cols,
            });
        }

        let mut a = design.to_owned();
        let mut b = rhs.to_owned();
        for k in 0..cols {
            let mut v = a.slice(s![k.., k]).to_owned();
            let norm = v.dot(&v).sqrt();
            if norm == 0.0 {
                continue;
            }
            let alpha = if v[0] > 0.0 { -norm } else { norm };
            v[0] -= alpha;
            let v_norm_sq = v.dot(&v);
            if v_norm_sq == 0.0 {
                continue;
            }
            for j in k..cols {
                let mut column = a.slice_mut(s![k.., j]);
                let proj = 2.0 * v.dot(&column) / v_norm_sq;
                column.scaled_add(-proj, &v);
            }
            let mut tail = b.slice_mut(s![k..]);
            let proj = 2.0 * v.dot(&tail) / v_norm_sq;
            tail.scaled_add(-proj, &v);
        }

        let largest = (0..cols).map(|k| a[[k, k]].abs()).fold(0.0, f64::max);
        if let Some(k) = (0..cols).find(|&k| a[[k, k]].abs() <= DEGENERACY_TOLERANCE * largest) {
            return Err(CleanError::NumericDegeneracy(format!(
                "pivot {} of {} vanishes",
                k, cols
            )));
        }

        let mut x = Array1::zeros(cols);
        for k in (0..cols).rev() {
            let tail = a.slice(s![k, k + 1..]).dot(&x.slice(s![k + 1..]));
            x[k] = (b[k] - tail) / a[[k, k]];
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn legendre_columns_follow_recurrence() {
        let design = MatrixHelper::legendre_design(&[-1.0, 0.5, 1.0], 3);
        // P2(0.5) = -0.125, P3(0.5) = -0.4375
        assert_abs_diff_eq!(design[[1, 2]], -0.125, epsilon = 1e-12);
        assert_abs_diff_eq!(design[[1, 3]], -0.4375, epsilon = 1e-12);
        assert_abs_diff_eq!(design[[0, 3]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(design[[2, 3]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn least_squares_recovers_exact_polynomial() {
        let x = MatrixHelper::scaled_abscissa(50);
        let design = MatrixHelper::legendre_design(&x, 2);
        let truth = array![3.0, -2.0, 0.5];
        let rhs = design.dot(&truth);
        let coeffs = MatrixHelper::least_squares(design.view(), rhs.view()).unwrap();
        for (c, t) in coeffs.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(*c, *t, epsilon = 1e-10);
        }
    }

    #[test]
    fn least_squares_flags_underdetermined_and_singular_systems() {
        let design = array![[1.0, 0.0], [1.0, 1.0]];
        let rhs = array![1.0, 2.0];
        assert!(matches!(
            MatrixHelper::least_squares(design.view(), rhs.view()),
            Err(CleanError::DataInsufficient { .. })
        ));

        let design = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        let rhs = array![1.0, 2.0, 3.0];
        assert!(matches!(
            MatrixHelper::least_squares(design.view(), rhs.view()),
            Err(CleanError::NumericDegeneracy(_))
        ));
    }
}
