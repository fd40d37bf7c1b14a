//! Dense symmetric eigendecomposition for the optimizer's covariance matrix.

/// Off-diagonal magnitude below which a Jacobi sweep is considered converged.
const JACOBI_TOLERANCE: f64 = 1e-10;
const JACOBI_MAX_SWEEPS: usize = 50;

/// Row-major square matrix.
pub type Matrix = Vec<Vec<f64>>;

pub fn identity(n: usize) -> Matrix {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Eigen decomposition `A = B diag(values) B^T` of a symmetric matrix.
///
/// Columns of `vectors` are the eigenvectors, in the same order as `values`.
#[derive(Clone, Debug, PartialEq)]
pub struct SymmetricEigen {
    pub values: Vec<f64>,
    pub vectors: Matrix,
}

/// Cyclic Jacobi rotations over every off-diagonal pair, stopping once the largest
/// off-diagonal entry drops below tolerance or after a fixed number of sweeps.
/// Only the upper triangle of `a` is trusted; the input is symmetrised first.
pub fn symmetric_eigen(a: &[Vec<f64>]) -> SymmetricEigen {
    let n = a.len();
    let mut m: Matrix = (0..n)
        .map(|i| (0..n).map(|j| if j >= i { a[i][j] } else { a[j][i] }).collect())
        .collect();
    let mut v = identity(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        if max_off_diagonal(&m) < JACOBI_TOLERANCE {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if m[p][q].abs() < f64::MIN_POSITIVE {
                    continue;
                }
                rotate(&mut m, &mut v, p, q);
            }
        }
    }

    SymmetricEigen {
        values: (0..n).map(|i| m[i][i]).collect(),
        vectors: v,
    }
}

fn max_off_diagonal(m: &[Vec<f64>]) -> f64 {
    let n = m.len();
    let mut max = 0.0_f64;
    for i in 0..n {
        for j in (i + 1)..n {
            max = max.max(m[i][j].abs());
        }
    }
    max
}

fn rotate(m: &mut [Vec<f64>], v: &mut [Vec<f64>], p: usize, q: usize) {
    let n = m.len();
    let theta = (m[q][q] - m[p][p]) / (2.0 * m[p][q]);
    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
    let c = 1.0 / (t * t + 1.0).sqrt();
    let s = t * c;

    let app = m[p][p];
    let aqq = m[q][q];
    let apq = m[p][q];
    m[p][p] = app - t * apq;
    m[q][q] = aqq + t * apq;
    m[p][q] = 0.0;
    m[q][p] = 0.0;

    for k in 0..n {
        if k == p || k == q {
            continue;
        }
        let akp = m[k][p];
        let akq = m[k][q];
        m[k][p] = c * akp - s * akq;
        m[p][k] = m[k][p];
        m[k][q] = s * akp + c * akq;
        m[q][k] = m[k][q];
    }
    for row in v.iter_mut() {
        let vkp = row[p];
        let vkq = row[q];
        row[p] = c * vkp - s * vkq;
        row[q] = s * vkp + c * vkq;
    }
}

pub fn mat_vec(m: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    m.iter()
        .map(|row| row.iter().zip(x).map(|(a, b)| a * b).sum())
        .collect()
}

pub fn norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(e: &SymmetricEigen) -> Matrix {
        let n = e.values.len();
        let mut out = vec![vec![0.0; n]; n];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..n)
                    .map(|k| e.vectors[i][k] * e.values[k] * e.vectors[j][k])
                    .sum();
            }
        }
        out
    }

    #[test]
    fn diagonal_matrix_is_its_own_decomposition() {
        let e = symmetric_eigen(&[vec![3.0, 0.0], vec![0.0, 0.5]]);
        assert_eq!(e.values, vec![3.0, 0.5]);
        assert_eq!(e.vectors, identity(2));
    }

    #[test]
    fn two_by_two_eigenvalues() {
        let e = symmetric_eigen(&[vec![2.0, 1.0], vec![1.0, 2.0]]);
        let mut values = e.values.clone();
        values.sort_by(f64::total_cmp);
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn decomposition_reconstructs_input() {
        let a = vec![
            vec![4.0, 1.0, 0.5, 0.2],
            vec![1.0, 3.0, 0.3, 0.1],
            vec![0.5, 0.3, 2.0, 0.7],
            vec![0.2, 0.1, 0.7, 1.0],
        ];
        let e = symmetric_eigen(&a);
        let r = reconstruct(&e);
        for i in 0..4 {
            for j in 0..4 {
                assert!((r[i][j] - a[i][j]).abs() < 1e-8, "({i},{j})");
            }
        }
        // Eigenvectors are orthonormal.
        for p in 0..4 {
            for q in 0..4 {
                let dot: f64 = (0..4).map(|k| e.vectors[k][p] * e.vectors[k][q]).sum();
                let expected = if p == q { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn mat_vec_and_norm() {
        let y = mat_vec(&[vec![1.0, 2.0], vec![0.0, 1.0]], &[3.0, 4.0]);
        assert_eq!(y, vec![11.0, 4.0]);
        assert_eq!(norm(&[3.0, 4.0]), 5.0);
    }
}
