//! Nearest-neighbour queries over aprender matrices

use crate::error::{Error, Result};
use aprender::primitives::Matrix;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// Row-major copy of `x` as an aprender matrix
pub(crate) fn to_matrix(x: &ArrayView2<'_, f32>) -> Result<Matrix<f32>> {
    Matrix::from_vec(x.nrows(), x.ncols(), x.iter().copied().collect())
        .map_err(|e| Error::Data(format!("matrix conversion: {e}")))
}

/// Back to ndarray
pub(crate) fn from_matrix(m: &Matrix<f32>) -> Result<Array2<f32>> {
    Array2::from_shape_vec(m.shape(), m.as_slice().to_vec())
        .map_err(|e| Error::Data(format!("matrix conversion: {e}")))
}

/// Squared euclidean distances `[a.rows, b.rows]`
///
/// Uses the Gram expansion `|a|^2 + |b|^2 - 2 a.b` with the cross term
/// computed by aprender's matmul.
pub(crate) fn pairwise_sq_dists(a: &ArrayView2<'_, f32>, b: &ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    if a.ncols() != b.ncols() {
        return Err(Error::Data(format!(
            "distance between {}-d and {}-d points",
            a.ncols(),
            b.ncols()
        )));
    }
    let a_sq: Vec<f32> = a.axis_iter(Axis(0)).map(|r| r.dot(&r)).collect();
    let b_sq: Vec<f32> = b.axis_iter(Axis(0)).map(|r| r.dot(&r)).collect();
    let cross = to_matrix(a)?
        .matmul(&to_matrix(b)?.transpose())
        .map_err(|e| Error::Data(format!("pairwise distances: {e}")))?;

    let mut d = from_matrix(&cross)?;
    for ((i, j), v) in d.indexed_iter_mut() {
        *v = (a_sq[i] + b_sq[j] - 2.0 * *v).max(0.0);
    }
    Ok(d)
}

/// Column indices of the `k` smallest entries of `row`, nearest first
///
/// `exclude` drops one column (the query point itself).
pub(crate) fn k_nearest(row: ArrayView1<'_, f32>, k: usize, exclude: Option<usize>) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).filter(|&j| Some(j) != exclude).collect();
    idx.sort_by(|&x, &y| row[x].total_cmp(&row[y]).then(x.cmp(&y)));
    idx.truncate(k);
    idx
}

/// Column indices of the `k` largest entries of `row`, farthest first
pub(crate) fn k_farthest(row: ArrayView1<'_, f32>, k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).collect();
    idx.sort_by(|&x, &y| row[y].total_cmp(&row[x]).then(x.cmp(&y)));
    idx.truncate(k);
    idx
}
