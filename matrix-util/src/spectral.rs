use nalgebra::{DMatrix, DVector};

/// Spectral layout: `dims` coordinates per node from a symmetric
/// similarity matrix.
///
/// Uses the symmetric normalized Laplacian `L_sym = I - D^{-1/2} S D^{-1/2}`
/// and returns the eigenvectors of the `dims` smallest non-trivial
/// eigenvalues as columns (n x dims). Each eigenvector's sign is fixed so
/// that its largest-magnitude entry is positive.
pub fn spectral_layout(similarity: &DMatrix<f32>, dims: usize) -> anyhow::Result<DMatrix<f32>> {
    let n = similarity.nrows();
    anyhow::ensure!(similarity.ncols() == n, "similarity must be square");
    anyhow::ensure!(dims >= 1, "need at least one dimension");
    anyhow::ensure!(n >= dims + 2, "need {} nodes, got {}", dims + 2, n);

    let degree = DVector::from_iterator(n, similarity.row_iter().map(|r| r.sum()));
    anyhow::ensure!(
        degree.iter().all(|&d| d > 0.0),
        "isolated node in the similarity graph"
    );

    let d_inv_sqrt = DMatrix::from_diagonal(&degree.map(|d| 1.0 / d.sqrt()));
    let laplacian = DMatrix::<f32>::identity(n, n) - &d_inv_sqrt * similarity * &d_inv_sqrt;

    let eig = laplacian.symmetric_eigen();
    let idx = argsort(eig.eigenvalues.as_slice(), true);

    let mut emb = DMatrix::<f32>::zeros(n, dims);
    for (j, &i) in idx[1..=dims].iter().enumerate() {
        let v = eig.eigenvectors.column(i);
        let anchor = v
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(1.0);
        let sign = if anchor < 0.0 { -1.0 } else { 1.0 };
        emb.column_mut(j).copy_from(&(v * sign));
    }

    Ok(emb)
}

/// Indices that would sort `vals`; ties keep their original order
pub fn argsort(vals: &[f32], asc: bool) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..vals.len()).collect();
    idx.sort_by(|&a, &b| {
        let c = vals[a].total_cmp(&vals[b]);
        if asc {
            c
        } else {
            c.reverse()
        }
    });
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    /// path graph 0 - 1 - 2 - 3 - 4 - 5
    fn path_graph(n: usize) -> DMatrix<f32> {
        let mut s = DMatrix::<f32>::zeros(n, n);
        for i in 0..(n - 1) {
            s[(i, i + 1)] = 1.0;
            s[(i + 1, i)] = 1.0;
        }
        s
    }

    #[test]
    fn test_argsort() {
        assert_eq!(argsort(&[3.0, 1.0, 2.0], true), vec![1, 2, 0]);
        assert_eq!(argsort(&[3.0, 1.0, 2.0], false), vec![0, 2, 1]);
        assert_eq!(argsort(&[1.0, 1.0, 0.0], false), vec![0, 1, 2]);
    }

    #[test]
    fn test_path_graph_fiedler_split() {
        let emb = spectral_layout(&path_graph(6), 2).unwrap();
        assert_eq!(emb.nrows(), 6);
        assert_eq!(emb.ncols(), 2);

        // the Fiedler vector of a path splits it in halves, antisymmetric
        let x: Vec<f32> = emb.column(0).iter().copied().collect();
        assert!(x[..3].iter().all(|&v| v * x[0] > 0.0), "{:?}", x);
        assert!(x[3..].iter().all(|&v| v * x[0] < 0.0), "{:?}", x);
        for i in 0..6 {
            approx::assert_abs_diff_eq!(x[i], -x[5 - i], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_too_few_nodes() {
        assert!(spectral_layout(&path_graph(3), 2).is_err());
    }

    #[test]
    fn test_isolated_node() {
        let mut s = path_graph(5);
        s[(3, 4)] = 0.0;
        s[(4, 3)] = 0.0;
        assert!(spectral_layout(&s, 2).is_err());
    }
}
