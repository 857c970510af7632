use crate::cache::{Fingerprint, FingerprintBuilder};
use crate::common::*;
use crate::dispersion::{rank_by_dispersion, DispersionScore};
use crate::expression::ExpressionMatrix;

/// Samples × top-K genes, columns in rank order (highest dispersion first)
#[derive(Debug, Clone)]
pub struct SelectedFeatureTable {
    sample_ids: Vec<Box<str>>,
    gene_ids: Vec<Box<str>>,
    scores: Vec<f32>,
    values: Mat,
    fingerprint: Fingerprint,
}

impl SelectedFeatureTable {
    pub fn new(
        sample_ids: Vec<Box<str>>,
        gene_ids: Vec<Box<str>>,
        scores: Vec<f32>,
        values: Mat,
    ) -> Result<Self> {
        if values.nrows() != sample_ids.len()
            || values.ncols() != gene_ids.len()
            || scores.len() != gene_ids.len()
        {
            return Err(LentilError::invalid_input(format!(
                "{} x {} feature values for {} samples, {} genes and {} scores",
                values.nrows(),
                values.ncols(),
                sample_ids.len(),
                gene_ids.len(),
                scores.len()
            )));
        }

        let fingerprint = FingerprintBuilder::new("features")
            .usize(values.nrows())
            .usize(values.ncols())
            .strs(&sample_ids)
            .strs(&gene_ids)
            .f32s(values.iter())
            .finish();

        Ok(Self {
            sample_ids,
            gene_ids,
            scores,
            values,
            fingerprint,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn num_features(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn sample_ids(&self) -> &[Box<str>] {
        &self.sample_ids
    }

    /// Selected genes, highest dispersion first
    pub fn gene_ids(&self) -> &[Box<str>] {
        &self.gene_ids
    }

    /// Dispersion of each selected gene, parallel to `gene_ids`
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// samples × genes
    pub fn values(&self) -> &Mat {
        &self.values
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// Take the `num_genes` highest-scoring genes and transpose to
/// samples × genes. `num_genes` must be in `1..=num_genes_total`; it
/// is never clamped.
pub fn select_top_features(
    expr: &ExpressionMatrix,
    dispersion: &DispersionScore,
    num_genes: usize,
) -> Result<SelectedFeatureTable> {
    if dispersion.len() != expr.num_genes() {
        return Err(LentilError::invalid_input(format!(
            "{} dispersion scores for {} genes",
            dispersion.len(),
            expr.num_genes()
        )));
    }

    if num_genes == 0 {
        return Err(LentilError::configuration(
            "num_genes",
            "must select at least one gene",
        ));
    }

    if num_genes > expr.num_genes() {
        return Err(LentilError::configuration(
            "num_genes",
            format!(
                "requested {} genes but the matrix has {}",
                num_genes,
                expr.num_genes()
            ),
        ));
    }

    // keep rank order; downstream columns follow descending dispersion
    let selected: Vec<usize> = dispersion.ranking().into_iter().take(num_genes).collect();

    let xx = expr.values();
    let values = Mat::from_fn(expr.num_samples(), num_genes, |i, j| xx[(selected[j], i)]);

    let gene_ids = selected.iter().map(|&g| expr.gene_ids()[g].clone()).collect();
    let scores = selected.iter().map(|&g| dispersion.scores[g]).collect();

    info!(
        "Selected {} / {} genes by median absolute deviation",
        num_genes,
        expr.num_genes()
    );

    SelectedFeatureTable::new(expr.sample_ids().to_vec(), gene_ids, scores, values)
}

/// Rank and select in one step
pub fn rank_and_select(expr: &ExpressionMatrix, num_genes: usize) -> Result<SelectedFeatureTable> {
    let dispersion = rank_by_dispersion(expr)?;
    select_top_features(expr, &dispersion, num_genes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> ExpressionMatrix {
        ExpressionMatrix::from_gene_rows(
            &["flat", "wide", "mid", "tie_a", "tie_b"],
            &["S1", "S2", "S3", "S4"],
            &[
                vec![5.0, 5.0, 5.0, 5.0],
                vec![0.0, 10.0, 20.0, 30.0],
                vec![0.0, 2.0, 4.0, 6.0],
                vec![0.0, 1.0, 2.0, 3.0],
                vec![1.0, 2.0, 3.0, 4.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_top_k_in_rank_order() {
        let expr = toy();
        let sel = rank_and_select(&expr, 4).unwrap();

        let genes: Vec<&str> = sel.gene_ids().iter().map(|x| x.as_ref()).collect();
        assert_eq!(genes, vec!["wide", "mid", "tie_a", "tie_b"]);
        assert_eq!(sel.scores(), &[10.0, 2.0, 1.0, 1.0]);

        assert_eq!(sel.num_samples(), 4);
        assert_eq!(sel.num_features(), 4);
        assert_eq!(sel.sample_ids()[3].as_ref(), "S4");
        // row = sample, column = gene
        assert_eq!(sel.values()[(2, 0)], 20.0);
        assert_eq!(sel.values()[(3, 3)], 4.0);
    }

    #[test]
    fn test_all_genes() {
        let expr = toy();
        let sel = rank_and_select(&expr, expr.num_genes()).unwrap();
        assert_eq!(sel.num_features(), 5);
        assert_eq!(sel.gene_ids()[4].as_ref(), "flat");
    }

    #[test]
    fn test_k_out_of_range() {
        let expr = toy();
        for k in [0, 6, 100] {
            let err = rank_and_select(&expr, k).unwrap_err();
            assert!(matches!(err, LentilError::Configuration { .. }), "k={}", k);
        }
    }

    #[test]
    fn test_gene_with_missing_cell_not_selected() {
        let samples: Vec<String> = (1..=5).map(|s| format!("S{}", s)).collect();
        let genes: Vec<String> = (0..10).map(|g| format!("g{}", g)).collect();
        let rows: Vec<Vec<f32>> = (0..10)
            .map(|g| {
                (0..5)
                    .map(|s| match (g, s) {
                        (0, 2) => f32::NAN,
                        (0, _) => 100.0 * s as f32,
                        _ => (g * s) as f32,
                    })
                    .collect()
            })
            .collect();
        let expr = ExpressionMatrix::from_gene_rows(&genes, &samples, &rows).unwrap();

        let sel = rank_and_select(&expr, 3).unwrap();
        let genes: Vec<&str> = sel.gene_ids().iter().map(|x| x.as_ref()).collect();
        assert_eq!(genes, vec!["g9", "g8", "g7"]);
        assert!(sel.values().iter().all(|x| x.is_finite()));

        let all = rank_and_select(&expr, 10).unwrap();
        assert_eq!(all.gene_ids()[9].as_ref(), "g0");
    }

    #[test]
    fn test_fingerprint_depends_on_k() {
        let expr = toy();
        let a = rank_and_select(&expr, 2).unwrap();
        let b = rank_and_select(&expr, 3).unwrap();
        let c = rank_and_select(&expr, 2).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }
}
