use crate::common::*;
use crate::expression::ExpressionMatrix;
use matrix_util::dmatrix_stat::RobustStatOps;

/// Per-gene robust spread across samples, in the matrix's row order
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionScore {
    pub gene_ids: Vec<Box<str>>,
    pub scores: Vec<f32>,
    /// false if the gene has a missing cell
    pub complete: Vec<bool>,
}

impl DispersionScore {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Row indices ordered by score, highest first; equal scores keep
    /// their original row order. Genes with a missing cell come after
    /// every complete gene.
    pub fn ranking(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.scores.len()).collect();
        // `sort_by` is stable
        idx.sort_by(|&a, &b| {
            self.complete[b]
                .cmp(&self.complete[a])
                .then(self.scores[b].total_cmp(&self.scores[a]))
        });
        idx
    }

    /// 1-based rank of each gene, in row order
    pub fn ranks(&self) -> Vec<usize> {
        let mut ret = vec![0; self.len()];
        for (r, g) in self.ranking().into_iter().enumerate() {
            ret[g] = r + 1;
        }
        ret
    }
}

/// Median absolute deviation of every gene across samples, without the
/// normal-consistency factor. Missing cells are skipped, and the gene is
/// marked incomplete.
///
/// Fails on a matrix with no samples, or on a gene with no observed value.
pub fn rank_by_dispersion(expr: &ExpressionMatrix) -> Result<DispersionScore> {
    if expr.num_samples() == 0 {
        return Err(LentilError::invalid_input("expression matrix has zero samples"));
    }

    let mad = expr.values().row_median_abs_dev();

    let scores = mad
        .into_iter()
        .zip(expr.gene_ids())
        .map(|(m, gene)| {
            m.ok_or_else(|| {
                LentilError::invalid_input(format!("gene {} has only missing values", gene))
            })
        })
        .collect::<Result<Vec<f32>>>()?;

    let complete: Vec<bool> = expr
        .values()
        .row_num_missing()
        .into_iter()
        .map(|m| m == 0)
        .collect();

    let num_incomplete = complete.iter().filter(|&&c| !c).count();
    if num_incomplete > 0 {
        info!("{} genes with missing cells are ranked last", num_incomplete);
    }
    debug!("scored {} genes by MAD", scores.len());

    Ok(DispersionScore {
        gene_ids: expr.gene_ids().to_vec(),
        scores,
        complete,
    })
}
