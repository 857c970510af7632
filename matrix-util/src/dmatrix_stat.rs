use nalgebra::DMatrix;
use rayon::prelude::*;

/// Robust row-wise spread statistics
pub trait RobustStatOps {
    type Scalar;

    /// Median absolute deviation of each row, unscaled, skipping NaN
    /// cells. `None` for a row with no finite observation.
    fn row_median_abs_dev(&self) -> Vec<Option<Self::Scalar>>;

    /// Number of NaN cells in each row
    fn row_num_missing(&self) -> Vec<usize>;
}

impl RobustStatOps for DMatrix<f32> {
    type Scalar = f32;

    fn row_median_abs_dev(&self) -> Vec<Option<f32>> {
        (0..self.nrows())
            .into_par_iter()
            .map(|i| {
                let row: Vec<f32> = self.row(i).iter().copied().collect();
                median_abs_dev(&row)
            })
            .collect()
    }

    fn row_num_missing(&self) -> Vec<usize> {
        (0..self.nrows())
            .into_par_iter()
            .map(|i| self.row(i).iter().filter(|x| x.is_nan()).count())
            .collect()
    }
}

/// `median(|x - median(x)|)` over the non-NaN values
pub fn median_abs_dev(values: &[f32]) -> Option<f32> {
    let mut kept: Vec<f32> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    let centre = median_inplace(&mut kept)?;
    for x in kept.iter_mut() {
        *x = (*x - centre).abs();
    }
    median_inplace(&mut kept)
}

/// Sorts `values` in place; expects no NaN. The mean of the two
/// middle values for an even count.
fn median_inplace(values: &mut [f32]) -> Option<f32> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 0 {
        Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
    } else {
        Some(values[n / 2])
    }
}
