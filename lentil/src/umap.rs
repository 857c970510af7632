use crate::cache::Param;
use crate::common::*;
use crate::feature_selection::SelectedFeatureTable;
use crate::table::{Cell, DataTable};

use indicatif::{ProgressBar, ProgressDrawTarget};
use matrix_util::knn_graph::{count_components, KnnGraph, KnnGraphArgs};
use matrix_util::spectral::spectral_layout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

const SPREAD: f64 = 1.0;
const NUM_CURVE_POINTS: usize = 300;
const INITIAL_LEARNING_RATE: f32 = 1.0;
const NEGATIVE_SAMPLE_RATE: usize = 5;
const REPULSION_STRENGTH: f32 = 1.0;
const GRADIENT_CLIP: f32 = 4.0;
const INIT_EXPANSION: f32 = 10.0;
const INIT_NOISE_SD: f32 = 1e-4;
const LAYOUT_SCALE: f32 = 10.0;
const LARGE_DATA_SIZE: usize = 10_000;
const KNN_BLOCK_SIZE: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// 2 or 3
    pub target_dimensions: usize,
    /// nearest neighbours per sample, self excluded
    pub neighbor_count: usize,
    /// minimum separation in the output space, in [0, 1)
    pub min_distance: f32,
    pub seed: u64,
    /// `None`: 500 epochs up to 10k samples, 200 beyond
    pub n_epochs: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            target_dimensions: DEFAULT_DIMS,
            neighbor_count: DEFAULT_KNN,
            min_distance: DEFAULT_MIN_DIST,
            seed: DEFAULT_SEED,
            n_epochs: None,
        }
    }
}

impl EmbeddingConfig {
    /// Checks that do not depend on the data
    pub fn validate(&self) -> Result<()> {
        if !(2..=3).contains(&self.target_dimensions) {
            return Err(LentilError::configuration(
                "target_dimensions",
                format!("must be 2 or 3, got {}", self.target_dimensions),
            ));
        }
        if self.neighbor_count == 0 {
            return Err(LentilError::configuration(
                "neighbor_count",
                "must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.min_distance) {
            return Err(LentilError::configuration(
                "min_distance",
                format!("must be in [0, 1), got {}", self.min_distance),
            ));
        }
        if self.n_epochs == Some(0) {
            return Err(LentilError::configuration("n_epochs", "must be positive"));
        }
        Ok(())
    }

    pub fn validate_for(&self, num_samples: usize) -> Result<()> {
        self.validate()?;
        if self.neighbor_count >= num_samples {
            return Err(LentilError::configuration(
                "neighbor_count",
                format!(
                    "{} neighbours requested for {} samples",
                    self.neighbor_count, num_samples
                ),
            ));
        }
        Ok(())
    }

    pub fn epochs_for(&self, num_samples: usize) -> usize {
        self.n_epochs.unwrap_or(if num_samples <= LARGE_DATA_SIZE {
            500
        } else {
            200
        })
    }

    /// Ordered parameter tuple for cache keys
    pub fn cache_params(&self) -> Vec<Param> {
        vec![
            Param::Count(self.target_dimensions),
            Param::Count(self.neighbor_count),
            Param::real(self.min_distance),
            Param::Seed(self.seed),
            self.n_epochs.map(Param::Count).unwrap_or(Param::Absent),
        ]
    }
}

/// Data-independent part of a fitted embedding: the validated
/// configuration and the output-space curve `1 / (1 + a d^{2b})`
#[derive(Clone, Debug, PartialEq)]
pub struct UmapModel {
    config: EmbeddingConfig,
    a: f32,
    b: f32,
}

impl UmapModel {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let (a, b) = fit_curve_params(config.min_distance as f64, SPREAD);
        debug!(
            "curve parameters a = {:.4}, b = {:.4} for min_dist = {}",
            a, b, config.min_distance
        );
        Ok(Self {
            config,
            a: a as f32,
            b: b as f32,
        })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn curve(&self) -> (f32, f32) {
        (self.a, self.b)
    }

    /// Embed the samples of `features`; rows of the result follow its
    /// sample order
    pub fn fit_transform(
        &self,
        features: &SelectedFeatureTable,
        cancel: &CancelToken,
    ) -> Result<EmbeddingCoordinates> {
        let nn = features.num_samples();
        let dims = self.config.target_dimensions;
        let knn = self.config.neighbor_count;

        self.config.validate_for(nn)?;

        if let Some(pos) = features.values().iter().position(|x| !x.is_finite()) {
            let (i, j) = (pos % nn, pos / nn);
            return Err(LentilError::invalid_input(format!(
                "non-finite value at sample {}, gene {}",
                features.sample_ids()[i],
                features.gene_ids()[j]
            )));
        }

        cancel.check("embedding")?;

        /////////////////////////////////////
        // step 1: fuzzy topological graph //
        /////////////////////////////////////

        let graph = KnnGraph::from_rows(
            features.values(),
            KnnGraphArgs {
                knn,
                block_size: KNN_BLOCK_SIZE,
            },
        )
        .map_err(|e| LentilError::invalid_input(e.to_string()))?;

        let weights = graph.fuzzy_kernel_weights();
        let n_epochs = self.config.epochs_for(nn);

        // drop edges too weak to be sampled even once
        let max_weight = weights.iter().copied().fold(0.0f32, f32::max);
        let (edges, weights): (Vec<(usize, usize)>, Vec<f32>) = graph
            .edges
            .iter()
            .copied()
            .zip(weights)
            .filter(|&(_, w)| w > 0.0 && w >= max_weight / n_epochs as f32)
            .unzip();

        info!(
            "{} samples, {} fuzzy edges, {} epochs",
            nn,
            edges.len(),
            n_epochs
        );

        cancel.check("embedding")?;

        ////////////////////////////
        // step 2: initial layout //
        ////////////////////////////

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut coords = initial_layout(nn, dims, &edges, &weights, &mut rng)?;
        rescale_columns(&mut coords, nn, dims);

        /////////////////////////////////
        // step 3: optimize the layout //
        /////////////////////////////////

        self.optimize_layout(&mut coords, nn, &edges, &weights, n_epochs, &mut rng, cancel)?;

        let coords = Mat::from_row_slice(nn, dims, &coords);

        Ok(EmbeddingCoordinates {
            sample_ids: features.sample_ids().to_vec(),
            axis_names: (1..=dims).map(|d| format!("UMAP{}", d).into_boxed_str()).collect(),
            coords,
        })
    }

    /// Stochastic gradient descent on row-major `coords` (n × dims)
    #[allow(clippy::too_many_arguments)]
    fn optimize_layout(
        &self,
        coords: &mut [f32],
        nn: usize,
        edges: &[(usize, usize)],
        weights: &[f32],
        n_epochs: usize,
        rng: &mut StdRng,
        cancel: &CancelToken,
    ) -> Result<()> {
        let dims = self.config.target_dimensions;
        let (a, b) = (self.a, self.b);

        // both orientations of every undirected edge
        let heads: Vec<usize> = edges.iter().flat_map(|&(i, j)| [i, j]).collect();
        let tails: Vec<usize> = edges.iter().flat_map(|&(i, j)| [j, i]).collect();

        let max_weight = weights.iter().copied().fold(0.0f32, f32::max);
        let epochs_per_sample: Vec<f32> = weights
            .iter()
            .flat_map(|&w| {
                let e = max_weight / w;
                [e, e]
            })
            .collect();
        let epochs_per_negative_sample: Vec<f32> = epochs_per_sample
            .iter()
            .map(|&e| e / NEGATIVE_SAMPLE_RATE as f32)
            .collect();
        let mut epoch_of_next_sample = epochs_per_sample.clone();
        let mut epoch_of_next_negative_sample = epochs_per_negative_sample.clone();

        let pb = ProgressBar::new(n_epochs as u64);
        if !log::log_enabled!(log::Level::Info) {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut delta = vec![0.0f32; dims];

        for epoch in 0..n_epochs {
            if let Err(e) = cancel.check("embedding") {
                pb.finish_and_clear();
                info!("embedding cancelled at epoch {}", epoch);
                return Err(e);
            }

            let alpha = INITIAL_LEARNING_RATE * (1.0 - epoch as f32 / n_epochs as f32);
            let now = epoch as f32;

            for e in 0..heads.len() {
                if epoch_of_next_sample[e] > now {
                    continue;
                }

                let (j, k) = (heads[e], tails[e]);

                // attraction
                let dist_sq = squared_distance(coords, dims, j, k);
                let grad_coeff = if dist_sq > 0.0 {
                    -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
                } else {
                    0.0
                };
                for d in 0..dims {
                    delta[d] = clip(grad_coeff * (coords[j * dims + d] - coords[k * dims + d]));
                }
                for d in 0..dims {
                    coords[j * dims + d] += delta[d] * alpha;
                    coords[k * dims + d] -= delta[d] * alpha;
                }

                epoch_of_next_sample[e] += epochs_per_sample[e];

                // repulsion from random samples
                let n_neg = ((now - epoch_of_next_negative_sample[e])
                    / epochs_per_negative_sample[e]) as usize;

                for _ in 0..n_neg {
                    let other = rng.random_range(0..nn);
                    let dist_sq = squared_distance(coords, dims, j, other);
                    let grad_coeff = if dist_sq > 0.0 {
                        2.0 * REPULSION_STRENGTH * b
                            / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                    } else if j == other {
                        continue;
                    } else {
                        0.0
                    };
                    for d in 0..dims {
                        let grad = if grad_coeff > 0.0 {
                            clip(grad_coeff * (coords[j * dims + d] - coords[other * dims + d]))
                        } else {
                            0.0
                        };
                        coords[j * dims + d] += grad * alpha;
                    }
                }

                epoch_of_next_negative_sample[e] += n_neg as f32 * epochs_per_negative_sample[e];
            }

            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(())
    }
}

/// Sample × axis coordinates produced by [`UmapModel::fit_transform`]
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingCoordinates {
    sample_ids: Vec<Box<str>>,
    axis_names: Vec<Box<str>>,
    coords: Mat,
}

impl EmbeddingCoordinates {
    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn num_axes(&self) -> usize {
        self.axis_names.len()
    }

    pub fn sample_ids(&self) -> &[Box<str>] {
        &self.sample_ids
    }

    /// `UMAP1`, `UMAP2`[, `UMAP3`]
    pub fn axis_names(&self) -> &[Box<str>] {
        &self.axis_names
    }

    /// samples × axes
    pub fn coords(&self) -> &Mat {
        &self.coords
    }

    /// Identifier column named `id_column` followed by one numeric
    /// column per axis
    pub fn to_table(&self, id_column: &str) -> Result<DataTable> {
        let columns: Vec<Box<str>> = std::iter::once(id_column.into())
            .chain(self.axis_names.iter().cloned())
            .collect();

        let rows = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| {
                std::iter::once(Cell::Text(s.clone()))
                    .chain(self.coords.row(i).iter().map(|&x| Cell::from_f32(x)))
                    .collect()
            })
            .collect();

        DataTable::new(columns, rows)
    }
}

/// Spectral layout of the fuzzy graph, or a uniform random layout when
/// the graph cannot support one. Row-major n × dims.
fn initial_layout(
    nn: usize,
    dims: usize,
    edges: &[(usize, usize)],
    weights: &[f32],
    rng: &mut StdRng,
) -> Result<Vec<f32>> {
    let num_components = count_components(nn, edges);

    let spectral = if num_components == 1 && nn >= dims + 2 {
        let mut similarity = Mat::zeros(nn, nn);
        for (&(i, j), &w) in edges.iter().zip(weights) {
            similarity[(i, j)] = w;
            similarity[(j, i)] = w;
        }
        match spectral_layout(&similarity, dims) {
            Ok(x) => Some(x),
            Err(e) => {
                warn!("spectral initialization failed: {}", e);
                None
            }
        }
    } else {
        warn!(
            "{} connected components among {} samples; using random initialization",
            num_components, nn
        );
        None
    };

    if let Some(xx) = spectral {
        let max_abs = xx.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        let expansion = if max_abs > 0.0 {
            INIT_EXPANSION / max_abs
        } else {
            1.0
        };
        let noise = Normal::new(0.0f32, INIT_NOISE_SD)
            .map_err(|e| LentilError::invalid_input(e.to_string()))?;

        let mut ret = Vec::with_capacity(nn * dims);
        for i in 0..nn {
            for d in 0..dims {
                ret.push(xx[(i, d)] * expansion + rng.sample(noise));
            }
        }
        Ok(ret)
    } else {
        Ok((0..nn * dims)
            .map(|_| rng.random_range(-INIT_EXPANSION..INIT_EXPANSION))
            .collect())
    }
}

/// Shift and scale every axis onto [0, 10]
fn rescale_columns(coords: &mut [f32], nn: usize, dims: usize) {
    for d in 0..dims {
        let (lo, hi) = (0..nn).fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), i| {
            let x = coords[i * dims + d];
            (lo.min(x), hi.max(x))
        });
        let range = hi - lo;
        for i in 0..nn {
            let x = &mut coords[i * dims + d];
            *x = if range > 0.0 {
                LAYOUT_SCALE * (*x - lo) / range
            } else {
                0.0
            };
        }
    }
}

fn squared_distance(coords: &[f32], dims: usize, i: usize, j: usize) -> f32 {
    (0..dims)
        .map(|d| {
            let x = coords[i * dims + d] - coords[j * dims + d];
            x * x
        })
        .sum()
}

fn clip(x: f32) -> f32 {
    x.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Fit `(a, b)` of `1 / (1 + a x^{2b})` to the membership target
/// `1` for `x <= min_dist` and `exp(-(x - min_dist) / spread)` beyond,
/// by Levenberg-Marquardt on 300 points over `[0, 3 spread]`.
pub fn fit_curve_params(min_dist: f64, spread: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..NUM_CURVE_POINTS)
        .map(|k| 3.0 * spread * k as f64 / (NUM_CURVE_POINTS - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x <= min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(ys.iter())
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut cost = sse(a, b);
    let mut lambda = 1e-3;

    for _ in 0..500 {
        // normal equations of the linearized residuals
        let (mut h00, mut h01, mut h11, mut g0, mut g1) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            let x2b = x.powf(2.0 * b);
            let denom = 1.0 + a * x2b;
            let f = 1.0 / denom;
            let r = f - y;
            let df_da = -x2b / (denom * denom);
            let df_db = if x > 0.0 {
                -2.0 * a * x2b * x.ln() / (denom * denom)
            } else {
                0.0
            };
            h00 += df_da * df_da;
            h01 += df_da * df_db;
            h11 += df_db * df_db;
            g0 += df_da * r;
            g1 += df_db * r;
        }

        let (d00, d11) = (h00 * (1.0 + lambda), h11 * (1.0 + lambda));
        let det = d00 * d11 - h01 * h01;
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -(d11 * g0 - h01 * g1) / det;
        let step_b = -(d00 * g1 - h01 * g0) / det;

        let (next_a, next_b) = ((a + step_a).max(1e-3), (b + step_b).max(1e-3));
        let next_cost = sse(next_a, next_b);

        if next_cost < cost {
            let improvement = cost - next_cost;
            a = next_a;
            b = next_b;
            cost = next_cost;
            lambda = (lambda * 0.1).max(1e-12);
            if improvement < 1e-14 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// two well separated groups of `n` samples each
    fn two_groups(n: usize) -> SelectedFeatureTable {
        let nn = 2 * n;
        let sample_ids: Vec<Box<str>> = (0..nn).map(|i| format!("s{}", i).into()).collect();
        let gene_ids: Vec<Box<str>> = (0..4).map(|g| format!("g{}", g).into()).collect();
        let values = Mat::from_fn(nn, 4, |i, g| {
            let offset = if i < n { 0.0 } else { 50.0 };
            offset + ((i * 7 + g * 3) % 11) as f32 * 0.1 + g as f32
        });
        SelectedFeatureTable::new(sample_ids, gene_ids, vec![1.0; 4], values).unwrap()
    }

    fn config(knn: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            neighbor_count: knn,
            n_epochs: Some(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_curve_params() {
        let (a, b) = fit_curve_params(0.1, 1.0);
        assert!(a > 1.3 && a < 1.9, "a = {}", a);
        assert!(b > 0.75 && b < 1.05, "b = {}", b);

        let (a_wide, _) = fit_curve_params(0.5, 1.0);
        assert!(a_wide < a);
    }

    #[test]
    fn test_config_validation() {
        let bad_dims = EmbeddingConfig {
            target_dimensions: 4,
            ..Default::default()
        };
        assert!(matches!(
            UmapModel::new(bad_dims).unwrap_err(),
            LentilError::Configuration { .. }
        ));

        for min_distance in [-0.1, 1.0] {
            let cfg = EmbeddingConfig {
                min_distance,
                ..Default::default()
            };
            assert!(cfg.validate().is_err());
        }

        assert!(EmbeddingConfig {
            n_epochs: Some(0),
            ..Default::default()
        }
        .validate()
        .is_err());

        assert!(config(5).validate_for(6).is_ok());
        assert!(config(6).validate_for(6).is_err());
    }

    #[test]
    fn test_knn_not_below_sample_count() {
        let features = two_groups(3);
        let model = UmapModel::new(config(6)).unwrap();
        let err = model.fit_transform(&features, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, LentilError::Configuration { .. }));
    }

    #[test]
    fn test_shape_and_axis_names() {
        let features = two_groups(6);
        for dims in [2, 3] {
            let cfg = EmbeddingConfig {
                target_dimensions: dims,
                ..config(4)
            };
            let emb = UmapModel::new(cfg)
                .unwrap()
                .fit_transform(&features, &CancelToken::new())
                .unwrap();
            assert_eq!(emb.coords().nrows(), 12);
            assert_eq!(emb.coords().ncols(), dims);
            assert_eq!(emb.axis_names()[dims - 1].as_ref(), format!("UMAP{}", dims));
            assert_eq!(emb.sample_ids(), features.sample_ids());
            assert!(emb.coords().iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let features = two_groups(8);
        let model = UmapModel::new(config(5)).unwrap();
        let a = model.fit_transform(&features, &CancelToken::new()).unwrap();
        let b = model.fit_transform(&features, &CancelToken::new()).unwrap();
        assert_eq!(a, b);

        let other = UmapModel::new(EmbeddingConfig {
            seed: 7,
            ..config(5)
        })
        .unwrap()
        .fit_transform(&features, &CancelToken::new())
        .unwrap();
        assert_ne!(a.coords(), other.coords());
    }

    #[test]
    fn test_groups_stay_apart() {
        let n = 10;
        let features = two_groups(n);
        let emb = UmapModel::new(EmbeddingConfig {
            n_epochs: Some(200),
            ..config(5)
        })
        .unwrap()
        .fit_transform(&features, &CancelToken::new())
        .unwrap();
        let xx = emb.coords();

        let dist = |i: usize, j: usize| (xx.row(i) - xx.row(j)).norm();
        let same_group = (0..2 * n)
            .filter(|&i| {
                let nearest = (0..2 * n)
                    .filter(|&j| j != i)
                    .min_by(|&j, &k| dist(i, j).total_cmp(&dist(i, k)))
                    .unwrap();
                (i < n) == (nearest < n)
            })
            .count();
        assert!(same_group >= 18, "{} / {}", same_group, 2 * n);
    }

    #[test]
    fn test_non_finite_features() {
        let sample_ids: Vec<Box<str>> = (0..5).map(|i| format!("s{}", i).into()).collect();
        let mut values = Mat::from_fn(5, 2, |i, j| (i + j) as f32);
        values[(3, 1)] = f32::NAN;
        let genes = vec!["a".into(), "b".into()];
        let features = SelectedFeatureTable::new(sample_ids, genes, vec![1.0; 2], values).unwrap();
        let err = UmapModel::new(config(2))
            .unwrap()
            .fit_transform(&features, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, LentilError::InvalidInput { .. }));
    }

    #[test]
    fn test_cancelled_fit() {
        let features = two_groups(5);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = UmapModel::new(config(3))
            .unwrap()
            .fit_transform(&features, &cancel)
            .unwrap_err();
        assert!(matches!(err, LentilError::Cancelled { .. }));
    }

    #[test]
    fn test_to_table() {
        let features = two_groups(4);
        let emb = UmapModel::new(config(3))
            .unwrap()
            .fit_transform(&features, &CancelToken::new())
            .unwrap();
        let table = emb.to_table("Sample_ID").unwrap();
        let columns: Vec<&str> = table.columns().iter().map(|x| x.as_ref()).collect();
        assert_eq!(columns, vec!["Sample_ID", "UMAP1", "UMAP2"]);
        assert_eq!(table.num_rows(), 8);
        assert_eq!(table.rows()[2][0], Cell::Text("s2".into()));
    }
}
