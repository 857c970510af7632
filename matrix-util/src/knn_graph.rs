use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

pub struct KnnGraph {
    /// Sorted edge list (i < j), union of both directions
    pub edges: Vec<(usize, usize)>,
    /// Directed k nearest neighbours of each node, nearest first
    pub knn_indices: Vec<Vec<usize>>,
    /// Distances parallel to `knn_indices`
    pub knn_distances: Vec<Vec<f32>>,
    /// Number of nodes
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
}

impl KnnGraph {
    /// Build an exact Euclidean KNN graph from row vectors (samples × features).
    ///
    /// Neighbours are ordered by distance and then by index, so the
    /// graph is a deterministic function of `data`.
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_rows(data: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = data.nrows();

        if nn < 2 {
            return Err(anyhow::anyhow!("need at least two points, got {}", nn));
        }
        if args.knn == 0 || args.knn >= nn {
            return Err(anyhow::anyhow!(
                "knn must be in [1, {}), got {}",
                nn,
                args.knn
            ));
        }

        // row vectors are scattered in column-major storage
        let points: Vec<Vec<f32>> = data
            .row_iter()
            .map(|r| r.iter().copied().collect())
            .collect();

        /////////////////////////////////////////////////////////////////
        // step 1: searching nearest neighbours                        //
        /////////////////////////////////////////////////////////////////

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        let blocks: Vec<Vec<(Vec<usize>, Vec<f32>)>> = jobs
            .into_par_iter()
            .progress_count(njobs)
            .map(|(lb, ub)| {
                (lb..ub)
                    .map(|i| nearest_others(&points, i, args.knn))
                    .collect()
            })
            .collect();

        let (knn_indices, knn_distances): (Vec<_>, Vec<_>) =
            blocks.into_iter().flatten().unzip();

        /////////////////////////////////////////
        // step 2: union of the directed edges //
        /////////////////////////////////////////

        let mut edges: Vec<(usize, usize)> = knn_indices
            .iter()
            .enumerate()
            .flat_map(|(i, jj)| jj.iter().map(move |&j| if i < j { (i, j) } else { (j, i) }))
            .collect();

        edges.sort_unstable();
        edges.dedup();

        info!("{} union edges among {} points (k={})", edges.len(), nn, args.knn);

        Ok(KnnGraph {
            edges,
            knn_indices,
            knn_distances,
            n_nodes: nn,
        })
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of connected components of the union graph
    pub fn num_components(&self) -> usize {
        count_components(self.n_nodes, &self.edges)
    }

    /// Fuzzy simplicial set weights with local connectivity (UMAP).
    ///
    /// 1. rho_i = distance to the nearest neighbour
    /// 2. sigma_i via binary search: sum_j exp(-(d_ij - rho_i)/sigma_i) = log2(k)
    /// 3. Directed weight: w(i→j) = exp(-(d_ij - rho_i) / sigma_i), zero
    ///    if j is not among the k nearest neighbours of i
    /// 4. Symmetrize: w_sym = w(i→j) + w(j→i) - w(i→j) * w(j→i)
    ///
    /// Returns weights parallel to `self.edges`, all in (0, 1].
    pub fn fuzzy_kernel_weights(&self) -> Vec<f32> {
        let mut rho = vec![0.0f32; self.n_nodes];
        let mut sigma = vec![1.0f32; self.n_nodes];

        for i in 0..self.n_nodes {
            let dists = &self.knn_distances[i];
            if dists.is_empty() {
                continue;
            }
            rho[i] = dists.iter().cloned().fold(f32::INFINITY, f32::min);
            let target = (dists.len() as f32).log2();
            sigma[i] = smooth_knn_sigma(dists, rho[i], target);
        }

        self.edges
            .iter()
            .map(|&(i, j)| {
                let w_ij = self
                    .directed_distance(i, j)
                    .map(|d| directed_umap_weight(d, rho[i], sigma[i]))
                    .unwrap_or(0.0);
                let w_ji = self
                    .directed_distance(j, i)
                    .map(|d| directed_umap_weight(d, rho[j], sigma[j]))
                    .unwrap_or(0.0);
                // fuzzy union: P(at least one edge) = P(A) + P(B) - P(A)*P(B)
                w_ij + w_ji - w_ij * w_ji
            })
            .collect()
    }

    /// Distance from `from` to `to` if `to` is one of its k nearest neighbours
    fn directed_distance(&self, from: usize, to: usize) -> Option<f32> {
        self.knn_indices[from]
            .iter()
            .position(|&j| j == to)
            .map(|p| self.knn_distances[from][p])
    }
}

/// Number of connected components of an undirected graph on `n_nodes`
pub fn count_components(n_nodes: usize, edges: &[(usize, usize)]) -> usize {
    let mut parent: Vec<usize> = (0..n_nodes).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for &(i, j) in edges {
        let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
        if ri != rj {
            parent[ri.max(rj)] = ri.min(rj);
        }
    }

    (0..n_nodes).filter(|&x| find(&mut parent, x) == x).count()
}

fn nearest_others(points: &[Vec<f32>], i: usize, knn: usize) -> (Vec<usize>, Vec<f32>) {
    let xi = &points[i];
    let mut dists: Vec<(usize, f32)> = points
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(j, xj)| {
            let d = xi
                .iter()
                .zip(xj.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt();
            (j, d)
        })
        .collect();

    dists.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    dists.truncate(knn);
    dists.into_iter().unzip()
}

/// Binary search for per-point sigma (UMAP's smooth_knn_dist).
///
/// Finds sigma such that: sum_j exp(-max(0, d_j - rho) / sigma) = target
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = 1e-3 * mean_dist;

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..MAX_ITER {
        let mut psum = 0.0f32;
        for &d in dists {
            let gap = d - rho;
            if gap > 0.0 {
                psum += (-gap / mid).exp();
            } else {
                psum += 1.0;
            }
        }

        if (psum - target).abs() < TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }

    mid.max(min_sigma)
}

/// Compute a single directed UMAP membership weight.
fn directed_umap_weight(d: f32, rho: f32, sigma: f32) -> f32 {
    if d.is_infinite() || sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}

fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight clusters of 5 points each in 2D, well separated
    fn two_cluster_matrix() -> DMatrix<f32> {
        DMatrix::from_row_slice(
            10,
            2,
            &[
                // Cluster A near origin
                0.0, 0.0, //
                0.1, 0.0, //
                0.0, 0.1, //
                0.1, 0.1, //
                0.05, 0.05, //
                // Cluster B far away
                10.0, 10.0, //
                10.1, 10.0, //
                10.0, 10.1, //
                10.1, 10.1, //
                10.05, 10.05, //
            ],
        )
    }

    fn args(knn: usize) -> KnnGraphArgs {
        KnnGraphArgs {
            knn,
            block_size: 3,
        }
    }

    #[test]
    fn test_from_rows_basic() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(4)).unwrap();

        assert_eq!(graph.num_nodes(), 10);
        assert!(graph.num_edges() > 0);

        for &(i, j) in &graph.edges {
            assert!(i < j, "Edge ({}, {}) not canonical", i, j);
        }
        assert!(graph.edges.windows(2).all(|w| w[0] < w[1]));
        for (i, nn) in graph.knn_indices.iter().enumerate() {
            assert_eq!(nn.len(), 4);
            assert!(!nn.contains(&i));
            let dd = &graph.knn_distances[i];
            assert!(dd.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_two_clusters_no_cross_edges() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(4)).unwrap();

        for &(i, j) in &graph.edges {
            let same_cluster = (i < 5 && j < 5) || (i >= 5 && j >= 5);
            assert!(same_cluster, "Cross-cluster edge ({}, {})", i, j);
        }
        assert_eq!(graph.num_components(), 2);
    }

    #[test]
    fn test_union_covers_both_directions() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(3)).unwrap();

        for (i, nn) in graph.knn_indices.iter().enumerate() {
            for &j in nn {
                let key = (i.min(j), i.max(j));
                assert!(graph.edges.binary_search(&key).is_ok());
            }
        }
    }

    #[test]
    fn test_knn_out_of_range() {
        let data = two_cluster_matrix();
        assert!(KnnGraph::from_rows(&data, args(0)).is_err());
        assert!(KnnGraph::from_rows(&data, args(10)).is_err());
        assert!(KnnGraph::from_rows(&data, args(9)).is_ok());
    }

    #[test]
    fn test_deterministic_ties() {
        // four corners of a square: every point has two neighbours at distance 1
        let data = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let g1 = KnnGraph::from_rows(&data, args(2)).unwrap();
        let g2 = KnnGraph::from_rows(&data, args(2)).unwrap();
        assert_eq!(g1.knn_indices, g2.knn_indices);
        assert_eq!(g1.knn_indices[0], vec![1, 2]);
    }

    #[test]
    fn test_fuzzy_kernel_weights() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(4)).unwrap();

        let weights = graph.fuzzy_kernel_weights();
        assert_eq!(weights.len(), graph.num_edges());

        for &w in &weights {
            assert!(w > 0.0, "Weight {} should be > 0", w);
            assert!(w <= 1.0, "Weight {} should be <= 1", w);
        }
    }

    #[test]
    fn test_smooth_knn_sigma() {
        let dists = [0.1, 0.2, 0.3, 0.5, 1.0];
        let rho = 0.1;
        let target = (5.0f32).log2();

        let sigma = super::smooth_knn_sigma(&dists, rho, target);
        assert!(sigma > 0.0, "sigma should be positive");

        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / sigma).exp()
                } else {
                    1.0
                }
            })
            .sum();

        assert!((psum - target).abs() < 0.1);
    }

    #[test]
    fn test_count_components() {
        assert_eq!(count_components(4, &[]), 4);
        assert_eq!(count_components(4, &[(0, 1), (2, 3)]), 2);
        assert_eq!(count_components(4, &[(0, 1), (1, 2), (3, 2)]), 1);
    }

    #[test]
    fn test_create_jobs_helper() {
        assert_eq!(create_jobs(10, 3), vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
        assert_eq!(create_jobs(1, 100), vec![(0, 1)]);
        assert_eq!(create_jobs(5, 0), vec![(0, 5)]);
    }
}
