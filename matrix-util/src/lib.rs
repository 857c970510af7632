pub mod common_io;
pub mod dmatrix_stat;
pub mod knn_graph;
pub mod spectral;
