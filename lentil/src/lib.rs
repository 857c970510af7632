pub mod cache;
pub mod common;
pub mod dispersion;
pub mod error;
pub mod expression;
pub mod feature_selection;
pub mod filter;
pub mod join;
pub mod pipeline;
pub mod summary;
pub mod table;
pub mod umap;

pub use common::CancelToken;
pub use error::{LentilError, Result};
pub use pipeline::{Pipeline, PipelineCache, PipelineOutput, PipelineRequest};
