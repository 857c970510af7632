#![allow(dead_code)]

pub use crate::error::{LentilError, Result};
pub use log::{debug, info, warn};
pub use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
pub use std::sync::{Arc, Mutex};

pub const DEFAULT_NUM_GENES: usize = 1000;
pub const DEFAULT_KNN: usize = 15;
pub const DEFAULT_MIN_DIST: f32 = 0.1;
pub const DEFAULT_DIMS: usize = 2;
pub const DEFAULT_SEED: u64 = 42;

pub const DEFAULT_GENE_COLUMN: &str = "GENE";
pub const DEFAULT_SAMPLE_COLUMN: &str = "Sample_ID";

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;

/// Cooperative cancellation flag shared between a request and whoever
/// may supersede it
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once `cancel` has been called
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(LentilError::cancelled(stage))
        } else {
            Ok(())
        }
    }
}
