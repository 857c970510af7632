//! Composition root: feature selection, embedding and metadata join
//! behind one memoization layer.

use crate::cache::{CacheKey, CacheStats, Memo, Operation, Param};
use crate::common::*;
use crate::expression::ExpressionMatrix;
use crate::feature_selection::{rank_and_select, SelectedFeatureTable};
use crate::join::join_metadata;
use crate::table::DataTable;
use crate::umap::{EmbeddingConfig, EmbeddingCoordinates, UmapModel};
use serde::{Deserialize, Serialize};

/// Everything that determines one pipeline run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// top-K genes by dispersion
    pub num_genes: usize,
    pub embedding: EmbeddingConfig,
    /// carried through to the renderer untouched
    pub color_field: Option<Box<str>>,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self {
            num_genes: DEFAULT_NUM_GENES,
            embedding: EmbeddingConfig::default(),
            color_field: None,
        }
    }
}

pub struct PipelineCache {
    pub features: Memo<SelectedFeatureTable>,
    pub models: Memo<UmapModel>,
    pub embeddings: Memo<EmbeddingCoordinates>,
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self {
            features: Memo::new(Operation::SelectFeatures.name()),
            models: Memo::new(Operation::UmapModel.name()),
            embeddings: Memo::new(Operation::UmapEmbedding.name()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub features: CacheStats,
    pub models: CacheStats,
    pub embeddings: CacheStats,
}

pub struct PipelineOutput {
    pub joined: DataTable,
    pub features: Arc<SelectedFeatureTable>,
    pub embedding: Arc<EmbeddingCoordinates>,
    pub color_field: Option<Box<str>>,
}

impl PipelineOutput {
    /// `SchemaError` if the coloring field is not a column of `joined`
    pub fn require_color_field(&self) -> Result<()> {
        if let Some(field) = self.color_field.as_deref() {
            self.joined.require_column(field)?;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct Pipeline {
    cache: Arc<PipelineCache>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `cache` with other pipelines
    pub fn with_cache(cache: Arc<PipelineCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    /// Top `num_genes` genes of `expr`, transposed to samples × genes
    pub fn select_features(
        &self,
        expr: &ExpressionMatrix,
        num_genes: usize,
    ) -> Result<Arc<SelectedFeatureTable>> {
        let key = CacheKey::new(
            Operation::SelectFeatures,
            vec![Param::Count(num_genes)],
            Some(expr.fingerprint()),
        );
        self.cache
            .features
            .get_or_try_compute(key, || rank_and_select(expr, num_genes))
    }

    pub fn model(&self, config: &EmbeddingConfig) -> Result<Arc<UmapModel>> {
        let key = CacheKey::new(Operation::UmapModel, config.cache_params(), None);
        self.cache
            .models
            .get_or_try_compute(key, || UmapModel::new(*config))
    }

    pub fn embed(
        &self,
        features: &SelectedFeatureTable,
        config: &EmbeddingConfig,
        cancel: &CancelToken,
    ) -> Result<Arc<EmbeddingCoordinates>> {
        let key = CacheKey::new(
            Operation::UmapEmbedding,
            config.cache_params(),
            Some(features.fingerprint()),
        );
        self.cache.embeddings.get_or_try_compute(key, || {
            let model = self.model(config)?;
            model.fit_transform(features, cancel)
        })
    }

    /// Select, embed and join with `metadata` on `sample_column`
    pub fn run(
        &self,
        expr: &ExpressionMatrix,
        metadata: &DataTable,
        request: &PipelineRequest,
        sample_column: &str,
        cancel: &CancelToken,
    ) -> Result<PipelineOutput> {
        metadata.require_column(sample_column)?;

        let features = self.select_features(expr, request.num_genes)?;
        let embedding = self.embed(&features, &request.embedding, cancel)?;
        let joined = join_metadata(&embedding, metadata, sample_column)?;

        let stats = self.stats();
        info!(
            "cache hits/misses: features {}/{}, models {}/{}, embeddings {}/{}",
            stats.features.hits,
            stats.features.misses,
            stats.models.hits,
            stats.models.misses,
            stats.embeddings.hits,
            stats.embeddings.misses
        );

        Ok(PipelineOutput {
            joined,
            features,
            embedding,
            color_field: request.color_field.clone(),
        })
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            features: self.cache.features.stats(),
            models: self.cache.models.stats(),
            embeddings: self.cache.embeddings.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn expr() -> ExpressionMatrix {
        let genes: Vec<String> = (0..6).map(|g| format!("g{}", g)).collect();
        let samples: Vec<String> = (0..8).map(|s| format!("s{}", s)).collect();
        let rows: Vec<Vec<f32>> = (0..6)
            .map(|g| (0..8).map(|s| ((g * 5 + s * 3) % 7) as f32 * (g + 1) as f32).collect())
            .collect();
        ExpressionMatrix::from_gene_rows(&genes, &samples, &rows).unwrap()
    }

    fn embedding_config() -> EmbeddingConfig {
        EmbeddingConfig {
            neighbor_count: 3,
            n_epochs: Some(50),
            ..Default::default()
        }
    }

    #[test]
    fn test_feature_cache() {
        let pipeline = Pipeline::new();
        let xx = expr();
        let a = pipeline.select_features(&xx, 3).unwrap();
        let b = pipeline.select_features(&xx, 3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        pipeline.select_features(&xx, 4).unwrap();

        let stats = pipeline.stats().features;
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 2, 2));
    }

    #[test]
    fn test_model_shared_across_inputs() {
        let pipeline = Pipeline::new();
        let xx = expr();
        let cancel = CancelToken::new();
        for k in [3, 4] {
            let features = pipeline.select_features(&xx, k).unwrap();
            pipeline.embed(&features, &embedding_config(), &cancel).unwrap();
        }
        let stats = pipeline.stats();
        assert_eq!(stats.embeddings.misses, 2);
        assert_eq!(stats.models.misses, 1);
        assert_eq!(stats.models.hits, 1);
    }

    #[test]
    fn test_color_field_must_be_joined() {
        let pipeline = Pipeline::new();
        let xx = expr();
        let meta = DataTable::new(
            vec!["Sample_ID".into(), "Genotype".into()],
            xx.sample_ids()
                .iter()
                .map(|s| vec![Cell::Text(s.clone()), Cell::Text("WT".into())])
                .collect(),
        )
        .unwrap();

        let mut request = PipelineRequest {
            num_genes: 3,
            embedding: embedding_config(),
            color_field: Some("Genotype".into()),
        };
        let cancel = CancelToken::new();
        let out = pipeline.run(&xx, &meta, &request, "Sample_ID", &cancel).unwrap();
        assert!(out.require_color_field().is_ok());

        request.color_field = Some("Tissue".into());
        let out = pipeline.run(&xx, &meta, &request, "Sample_ID", &cancel).unwrap();
        let err = out.require_color_field().unwrap_err();
        assert!(matches!(err, LentilError::Schema { .. }));

        request.color_field = None;
        let out = pipeline.run(&xx, &meta, &request, "Sample_ID", &cancel).unwrap();
        assert!(out.require_color_field().is_ok());
    }

    #[test]
    fn test_request_round_trip() {
        let request = PipelineRequest {
            color_field: Some("Genotype".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: PipelineRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}
