//! Inference orchestration for one request

use imageinf_classifiers::{CategoryAggregator, ImageClassifier, ModelRegistry};
use imageinf_core::{
    Error, FileReference, InferenceResponse, InferenceResult, ModelType, Principal, Result,
    TuningParams,
};
use imageinf_retrieval::ImageRetriever;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs a model over a list of files and assembles the response.
///
/// Files are processed one at a time in request order. The first failing file
/// aborts the whole request; no partial response is produced.
#[derive(Clone)]
pub struct InferenceOrchestrator {
    registry: Arc<ModelRegistry>,
    retriever: Arc<dyn ImageRetriever>,
    aggregator: CategoryAggregator,
}

impl InferenceOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>, retriever: Arc<dyn ImageRetriever>) -> Self {
        Self {
            registry,
            retriever,
            aggregator: CategoryAggregator::default(),
        }
    }

    /// Replace the category table used for fixed-taxonomy aggregation
    pub fn with_aggregator(mut self, aggregator: CategoryAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run `model_id` over `files`.
    ///
    /// An unknown model fails before any file is fetched. Every per-file
    /// failure is reported as [`Error::Processing`] carrying the file path.
    pub async fn run(
        &self,
        files: &[FileReference],
        principal: &Principal,
        model_id: &str,
        tuning: &TuningParams,
    ) -> Result<InferenceResponse> {
        let entry = self.registry.resolve(model_id)?.clone();
        let start = Instant::now();

        let construct_tuning = tuning.clone();
        let classifier = tokio::task::spawn_blocking(move || entry.construct(&construct_tuning))
            .await
            .map_err(|e| Error::internal(format!("classifier construction task failed: {}", e)))??;
        let classifier = Arc::new(classifier);

        info!(
            model = %model_id,
            model_type = %classifier.model_type(),
            files = files.len(),
            user = %principal.username,
            "Starting inference"
        );

        let mut results = Vec::with_capacity(files.len());
        let mut aggregated_results = Vec::with_capacity(files.len());

        for file in files {
            let result = match self.process_file(&classifier, principal, file, tuning).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(path = %file.path, error = %e, "Inference failed");
                    metrics::counter!("imageinf_inference_failures_total").increment(1);
                    return Err(Error::processing(&file.path, &e));
                }
            };

            let aggregated = match classifier.model_type() {
                ModelType::FixedTaxonomy => self.aggregator.aggregate(&result.predictions),
                ModelType::ZeroShot => result.predictions.clone(),
            };
            aggregated_results.push(InferenceResult::new(file, aggregated, None));
            results.push(result);

            metrics::counter!("imageinf_files_processed_total", "model" => model_id.to_string())
                .increment(1);
        }

        let elapsed = start.elapsed();
        metrics::histogram!("imageinf_inference_latency_us").record(elapsed.as_micros() as f64);
        info!(model = %model_id, files = files.len(), elapsed_ms = elapsed.as_millis() as u64, "Inference complete");

        Ok(InferenceResponse {
            model: model_id.to_string(),
            results,
            aggregated_results,
        })
    }

    async fn process_file(
        &self,
        classifier: &Arc<ImageClassifier>,
        principal: &Principal,
        file: &FileReference,
        tuning: &TuningParams,
    ) -> Result<InferenceResult> {
        let retrieved = self.retriever.fetch(principal, file).await?;
        debug!(
            path = %file.path,
            width = retrieved.image.width(),
            height = retrieved.image.height(),
            "Retrieved image"
        );

        let sensitivity = tuning.sensitivity();
        let worker = Arc::clone(classifier);
        let image = retrieved.image;
        let predictions = tokio::task::spawn_blocking(move || worker.classify(&image, sensitivity))
            .await
            .map_err(|e| Error::internal(format!("classification task failed: {}", e)))??;

        Ok(InferenceResult::new(file, predictions, retrieved.metadata))
    }
}
