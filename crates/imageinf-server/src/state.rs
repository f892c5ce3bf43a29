//! Shared application state

use crate::auth::{Authenticator, TenantKeyValidator, TokenValidator, UnverifiedValidator};
use crate::config::ServerConfig;
use crate::security::TenantAllowlist;
use imageinf_classifiers::ModelRegistry;
use imageinf_pipeline::{InMemoryJobStore, InferenceOrchestrator, JobManager};
use imageinf_retrieval::{CachingRetriever, FileCache, ImageRetriever, TapisFilesClient};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ModelRegistry>,
    pub jobs: Arc<JobManager>,
    pub auth: Arc<Authenticator>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Assemble state from explicit collaborators.
    ///
    /// Spawns the job workers, so it must run inside a Tokio runtime.
    pub fn new(
        config: ServerConfig,
        registry: Arc<ModelRegistry>,
        retriever: Arc<dyn ImageRetriever>,
        validator: Arc<dyn TokenValidator>,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        let allowlist = TenantAllowlist::new(&config.auth.allowed_tenants)?;
        let orchestrator = InferenceOrchestrator::new(Arc::clone(&registry), retriever);
        let store = Arc::new(InMemoryJobStore::new(config.jobs.result_ttl()));
        let jobs = JobManager::new(orchestrator, store, config.jobs.job_config());

        Ok(Self {
            config: Arc::new(config),
            registry,
            jobs: Arc::new(jobs),
            auth: Arc::new(Authenticator::new(allowlist, validator)),
            metrics,
        })
    }

    /// Production state: built-in models, Tapis files retrieval and tenant key validation
    pub fn from_config(config: ServerConfig, metrics: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        let registry = Arc::new(ModelRegistry::with_builtin_models(&config.models));
        registry.log_summary();

        let remote = Arc::new(TapisFilesClient::new(config.files_timeout())?);
        let retriever = Arc::new(CachingRetriever::new(remote, FileCache::new(&config.cache_dir)));
        info!(cache_dir = %config.cache_dir.display(), "Image cache ready");

        let validator: Arc<dyn TokenValidator> = if config.auth.dev_mode {
            warn!("Development mode: token signatures are NOT verified");
            Arc::new(UnverifiedValidator)
        } else {
            let timeout = Duration::from_secs(config.auth.key_fetch_timeout_secs);
            Arc::new(TenantKeyValidator::new(timeout)?)
        };

        Self::new(config, registry, retriever, validator, metrics)
    }
}
