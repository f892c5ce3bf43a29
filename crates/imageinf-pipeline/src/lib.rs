//! imageinf Pipeline
//!
//! Runs classifiers over remote images and manages the job lifecycle:
//! - [`InferenceOrchestrator`] resolves a model, retrieves each file in order
//!   and assembles detailed and aggregated results
//! - [`JobManager`] queues requests for a worker pool and tracks each job
//!   through `PENDING -> STARTED -> SUCCESS | FAILURE`
//! - [`JobStore`] holds job records; [`InMemoryJobStore`] is the in-process store

pub mod jobs;
pub mod orchestrator;
pub mod store;

pub use jobs::{JobConfig, JobManager, JobRequest, JobStatus};
pub use orchestrator::InferenceOrchestrator;
pub use store::{InMemoryJobStore, JobFailure, JobRecord, JobState, JobStore};
