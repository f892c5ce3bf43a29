//! Asynchronous job lifecycle
//!
//! Submitted requests are queued and executed by a fixed pool of worker
//! tasks. State transitions are recorded in a [`JobStore`]; callers observe
//! them with [`JobManager::poll`] or wait with [`JobManager::run_sync`].

use crate::orchestrator::InferenceOrchestrator;
use crate::store::{JobFailure, JobState, JobStore};
use futures::future::BoxFuture;
use futures::FutureExt;
use imageinf_core::{Error, FileReference, InferenceResponse, Principal, Result, TuningParams};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything needed to run one inference job
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub files: Vec<FileReference>,
    pub principal: Principal,
    pub model: String,
    pub tuning: TuningParams,
}

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Number of worker tasks
    pub workers: usize,

    /// Jobs that may wait in the queue before `submit` rejects new ones
    pub queue_capacity: usize,

    /// Worker-side hard limit per job
    pub time_limit: Option<Duration>,

    /// How often `run_sync` checks the store
    pub poll_interval: Duration,

    /// How often expired records are swept from the store
    pub sweep_interval: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            time_limit: Some(Duration::from_secs(300)),
            poll_interval: Duration::from_millis(100),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// What a caller sees when polling a job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    #[serde(rename = "jobId")]
    pub job_id: String,

    pub status: JobState,

    /// Present only on `SUCCESS`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<InferenceResponse>,

    /// Present only on `FAILURE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type JobWork = Box<dyn FnOnce() -> BoxFuture<'static, Result<InferenceResponse>> + Send>;

struct QueuedJob {
    id: String,
    work: JobWork,
}

/// Submits jobs to the worker pool and reports their state.
///
/// Each submitted job executes at most once; nothing is retried.
pub struct JobManager {
    sender: mpsc::Sender<QueuedJob>,
    store: Arc<dyn JobStore>,
    orchestrator: InferenceOrchestrator,
    config: JobConfig,
}

impl JobManager {
    /// Create the manager and spawn its workers on the current runtime
    pub fn new(orchestrator: InferenceOrchestrator, store: Arc<dyn JobStore>, config: JobConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = config.workers.max(1);

        for worker_id in 0..workers {
            tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&receiver),
                Arc::clone(&store),
                config.time_limit,
            ));
        }

        if let Some(interval) = config.sweep_interval {
            tokio::spawn(sweep_expired(Arc::downgrade(&store), interval));
        }

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            time_limit_secs = config.time_limit.map(|d| d.as_secs()),
            "Job manager started"
        );

        Self {
            sender,
            store,
            orchestrator,
            config,
        }
    }

    pub fn orchestrator(&self) -> &InferenceOrchestrator {
        &self.orchestrator
    }

    /// Queue a job and return its id. The job starts in `PENDING`.
    ///
    /// Never waits for queue space: a full queue fails with
    /// [`Error::QueueFull`] before any record is created.
    pub fn submit(&self, request: JobRequest) -> Result<String> {
        let permit = self.sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => {
                let capacity = self.sender.max_capacity();
                warn!(capacity, "Job queue is full, rejecting submission");
                metrics::counter!("imageinf_jobs_rejected_total").increment(1);
                Error::QueueFull { capacity }
            }
            TrySendError::Closed(()) => Error::internal("job queue is closed"),
        })?;

        let job_id = Uuid::new_v4().to_string();
        self.store.create(&job_id)?;
        metrics::counter!("imageinf_jobs_total", "state" => JobState::Pending.as_str()).increment(1);

        debug!(
            job_id = %job_id,
            model = %request.model,
            files = request.files.len(),
            "Submitting job"
        );

        let orchestrator = self.orchestrator.clone();
        let work: JobWork = Box::new(move || {
            Box::pin(async move {
                orchestrator
                    .run(&request.files, &request.principal, &request.model, &request.tuning)
                    .await
            })
        });

        permit.send(QueuedJob {
            id: job_id.clone(),
            work,
        });
        Ok(job_id)
    }

    /// Current state of a job. Never blocks.
    pub fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let record = self
            .store
            .get(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        let (result, error) = match record.state {
            JobState::Success => (record.result, None),
            JobState::Failure => (None, record.failure.map(|f| f.to_string())),
            JobState::Pending | JobState::Started => (None, None),
        };

        Ok(JobStatus {
            job_id: record.id,
            status: record.state,
            result,
            error,
        })
    }

    /// Submit and wait for the job to finish.
    ///
    /// Fails with [`Error::Timeout`] when `timeout` elapses first. The job
    /// itself keeps running and still reaches a terminal state. A full queue
    /// fails immediately with [`Error::QueueFull`].
    pub async fn run_sync(&self, request: JobRequest, timeout: Duration) -> Result<InferenceResponse> {
        let job_id = self.submit(request)?;

        match tokio::time::timeout(timeout, self.wait(&job_id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(job_id = %job_id, timeout_secs = timeout.as_secs_f64(), "Synchronous wait timed out");
                Err(Error::Timeout)
            }
        }
    }

    async fn wait(&self, job_id: &str) -> Result<InferenceResponse> {
        loop {
            let record = self
                .store
                .get(job_id)
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

            match record.state {
                JobState::Success => {
                    return record
                        .result
                        .ok_or_else(|| Error::internal(format!("job '{}' succeeded without a result", job_id)))
                }
                JobState::Failure => {
                    return Err(record
                        .failure
                        .map(JobFailure::into_error)
                        .unwrap_or_else(|| Error::internal(format!("job '{}' failed without a cause", job_id))))
                }
                JobState::Pending | JobState::Started => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    store: Arc<dyn JobStore>,
    time_limit: Option<Duration>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker_id, "Job queue closed, worker exiting");
            break;
        };
        execute(worker_id, store.as_ref(), job, time_limit).await;
    }
}

async fn execute(worker_id: usize, store: &dyn JobStore, job: QueuedJob, time_limit: Option<Duration>) {
    let QueuedJob { id, work } = job;

    if let Err(e) = store.mark_started(&id) {
        warn!(job_id = %id, error = %e, "Skipping job that cannot start");
        return;
    }
    metrics::counter!("imageinf_jobs_total", "state" => JobState::Started.as_str()).increment(1);
    debug!(job_id = %id, worker_id, "Job started");

    let guarded = AssertUnwindSafe(async move { work().await }).catch_unwind();
    let outcome = match time_limit {
        Some(limit) => tokio::time::timeout(limit, guarded).await.ok(),
        None => Some(guarded.await),
    };

    let recorded = match outcome {
        Some(Ok(Ok(response))) => {
            info!(job_id = %id, files = response.results.len(), "Job succeeded");
            store.complete(&id, response).map(|_| JobState::Success)
        }
        Some(Ok(Err(e))) => {
            warn!(job_id = %id, error = %e, "Job failed");
            store.fail(&id, JobFailure::from(&e)).map(|_| JobState::Failure)
        }
        Some(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            error!(job_id = %id, panic = %message, "Job panicked");
            store
                .fail(&id, JobFailure::Internal { message })
                .map(|_| JobState::Failure)
        }
        None => {
            let seconds = time_limit.map(|d| d.as_secs()).unwrap_or_default();
            warn!(job_id = %id, seconds, "Job exceeded time limit");
            store
                .fail(&id, JobFailure::TimeLimit { seconds })
                .map(|_| JobState::Failure)
        }
    };

    match recorded {
        Ok(state) => {
            metrics::counter!("imageinf_jobs_total", "state" => state.as_str()).increment(1);
        }
        Err(e) => error!(job_id = %id, error = %e, "Failed to record job outcome"),
    }
}

async fn sweep_expired(store: std::sync::Weak<dyn JobStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
            break;
        };
        store.evict_expired();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "job panicked");
    }

    #[test]
    fn test_status_omits_absent_fields() {
        let status = JobStatus {
            job_id: "abc".to_string(),
            status: JobState::Started,
            result: None,
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["jobId"], "abc");
        assert_eq!(json["status"], "STARTED");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }
}
