//! Job records and the result store

use chrono::{DateTime, Utc};
use imageinf_core::{Error, InferenceResponse, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Lifecycle state of a job.
///
/// `Pending -> Started -> Success | Failure`; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The requested model is not registered
    UnknownModel { model: String },

    /// The request was rejected while building the classifier
    InvalidRequest { message: String },

    /// A file failed retrieval, decoding or classification
    Processing { path: String, message: String },

    /// The worker-side time limit elapsed
    TimeLimit { seconds: u64 },

    /// Anything else, including a panicking job
    Internal { message: String },
}

impl JobFailure {
    /// Convert back into the error a synchronous caller should see
    pub fn into_error(self) -> Error {
        match self {
            Self::UnknownModel { model } => Error::UnknownModel(model),
            Self::InvalidRequest { message } => Error::InvalidRequest(message),
            Self::Processing { path, message } => Error::Processing { path, message },
            Self::TimeLimit { .. } => Error::Timeout,
            Self::Internal { message } => Error::Internal(message),
        }
    }
}

impl From<&Error> for JobFailure {
    fn from(err: &Error) -> Self {
        match err {
            Error::UnknownModel(model) => Self::UnknownModel {
                model: model.clone(),
            },
            Error::InvalidRequest(message) => Self::InvalidRequest {
                message: message.clone(),
            },
            Error::Processing { path, message } => Self::Processing {
                path: path.clone(),
                message: message.clone(),
            },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModel { model } => write!(f, "Model '{}' is not supported.", model),
            Self::InvalidRequest { message } => write!(f, "invalid request: {}", message),
            Self::Processing { path, message } => write!(f, "Failed to process {}: {}", path, message),
            Self::TimeLimit { seconds } => write!(f, "job exceeded time limit of {}s", seconds),
            Self::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

/// A job and everything known about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub state: JobState,
    pub result: Option<InferenceResponse>,
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn new(id: String) -> Self {
        Self {
            id,
            state: JobState::Pending,
            result: None,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Storage for job records.
///
/// Implementations must reject transitions the lifecycle does not allow with
/// [`Error::InvalidTransition`].
pub trait JobStore: Send + Sync {
    /// Insert a new `Pending` record
    fn create(&self, job_id: &str) -> Result<()>;

    /// `Pending -> Started`
    fn mark_started(&self, job_id: &str) -> Result<()>;

    /// `Started -> Success`
    fn complete(&self, job_id: &str, response: InferenceResponse) -> Result<()>;

    /// `Pending | Started -> Failure`
    fn fail(&self, job_id: &str, failure: JobFailure) -> Result<()>;

    /// Current record, `None` for unknown or evicted ids
    fn get(&self, job_id: &str) -> Option<JobRecord>;

    /// Drop expired records, returning how many were removed
    fn evict_expired(&self) -> usize {
        0
    }
}

/// In-process store; finished records are evicted after `ttl`
pub struct InMemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
    ttl: Duration,
}

impl InMemoryJobStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn is_expired(&self, record: &JobRecord, now: DateTime<Utc>) -> bool {
        match record.finished_at {
            Some(finished) => (now - finished).to_std().map(|age| age >= self.ttl).unwrap_or(false),
            None => false,
        }
    }

    fn transition(
        &self,
        job_id: &str,
        to: JobState,
        allowed: &[JobState],
        apply: impl FnOnce(&mut JobRecord),
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        if !allowed.contains(&record.state) {
            return Err(Error::InvalidTransition {
                job_id: job_id.to_string(),
                from: record.state.to_string(),
                to: to.to_string(),
            });
        }

        record.state = to;
        apply(record);
        debug!(job_id = %job_id, state = %to, "Job transition");
        Ok(())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(86_400))
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job_id: &str) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(job_id) {
            return Err(Error::internal(format!("job '{}' already exists", job_id)));
        }
        records.insert(job_id.to_string(), JobRecord::new(job_id.to_string()));
        Ok(())
    }

    fn mark_started(&self, job_id: &str) -> Result<()> {
        self.transition(job_id, JobState::Started, &[JobState::Pending], |record| {
            record.started_at = Some(Utc::now());
        })
    }

    fn complete(&self, job_id: &str, response: InferenceResponse) -> Result<()> {
        self.transition(job_id, JobState::Success, &[JobState::Started], |record| {
            record.result = Some(response);
            record.finished_at = Some(Utc::now());
        })
    }

    fn fail(&self, job_id: &str, failure: JobFailure) -> Result<()> {
        self.transition(
            job_id,
            JobState::Failure,
            &[JobState::Pending, JobState::Started],
            |record| {
                record.failure = Some(failure);
                record.finished_at = Some(Utc::now());
            },
        )
    }

    fn get(&self, job_id: &str) -> Option<JobRecord> {
        let records = self.records.read();
        let record = records.get(job_id)?;
        if self.is_expired(record, Utc::now()) {
            return None;
        }
        Some(record.clone())
    }

    fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !self.is_expired(record, now));
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "Evicted expired jobs");
        }
        removed
    }
}
