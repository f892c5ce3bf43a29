//! Job lifecycle tests


use imageinf_core::{Error, TuningParams};
use imageinf_pipeline::{
    InMemoryJobStore, InferenceOrchestrator, JobConfig, JobManager, JobRequest, JobState, JobStatus,
    JobStore,
};
use mock_pipeline::{files, principal, test_registry, MockRetriever, RecordingStore, FIXED_MODEL};
use std::sync::Arc;
use std::time::Duration;

fn config() -> JobConfig {
    JobConfig {
        workers: 2,
        queue_capacity: 16,
        time_limit: None,
        poll_interval: Duration::from_millis(5),
        sweep_interval: None,
    }
}

fn manager(retriever: Arc<MockRetriever>, store: Arc<dyn JobStore>, config: JobConfig) -> JobManager {
    JobManager::new(InferenceOrchestrator::new(test_registry(), retriever), store, config)
}

fn request(paths: &[&str], model: &str) -> JobRequest {
    JobRequest {
        files: files(paths),
        principal: principal(),
        model: model.to_string(),
        tuning: TuningParams::default(),
    }
}

async fn wait_for_terminal(manager: &JobManager, job_id: &str) -> JobStatus {
    for _ in 0..500 {
        let status = manager.poll(job_id).unwrap();
        if status.status == JobState::Success || status.status == JobState::Failure {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn test_submit_and_poll_success() {
    let store = Arc::new(RecordingStore::new());
    let manager = manager(Arc::new(MockRetriever::new()), store.clone(), config());

    let job_id = manager.submit(request(&["a.jpg", "b.jpg"], FIXED_MODEL)).unwrap();
    let first = manager.poll(&job_id).unwrap();
    assert!(first.result.is_none());
    assert!(first.error.is_none());

    let status = wait_for_terminal(&manager, &job_id).await;
    assert_eq!(status.status, JobState::Success);
    assert!(status.error.is_none());
    let result = status.result.unwrap();
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.aggregated_results.len(), 2);

    assert_eq!(
        store.states_for(&job_id),
        vec![JobState::Pending, JobState::Started, JobState::Success]
    );
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let store = Arc::new(RecordingStore::new());
    let retriever = Arc::new(MockRetriever::new().failing_on("missing.jpg"));
    let manager = manager(retriever, store.clone(), config());

    let job_id = manager.submit(request(&["missing.jpg"], FIXED_MODEL)).unwrap();
    let status = wait_for_terminal(&manager, &job_id).await;

    assert_eq!(status.status, JobState::Failure);
    assert!(status.result.is_none());
    let error = status.error.unwrap();
    assert!(error.contains("missing.jpg"));
    assert!(error.contains("not found"));

    assert_eq!(
        store.states_for(&job_id),
        vec![JobState::Pending, JobState::Started, JobState::Failure]
    );
}

#[tokio::test]
async fn test_no_transition_is_skipped() {
    let store = Arc::new(RecordingStore::new());
    let retriever = Arc::new(MockRetriever::new().failing_on("bad.jpg"));
    let manager = manager(retriever, store.clone(), config());

    let mut ids = Vec::new();
    for i in 0..6 {
        let path = if i % 2 == 0 { "ok.jpg" } else { "bad.jpg" };
        ids.push(manager.submit(request(&[path], FIXED_MODEL)).unwrap());
    }

    for id in &ids {
        let terminal = wait_for_terminal(&manager, id).await.status;
        let states = store.states_for(id);
        assert_eq!(states, vec![JobState::Pending, JobState::Started, terminal]);
    }
}

#[tokio::test]
async fn test_each_job_runs_once() {
    let retriever = Arc::new(MockRetriever::new());
    let manager = manager(retriever.clone(), Arc::new(InMemoryJobStore::default()), config());

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(manager.submit(request(&["a.jpg"], FIXED_MODEL)).unwrap());
    }
    for id in &ids {
        assert_eq!(wait_for_terminal(&manager, id).await.status, JobState::Success);
    }
    assert_eq!(retriever.fetch_count(), 4);
}

#[tokio::test]
async fn test_unknown_job_id() {
    let manager = manager(
        Arc::new(MockRetriever::new()),
        Arc::new(InMemoryJobStore::default()),
        config(),
    );
    assert!(matches!(manager.poll("no-such-job"), Err(Error::JobNotFound(_))));
}

#[tokio::test]
async fn test_run_sync_returns_response() {
    let manager = manager(
        Arc::new(MockRetriever::new()),
        Arc::new(InMemoryJobStore::default()),
        config(),
    );

    let response = manager
        .run_sync(request(&["a.jpg"], FIXED_MODEL), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.aggregated_results.len(), 1);
}

#[tokio::test]
async fn test_run_sync_surfaces_job_error() {
    let manager = manager(
        Arc::new(MockRetriever::new()),
        Arc::new(InMemoryJobStore::default()),
        config(),
    );

    let err = manager
        .run_sync(request(&["a.jpg"], "nope/model"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownModel(ref id) if id == "nope/model"));
}

#[tokio::test]
async fn test_run_sync_timeout_is_distinct() {
    let store = Arc::new(RecordingStore::new());
    let manager = manager(Arc::new(MockRetriever::hanging()), store.clone(), config());

    let err = manager
        .run_sync(request(&["slow.jpg"], FIXED_MODEL), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));

    // The job itself is still running
    let job_id = store.job_ids().pop().unwrap();
    assert_eq!(manager.poll(&job_id).unwrap().status, JobState::Started);
}

#[tokio::test]
async fn test_worker_time_limit_fails_job() {
    let config = JobConfig {
        time_limit: Some(Duration::from_millis(50)),
        ..config()
    };
    let manager = manager(
        Arc::new(MockRetriever::hanging()),
        Arc::new(InMemoryJobStore::default()),
        config,
    );

    let job_id = manager.submit(request(&["slow.jpg"], FIXED_MODEL)).unwrap();
    let status = wait_for_terminal(&manager, &job_id).await;

    assert_eq!(status.status, JobState::Failure);
    assert!(status.error.unwrap().contains("time limit"));
}

#[tokio::test]
async fn test_panicking_job_is_captured() {
    let manager = manager(
        Arc::new(MockRetriever::panicking()),
        Arc::new(InMemoryJobStore::default()),
        config(),
    );

    let job_id = manager.submit(request(&["a.jpg"], FIXED_MODEL)).unwrap();
    let status = wait_for_terminal(&manager, &job_id).await;
    assert_eq!(status.status, JobState::Failure);
    assert!(status.error.unwrap().contains("retriever exploded"));

    // Workers survive the panic
    let job_id = manager.submit(request(&["b.jpg"], FIXED_MODEL)).unwrap();
    assert_eq!(wait_for_terminal(&manager, &job_id).await.status, JobState::Failure);
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let config = JobConfig {
        workers: 1,
        queue_capacity: 1,
        ..config()
    };
    let store = Arc::new(RecordingStore::new());
    let manager = manager(Arc::new(MockRetriever::hanging()), store.clone(), config);

    // Occupy the only worker, then fill the only queue slot
    let running = manager.submit(request(&["slow.jpg"], FIXED_MODEL)).unwrap();
    for _ in 0..500 {
        if manager.poll(&running).unwrap().status == JobState::Started {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(manager.poll(&running).unwrap().status, JobState::Started);
    manager.submit(request(&["queued.jpg"], FIXED_MODEL)).unwrap();

    let err = manager.submit(request(&["extra.jpg"], FIXED_MODEL)).unwrap_err();
    assert!(matches!(err, Error::QueueFull { capacity: 1 }));

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        manager.run_sync(request(&["sync.jpg"], FIXED_MODEL), Duration::from_millis(100)),
    )
    .await
    .expect("run_sync must not block on a full queue");
    assert!(matches!(outcome, Err(Error::QueueFull { .. })));

    // Rejected submissions leave no records behind
    assert_eq!(store.job_ids().len(), 2);
    for id in store.job_ids() {
        assert_ne!(manager.poll(&id).unwrap().status, JobState::Failure);
    }
}
