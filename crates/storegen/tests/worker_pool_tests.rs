//! Worker pool tests through `PipelineService` with fake collaborators.

mod common;

use std::time::{Duration, Instant};

use common::{fast_config, widget_product, JobBuilder, TestHarness, WIDGET_URL};
use storegen::broadcast::JobPhase;
use storegen::{
    DeliveryOutcome, JobStatus, JobStoreError, PipelineService, StepName, StoregenError,
    WorkerError, WorkerPool,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn service(harness: &TestHarness, worker_count: usize) -> PipelineService {
    PipelineService::new(
        harness.db.clone(),
        harness.collaborators.clone(),
        &fast_config(worker_count),
    )
}

/// Collects outcomes until `done` holds or the deadline passes.
fn collect_until(
    pool: &WorkerPool,
    mut done: impl FnMut(&[DeliveryOutcome]) -> bool,
) -> Vec<DeliveryOutcome> {
    let start = Instant::now();
    let mut outcomes = Vec::new();
    while !done(&outcomes) {
        assert!(
            start.elapsed() < DEADLINE,
            "timed out waiting for outcomes, got {:?}",
            outcomes
        );
        if let Some(outcome) = pool.recv_result_timeout(Duration::from_millis(50)) {
            outcomes.push(outcome);
        }
    }
    outcomes
}

fn completed(outcomes: &[DeliveryOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| matches!(o, DeliveryOutcome::Completed { .. }))
        .count()
}

#[test]
fn test_pool_runs_submitted_jobs() {
    let harness = TestHarness::new();
    let service = service(&harness, 2);
    let ids: Vec<i64> = (0..3)
        .map(|_| service.submit(JobBuilder::new().build()).unwrap())
        .collect();

    let pool = service.start_workers().unwrap();
    let outcomes = collect_until(&pool, |o| completed(o) == ids.len());
    pool.shutdown();
    assert!(pool.wait().is_empty());

    for id in &ids {
        let job = service.get_status(*id).unwrap();
        assert_eq!(job.status, JobStatus::Completed, "job {}", id);
        assert!(job.result_product_id.is_some());
        assert!(outcomes.iter().any(|o| o.job_id() == Some(*id)));
    }
    assert_eq!(harness.scraper.script.calls(), 3);
    assert_eq!(harness.shopify.created_products().len(), 3);
    assert_eq!(service.queue().stats().unwrap().completed, 3);
}

#[test]
fn test_pool_retries_transient_failure() {
    let harness = TestHarness::new();
    harness.generator.script.fail_times(1);
    let service = service(&harness, 1);
    let job_id = service.submit(JobBuilder::new().build()).unwrap();

    let pool = service.start_workers().unwrap();
    let outcomes = collect_until(&pool, |o| completed(o) == 1);
    pool.shutdown();
    pool.wait();

    match &outcomes[0] {
        DeliveryOutcome::Retrying {
            job_id: id,
            attempt,
            delay,
            error,
        } => {
            assert_eq!(*id, job_id);
            assert_eq!(*attempt, 1);
            assert_eq!(*delay, Duration::from_millis(10));
            assert!(error.contains("connection reset"));
        }
        other => panic!("expected a retry first, got {:?}", other),
    }
    assert!(matches!(
        outcomes.last(),
        Some(DeliveryOutcome::Completed { attempt: 2, .. })
    ));

    let job = service.get_status(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(harness.scraper.script.calls(), 1);
}

#[test]
fn test_pool_fails_job_after_last_attempt() {
    let harness = TestHarness::new();
    harness.shopify.pages.fail_always();
    let mut config = fast_config(1);
    config.queue.max_attempts = 2;
    let service = PipelineService::new(harness.db.clone(), harness.collaborators.clone(), &config);
    let job_id = service.submit(JobBuilder::new().build()).unwrap();

    let pool = service.start_workers().unwrap();
    let outcomes = collect_until(&pool, |o| {
        o.iter().any(|o| matches!(o, DeliveryOutcome::Failed(_)))
    });
    pool.shutdown();
    pool.wait();

    assert!(matches!(
        outcomes.last(),
        Some(DeliveryOutcome::Failed(WorkerError::PermanentFailure { attempts: 2, .. }))
    ));
    let job = service.get_status(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().is_some_and(|e| e.contains("HTTP 422")));
    assert_eq!(harness.shopify.pages.calls(), 2);
    assert_eq!(harness.shopify.products.calls(), 1);
}

#[test]
fn test_create_product_failing_on_every_attempt() {
    let harness = TestHarness::new();
    harness.scraper.returns(widget_product());
    harness.shopify.products.fail_always();
    let service = service(&harness, 1);
    let job_id = service
        .submit(JobBuilder::new().source_url(WIDGET_URL).build())
        .unwrap();

    let pool = service.start_workers().unwrap();
    let outcomes = collect_until(&pool, |o| {
        o.iter().any(|o| matches!(o, DeliveryOutcome::Failed(_)))
    });
    pool.shutdown();
    pool.wait();

    let retries = outcomes
        .iter()
        .filter(|o| matches!(o, DeliveryOutcome::Retrying { .. }))
        .count();
    assert_eq!(retries, 2);
    assert!(matches!(
        outcomes.last(),
        Some(DeliveryOutcome::Failed(WorkerError::PermanentFailure { attempts: 3, .. }))
    ));

    let job = service.get_status(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    let product = job.step(StepName::CreateProduct).unwrap();
    assert_eq!(product.status, JobStatus::Failed);
    assert_eq!(
        product.error.as_deref(),
        Some("shopify returned HTTP 422: Unprocessable Entity")
    );
    assert_eq!(
        job.step(StepName::CreatePages).unwrap().status,
        JobStatus::Pending
    );
    assert!(job.error.as_deref().is_some_and(|e| e.contains("HTTP 422")));
    assert_eq!(harness.shopify.products.calls(), 3);
    assert_eq!(harness.shopify.themes.calls(), 1);
}

#[test]
fn test_submit_rejects_unconnected_shop() {
    let harness = TestHarness::new();
    let service = service(&harness, 1);

    let err = service
        .submit(JobBuilder::new().shop_id(99).build())
        .unwrap_err();
    assert!(
        matches!(err, StoregenError::JobStore(JobStoreError::Validation(ref m)) if m.contains("99")),
        "unexpected error {:?}",
        err
    );
    assert_eq!(service.store().counts().unwrap().pending, 0);
    assert_eq!(service.queue().stats().unwrap().waiting, 0);
    assert_eq!(harness.scraper.script.calls(), 0);
}

#[test]
fn test_cancelled_job_is_discarded() {
    let harness = TestHarness::new();
    let service = service(&harness, 1);
    let cancelled = service.submit(JobBuilder::new().build()).unwrap();
    let kept = service.submit(JobBuilder::new().build()).unwrap();
    service.cancel(cancelled).unwrap();

    let pool = service.start_workers().unwrap();
    let outcomes = collect_until(&pool, |o| o.len() == 2);
    pool.shutdown();
    pool.wait();

    assert!(outcomes.iter().any(|o| matches!(
        o,
        DeliveryOutcome::Discarded { job_id, .. } if *job_id == cancelled
    )));
    assert!(outcomes.iter().any(|o| matches!(
        o,
        DeliveryOutcome::Completed { job_id, .. } if *job_id == kept
    )));
    assert_eq!(harness.scraper.script.calls(), 1);
}

#[test]
fn test_progress_events_reach_subscribers() {
    let harness = TestHarness::new();
    let service = service(&harness, 1);
    let mut events = service.subscribe();
    let job_id = service.submit(JobBuilder::new().build()).unwrap();

    let pool = service.start_workers().unwrap();
    collect_until(&pool, |o| completed(o) == 1);
    pool.shutdown();
    pool.wait();

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job_id);
        if phases.last() != Some(&event.phase) {
            phases.push(event.phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            JobPhase::Queued,
            JobPhase::Scraping,
            JobPhase::Generating,
            JobPhase::BuildingTheme,
            JobPhase::UploadingTheme,
            JobPhase::CreatingProduct,
            JobPhase::CreatingPages,
            JobPhase::Completed,
        ]
    );
}

#[test]
fn test_shutdown_with_empty_queue() {
    let harness = TestHarness::new();
    let pool = service(&harness, 3).start_workers().unwrap();

    assert!(pool.try_recv_result().is_none());
    pool.shutdown();
    assert!(pool.is_shutdown());
    assert!(pool.wait().is_empty());
}
