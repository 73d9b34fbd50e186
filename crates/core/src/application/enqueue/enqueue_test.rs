//! Unit tests for enqueue validation

use super::*;
use serde_json::json;

#[test]
fn test_validate_task_type_empty() {
    let req = EnqueueRequest::new("", json!({}));

    let result = validate_request(&req);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("empty"));
}

#[test]
fn test_validate_task_type_too_long() {
    let req = EnqueueRequest::new("a".repeat(65), json!({}));

    let result = validate_request(&req);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("too long"));
}

#[test]
fn test_validate_task_type_invalid_chars() {
    let req = EnqueueRequest::new("'; DROP TABLE jobs; --", json!({}));

    let result = validate_request(&req);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("alphanumeric"));
}

#[test]
fn test_validate_max_attempts_out_of_range() {
    let mut req = EnqueueRequest::new("create_order", json!({}));
    req.max_attempts = Some(0);
    assert!(validate_request(&req).is_err());

    req.max_attempts = Some(101);
    let result = validate_request(&req);
    assert!(result.unwrap_err().to_string().contains("out of range"));
}

#[test]
fn test_validate_payload_depth() {
    // Create deeply nested JSON
    let mut deep = json!({"level": 0});
    for i in 1..=35 {
        deep = json!({"level": i, "nested": deep});
    }

    let req = EnqueueRequest::new("create_order", deep);

    let result = validate_request(&req);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("deeply nested"));
}

#[test]
fn test_validate_delay_bound() {
    let mut req = EnqueueRequest::new("create_order", json!({}));
    req.delay_seconds = MAX_DELAY_SECONDS;
    assert!(validate_request(&req).is_ok());

    for delay in [MAX_DELAY_SECONDS + 1, 9_223_372_036_854_775, u64::MAX] {
        req.delay_seconds = delay;
        let result = validate_request(&req);
        assert!(result.unwrap_err().to_string().contains("delay_seconds"));
    }
}

#[test]
fn test_validate_valid_request() {
    let mut req = EnqueueRequest::new("update_tracking_ecount", json!({"ref": "A1"}));
    req.delay_seconds = 30;
    req.max_attempts = Some(3);

    assert!(validate_request(&req).is_ok());
}

#[test]
fn test_request_defaults_from_json() {
    let req: EnqueueRequest =
        serde_json::from_value(json!({"task_type": "create_order", "payload": {"ref": "A1"}}))
            .unwrap();
    assert_eq!(req.delay_seconds, 0);
    assert_eq!(req.max_attempts, None);
}

#[tokio::test]
async fn test_enqueue_applies_delay_and_default_attempts() {
    use crate::domain::JobStatus;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::ManualClock;

    let repo = Arc::new(InMemoryJobRepository::new(Arc::new(ManualClock::new(10_000))));
    let service = EnqueueService::new(repo.clone(), RetryPolicy::default());

    let mut req = EnqueueRequest::new("tracking_number", json!({"order": 7}));
    req.delay_seconds = 30;
    let id = service.enqueue(req).await.unwrap();

    let job = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 6);
    assert_eq!(job.available_at, 40_000);
}

#[tokio::test]
async fn test_enqueue_rejects_before_touching_store() {
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::ManualClock;

    let repo = Arc::new(InMemoryJobRepository::new(Arc::new(ManualClock::new(0))));
    let service = EnqueueService::new(repo.clone(), RetryPolicy::default());

    let mut req = EnqueueRequest::new("tracking_number", json!({}));
    req.max_attempts = Some(0);
    assert!(matches!(
        service.enqueue(req).await,
        Err(AppError::Validation(_))
    ));
    assert!(repo.snapshot().is_empty());
}

#[tokio::test]
async fn test_enqueue_rejects_far_future_delay() {
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::ManualClock;

    let repo = Arc::new(InMemoryJobRepository::new(Arc::new(ManualClock::new(
        1_700_000_000_000,
    ))));
    let service = EnqueueService::new(repo.clone(), RetryPolicy::default());

    let mut req = EnqueueRequest::new("tracking_number", json!({}));
    req.delay_seconds = u64::MAX;
    assert!(matches!(
        service.enqueue(req).await,
        Err(AppError::Validation(_))
    ));
    assert!(repo.snapshot().is_empty());
    assert!(repo
        .claim_batch(&[crate::domain::TaskType::new("tracking_number")], 10)
        .await
        .unwrap()
        .is_empty());
}
