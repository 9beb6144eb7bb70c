//! Integration tests for the job store and queue concurrency contract.
//!
//! These require running PostgreSQL and Redis instances, configured
//! via DATABASE_URL and REDIS_URL.
//!
//! Run with: cargo test --test integration_test -- --ignored

use agrisense_backend::{
    db::{self, queries},
    models::job::JobStatus,
    models::result::{AggregateResult, StageName, StageResult, YieldRequest},
    models::submission::YieldInputs,
    services::queue::{JobQueue, QueuedJob},
};
use sqlx::PgPool;
use uuid::Uuid;

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set")
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").expect("REDIS_URL must be set")
}

async fn test_pool() -> PgPool {
    let pool = db::init_pool(&database_url())
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn sample_aggregate() -> serde_json::Value {
    let consumed = YieldRequest {
        crop_type: "potato".into(),
        disease_class: "late_blight".into(),
        ndvi: 0.8,
        weather: "moderate".into(),
        historical_yield: 1000.0,
        healthy_area: 0.6,
        weed_area: 0.3,
        soil_area: 0.1,
    };
    let aggregate = AggregateResult::from_stages(
        StageResult::success(
            StageName::Segmentation,
            serde_json::json!({"healthy_area": 0.6, "weed_area": 0.3, "soil_area": 0.1}),
        ),
        StageResult::success(
            StageName::Classification,
            serde_json::json!({"crop_type": "potato", "disease_class": "late_blight"}),
        ),
        StageResult::success(StageName::Yield, serde_json::json!({"predicted_yield": 910.0})),
        &consumed,
    );
    serde_json::to_value(aggregate).expect("aggregate serializes")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL + Redis
async fn job_lifecycle_through_store_and_queue() {
    let pool = test_pool().await;
    let queue = JobQueue::new(&redis_url()).expect("Failed to initialize queue");

    // 1. Admission: PENDING row plus one queue message
    let job = queries::create_job(
        &pool,
        Uuid::new_v4(),
        "integration-test",
        "uploads/test-primary.png",
        Some("uploads/test-mask.png"),
    )
    .await
    .expect("Failed to create job");

    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.result.is_none());

    let message = QueuedJob::new(
        job.id,
        job.primary_image_key.clone(),
        job.mask_image_key.clone(),
        YieldInputs::default(),
    );
    queue.enqueue(&message).await.expect("Failed to enqueue");
    queries::set_queue_message(&pool, job.id, message.message_id)
        .await
        .expect("Failed to record message id");

    let stored = queries::get_job(&pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(stored.queue_message_id, Some(message.message_id));

    // 2. Delivery: the dequeued message correlates back to the job
    let delivered = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No message in queue");
    assert_eq!(delivered.job_id, job.id);
    assert_eq!(delivered.message_id, message.message_id);

    // 3. Claim: first conditional update wins, second loses
    let claimed =
        queries::try_advance_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Processing)
            .await
            .expect("Claim query failed");
    assert!(claimed);

    let claimed_again =
        queries::try_advance_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Processing)
            .await
            .expect("Second claim query failed");
    assert!(!claimed_again, "redelivery must lose the claim");

    // 4. Completion: status and result land atomically
    let completed = queries::complete_job(&pool, job.id, &sample_aggregate())
        .await
        .expect("Completion query failed");
    assert!(completed);

    let terminal = queries::get_job(&pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(terminal.status, JobStatus::Completed);
    assert!(terminal.result.is_some(), "COMPLETED implies result present");

    // 5. Monotonicity: terminal state never moves
    let moved_back =
        queries::try_advance_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Processing)
            .await
            .expect("Query failed");
    assert!(!moved_back);

    let failed_after_terminal = queries::fail_job(&pool, job.id, "too late")
        .await
        .expect("Query failed");
    assert!(!failed_after_terminal);

    let unchanged = queries::get_job(&pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(unchanged.status, JobStatus::Completed);
    assert!(unchanged.error.is_none());

    queue.ack(&delivered).await.expect("Failed to ack");
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn concurrent_claims_elect_exactly_one_winner() {
    let pool = test_pool().await;

    let job = queries::create_job(
        &pool,
        Uuid::new_v4(),
        "integration-test",
        "uploads/contended.png",
        None,
    )
    .await
    .expect("Failed to create job");

    let claims = (0..8).map(|_| {
        let pool = pool.clone();
        let job_id = job.id;
        async move {
            queries::try_advance_status(
                &pool,
                job_id,
                &[JobStatus::Pending],
                JobStatus::Processing,
            )
            .await
            .expect("Claim query failed")
        }
    });

    let outcomes = futures::future::join_all(claims).await;
    let winners = outcomes.iter().filter(|won| **won).count();
    assert_eq!(winners, 1, "exactly one delivery may hold PROCESSING");
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn failed_job_keeps_error_but_no_result() {
    let pool = test_pool().await;

    let job = queries::create_job(
        &pool,
        Uuid::new_v4(),
        "integration-test",
        "uploads/unresolvable.png",
        None,
    )
    .await
    .expect("Failed to create job");

    let claimed =
        queries::try_advance_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Processing)
            .await
            .expect("Claim query failed");
    assert!(claimed);

    let failed = queries::fail_job(&pool, job.id, "primary image could not be resolved")
        .await
        .expect("Failure query failed");
    assert!(failed);

    let terminal = queries::get_job(&pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(terminal.status, JobStatus::Failed);
    assert!(terminal.result.is_none(), "only COMPLETED carries a result");
    assert!(terminal.error.is_some());

    // Completion after FAILED must not apply
    let completed_late = queries::complete_job(&pool, job.id, &sample_aggregate())
        .await
        .expect("Query failed");
    assert!(!completed_late);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn nack_redelivers_with_incremented_attempts() {
    let queue = JobQueue::new(&redis_url()).expect("Failed to initialize queue");

    let message = QueuedJob::new(
        Uuid::new_v4(),
        "uploads/retryable.png".to_string(),
        None,
        YieldInputs {
            ndvi: Some(0.7),
            weather: None,
            historical_yield: None,
        },
    );

    queue.enqueue(&message).await.expect("Failed to enqueue");

    let first = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No message in queue");
    assert_eq!(first.attempts, 0);

    queue.nack(&first).await.expect("Failed to nack");

    let second = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("Message was not redelivered");
    assert_eq!(second.job_id, message.job_id);
    assert_eq!(second.message_id, message.message_id);
    assert_eq!(second.attempts, 1);
    assert_eq!(second.yield_inputs.ndvi, Some(0.7));

    queue.ack(&second).await.expect("Failed to ack");
}
