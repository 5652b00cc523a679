//! End-to-end scenario tests against a real Postgres instance.
//!
//! Each test stands up its own container so scenarios can run in parallel
//! without interfering with each other's schedules/jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use server_core::domains::posts::{Post, PostTemplate, PostVariant, PublishedPost};
use server_core::domains::schedules::{Schedule, ScheduleKind};
use server_core::kernel::dedupe::InMemoryDedupeStore;
use server_core::kernel::jobs::{JobStatus, PostgresJobQueue, PublishJob, RecoverySweeper, SchedulerTick};
use server_core::kernel::policy::SelectionPolicy;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

struct TestDb {
    pool: PgPool,
    // kept alive for the container's lifetime
    _container: testcontainers::ContainerAsync<Postgres>,
}

async fn setup() -> TestDb {
    let container = Postgres::default().start().await.expect("start postgres container");
    let host = container.get_host().await.expect("container host");
    let port = container.get_host_port_ipv4(5432).await.expect("mapped port");
    let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

    let pool = PgPool::connect(&url).await.expect("connect to postgres");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    TestDb { pool, _container: container }
}

fn dedupe() -> Arc<InMemoryDedupeStore> {
    Arc::new(InMemoryDedupeStore::new())
}

/// One-shot schedule fires once, publishes, and disables itself.
#[tokio::test]
async fn one_shot_schedule_publishes_and_disables() {
    let db = setup().await;

    let post = Post::builder().text("hello").build();
    post.insert(&db.pool).await.unwrap();

    let fire_at = Utc::now() + chrono::Duration::seconds(1);
    let mut schedule = Schedule::builder()
        .post_id(post.id)
        .kind(ScheduleKind::OneShot)
        .schedule_spec(fire_at.to_rfc3339())
        .timezone("UTC")
        .build();
    schedule.next_run_at = Some(fire_at);
    schedule.insert(&db.pool).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let queue = PostgresJobQueue::new(db.pool.clone(), 5);
    let tick = SchedulerTick::new(db.pool.clone(), dedupe(), queue);
    let report = tick.run().await.unwrap();
    assert_eq!(report.materialized, 1);

    let job_id: server_core::common::JobId =
        sqlx::query_scalar("SELECT id FROM publish_jobs WHERE schedule_id = $1")
            .bind(schedule.id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    let job = PublishJob::find_by_id(job_id, &db.pool).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Enqueued);
    assert_eq!(job.planned_at.timestamp(), fire_at.timestamp());

    let disabled = Schedule::find_by_id(schedule.id, &db.pool).await.unwrap().unwrap();
    assert!(!disabled.enabled);
    assert!(disabled.next_run_at.is_none());

    let publisher = Arc::new(publisher_client::DryRunPublisher::new());
    let queue = PostgresJobQueue::new(db.pool.clone(), 5);
    let worker = server_core::kernel::jobs::WorkerRuntime::new(
        db.pool.clone(),
        dedupe(),
        queue,
        publisher,
        true,
        60,
    );
    assert!(worker.tick().await.unwrap());

    let finished = PublishJob::find_by_id(job.id, &db.pool).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Succeeded);

    let published_post_id: Option<server_core::common::PostId> =
        sqlx::query_scalar("SELECT post_id FROM published_posts WHERE post_id = $1")
            .bind(post.id)
            .fetch_optional(&db.pool)
            .await
            .unwrap()
            .flatten();
    assert_eq!(published_post_id, Some(post.id));
}

/// A publisher that always fails transiently, driving a job through its
/// full retry/backoff budget to dead-letter.
struct AlwaysTransientPublisher;

#[async_trait::async_trait]
impl publisher_client::Publisher for AlwaysTransientPublisher {
    async fn publish(
        &self,
        _text: &str,
        _media_ids: Option<&[String]>,
        _dry_run: bool,
    ) -> Result<publisher_client::PublishOutcome, publisher_client::PublisherError> {
        Err(publisher_client::PublisherError::Transient("simulated outage".into()))
    }

    async fn get_metrics(
        &self,
        _external_id: &str,
        _dry_run: bool,
    ) -> Result<publisher_client::ExternalMetrics, publisher_client::PublisherError> {
        Ok(publisher_client::ExternalMetrics::default())
    }
}

#[tokio::test]
async fn exhausted_retries_dead_letter_with_no_published_post() {
    let db = setup().await;
    let max_attempts = 3;

    let post = Post::builder().text("retry me").build();
    post.insert(&db.pool).await.unwrap();

    let schedule = Schedule::builder()
        .post_id(post.id)
        .kind(ScheduleKind::OneShot)
        .schedule_spec(Utc::now().to_rfc3339())
        .timezone("UTC")
        .build();
    schedule.insert(&db.pool).await.unwrap();

    let mut job = PublishJob::builder()
        .schedule_id(schedule.id)
        .planned_at(Utc::now())
        .dedupe_key(PublishJob::dedupe_key_for(schedule.id, Utc::now()))
        .build();
    job.status = JobStatus::Enqueued;
    job.enqueued_at = Some(Utc::now());
    job.insert(&db.pool).await.unwrap();

    let queue = PostgresJobQueue::new(db.pool.clone(), max_attempts);
    let worker = server_core::kernel::jobs::WorkerRuntime::new(
        db.pool.clone(),
        dedupe(),
        queue,
        Arc::new(AlwaysTransientPublisher),
        true,
        6000,
    );

    for _ in 0..max_attempts {
        assert!(worker.tick().await.unwrap());
        // mark_failed sets retry_at in the future; force it claimable now.
        sqlx::query("UPDATE publish_jobs SET retry_at = NOW() WHERE id = $1")
            .bind(job.id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    let final_job = PublishJob::find_by_id(job.id, &db.pool).await.unwrap().unwrap();
    assert_eq!(final_job.status, JobStatus::DeadLetter);
    assert_eq!(final_job.attempt, max_attempts);

    let published = PublishedPost::recent_texts(10, &db.pool).await.unwrap();
    assert!(published.is_empty());
}

/// Variant selection is deterministic across independent resolutions for
/// the same schedule and fire instant.
#[tokio::test]
async fn variant_selection_is_deterministic_for_identical_fire() {
    let db = setup().await;

    let template = PostTemplate::builder().name("daily-tip").build();
    template.insert(&db.pool).await.unwrap();

    for text in ["v1", "v2", "v3"] {
        PostVariant::builder()
            .template_id(template.id)
            .text(text)
            .weight(1)
            .build()
            .insert(&db.pool)
            .await
            .unwrap();
    }

    let schedule = Schedule::builder()
        .template_id(template.id)
        .kind(ScheduleKind::OneShot)
        .schedule_spec("2030-06-01T00:00:00Z")
        .timezone("UTC")
        .selection_policy(SelectionPolicy::RandomUniform)
        .build();
    schedule.insert(&db.pool).await.unwrap();

    let planned_at = "2030-06-01T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap();

    let a = server_core::domains::variants::select(&schedule, planned_at, &db.pool)
        .await
        .unwrap();
    let b = server_core::domains::variants::select(&schedule, planned_at, &db.pool)
        .await
        .unwrap();

    assert_eq!(a.seed, b.seed);
    assert_eq!(a.variant_id, b.variant_id);
}

/// The sweeper re-enqueues a job stuck `enqueued` past the stale window,
/// and the worker then completes it normally.
#[tokio::test]
async fn sweeper_reenqueues_orphaned_job_and_worker_completes_it() {
    let db = setup().await;

    let post = Post::builder().text("orphan").build();
    post.insert(&db.pool).await.unwrap();

    let schedule = Schedule::builder()
        .post_id(post.id)
        .kind(ScheduleKind::OneShot)
        .schedule_spec(Utc::now().to_rfc3339())
        .timezone("UTC")
        .build();
    schedule.insert(&db.pool).await.unwrap();

    let mut job = PublishJob::builder()
        .schedule_id(schedule.id)
        .planned_at(Utc::now())
        .dedupe_key(PublishJob::dedupe_key_for(schedule.id, Utc::now()))
        .build();
    job.status = JobStatus::Enqueued;
    job.insert(&db.pool).await.unwrap();

    // Backdate enqueued_at/updated_at past the sweeper's stale/cooldown windows.
    sqlx::query(
        "UPDATE publish_jobs SET enqueued_at = NOW() - INTERVAL '10 minutes', \
         updated_at = NOW() - INTERVAL '10 minutes' WHERE id = $1",
    )
    .bind(job.id)
    .execute(&db.pool)
    .await
    .unwrap();

    let dedupe_store = dedupe();
    let queue = PostgresJobQueue::new(db.pool.clone(), 5);
    let sweeper = RecoverySweeper::new(db.pool.clone(), dedupe_store.clone(), queue);
    let report = sweeper.run().await.unwrap();
    assert_eq!(report.orphans_reenqueued, 1);

    let reenqueued = PublishJob::find_by_id(job.id, &db.pool).await.unwrap().unwrap();
    assert!(reenqueued.enqueued_at.unwrap() > Utc::now() - chrono::Duration::minutes(1));

    let queue = PostgresJobQueue::new(db.pool.clone(), 5);
    let worker = server_core::kernel::jobs::WorkerRuntime::new(
        db.pool.clone(),
        dedupe_store,
        queue,
        Arc::new(publisher_client::DryRunPublisher::new()),
        true,
        60,
    );
    assert!(worker.tick().await.unwrap());

    let finished = PublishJob::find_by_id(job.id, &db.pool).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Succeeded);
}

/// Soft-deleting a post cancels every non-terminal job bound to it,
/// leaving terminal jobs and published posts untouched.
#[tokio::test]
async fn soft_delete_cancels_non_terminal_jobs_only() {
    let db = setup().await;

    let post = Post::builder().text("to be deleted").build();
    post.insert(&db.pool).await.unwrap();

    let schedule = Schedule::builder()
        .post_id(post.id)
        .kind(ScheduleKind::OneShot)
        .schedule_spec(Utc::now().to_rfc3339())
        .timezone("UTC")
        .build();
    schedule.insert(&db.pool).await.unwrap();

    let planned = PublishJob::builder()
        .schedule_id(schedule.id)
        .planned_at(Utc::now() + chrono::Duration::hours(1))
        .dedupe_key(PublishJob::dedupe_key_for(schedule.id, Utc::now() + chrono::Duration::hours(1)))
        .build();
    planned.insert(&db.pool).await.unwrap();

    let mut running = PublishJob::builder()
        .schedule_id(schedule.id)
        .planned_at(Utc::now() + chrono::Duration::hours(2))
        .dedupe_key(PublishJob::dedupe_key_for(schedule.id, Utc::now() + chrono::Duration::hours(2)))
        .build();
    running.status = JobStatus::Running;
    running.started_at = Some(Utc::now());
    running.insert(&db.pool).await.unwrap();

    let cancelled_count = Post::soft_delete(post.id, &db.pool).await.unwrap();
    assert_eq!(cancelled_count, 2);

    let planned_after = PublishJob::find_by_id(planned.id, &db.pool).await.unwrap().unwrap();
    let running_after = PublishJob::find_by_id(running.id, &db.pool).await.unwrap().unwrap();
    assert_eq!(planned_after.status, JobStatus::Cancelled);
    assert_eq!(running_after.status, JobStatus::Cancelled);
    assert!(running_after.finished_at.is_some());

    let published = PublishedPost::recent_texts(10, &db.pool).await.unwrap();
    assert!(published.is_empty());
}

/// Confirms `PublishJob::insert`'s `ON CONFLICT (schedule_id, planned_at) DO
/// NOTHING` is the authoritative guard against double materialization.
#[tokio::test]
async fn duplicate_fire_is_not_double_materialized() {
    let db = setup().await;

    let post = Post::builder().text("once only").build();
    post.insert(&db.pool).await.unwrap();

    let schedule = Schedule::builder()
        .post_id(post.id)
        .kind(ScheduleKind::OneShot)
        .schedule_spec(Utc::now().to_rfc3339())
        .timezone("UTC")
        .build();
    schedule.insert(&db.pool).await.unwrap();

    let planned_at = Utc::now();
    let first = PublishJob::builder()
        .schedule_id(schedule.id)
        .planned_at(planned_at)
        .dedupe_key(PublishJob::dedupe_key_for(schedule.id, planned_at))
        .build();
    let inserted = first.insert(&db.pool).await.unwrap();
    assert!(inserted.is_some());

    let second = PublishJob::builder()
        .schedule_id(schedule.id)
        .planned_at(planned_at)
        .dedupe_key(format!("{}-retry", PublishJob::dedupe_key_for(schedule.id, planned_at)))
        .build();
    let conflict = second.insert(&db.pool).await.unwrap();
    assert!(conflict.is_none());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM publish_jobs WHERE schedule_id = $1")
        .bind(schedule.id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
