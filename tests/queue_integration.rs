mod helpers;

use axum::http::StatusCode;
use sqlx::PgPool;

/// Force a pending job due again, simulating elapsed backoff.
async fn make_due(pool: &PgPool) {
    sqlx::query("UPDATE jobs SET run_at = now() - interval '1 second' WHERE status = 'pending'")
        .execute(pool)
        .await
        .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn failing_task_backs_off_then_dead_letters(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;

    // A task type nobody handles fails every attempt.
    sqlx::query("INSERT INTO jobs (task_type, max_attempts) VALUES ('no.such.task', 3)")
        .execute(&pool)
        .await
        .unwrap();

    helpers::drain_jobs(&state).await;
    let (status, attempts, run_at_future): (String, i32, bool) = sqlx::query_as(
        "SELECT status, attempts, run_at > now() FROM jobs WHERE task_type = 'no.such.task'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "pending", "first failure should reschedule");
    assert_eq!(attempts, 1);
    assert!(run_at_future, "retry must be delayed by backoff");

    // Attempts 2 and 3 (the budget) both fail; the task dead-letters.
    for _ in 0..2 {
        make_due(&pool).await;
        helpers::drain_jobs(&state).await;
    }
    let (status, attempts, last_error): (String, i32, Option<String>) = sqlx::query_as(
        "SELECT status, attempts, last_error FROM jobs WHERE task_type = 'no.such.task'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "dead");
    assert_eq!(attempts, 3);
    assert!(last_error.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn delayed_tasks_are_not_claimed_early(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;

    atrium::queue::enqueue(
        &pool,
        "no.such.task",
        serde_json::json!({}),
        atrium::queue::EnqueueOpts {
            delay: Some(std::time::Duration::from_secs(3600)),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    helpers::drain_jobs(&state).await;
    let (status, attempts): (String, i32) =
        sqlx::query_as("SELECT status, attempts FROM jobs WHERE task_type = 'no.such.task'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "pending");
    assert_eq!(attempts, 0, "a delayed task must not be touched before run_at");
}

#[sqlx::test(migrations = "./migrations")]
async fn platform_operators_can_inspect_dead_letters(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state.clone());

    let (carol_id, carol) = helpers::signup(&app, "carol@example.com", "Pw!12345").await;
    helpers::grant_platform_admin(&pool, carol_id).await;

    sqlx::query("INSERT INTO jobs (task_type, max_attempts) VALUES ('no.such.task', 1)")
        .execute(&pool)
        .await
        .unwrap();
    helpers::drain_jobs(&state).await;

    let (status, body) = helpers::get_json(&app, &carol, "/api/v1/platform/jobs?status=dead").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["task_type"], "no.such.task");

    // Not an operator surface for regular users.
    let (_, alice) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let (status, _) = helpers::get_json(&app, &alice, "/api/v1/platform/jobs").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
