mod helpers;

use axum::http::StatusCode;
use sqlx::PgPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[sqlx::test(migrations = "./migrations")]
async fn self_serve_onboarding(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state.clone());

    let (alice_id, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;

    let (status, body) = helpers::post_json(
        &app,
        &token,
        "/api/v1/tenants",
        serde_json::json!({ "name": "Acme", "slug": "acme" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    let tenant_id = body["data"]["id"].as_str().unwrap().to_owned();

    // Initialization runs asynchronously; drive it to completion inline.
    helpers::drain_jobs(&state).await;

    let (status, body) =
        helpers::get_json(&app, &token, &format!("/api/v1/tenants/{tenant_id}/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");

    let (status, body) =
        helpers::get_json(&app, &token, &format!("/api/v1/tenants/{tenant_id}/members")).await;
    assert_eq!(status, StatusCode::OK);
    let members = body["data"]["items"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["user_id"].as_str().unwrap(), alice_id.to_string());
    assert_eq!(members[0]["role_name"], "Admin");
    assert_eq!(members[0]["status"], "active");
}

#[sqlx::test(migrations = "./migrations")]
async fn slug_is_unique(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);

    let (_, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    helpers::create_tenant(&app, &token, "Acme", "acme").await;

    let (status, _) = helpers::post_json(
        &app,
        &token,
        "/api/v1/tenants",
        serde_json::json!({ "name": "Other", "slug": "acme" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "./migrations")]
async fn slug_shape_is_validated(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);

    let (_, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;

    for bad in ["ab", "Upper-Case", "trailing-", "-leading", "dou--ble"] {
        let (status, body) = helpers::post_json(
            &app,
            &token,
            "/api/v1/tenants",
            serde_json::json!({ "name": "Acme", "slug": bad }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "slug {bad:?} accepted: {body}");
        assert!(body["details"]["slug"].is_string());
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn initialization_calls_configured_services(pool: PgPool) {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock)
        .await;

    let mut config = helpers::test_config();
    config.tenant_init_services = vec![format!("{}/provision", mock.uri())];
    let state = helpers::test_state_with(pool, config).await;
    let app = helpers::test_router(state.clone());

    let (_, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &token, "Acme", "acme").await;

    helpers::drain_jobs(&state).await;

    let (_, body) =
        helpers::get_json(&app, &token, &format!("/api/v1/tenants/{tenant_id}/status")).await;
    assert_eq!(body["data"]["status"], "active");
}

#[sqlx::test(migrations = "./migrations")]
async fn failed_initialization_leaves_tenant_pending(pool: PgPool) {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let mut config = helpers::test_config();
    config.tenant_init_services = vec![format!("{}/provision", mock.uri())];
    let state = helpers::test_state_with(pool, config).await;
    let app = helpers::test_router(state.clone());

    let (_, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &token, "Acme", "acme").await;

    // The attempt fails and is rescheduled with backoff; no poison state.
    helpers::drain_jobs(&state).await;

    let (_, body) =
        helpers::get_json(&app, &token, &format!("/api/v1/tenants/{tenant_id}/status")).await;
    assert_eq!(body["data"]["status"], "pending");
}

#[sqlx::test(migrations = "./migrations")]
async fn initialization_is_idempotent(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state.clone());

    let (_, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &token, "Acme", "acme").await;

    helpers::drain_jobs(&state).await;

    // Simulate at-least-once re-delivery of the same task.
    sqlx::query("INSERT INTO jobs (task_type, payload) VALUES ('tenant.initialize', $1)")
        .bind(serde_json::json!({ "tenant_id": tenant_id }))
        .execute(&pool)
        .await
        .unwrap();
    helpers::drain_jobs(&state).await;

    let (_, body) =
        helpers::get_json(&app, &token, &format!("/api/v1/tenants/{tenant_id}/status")).await;
    assert_eq!(body["data"]["status"], "active");

    let member_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tenant_members WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(member_count, 1, "re-delivery must not duplicate members");
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_cascades_to_members_and_invitations(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state.clone());

    let (_, token) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &token, "Acme", "acme").await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let (status, _) = helpers::post_json(
        &app,
        &token,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = helpers::delete_json(&app, &token, &format!("/api/v1/tenants/{tenant_id}")).await;
    assert_eq!(status, StatusCode::OK);

    for table in ["tenant_members", "invitations"] {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE tenant_id = $1"))
                .bind(tenant_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 0, "orphan rows left in {table}");
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn non_member_is_forbidden(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);

    let (_, alice) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &alice, "Acme", "acme").await;

    let (_, mallory) = helpers::signup(&app, "mallory@example.com", "Pw!12345").await;
    let (status, _) = helpers::get_json(&app, &mallory, &format!("/api/v1/tenants/{tenant_id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn platform_admin_bypasses_membership(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (_, alice) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &alice, "Acme", "acme").await;

    let (carol_id, carol) = helpers::signup(&app, "carol@example.com", "Pw!12345").await;
    helpers::grant_platform_admin(&pool, carol_id).await;

    // Both the dedicated platform route and the regular tenant route work.
    let (status, _) =
        helpers::get_json(&app, &carol, &format!("/api/v1/platform/tenants/{tenant_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = helpers::get_json(&app, &carol, &format!("/api/v1/tenants/{tenant_id}")).await;
    assert_eq!(status, StatusCode::OK);

    // Revoking the admin closes both immediately.
    sqlx::query("DELETE FROM platform_admins WHERE user_id = $1")
        .bind(carol_id)
        .execute(&pool)
        .await
        .unwrap();
    let (status, _) =
        helpers::get_json(&app, &carol, &format!("/api/v1/platform/tenants/{tenant_id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = helpers::get_json(&app, &carol, &format!("/api/v1/tenants/{tenant_id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn suspension_is_platform_admin_only(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (_, alice) = helpers::signup(&app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(&app, &alice, "Acme", "acme").await;

    // The owning admin can rename but not suspend.
    let (status, _) = helpers::patch_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}"),
        serde_json::json!({ "name": "Acme Inc" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = helpers::patch_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}"),
        serde_json::json!({ "status": "suspended" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (carol_id, carol) = helpers::signup(&app, "carol@example.com", "Pw!12345").await;
    helpers::grant_platform_admin(&pool, carol_id).await;
    let (status, body) = helpers::patch_json(
        &app,
        &carol,
        &format!("/api/v1/tenants/{tenant_id}"),
        serde_json::json!({ "status": "suspended" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "suspended");
}
