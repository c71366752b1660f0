mod helpers;

use axum::http::StatusCode;
use sqlx::PgPool;
use uuid::Uuid;

async fn setup_tenant(app: &axum::Router) -> (String, Uuid) {
    let (_, alice) = helpers::signup(app, "alice@example.com", "Pw!12345").await;
    let tenant_id = helpers::create_tenant(app, &alice, "Acme", "acme").await;
    (alice, tenant_id)
}

#[sqlx::test(migrations = "./migrations")]
async fn invite_existing_user_and_accept(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state.clone());

    let (alice, tenant_id) = setup_tenant(&app).await;
    let (bob_id, bob) = helpers::signup(&app, "bob@example.com", "Pw!12345").await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let (status, body) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["invitation"]["status"], "pending");
    assert_eq!(body["data"]["email_exists"], true);
    let invitation_id: Uuid = body["data"]["invitation"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // A send task was enqueued atomically with the invitation.
    let queued: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE task_type = 'invitation.send' AND status = 'pending'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(queued, 1);
    // SMTP is unconfigured in tests, so delivery is a logged no-op.
    helpers::drain_jobs(&state).await;
    let succeeded: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE task_type = 'invitation.send' AND status = 'succeeded'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(succeeded, 1);

    let token = helpers::invitation_token(&pool, invitation_id).await;
    let (status, body) = helpers::post_json(
        &app,
        &bob,
        &format!("/api/v1/invitations/{token}/accept"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "accept failed: {body}");
    assert_eq!(body["data"]["user_id"].as_str().unwrap(), bob_id.to_string());
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["role_id"].as_str().unwrap(), writer.to_string());

    let (_, body) = helpers::get_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations?status=accepted"),
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn second_pending_invitation_conflicts(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let invite = serde_json::json!({ "email": "bob@example.com", "role_id": writer });
    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        invite.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        invite,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Same address, different casing: still one pending invitation.
    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "Bob@Example.COM", "role_id": writer }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "./migrations")]
async fn accept_requires_matching_email(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let (_, body) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    let invitation_id: Uuid = body["data"]["invitation"]["id"].as_str().unwrap().parse().unwrap();
    let token = helpers::invitation_token(&pool, invitation_id).await;

    let (_, mallory) = helpers::signup(&app, "mallory@example.com", "Pw!12345").await;
    let (status, _) = helpers::post_json(
        &app,
        &mallory,
        &format!("/api/v1/invitations/{token}/accept"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn accept_is_single_use(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let (_, bob) = helpers::signup(&app, "bob@example.com", "Pw!12345").await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let (_, body) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    let invitation_id: Uuid = body["data"]["invitation"]["id"].as_str().unwrap().parse().unwrap();
    let token = helpers::invitation_token(&pool, invitation_id).await;

    let accept_path = format!("/api/v1/invitations/{token}/accept");
    let (status, _) = helpers::post_json(&app, &bob, &accept_path, serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = helpers::post_json(&app, &bob, &accept_path, serde_json::json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn accepting_does_not_downgrade_an_existing_role(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let (bob_id, bob) = helpers::signup(&app, "bob@example.com", "Pw!12345").await;
    let admin = helpers::role_id(&pool, "Admin").await;
    let viewer = helpers::role_id(&pool, "Viewer").await;

    // Bob is already an Admin member.
    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/members"),
        serde_json::json!({ "user_id": bob_id, "role_id": admin }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // A stale Viewer invitation is accepted afterwards.
    let (_, body) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": viewer }),
    )
    .await;
    let invitation_id: Uuid = body["data"]["invitation"]["id"].as_str().unwrap().parse().unwrap();
    let token = helpers::invitation_token(&pool, invitation_id).await;

    let (status, body) = helpers::post_json(
        &app,
        &bob,
        &format!("/api/v1/invitations/{token}/accept"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Membership kept the higher-privileged role; the invitation is consumed.
    assert_eq!(body["data"]["role_id"].as_str().unwrap(), admin.to_string());

    let status_row: String =
        sqlx::query_scalar("SELECT status FROM invitations WHERE id = $1")
            .bind(invitation_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status_row, "accepted");
}

#[sqlx::test(migrations = "./migrations")]
async fn expired_invitation_is_marked_and_rejected(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let (_, bob) = helpers::signup(&app, "bob@example.com", "Pw!12345").await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let (_, body) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    let invitation_id: Uuid = body["data"]["invitation"]["id"].as_str().unwrap().parse().unwrap();

    // Push the deadline into the past instead of sleeping out a TTL.
    sqlx::query("UPDATE invitations SET expires_at = now() - interval '1 minute' WHERE id = $1")
        .bind(invitation_id)
        .execute(&pool)
        .await
        .unwrap();

    let token = helpers::invitation_token(&pool, invitation_id).await;
    let (status, body) = helpers::post_json(
        &app,
        &bob,
        &format!("/api/v1/invitations/{token}/accept"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("expired"));

    let status_row: String = sqlx::query_scalar("SELECT status FROM invitations WHERE id = $1")
        .bind(invitation_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status_row, "expired");
}

#[sqlx::test(migrations = "./migrations")]
async fn cancel_and_resend_rules(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let writer = helpers::role_id(&pool, "Writer").await;

    let (_, body) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    let invitation_id: Uuid = body["data"]["invitation"]["id"].as_str().unwrap().parse().unwrap();

    // Resending a pending invitation enqueues another send.
    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations/{invitation_id}/resend"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        helpers::delete_json(&app, &alice, &format!("/api/v1/invitations/{invitation_id}")).await;
    assert_eq!(status, StatusCode::OK);

    // Cancelled invitations can be neither cancelled again nor resent.
    let (status, _) =
        helpers::delete_json(&app, &alice, &format!("/api/v1/invitations/{invitation_id}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations/{invitation_id}/resend"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A fresh invitation for the same address is allowed again.
    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "bob@example.com", "role_id": writer }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[sqlx::test(migrations = "./migrations")]
async fn invitation_listing_requires_permission(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (alice, tenant_id) = setup_tenant(&app).await;
    let (bob_id, bob) = helpers::signup(&app, "bob@example.com", "Pw!12345").await;
    let viewer = helpers::role_id(&pool, "Viewer").await;

    let (status, _) = helpers::post_json(
        &app,
        &alice,
        &format!("/api/v1/tenants/{tenant_id}/members"),
        serde_json::json!({ "user_id": bob_id, "role_id": viewer }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Viewer may read invitations but not create them.
    let (status, _) =
        helpers::get_json(&app, &bob, &format!("/api/v1/tenants/{tenant_id}/invitations")).await;
    assert_eq!(status, StatusCode::OK);

    let writer = helpers::role_id(&pool, "Writer").await;
    let (status, _) = helpers::post_json(
        &app,
        &bob,
        &format!("/api/v1/tenants/{tenant_id}/invitations"),
        serde_json::json!({ "email": "eve@example.com", "role_id": writer }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
