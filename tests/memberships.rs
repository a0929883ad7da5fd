use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;

use tatame::create_app;

struct TestUser {
    id: String,
    token: String,
}

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test_members.db");

    let opts = SqliteConnectOptions::new().filename(db_path.as_path()).create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Response> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    Ok(app.clone().oneshot(request).await?)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn register(app: &Router, name: &str, email: &str) -> Result<TestUser> {
    let resp = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": name, "email": email, "password": "password123"})),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body = json_body(resp).await?;
    Ok(TestUser {
        id: body["user"]["id"].as_str().unwrap().to_string(),
        token: body["access_token"].as_str().unwrap().to_string(),
    })
}

async fn first_sport(app: &Router, token: &str) -> Result<String> {
    let resp = send(app, "GET", "/sports", Some(token), None).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await?;
    Ok(body[0]["id"].as_str().unwrap().to_string())
}

async fn add_member(
    app: &Router,
    token: &str,
    gym_id: &str,
    user_id: &str,
    sport_id: &str,
    role: &str,
) -> Result<Response> {
    send(
        app,
        "POST",
        &format!("/gyms/{gym_id}/members"),
        Some(token),
        Some(json!({"user_id": user_id, "sport_id": sport_id, "role": role})),
    )
    .await
}

#[tokio::test]
async fn membership_validation() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let admin = register(&app, "Admin", "admin@example.com").await?;
    let student = register(&app, "Student", "student@example.com").await?;

    let sport = first_sport(&app, &admin.token).await?;
    let resp = send(
        &app,
        "POST",
        "/gyms",
        Some(&admin.token),
        Some(json!({"name": "Members Gym", "sport_id": sport})),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let gym = json_body(resp).await?["id"].as_str().unwrap().to_string();

    let resp = add_member(&app, &admin.token, &gym, &student.id, &sport, "STUDENT").await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // One role per (user, gym, sport)
    let resp = add_member(&app, &admin.token, &gym, &student.id, &sport, "PROFESSOR").await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Unknown references
    let resp = add_member(
        &app,
        &admin.token,
        &gym,
        "3f9f3b8a-2f64-4a01-9c35-93d6e1c00001",
        &sport,
        "STUDENT",
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = add_member(
        &app,
        &admin.token,
        &gym,
        &student.id,
        "3f9f3b8a-2f64-4a01-9c35-93d6e1c00002",
        "STUDENT",
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn role_assignment_cannot_exceed_own_rank() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let admin = register(&app, "Admin", "admin@example.com").await?;
    let manager = register(&app, "Manager", "manager@example.com").await?;
    let recruit = register(&app, "Recruit", "recruit@example.com").await?;

    let sport = first_sport(&app, &admin.token).await?;
    let resp = send(
        &app,
        "POST",
        "/gyms",
        Some(&admin.token),
        Some(json!({"name": "Ceiling Gym", "sport_id": sport})),
    )
    .await?;
    let gym = json_body(resp).await?["id"].as_str().unwrap().to_string();

    let resp = add_member(&app, &admin.token, &gym, &manager.id, &sport, "MANAGER").await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // A manager may enroll at or below their own rank
    let resp = add_member(&app, &manager.token, &gym, &recruit.id, &sport, "STUDENT").await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // ...but never above it
    let escalate = register(&app, "Escalate", "escalate@example.com").await?;
    let resp = add_member(&app, &manager.token, &gym, &escalate.id, &sport, "ADMIN").await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Nor touch someone who outranks them
    let resp = send(
        &app,
        "PUT",
        &format!("/gyms/{gym}/members/{}", admin.id),
        Some(&manager.token),
        Some(json!({"sport_id": sport, "role": "STUDENT"})),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn role_changes_take_effect_and_removal_revokes_access() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let admin = register(&app, "Admin", "admin@example.com").await?;
    let member = register(&app, "Member", "member@example.com").await?;

    let sport = first_sport(&app, &admin.token).await?;
    let resp = send(
        &app,
        "POST",
        "/gyms",
        Some(&admin.token),
        Some(json!({"name": "Lifecycle Gym", "sport_id": sport})),
    )
    .await?;
    let gym = json_body(resp).await?["id"].as_str().unwrap().to_string();

    let resp = send(
        &app,
        "POST",
        "/teams",
        Some(&admin.token),
        Some(json!({"name": "Morning", "gym_id": gym, "sport_id": sport})),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let team = json_body(resp).await?["id"].as_str().unwrap().to_string();

    let resp = add_member(&app, &admin.token, &gym, &member.id, &sport, "STUDENT").await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let class_payload = json!({"team_id": team, "date": "2026-09-03", "start_time": "06:30"});

    let resp = send(&app, "POST", "/classes", Some(&member.token), Some(class_payload.clone())).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN, "students cannot create classes");

    // Promotion unlocks class:create
    let resp = send(
        &app,
        "PUT",
        &format!("/gyms/{gym}/members/{}", member.id),
        Some(&admin.token),
        Some(json!({"sport_id": sport, "role": "PROFESSOR"})),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&app, "POST", "/classes", Some(&member.token), Some(class_payload)).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Removal revokes everything
    let resp = send(
        &app,
        "DELETE",
        &format!("/gyms/{gym}/members/{}", member.id),
        Some(&admin.token),
        None,
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = send(&app, "GET", &format!("/gyms/{gym}"), Some(&member.token), None).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Membership mutations end up in the audit projection
    let mut logged = 0i64;
    for _ in 0..20 {
        logged = sqlx::query_scalar(
            "SELECT COUNT(1) FROM activity_log WHERE event_name IN ('member.created', 'member.role_changed', 'member.removed')",
        )
        .fetch_one(&pool)
        .await?;
        if logged >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(logged >= 3, "expected membership events in activity_log, saw {logged}");

    Ok(())
}
