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

async fn setup() -> Result<(Router, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test_auth.db");

    let opts = SqliteConnectOptions::new().filename(db_path.as_path()).create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool).await?;

    Ok((app, dir))
}

async fn post_json(app: &Router, uri: &str, body: Value) -> Result<Response> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;
    Ok(app.clone().oneshot(req).await?)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn auth_edge_cases() -> Result<()> {
    let (app, _dir) = setup().await?;

    // 1. Register with short password
    let resp = post_json(
        &app,
        "/auth/register",
        json!({"name": "Short Pass", "email": "short@example.com", "password": "short"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "short password should be rejected");

    // 2. Register with valid user
    let resp = post_json(
        &app,
        "/auth/register",
        json!({"name": "Valid User", "email": "valid@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // 3. Duplicate email
    let resp = post_json(
        &app,
        "/auth/register",
        json!({"name": "Valid User", "email": "valid@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // 4. Login with wrong password
    let resp = post_json(
        &app,
        "/auth/login",
        json!({"email": "valid@example.com", "password": "wrongpassword"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 5. Login with non-existent email
    let resp = post_json(
        &app,
        "/auth/login",
        json!({"email": "nobody@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 6. Access protected route without token
    let req = Request::builder().method("GET").uri("/gyms").body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn refresh_tokens_rotate_and_revoke() -> Result<()> {
    let (app, _dir) = setup().await?;

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"name": "Rotator", "email": "rotator@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json_body(resp).await?;
    let first_refresh = body["refresh_token"].as_str().unwrap().to_string();

    // Refresh yields a fresh pair
    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": first_refresh})).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await?;
    let second_refresh = body["refresh_token"].as_str().unwrap().to_string();
    let access = body["access_token"].as_str().unwrap().to_string();
    assert_ne!(first_refresh, second_refresh);

    // The rotated-out token is dead
    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": first_refresh})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "rotated token must be rejected");

    // Logout revokes the current one too
    let req = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {access}"))
        .body(Body::from(json!({"refresh_token": second_refresh}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": second_refresh})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "revoked token must be rejected");

    // An access token is not a refresh token
    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": access})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}
