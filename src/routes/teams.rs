use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::AccessGrant;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::team::{DbTeam, Team, TeamCreateRequest, TeamFilter, TeamUpdateRequest};
use crate::utils::utc_now;

const TEAM_COLUMNS: &str =
    "id, name, description, gym_id, sport_id, open_time, close_time, created_at, updated_at";

const TEAM_COLUMNS_ALIASED: &str = "t.id, t.name, t.description, t.gym_id, t.sport_id, \
     t.open_time, t.close_time, t.created_at, t.updated_at";

#[utoipa::path(
    post,
    path = "/teams",
    tag = "Teams",
    request_body = TeamCreateRequest,
    responses(
        (status = 201, description = "Team created", body = Team),
        (status = 404, description = "Sport not found"),
        (status = 409, description = "Team name already used in this gym and sport")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_team(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
    headers: HeaderMap,
    Json(payload): Json<TeamCreateRequest>,
) -> AppResult<(StatusCode, Json<Team>)> {
    let gym_id = grant.scope.gym_id;

    let sport_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM sports WHERE id = ?")
        .bind(payload.sport_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if sport_exists == 0 {
        return Err(AppError::not_found("sport not found"));
    }

    ensure_name_free(&state.pool, gym_id, payload.sport_id, &payload.name, None).await?;

    let now = utc_now();
    let team_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO teams (id, name, description, gym_id, sport_id, open_time, close_time, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(team_id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(gym_id.to_string())
    .bind(payload.sport_id.to_string())
    .bind(&payload.open_time)
    .bind(&payload.close_time)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let team: Team = fetch_team(&state.pool, team_id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(auth.user_id), &team, None, Some(context));

    Ok((StatusCode::CREATED, Json(team)))
}

#[utoipa::path(
    get,
    path = "/teams",
    tag = "Teams",
    params(TeamFilter),
    responses((status = 200, description = "Teams in the caller's scopes", body = [Team])),
    security(("bearerAuth" = []))
)]
pub async fn list_teams(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<TeamFilter>,
) -> AppResult<Json<Vec<Team>>> {
    // Only teams in a (gym, sport) scope the caller belongs to.
    let mut sql = format!(
        "SELECT DISTINCT {TEAM_COLUMNS_ALIASED} FROM teams t \
         JOIN gym_members m ON m.gym_id = t.gym_id AND m.sport_id = t.sport_id \
         WHERE m.user_id = ?",
    );

    if filter.gym_id.is_some() {
        sql.push_str(" AND t.gym_id = ?");
    }
    if filter.sport_id.is_some() {
        sql.push_str(" AND t.sport_id = ?");
    }
    if filter.name.is_some() {
        sql.push_str(" AND LOWER(t.name) LIKE ?");
    }
    sql.push_str(" ORDER BY t.name");

    let mut query = sqlx::query_as::<_, DbTeam>(&sql).bind(auth.user_id.to_string());
    if let Some(gym_id) = filter.gym_id {
        query = query.bind(gym_id.to_string());
    }
    if let Some(sport_id) = filter.sport_id {
        query = query.bind(sport_id.to_string());
    }
    if let Some(name) = &filter.name {
        query = query.bind(format!("%{}%", name.to_lowercase()));
    }

    let teams = query.fetch_all(&state.pool).await?;
    let teams: Vec<Team> = teams.into_iter().map(Team::try_from).collect::<Result<_, _>>()?;
    Ok(Json(teams))
}

#[utoipa::path(
    get,
    path = "/teams/gym/{gym_id}",
    tag = "Teams",
    params(("gym_id" = Uuid, Path, description = "Gym id")),
    responses((status = 200, description = "Teams in a gym", body = [Team])),
    security(("bearerAuth" = []))
)]
pub async fn list_teams_by_gym(
    State(state): State<AppState>,
    grant: AccessGrant,
) -> AppResult<Json<Vec<Team>>> {
    let teams = sqlx::query_as::<_, DbTeam>(&format!(
        "SELECT {TEAM_COLUMNS} FROM teams WHERE gym_id = ? ORDER BY name"
    ))
    .bind(grant.scope.gym_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let teams: Vec<Team> = teams.into_iter().map(Team::try_from).collect::<Result<_, _>>()?;
    Ok(Json(teams))
}

#[utoipa::path(
    get,
    path = "/teams/{id}",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    responses((status = 200, description = "Team detail", body = Team)),
    security(("bearerAuth" = []))
)]
pub async fn get_team(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _grant: AccessGrant,
) -> AppResult<Json<Team>> {
    let team: Team = fetch_team(&state.pool, id).await?.try_into()?;
    Ok(Json(team))
}

#[utoipa::path(
    put,
    path = "/teams/{id}",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    request_body = TeamUpdateRequest,
    responses(
        (status = 200, description = "Team updated", body = Team),
        (status = 409, description = "Team name already used in this gym and sport")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    _grant: AccessGrant,
    headers: HeaderMap,
    Json(payload): Json<TeamUpdateRequest>,
) -> AppResult<Json<Team>> {
    let before: Team = fetch_team(&state.pool, id).await?.try_into()?;

    if let Some(name) = &payload.name {
        if *name != before.name {
            ensure_name_free(&state.pool, before.gym_id, before.sport_id, name, Some(id)).await?;
        }
    }

    let team = Team {
        name: payload.name.unwrap_or_else(|| before.name.clone()),
        description: payload.description.or_else(|| before.description.clone()),
        open_time: payload.open_time.or_else(|| before.open_time.clone()),
        close_time: payload.close_time.or_else(|| before.close_time.clone()),
        updated_at: utc_now(),
        ..before.clone()
    };

    sqlx::query(
        "UPDATE teams SET name = ?, description = ?, open_time = ?, close_time = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&team.name)
    .bind(&team.description)
    .bind(&team.open_time)
    .bind(&team.close_time)
    .bind(team.updated_at)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &team, Some(&before), Some(context));

    Ok(Json(team))
}

#[utoipa::path(
    delete,
    path = "/teams/{id}",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    responses(
        (status = 204, description = "Team deleted"),
        (status = 400, description = "Team still has classes")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    _grant: AccessGrant,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let team: Team = fetch_team(&state.pool, id).await?.try_into()?;

    let classes: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM classes WHERE team_id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if classes > 0 {
        return Err(AppError::bad_request("cannot delete a team that still has classes"));
    }

    sqlx::query("DELETE FROM teams WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &team, None, Some(context));

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_team(pool: &SqlitePool, team_id: Uuid) -> AppResult<DbTeam> {
    sqlx::query_as::<_, DbTeam>(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?"))
        .bind(team_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("team not found"))
}

async fn ensure_name_free(
    pool: &SqlitePool,
    gym_id: Uuid,
    sport_id: Uuid,
    name: &str,
    exclude: Option<Uuid>,
) -> AppResult<()> {
    let mut sql =
        String::from("SELECT COUNT(1) FROM teams WHERE gym_id = ? AND sport_id = ? AND name = ?");
    if exclude.is_some() {
        sql.push_str(" AND id != ?");
    }

    let mut query = sqlx::query_scalar::<_, i64>(&sql)
        .bind(gym_id.to_string())
        .bind(sport_id.to_string())
        .bind(name);
    if let Some(id) = exclude {
        query = query.bind(id.to_string());
    }

    if query.fetch_one(pool).await? > 0 {
        return Err(AppError::conflict("a team with this name already exists in this gym and sport"));
    }

    Ok(())
}
