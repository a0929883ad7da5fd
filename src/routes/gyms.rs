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
use crate::models::gym::{DbGym, DbSport, Gym, GymCreateRequest, GymUpdateRequest, Sport};
use crate::models::membership::{
    DbGymMember, DbGymMemberDetail, GymMember, GymMemberDetail, MemberAddRequest, MemberRemoveQuery,
    MemberUpdateRequest,
};
use crate::routes::auth::fetch_user_by_id;
use crate::utils::utc_now;

#[utoipa::path(
    post,
    path = "/gyms",
    tag = "Gyms",
    request_body = GymCreateRequest,
    responses(
        (status = 201, description = "Gym created; creator enrolled as ADMIN", body = Gym),
        (status = 404, description = "Sport not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_gym(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<GymCreateRequest>,
) -> AppResult<(StatusCode, Json<Gym>)> {
    ensure_sport_exists(&state.pool, payload.sport_id).await?;

    let now = utc_now();
    let gym_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO gyms (id, name, description, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(gym_id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(auth.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    // Bootstrap: without a first ADMIN nobody could ever pass
    // gym:manage_users for this gym.
    sqlx::query(
        "INSERT INTO gym_members (user_id, gym_id, sport_id, role, created_at, updated_at) VALUES (?, ?, ?, 'ADMIN', ?, ?)",
    )
    .bind(auth.user_id.to_string())
    .bind(gym_id.to_string())
    .bind(payload.sport_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let gym: Gym = fetch_gym(&state.pool, gym_id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(auth.user_id), &gym, None, Some(context));

    Ok((StatusCode::CREATED, Json(gym)))
}

#[utoipa::path(
    get,
    path = "/gyms",
    tag = "Gyms",
    responses((status = 200, description = "Gyms the caller belongs to", body = [Gym])),
    security(("bearerAuth" = []))
)]
pub async fn list_gyms(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Gym>>> {
    let gyms = sqlx::query_as::<_, DbGym>(
        "SELECT DISTINCT g.id, g.name, g.description, g.owner_id, g.created_at, g.updated_at, g.deleted_at \
         FROM gyms g JOIN gym_members m ON m.gym_id = g.id \
         WHERE m.user_id = ? AND g.deleted_at IS NULL ORDER BY g.name",
    )
    .bind(auth.user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let gyms: Vec<Gym> = gyms.into_iter().map(Gym::try_from).collect::<Result<_, _>>()?;
    Ok(Json(gyms))
}

#[utoipa::path(
    get,
    path = "/gyms/{id}",
    tag = "Gyms",
    params(("id" = Uuid, Path, description = "Gym id")),
    responses((status = 200, description = "Gym detail", body = Gym)),
    security(("bearerAuth" = []))
)]
pub async fn get_gym(State(state): State<AppState>, grant: AccessGrant) -> AppResult<Json<Gym>> {
    let gym: Gym = fetch_gym(&state.pool, grant.scope.gym_id).await?.try_into()?;
    Ok(Json(gym))
}

#[utoipa::path(
    put,
    path = "/gyms/{id}",
    tag = "Gyms",
    params(("id" = Uuid, Path, description = "Gym id")),
    request_body = GymUpdateRequest,
    responses((status = 200, description = "Gym updated", body = Gym)),
    security(("bearerAuth" = []))
)]
pub async fn update_gym(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
    headers: HeaderMap,
    Json(payload): Json<GymUpdateRequest>,
) -> AppResult<Json<Gym>> {
    let before: Gym = fetch_gym(&state.pool, grant.scope.gym_id).await?.try_into()?;

    let name = payload.name.unwrap_or_else(|| before.name.clone());
    let description = payload.description.or_else(|| before.description.clone());
    let now = utc_now();

    sqlx::query("UPDATE gyms SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(before.id.to_string())
        .execute(&state.pool)
        .await?;

    let gym = Gym {
        name,
        description,
        updated_at: now,
        ..before.clone()
    };

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &gym, Some(&before), Some(context));

    Ok(Json(gym))
}

#[utoipa::path(
    delete,
    path = "/gyms/{id}",
    tag = "Gyms",
    params(("id" = Uuid, Path, description = "Gym id")),
    responses((status = 204, description = "Gym soft deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_gym(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let gym: Gym = fetch_gym(&state.pool, grant.scope.gym_id).await?.try_into()?;

    let now = utc_now();
    sqlx::query("UPDATE gyms SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(gym.id.to_string())
        .execute(&state.pool)
        .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &gym, None, Some(context));

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/gyms/{id}/members",
    tag = "Gyms",
    params(("id" = Uuid, Path, description = "Gym id")),
    responses((status = 200, description = "Gym members", body = [GymMemberDetail])),
    security(("bearerAuth" = []))
)]
pub async fn list_members(
    State(state): State<AppState>,
    grant: AccessGrant,
) -> AppResult<Json<Vec<GymMemberDetail>>> {
    let members = sqlx::query_as::<_, DbGymMemberDetail>(
        "SELECT m.user_id, u.name, u.email, m.sport_id, s.name AS sport, m.role \
         FROM gym_members m \
         JOIN users u ON u.id = m.user_id \
         JOIN sports s ON s.id = m.sport_id \
         WHERE m.gym_id = ? ORDER BY u.name, s.name",
    )
    .bind(grant.scope.gym_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let members: Vec<GymMemberDetail> =
        members.into_iter().map(GymMemberDetail::try_from).collect::<Result<_, _>>()?;
    Ok(Json(members))
}

#[utoipa::path(
    post,
    path = "/gyms/{id}/members",
    tag = "Gyms",
    params(("id" = Uuid, Path, description = "Gym id")),
    request_body = MemberAddRequest,
    responses(
        (status = 201, description = "Member enrolled", body = GymMember),
        (status = 403, description = "Role above the caller's rank"),
        (status = 409, description = "Membership already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
    headers: HeaderMap,
    Json(payload): Json<MemberAddRequest>,
) -> AppResult<(StatusCode, Json<GymMember>)> {
    ensure_assignable(&state, &grant, payload.role)?;
    fetch_user_by_id(&state.pool, payload.user_id).await?;
    ensure_sport_exists(&state.pool, payload.sport_id).await?;

    let gym_id = grant.scope.gym_id;
    if fetch_membership(&state.pool, payload.user_id, gym_id, payload.sport_id)
        .await?
        .is_some()
    {
        return Err(AppError::conflict("user already has a role for this sport in this gym"));
    }

    let now = utc_now();
    sqlx::query(
        "INSERT INTO gym_members (user_id, gym_id, sport_id, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(payload.user_id.to_string())
    .bind(gym_id.to_string())
    .bind(payload.sport_id.to_string())
    .bind(payload.role.as_str())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let member = GymMember {
        user_id: payload.user_id,
        gym_id,
        sport_id: payload.sport_id,
        role: payload.role,
        created_at: now,
        updated_at: now,
    };

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(auth.user_id), &member, None, Some(context));

    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    put,
    path = "/gyms/{id}/members/{user_id}",
    tag = "Gyms",
    params(
        ("id" = Uuid, Path, description = "Gym id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    request_body = MemberUpdateRequest,
    responses(
        (status = 200, description = "Role changed", body = GymMember),
        (status = 404, description = "Membership not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_member(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
    Path((_gym_id, member_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(payload): Json<MemberUpdateRequest>,
) -> AppResult<Json<GymMember>> {
    let gym_id = grant.scope.gym_id;

    let before: GymMember = fetch_membership(&state.pool, member_id, gym_id, payload.sport_id)
        .await?
        .ok_or_else(|| AppError::not_found("membership not found"))?
        .try_into()?;

    // Both the member's current role and the new one must sit at or below
    // the caller's rank.
    ensure_assignable(&state, &grant, before.role)?;
    ensure_assignable(&state, &grant, payload.role)?;

    let now = utc_now();
    sqlx::query(
        "UPDATE gym_members SET role = ?, updated_at = ? WHERE user_id = ? AND gym_id = ? AND sport_id = ?",
    )
    .bind(payload.role.as_str())
    .bind(now)
    .bind(member_id.to_string())
    .bind(gym_id.to_string())
    .bind(payload.sport_id.to_string())
    .execute(&state.pool)
    .await?;

    let member = GymMember {
        role: payload.role,
        updated_at: now,
        ..before.clone()
    };

    let context = RequestContext::from_headers(&headers);
    log_activity(
        &state.event_bus,
        "role_changed",
        Some(auth.user_id),
        &member,
        Some(&before),
        Some(context),
    );

    Ok(Json(member))
}

#[utoipa::path(
    delete,
    path = "/gyms/{id}/members/{user_id}",
    tag = "Gyms",
    params(
        ("id" = Uuid, Path, description = "Gym id"),
        ("user_id" = Uuid, Path, description = "Member user id"),
        MemberRemoveQuery
    ),
    responses(
        (status = 204, description = "Membership removed"),
        (status = 404, description = "Membership not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
    Path((_gym_id, member_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<MemberRemoveQuery>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let gym_id = grant.scope.gym_id;

    let mut sql = String::from("SELECT user_id, gym_id, sport_id, role, created_at, updated_at \
         FROM gym_members WHERE user_id = ? AND gym_id = ?");
    if query.sport_id.is_some() {
        sql.push_str(" AND sport_id = ?");
    }

    let mut select = sqlx::query_as::<_, DbGymMember>(&sql)
        .bind(member_id.to_string())
        .bind(gym_id.to_string());
    if let Some(sport_id) = query.sport_id {
        select = select.bind(sport_id.to_string());
    }

    let existing = select.fetch_all(&state.pool).await?;
    if existing.is_empty() {
        return Err(AppError::not_found("membership not found"));
    }

    let memberships: Vec<GymMember> =
        existing.into_iter().map(GymMember::try_from).collect::<Result<_, _>>()?;
    for membership in &memberships {
        ensure_assignable(&state, &grant, membership.role)?;
    }

    let mut sql = String::from("DELETE FROM gym_members WHERE user_id = ? AND gym_id = ?");
    if query.sport_id.is_some() {
        sql.push_str(" AND sport_id = ?");
    }

    let mut delete = sqlx::query(&sql).bind(member_id.to_string()).bind(gym_id.to_string());
    if let Some(sport_id) = query.sport_id {
        delete = delete.bind(sport_id.to_string());
    }
    delete.execute(&state.pool).await?;

    let context = RequestContext::from_headers(&headers);
    for membership in &memberships {
        log_activity(
            &state.event_bus,
            "removed",
            Some(auth.user_id),
            membership,
            None,
            Some(context.clone()),
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/sports",
    tag = "Sports",
    responses((status = 200, description = "Available sports", body = [Sport])),
    security(("bearerAuth" = []))
)]
pub async fn list_sports(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Sport>>> {
    let sports = sqlx::query_as::<_, DbSport>("SELECT id, name FROM sports ORDER BY name")
        .fetch_all(&state.pool)
        .await?;

    let sports: Vec<Sport> = sports.into_iter().map(Sport::try_from).collect::<Result<_, _>>()?;
    Ok(Json(sports))
}

fn ensure_assignable(
    state: &AppState,
    grant: &AccessGrant,
    role: crate::authz::GymRole,
) -> AppResult<()> {
    if !state.authorizer.catalog().has_higher_or_equal_rank(grant.role, role) {
        return Err(AppError::forbidden(format!(
            "cannot manage role {role} from role {}",
            grant.role
        )));
    }
    Ok(())
}

async fn fetch_gym(pool: &SqlitePool, gym_id: Uuid) -> AppResult<DbGym> {
    sqlx::query_as::<_, DbGym>(
        "SELECT id, name, description, owner_id, created_at, updated_at, deleted_at \
         FROM gyms WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(gym_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("gym not found"))
}

pub(crate) async fn fetch_membership(
    pool: &SqlitePool,
    user_id: Uuid,
    gym_id: Uuid,
    sport_id: Uuid,
) -> AppResult<Option<DbGymMember>> {
    let membership = sqlx::query_as::<_, DbGymMember>(
        "SELECT user_id, gym_id, sport_id, role, created_at, updated_at \
         FROM gym_members WHERE user_id = ? AND gym_id = ? AND sport_id = ?",
    )
    .bind(user_id.to_string())
    .bind(gym_id.to_string())
    .bind(sport_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(membership)
}

async fn ensure_sport_exists(pool: &SqlitePool, sport_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM sports WHERE id = ?")
        .bind(sport_id.to_string())
        .fetch_one(pool)
        .await?;

    if count == 0 {
        return Err(AppError::not_found("sport not found"));
    }

    Ok(())
}
