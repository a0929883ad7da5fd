use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AccessGrant, GymRole};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::class::{
    Attendance, AttendanceMarkRequest, Class, ClassCreateRequest, ClassFilter, ClassUpdateRequest,
    ClassVisibility, DbAttendance, DbClass,
};
use crate::routes::gyms::fetch_membership;
use crate::utils::utc_now;

const CLASS_COLUMNS: &str = "id, team_id, instructor_id, date, start_time, end_time, notes, \
     visibility, max_students, created_at, updated_at";

const CLASS_COLUMNS_ALIASED: &str = "c.id, c.team_id, c.instructor_id, c.date, c.start_time, \
     c.end_time, c.notes, c.visibility, c.max_students, c.created_at, c.updated_at";

#[utoipa::path(
    post,
    path = "/classes",
    tag = "Classes",
    request_body = ClassCreateRequest,
    responses(
        (status = 201, description = "Class scheduled", body = Class),
        (status = 404, description = "Team not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_class(
    State(state): State<AppState>,
    auth: AuthUser,
    _grant: AccessGrant,
    headers: HeaderMap,
    Json(payload): Json<ClassCreateRequest>,
) -> AppResult<(StatusCode, Json<Class>)> {
    let now = utc_now();
    let class_id = Uuid::new_v4();
    let visibility = payload.visibility.unwrap_or(ClassVisibility::Team);

    sqlx::query(
        "INSERT INTO classes (id, team_id, instructor_id, date, start_time, end_time, notes, visibility, max_students, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(class_id.to_string())
    .bind(payload.team_id.to_string())
    .bind(auth.user_id.to_string())
    .bind(payload.date.format("%Y-%m-%d").to_string())
    .bind(&payload.start_time)
    .bind(&payload.end_time)
    .bind(&payload.notes)
    .bind(visibility.as_str())
    .bind(payload.max_students)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let class: Class = fetch_class(&state.pool, class_id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(auth.user_id), &class, None, Some(context));

    Ok((StatusCode::CREATED, Json(class)))
}

#[utoipa::path(
    get,
    path = "/classes",
    tag = "Classes",
    params(ClassFilter),
    responses((status = 200, description = "Classes visible to the caller", body = [Class])),
    security(("bearerAuth" = []))
)]
pub async fn list_classes(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<ClassFilter>,
) -> AppResult<Json<Vec<Class>>> {
    let mut sql = format!(
        "SELECT DISTINCT {CLASS_COLUMNS_ALIASED} FROM classes c \
         JOIN teams t ON t.id = c.team_id \
         JOIN gym_members m ON m.gym_id = t.gym_id AND m.user_id = ? \
         WHERE (c.visibility IN ('GYM', 'TEAM') \
            OR c.instructor_id = ? \
            OR EXISTS (SELECT 1 FROM attendances a WHERE a.class_id = c.id AND a.student_id = ?))",
    );

    if filter.team_id.is_some() {
        sql.push_str(" AND c.team_id = ?");
    }
    if filter.instructor_id.is_some() {
        sql.push_str(" AND c.instructor_id = ?");
    }
    if filter.date_from.is_some() {
        sql.push_str(" AND c.date >= ?");
    }
    if filter.date_to.is_some() {
        sql.push_str(" AND c.date <= ?");
    }
    sql.push_str(" ORDER BY c.date DESC");

    let user_id = auth.user_id.to_string();
    let mut query = sqlx::query_as::<_, DbClass>(&sql)
        .bind(&user_id)
        .bind(&user_id)
        .bind(&user_id);
    if let Some(team_id) = filter.team_id {
        query = query.bind(team_id.to_string());
    }
    if let Some(instructor_id) = filter.instructor_id {
        query = query.bind(instructor_id.to_string());
    }
    if let Some(date_from) = filter.date_from {
        query = query.bind(date_from.format("%Y-%m-%d").to_string());
    }
    if let Some(date_to) = filter.date_to {
        query = query.bind(date_to.format("%Y-%m-%d").to_string());
    }

    let classes = query.fetch_all(&state.pool).await?;
    let classes: Vec<Class> = classes.into_iter().map(Class::try_from).collect::<Result<_, _>>()?;
    Ok(Json(classes))
}

#[utoipa::path(
    get,
    path = "/classes/team/{team_id}",
    tag = "Classes",
    params(("team_id" = Uuid, Path, description = "Team id")),
    responses((status = 200, description = "Classes of a team", body = [Class])),
    security(("bearerAuth" = []))
)]
pub async fn list_classes_by_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
    _grant: AccessGrant,
) -> AppResult<Json<Vec<Class>>> {
    let user_id = auth.user_id.to_string();
    let classes = sqlx::query_as::<_, DbClass>(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes c WHERE c.team_id = ? \
         AND (c.visibility IN ('GYM', 'TEAM') OR c.instructor_id = ? \
            OR EXISTS (SELECT 1 FROM attendances a WHERE a.class_id = c.id AND a.student_id = ?)) \
         ORDER BY c.date DESC"
    ))
    .bind(team_id.to_string())
    .bind(&user_id)
    .bind(&user_id)
    .fetch_all(&state.pool)
    .await?;

    let classes: Vec<Class> = classes.into_iter().map(Class::try_from).collect::<Result<_, _>>()?;
    Ok(Json(classes))
}

#[utoipa::path(
    get,
    path = "/classes/gym/{gym_id}",
    tag = "Classes",
    params(("gym_id" = Uuid, Path, description = "Gym id")),
    responses((status = 200, description = "Gym-visible classes", body = [Class])),
    security(("bearerAuth" = []))
)]
pub async fn list_classes_by_gym(
    State(state): State<AppState>,
    auth: AuthUser,
    grant: AccessGrant,
) -> AppResult<Json<Vec<Class>>> {
    let user_id = auth.user_id.to_string();
    let classes = sqlx::query_as::<_, DbClass>(&format!(
        "SELECT {CLASS_COLUMNS_ALIASED} FROM classes c JOIN teams t ON t.id = c.team_id \
         WHERE t.gym_id = ? \
         AND (c.visibility = 'GYM' OR c.instructor_id = ? \
            OR EXISTS (SELECT 1 FROM attendances a WHERE a.class_id = c.id AND a.student_id = ?)) \
         ORDER BY c.date DESC"
    ))
    .bind(grant.scope.gym_id.to_string())
    .bind(&user_id)
    .bind(&user_id)
    .fetch_all(&state.pool)
    .await?;

    let classes: Vec<Class> = classes.into_iter().map(Class::try_from).collect::<Result<_, _>>()?;
    Ok(Json(classes))
}

#[utoipa::path(
    get,
    path = "/classes/{id}",
    tag = "Classes",
    params(("id" = Uuid, Path, description = "Class id")),
    responses(
        (status = 200, description = "Class detail", body = Class),
        (status = 403, description = "Private class")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_class(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    _grant: AccessGrant,
) -> AppResult<Json<Class>> {
    let class: Class = fetch_class(&state.pool, id).await?.try_into()?;

    // The guard already proved gym membership; PRIVATE classes stay limited
    // to the instructor and the enrolled students.
    if class.visibility == ClassVisibility::Private
        && class.instructor_id != auth.user_id
        && !is_participant(&state.pool, id, auth.user_id).await?
    {
        return Err(AppError::forbidden("this class is private"));
    }

    Ok(Json(class))
}

#[utoipa::path(
    put,
    path = "/classes/{id}",
    tag = "Classes",
    params(("id" = Uuid, Path, description = "Class id")),
    request_body = ClassUpdateRequest,
    responses((status = 200, description = "Class updated", body = Class)),
    security(("bearerAuth" = []))
)]
pub async fn update_class(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    grant: AccessGrant,
    headers: HeaderMap,
    Json(payload): Json<ClassUpdateRequest>,
) -> AppResult<Json<Class>> {
    let before: Class = fetch_class(&state.pool, id).await?.try_into()?;
    ensure_instructor_or_manager(&before, &grant, auth.user_id)?;

    let class = Class {
        date: payload.date.unwrap_or(before.date),
        start_time: payload.start_time.unwrap_or_else(|| before.start_time.clone()),
        end_time: payload.end_time.or_else(|| before.end_time.clone()),
        notes: payload.notes.or_else(|| before.notes.clone()),
        visibility: payload.visibility.unwrap_or(before.visibility),
        max_students: payload.max_students.or(before.max_students),
        updated_at: utc_now(),
        ..before.clone()
    };

    sqlx::query(
        "UPDATE classes SET date = ?, start_time = ?, end_time = ?, notes = ?, visibility = ?, max_students = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(class.date.format("%Y-%m-%d").to_string())
    .bind(&class.start_time)
    .bind(&class.end_time)
    .bind(&class.notes)
    .bind(class.visibility.as_str())
    .bind(class.max_students)
    .bind(class.updated_at)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &class, Some(&before), Some(context));

    Ok(Json(class))
}

#[utoipa::path(
    delete,
    path = "/classes/{id}",
    tag = "Classes",
    params(("id" = Uuid, Path, description = "Class id")),
    responses((status = 204, description = "Class cancelled")),
    security(("bearerAuth" = []))
)]
pub async fn delete_class(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    _grant: AccessGrant,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let class: Class = fetch_class(&state.pool, id).await?.try_into()?;

    sqlx::query("DELETE FROM attendances WHERE class_id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;
    sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &class, None, Some(context));

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/classes/{id}/attendance",
    tag = "Classes",
    params(("id" = Uuid, Path, description = "Class id")),
    responses((status = 200, description = "Attendance list", body = [Attendance])),
    security(("bearerAuth" = []))
)]
pub async fn list_attendance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _grant: AccessGrant,
) -> AppResult<Json<Vec<Attendance>>> {
    let entries = sqlx::query_as::<_, DbAttendance>(
        "SELECT id, class_id, student_id, present, marked_at FROM attendances WHERE class_id = ? ORDER BY marked_at",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let entries: Vec<Attendance> =
        entries.into_iter().map(Attendance::try_from).collect::<Result<_, _>>()?;
    Ok(Json(entries))
}

#[utoipa::path(
    post,
    path = "/classes/{id}/attendance",
    tag = "Classes",
    params(("id" = Uuid, Path, description = "Class id")),
    request_body = AttendanceMarkRequest,
    responses(
        (status = 200, description = "Attendance marked", body = Attendance),
        (status = 400, description = "Student is not a member of the class scope"),
        (status = 409, description = "Class is full")
    ),
    security(("bearerAuth" = []))
)]
pub async fn mark_attendance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    grant: AccessGrant,
    Json(payload): Json<AttendanceMarkRequest>,
) -> AppResult<Json<Attendance>> {
    let class: Class = fetch_class(&state.pool, id).await?.try_into()?;
    let present = payload.present.unwrap_or(true);

    // The student must belong to the class's (gym, sport) scope.
    let sport_id = grant
        .scope
        .sport_id
        .ok_or_else(|| AppError::internal("class scope missing sport"))?;
    if fetch_membership(&state.pool, payload.student_id, grant.scope.gym_id, sport_id)
        .await?
        .is_none()
    {
        return Err(AppError::bad_request("student is not a member of this gym and sport"));
    }

    let already_marked = is_participant(&state.pool, id, payload.student_id).await?;
    if present && !already_marked {
        if let Some(max_students) = class.max_students {
            let marked: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM attendances WHERE class_id = ? AND present = 1",
            )
            .bind(id.to_string())
            .fetch_one(&state.pool)
            .await?;

            if marked >= max_students {
                return Err(AppError::conflict("class is full"));
            }
        }
    }

    let now = utc_now();
    sqlx::query(
        "INSERT INTO attendances (id, class_id, student_id, present, marked_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (class_id, student_id) DO UPDATE SET present = excluded.present, marked_at = excluded.marked_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(id.to_string())
    .bind(payload.student_id.to_string())
    .bind(present as i64)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let attendance = sqlx::query_as::<_, DbAttendance>(
        "SELECT id, class_id, student_id, present, marked_at FROM attendances WHERE class_id = ? AND student_id = ?",
    )
    .bind(id.to_string())
    .bind(payload.student_id.to_string())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(attendance.try_into()?))
}

/// Below MANAGER rank, only the class's own instructor may mutate it.
fn ensure_instructor_or_manager(class: &Class, grant: &AccessGrant, user_id: Uuid) -> AppResult<()> {
    if class.instructor_id == user_id || grant.role.rank() >= GymRole::Manager.rank() {
        return Ok(());
    }

    Err(AppError::forbidden("only the instructor or a manager can modify this class"))
}

async fn is_participant(pool: &SqlitePool, class_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM attendances WHERE class_id = ? AND student_id = ?")
            .bind(class_id.to_string())
            .bind(user_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(count > 0)
}

async fn fetch_class(pool: &SqlitePool, class_id: Uuid) -> AppResult<DbClass> {
    sqlx::query_as::<_, DbClass>(&format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?"))
        .bind(class_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("class not found"))
}
