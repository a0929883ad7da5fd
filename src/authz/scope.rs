use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

use super::catalog::GymRole;

/// The canonical (gym, sport) pair every protected resource reduces to.
/// `sport_id` is absent for gym-wide, sport-independent checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Scope {
    pub gym_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport_id: Option<Uuid>,
}

impl Scope {
    pub fn gym_wide(gym_id: Uuid) -> Self {
        Self { gym_id, sport_id: None }
    }

    pub fn of_sport(gym_id: Uuid, sport_id: Uuid) -> Self {
        Self { gym_id, sport_id: Some(sport_id) }
    }
}

/// An unresolved scope reference as it appears in a request: either a gym id
/// directly, or a team/class id that still has to be mapped to its owning
/// (gym, sport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRef {
    Gym(Uuid),
    Team(Uuid),
    Class(Uuid),
}

/// Read capabilities the decision engine needs from the persistence layer.
/// Each call is a single read; teams carry their (gym, sport) denormalized
/// and class resolution joins through the owning team in one statement.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn team_scope(&self, team_id: Uuid) -> Result<Option<Scope>, AppError>;

    async fn class_scope(&self, class_id: Uuid) -> Result<Option<Scope>, AppError>;

    /// The caller's role in the given scope. With `sport_id` set, the exact
    /// (user, gym, sport) membership wins; when it is missing, or for
    /// gym-wide checks, the caller's highest-ranked membership in the gym is
    /// used, which keeps repeated evaluations deterministic.
    async fn find_role(
        &self,
        user_id: Uuid,
        gym_id: Uuid,
        sport_id: Option<Uuid>,
    ) -> Result<Option<GymRole>, AppError>;
}

pub struct SqlAuthzStore {
    pool: SqlitePool,
}

impl SqlAuthzStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// Highest rank first; ties cannot occur because (user, gym, sport) is unique
// per role and ranks discriminate the rest.
const HIGHEST_ROLE_IN_GYM: &str = "SELECT role FROM gym_members WHERE user_id = ? AND gym_id = ? \
     ORDER BY CASE role WHEN 'ADMIN' THEN 4 WHEN 'MANAGER' THEN 3 WHEN 'PROFESSOR' THEN 2 ELSE 1 END DESC \
     LIMIT 1";

#[async_trait]
impl AuthzStore for SqlAuthzStore {
    async fn team_scope(&self, team_id: Uuid) -> Result<Option<Scope>, AppError> {
        let row = sqlx::query("SELECT gym_id, sport_id FROM teams WHERE id = ?")
            .bind(team_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| scope_from_row(&row)).transpose()
    }

    async fn class_scope(&self, class_id: Uuid) -> Result<Option<Scope>, AppError> {
        let row = sqlx::query(
            "SELECT t.gym_id, t.sport_id FROM classes c JOIN teams t ON t.id = c.team_id WHERE c.id = ?",
        )
        .bind(class_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| scope_from_row(&row)).transpose()
    }

    async fn find_role(
        &self,
        user_id: Uuid,
        gym_id: Uuid,
        sport_id: Option<Uuid>,
    ) -> Result<Option<GymRole>, AppError> {
        if let Some(sport_id) = sport_id {
            let exact = sqlx::query_scalar::<_, String>(
                "SELECT role FROM gym_members WHERE user_id = ? AND gym_id = ? AND sport_id = ?",
            )
            .bind(user_id.to_string())
            .bind(gym_id.to_string())
            .bind(sport_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(role) = exact {
                return Ok(Some(GymRole::from_str(&role)?));
            }
        }

        let fallback = sqlx::query_scalar::<_, String>(HIGHEST_ROLE_IN_GYM)
            .bind(user_id.to_string())
            .bind(gym_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        fallback.map(|role| GymRole::from_str(&role)).transpose()
    }
}

fn scope_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Scope, AppError> {
    let gym_id: String = row.get("gym_id");
    let sport_id: String = row.get("sport_id");

    Ok(Scope::of_sport(parse_uuid(&gym_id)?, parse_uuid(&sport_id)?))
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|_| AppError::internal(format!("malformed uuid in database: {value}")))
}
