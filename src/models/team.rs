use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::parse_uuid;
use crate::errors::AppError;
use crate::events::Loggable;

/// Training group inside a gym. The owning (gym_id, sport_id) is stored on
/// the team row itself so authorization scope resolution is a single read.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub gym_id: Uuid,
    pub sport_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Team {
    fn entity_type() -> &'static str {
        "team"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTeam {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub gym_id: String,
    pub sport_id: String,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbTeam> for Team {
    type Error = AppError;

    fn try_from(value: DbTeam) -> Result<Self, Self::Error> {
        Ok(Team {
            id: parse_uuid(&value.id)?,
            name: value.name,
            description: value.description,
            gym_id: parse_uuid(&value.gym_id)?,
            sport_id: parse_uuid(&value.sport_id)?,
            open_time: value.open_time,
            close_time: value.close_time,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamCreateRequest {
    #[schema(example = "Competition squad")]
    pub name: String,
    pub description: Option<String>,
    pub gym_id: Uuid,
    pub sport_id: Uuid,
    #[schema(example = "06:00")]
    pub open_time: Option<String>,
    #[schema(example = "22:00")]
    pub close_time: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TeamFilter {
    pub gym_id: Option<Uuid>,
    pub sport_id: Option<Uuid>,
    /// Case-insensitive substring match on the team name.
    pub name: Option<String>,
}
