use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::parse_uuid;
use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Gym {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Gym {
    fn entity_type() -> &'static str {
        "gym"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbGym {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbGym> for Gym {
    type Error = AppError;

    fn try_from(value: DbGym) -> Result<Self, Self::Error> {
        Ok(Gym {
            id: parse_uuid(&value.id)?,
            name: value.name,
            description: value.description,
            owner_id: parse_uuid(&value.owner_id)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GymCreateRequest {
    #[schema(example = "Alliance HQ")]
    pub name: String,
    pub description: Option<String>,
    /// Sport the creator is enrolled into as ADMIN.
    pub sport_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GymUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Sport {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSport {
    pub id: String,
    pub name: String,
}

impl TryFrom<DbSport> for Sport {
    type Error = AppError;

    fn try_from(value: DbSport) -> Result<Self, Self::Error> {
        Ok(Sport {
            id: parse_uuid(&value.id)?,
            name: value.name,
        })
    }
}
