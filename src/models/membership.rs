use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{parse_uuid, GymRole};
use crate::errors::AppError;
use crate::events::{Loggable, Severity};

/// One role per (user, gym, sport); the unit every authorization check is
/// evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GymMember {
    pub user_id: Uuid,
    pub gym_id: Uuid,
    pub sport_id: Uuid,
    pub role: GymRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for GymMember {
    fn entity_type() -> &'static str {
        "member"
    }

    fn subject_id(&self) -> Uuid {
        self.user_id
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbGymMember {
    pub user_id: String,
    pub gym_id: String,
    pub sport_id: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbGymMember> for GymMember {
    type Error = AppError;

    fn try_from(value: DbGymMember) -> Result<Self, Self::Error> {
        Ok(GymMember {
            user_id: parse_uuid(&value.user_id)?,
            gym_id: parse_uuid(&value.gym_id)?,
            sport_id: parse_uuid(&value.sport_id)?,
            role: GymRole::from_str(&value.role)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Member listing entry joined with user and sport names.
#[derive(Debug, Serialize, ToSchema)]
pub struct GymMemberDetail {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub sport_id: Uuid,
    pub sport: String,
    pub role: GymRole,
}

#[derive(Debug, FromRow)]
pub struct DbGymMemberDetail {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub sport_id: String,
    pub sport: String,
    pub role: String,
}

impl TryFrom<DbGymMemberDetail> for GymMemberDetail {
    type Error = AppError;

    fn try_from(value: DbGymMemberDetail) -> Result<Self, Self::Error> {
        Ok(GymMemberDetail {
            user_id: parse_uuid(&value.user_id)?,
            name: value.name,
            email: value.email,
            sport_id: parse_uuid(&value.sport_id)?,
            sport: value.sport,
            role: GymRole::from_str(&value.role)?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberAddRequest {
    pub user_id: Uuid,
    pub sport_id: Uuid,
    pub role: GymRole,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberUpdateRequest {
    pub sport_id: Uuid,
    pub role: GymRole,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct MemberRemoveQuery {
    /// Restricts removal to one sport; omitted, every membership the user
    /// holds in the gym is removed.
    pub sport_id: Option<Uuid>,
}
