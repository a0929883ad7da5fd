use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::parse_uuid;
use crate::errors::AppError;
use crate::events::Loggable;

/// Who can see a class besides its instructor and its participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassVisibility {
    Private,
    Team,
    Gym,
}

impl ClassVisibility {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassVisibility::Private => "PRIVATE",
            ClassVisibility::Team => "TEAM",
            ClassVisibility::Gym => "GYM",
        }
    }
}

impl fmt::Display for ClassVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassVisibility {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PRIVATE" => Ok(ClassVisibility::Private),
            "TEAM" => Ok(ClassVisibility::Team),
            "GYM" => Ok(ClassVisibility::Gym),
            other => Err(AppError::internal(format!("unknown class visibility: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Class {
    pub id: Uuid,
    pub team_id: Uuid,
    pub instructor_id: Uuid,
    pub date: NaiveDate,
    #[schema(example = "19:00")]
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub visibility: ClassVisibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_students: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Class {
    fn entity_type() -> &'static str {
        "class"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbClass {
    pub id: String,
    pub team_id: String,
    pub instructor_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub notes: Option<String>,
    pub visibility: String,
    pub max_students: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbClass> for Class {
    type Error = AppError;

    fn try_from(value: DbClass) -> Result<Self, Self::Error> {
        let date = NaiveDate::parse_from_str(&value.date, "%Y-%m-%d")
            .map_err(|_| AppError::internal(format!("malformed class date: {}", value.date)))?;

        Ok(Class {
            id: parse_uuid(&value.id)?,
            team_id: parse_uuid(&value.team_id)?,
            instructor_id: parse_uuid(&value.instructor_id)?,
            date,
            start_time: value.start_time,
            end_time: value.end_time,
            notes: value.notes,
            visibility: ClassVisibility::from_str(&value.visibility)?,
            max_students: value.max_students,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClassCreateRequest {
    pub team_id: Uuid,
    pub date: NaiveDate,
    #[schema(example = "19:00")]
    pub start_time: String,
    pub end_time: Option<String>,
    pub notes: Option<String>,
    /// Defaults to TEAM.
    pub visibility: Option<ClassVisibility>,
    pub max_students: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClassUpdateRequest {
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub notes: Option<String>,
    pub visibility: Option<ClassVisibility>,
    pub max_students: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ClassFilter {
    pub team_id: Option<Uuid>,
    pub instructor_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Attendance {
    pub id: Uuid,
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub present: bool,
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAttendance {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub present: i64,
    pub marked_at: DateTime<Utc>,
}

impl TryFrom<DbAttendance> for Attendance {
    type Error = AppError;

    fn try_from(value: DbAttendance) -> Result<Self, Self::Error> {
        Ok(Attendance {
            id: parse_uuid(&value.id)?,
            class_id: parse_uuid(&value.class_id)?,
            student_id: parse_uuid(&value.student_id)?,
            present: value.present != 0,
            marked_at: value.marked_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttendanceMarkRequest {
    pub student_id: Uuid,
    /// Defaults to present.
    pub present: Option<bool>,
}
