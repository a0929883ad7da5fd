//! Activity logging: mutations publish domain events onto a broadcast bus;
//! a background listener projects them into `activity_log` and appends them
//! to the hash-chained `event_store`. Logging is fire-and-forget and never
//! affects request outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: Value,
}

pub type EventBus = broadcast::Sender<DomainEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<DomainEvent>) {
    broadcast::channel(1024)
}

/// Request context captured alongside an event (IP, User-Agent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(',').next().unwrap_or(value).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|value| value.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity.
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state, for update/delete actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub severity: Severity,
}

/// Publishes one activity event for an entity mutation.
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let severity = entity.severity_for_action(action);
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|entity| serde_json::to_value(entity).unwrap_or_default()),
        context,
        severity,
    };

    let event = DomainEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject_id: Some(entity.subject_id()),
        payload: serde_json::to_value(&payload).unwrap_or_default(),
    };

    // Fire and forget; a lagging or closed bus must not break the API.
    let _ = event_bus.send(event);
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<DomainEvent>, pool: SqlitePool) {
    tracing::info!("activity listener started");

    while let Ok(event) = rx.recv().await {
        let severity = event
            .payload
            .get("severity")
            .and_then(|value| value.as_str())
            .unwrap_or(Severity::Important.as_str())
            .to_string();

        if let Err(err) = project_activity(&pool, &event, &severity).await {
            tracing::error!(error = %err, "failed to save activity log");
        }

        if let Err(err) = append_to_event_store(&pool, &event, &severity).await {
            tracing::error!(error = %err, "failed to append to event store");
        }
    }
}

async fn project_activity(pool: &SqlitePool, event: &DomainEvent, severity: &str) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&event.name)
    .bind(describe(&event.name))
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(event.subject_id.map(|id| id.to_string()))
    .bind(event.occurred_at)
    .bind(serde_json::to_string(event).unwrap_or_default())
    .bind(severity)
    .execute(pool)
    .await?;

    Ok(())
}

/// Appends sha256(prev_hash || payload) so any retroactive edit of the store
/// breaks the chain.
async fn append_to_event_store(pool: &SqlitePool, event: &DomainEvent, severity: &str) -> sqlx::Result<()> {
    let payload = serde_json::to_string(event).unwrap_or_default();

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM event_store ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    let mut hasher = Sha256::new();
    if let Some(ref prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    let hash = hex::encode(hasher.finalize());

    sqlx::query(
        "INSERT INTO event_store (id, event_name, occurred_at, actor_id, subject_id, payload, severity, prev_hash, hash, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&event.name)
    .bind(event.occurred_at)
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(event.subject_id.map(|id| id.to_string()))
    .bind(&payload)
    .bind(severity)
    .bind(&prev_hash)
    .bind(&hash)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

fn describe(event_name: &str) -> &'static str {
    match event_name {
        "gym.created" => "Gym created",
        "gym.updated" => "Gym updated",
        "gym.deleted" => "Gym deleted",
        "member.created" => "Member enrolled",
        "member.role_changed" => "Member role changed",
        "member.removed" => "Member removed",
        "team.created" => "Team created",
        "team.updated" => "Team updated",
        "team.deleted" => "Team deleted",
        "class.created" => "Class scheduled",
        "class.updated" => "Class updated",
        "class.deleted" => "Class cancelled",
        "user.registered" => "New user registered",
        _ => "System event",
    }
}
