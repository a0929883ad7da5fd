use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retention class for activity-log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Long-term retention, never auto-trimmed. All membership and role
    /// mutations land here.
    Critical,
    #[default]
    Important,
    /// Aggressively trimmed.
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities that show up in the activity log. The entity type becomes the
/// event-name prefix ("gym.created", "member.role_changed", ...).
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "role_changed" | "removed" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
