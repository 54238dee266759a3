use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Permission and role changes: never auto-delete
    Critical,
    #[default]
    Important,
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

/// Entities that can be written to the audit trail.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names like "user_overrides.replaced"
    fn entity_type() -> &'static str;

    /// The user the change is about, when there is one
    fn subject_id(&self) -> Option<Uuid>;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "cleared" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
