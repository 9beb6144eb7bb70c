use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an inference job in the async pipeline.
///
/// Transitions are strictly forward: `Pending -> Processing ->
/// Completed | Failed`. A terminal status never changes again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is a legal forward transition from this status.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed) | (Pending, Failed)
        )
    }
}

/// A submitted image-analysis request, tracked end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceJob {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub submitted_by: String,
    pub primary_image_key: String,
    pub mask_image_key: Option<String>,
    pub status: JobStatus,
    pub queue_message_id: Option<Uuid>,
    /// Serialized aggregate result; non-null iff status is `Completed`.
    pub result: Option<serde_json::Value>,
    /// Pipeline-setup failure description; populated on `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use JobStatus::*;

        assert!(Pending.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Completed));
        assert!(Processing.can_advance_to(Failed));

        // No backward moves
        assert!(!Processing.can_advance_to(Pending));
        assert!(!Completed.can_advance_to(Processing));
        assert!(!Failed.can_advance_to(Pending));

        // Terminal states never advance
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
    }

    #[test]
    fn status_wire_format_is_uppercase() {
        assert_eq!(JobStatus::Pending.to_string(), "PENDING");
        assert_eq!("PROCESSING".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }
}
