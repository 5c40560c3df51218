#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::appointment::AppointmentId;
use crate::common::validate_text;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const REMINDER_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const NOTIFIED_STATE_KEY_PREFIX: &str = "notification_sent_";
pub const NOTIFIED_STATE_VALUE: &str = "true";

/// Character limits for a platform notification.
pub const REMINDER_TITLE_MAX_CHARS: usize = 256;
pub const REMINDER_BODY_MAX_CHARS: usize = 4096;

/// Key-value key recording that `id` has already produced its reminder.
pub fn notified_state_key(id: &AppointmentId) -> String {
    format!("{NOTIFIED_STATE_KEY_PREFIX}{}", id.as_str())
}

/// Platform notification permission, mirroring the browser tri-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPermission {
    /// Not yet asked.
    Default,
    Granted,
    Denied,
}

/// Derived per-appointment reminder state. Only `Notified` is backed by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderPhase {
    Future,
    DueForReminder,
    Notified,
    Past,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderNotification {
    pub schema_version: SchemaVersion,
    pub title: String,
    pub body: String,
    /// Platform tag; one per appointment so a re-show would replace, not stack.
    pub tag: String,
}

impl ReminderNotification {
    pub fn v1(title: String, body: String, tag: &AppointmentId) -> Result<Self, ContractViolation> {
        let v = Self {
            schema_version: REMINDER_CONTRACT_VERSION,
            title,
            body,
            tag: tag.as_str().to_string(),
        };
        v.validate()?;
        Ok(v)
    }
}

impl Validate for ReminderNotification {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text(
            "reminder_notification.title",
            &self.title,
            REMINDER_TITLE_MAX_CHARS,
        )?;
        validate_text(
            "reminder_notification.body",
            &self.body,
            REMINDER_BODY_MAX_CHARS,
        )?;
        validate_text("reminder_notification.tag", &self.tag, 64)?;
        Ok(())
    }
}

/// Counters for one reminder check pass. Used for logging; the pass itself
/// never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReminderPassMetrics {
    pub examined: u32,
    pub emitted: u32,
    pub already_notified: u32,
    pub permission_denied: u32,
    pub dispatch_failed: u32,
    pub state_write_failed: u32,
    pub malformed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_rem_contract_01_key_layout() {
        let id = AppointmentId::new("a1b2").unwrap();
        assert_eq!(notified_state_key(&id), "notification_sent_a1b2");
    }

    #[test]
    fn at_rem_contract_02_notification_requires_title() {
        let id = AppointmentId::new("a1").unwrap();
        assert!(ReminderNotification::v1(" ".to_string(), "body".to_string(), &id).is_err());
        let n = ReminderNotification::v1("GP".to_string(), "body".to_string(), &id).unwrap();
        assert_eq!(n.tag, "a1");
    }
}
