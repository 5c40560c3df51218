#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::care::CareRecipientId;
use crate::common::{string_id, validate_opt_text, validate_text};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const APPOINTMENT_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const DEFAULT_REMIND_BEFORE_MINUTES: u32 = 30;
/// One week. Longer lead times are rejected at the contract boundary.
pub const MAX_REMIND_BEFORE_MINUTES: u32 = 10_080;

string_id!(AppointmentId, "appointment_id", 64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
}

/// Captured on the appointment form. Recurrence is never expanded: every
/// occurrence that should get its own reminder is a separate appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatInterval {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

fn default_remind_before_minutes() -> u32 {
    DEFAULT_REMIND_BEFORE_MINUTES
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default = "default_remind_before_minutes")]
    pub remind_before_minutes: u32,
    #[serde(default)]
    pub repeat_interval: RepeatInterval,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Validate for AppointmentDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("appointment.title", &self.title, 256)?;
        validate_opt_text("appointment.description", &self.description, 4096)?;
        validate_opt_text("appointment.location", &self.location, 512)?;
        validate_opt_text("appointment.doctor_name", &self.doctor_name, 256)?;
        validate_opt_text("appointment.notes", &self.notes, 8192)?;
        validate_remind_before(self.remind_before_minutes)
    }
}

fn validate_remind_before(minutes: u32) -> Result<(), ContractViolation> {
    if minutes > MAX_REMIND_BEFORE_MINUTES {
        return Err(ContractViolation::InvalidRange {
            field: "appointment.remind_before_minutes",
            min: 0,
            max: i64::from(MAX_REMIND_BEFORE_MINUTES),
            got: i64::from(minutes),
        });
    }
    Ok(())
}

/// Appointment row as loaded from the backend. `scheduled_at` is optional
/// because stored rows are not guaranteed to carry a parseable time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub schema_version: SchemaVersion,
    pub id: AppointmentId,
    pub care_recipient_id: CareRecipientId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub doctor_name: Option<String>,
    pub remind_before_minutes: u32,
    pub status: AppointmentStatus,
    pub repeat_interval: RepeatInterval,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn from_draft(
        id: AppointmentId,
        care_recipient_id: CareRecipientId,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        draft.validate()?;
        let v = Self {
            schema_version: APPOINTMENT_CONTRACT_VERSION,
            id,
            care_recipient_id,
            title: draft.title,
            description: draft.description,
            scheduled_at: Some(draft.scheduled_at),
            location: draft.location,
            doctor_name: draft.doctor_name,
            remind_before_minutes: draft.remind_before_minutes,
            status: AppointmentStatus::Scheduled,
            repeat_interval: draft.repeat_interval,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };
        v.validate()?;
        Ok(v)
    }

    pub fn is_completed(&self) -> bool {
        self.status == AppointmentStatus::Completed
    }

    /// Completed and cancelled appointments never produce reminders.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        )
    }
}

impl Validate for Appointment {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.care_recipient_id.validate()?;
        validate_text("appointment.title", &self.title, 256)?;
        validate_opt_text("appointment.description", &self.description, 4096)?;
        validate_opt_text("appointment.location", &self.location, 512)?;
        validate_opt_text("appointment.doctor_name", &self.doctor_name, 256)?;
        validate_opt_text("appointment.notes", &self.notes, 8192)?;
        validate_remind_before(self.remind_before_minutes)
    }
}

/// Immutable view of one care recipient's appointments, handed to the reminder
/// poller on every (re)load. Cloning shares the underlying rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentSnapshot {
    pub care_recipient_id: CareRecipientId,
    pub appointments: Arc<[Appointment]>,
    pub loaded_at: DateTime<Utc>,
}

impl AppointmentSnapshot {
    pub fn new(
        care_recipient_id: CareRecipientId,
        appointments: Vec<Appointment>,
        loaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            care_recipient_id,
            appointments: appointments.into(),
            loaded_at,
        }
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter()
    }
}
