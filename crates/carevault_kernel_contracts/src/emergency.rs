#![forbid(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::care::CareRecipientId;
use crate::SchemaVersion;

pub const EMERGENCY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContactLine {
    pub name: String,
    pub phone: Option<String>,
    pub relationship: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationLine {
    pub title: String,
    pub description: Option<String>,
}

/// Everything a first responder needs on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencySummary {
    pub schema_version: SchemaVersion,
    pub care_recipient_id: CareRecipientId,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub emergency_contact: Option<EmergencyContactLine>,
    pub allergies: Option<String>,
    pub medications: Vec<MedicationLine>,
    pub diagnosis: Option<String>,
    pub medical_conditions: Option<String>,
    pub generated_at: DateTime<Utc>,
}
