#![forbid(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::access::UserId;
use crate::common::{string_id, validate_email, validate_opt_text, validate_text};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const CARE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

string_id!(CareRecipientId, "care_recipient_id", 64);
string_id!(MedicalRecordId, "medical_record_id", 64);
string_id!(DocumentId, "document_id", 64);
string_id!(EmergencyContactId, "emergency_contact_id", 64);

fn validate_opt_email(
    field: &'static str,
    value: &Option<String>,
) -> Result<(), ContractViolation> {
    match value {
        Some(v) => validate_email(field, v),
        None => Ok(()),
    }
}

/// Editable fields of a care recipient. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareRecipientDraft {
    pub patient_email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub medical_conditions: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub emergency_contact_name: Option<String>,
    #[serde(default)]
    pub emergency_contact_phone: Option<String>,
    #[serde(default)]
    pub emergency_contact_relationship: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Validate for CareRecipientDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_opt_email("care_recipient.patient_email", &self.patient_email)?;
        validate_text("care_recipient.first_name", &self.first_name, 128)?;
        validate_text("care_recipient.last_name", &self.last_name, 128)?;
        validate_opt_text("care_recipient.diagnosis", &self.diagnosis, 2048)?;
        validate_opt_text(
            "care_recipient.medical_conditions",
            &self.medical_conditions,
            4096,
        )?;
        validate_opt_text("care_recipient.allergies", &self.allergies, 2048)?;
        validate_opt_text(
            "care_recipient.emergency_contact_name",
            &self.emergency_contact_name,
            256,
        )?;
        validate_opt_text(
            "care_recipient.emergency_contact_phone",
            &self.emergency_contact_phone,
            64,
        )?;
        validate_opt_text(
            "care_recipient.emergency_contact_relationship",
            &self.emergency_contact_relationship,
            128,
        )?;
        validate_opt_text("care_recipient.notes", &self.notes, 8192)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareRecipient {
    pub schema_version: SchemaVersion,
    pub id: CareRecipientId,
    pub caregiver_id: UserId,
    #[serde(flatten)]
    pub details: CareRecipientDraft,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CareRecipient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.details.first_name, self.details.last_name)
    }
}

impl Validate for CareRecipient {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.caregiver_id.validate()?;
        self.details.validate()?;
        if self.updated_at < self.created_at {
            return Err(ContractViolation::InvalidValue {
                field: "care_recipient.updated_at",
                reason: "must not precede created_at",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalRecordType {
    Medication,
    Condition,
    Procedure,
    LabResult,
    VitalSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationFrequency {
    Daily,
    Weekly,
    Monthly,
    AsNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecordDraft {
    pub record_type: MedicalRecordType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub medication_name: Option<String>,
    #[serde(default)]
    pub medication_dosage: Option<String>,
    #[serde(default)]
    pub medication_frequency: Option<MedicationFrequency>,
}

impl MedicalRecordDraft {
    /// Medication entry as captured by the medication form: a name plus free-text details.
    pub fn medication(title: String, details: Option<String>, date: NaiveDate) -> Self {
        Self {
            record_type: MedicalRecordType::Medication,
            title,
            description: details,
            date,
            medication_name: None,
            medication_dosage: None,
            medication_frequency: None,
        }
    }

    /// Care log entry. Care logs are stored as `condition` records.
    pub fn care_log(title: String, details: Option<String>, date: NaiveDate) -> Self {
        Self {
            record_type: MedicalRecordType::Condition,
            title,
            description: details,
            date,
            medication_name: None,
            medication_dosage: None,
            medication_frequency: None,
        }
    }
}

impl Validate for MedicalRecordDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("medical_record.title", &self.title, 256)?;
        validate_opt_text("medical_record.description", &self.description, 8192)?;
        validate_opt_text("medical_record.medication_name", &self.medication_name, 256)?;
        validate_opt_text(
            "medical_record.medication_dosage",
            &self.medication_dosage,
            128,
        )?;
        if self.record_type != MedicalRecordType::Medication
            && (self.medication_name.is_some()
                || self.medication_dosage.is_some()
                || self.medication_frequency.is_some())
        {
            return Err(ContractViolation::InvalidValue {
                field: "medical_record.medication_name",
                reason: "medication fields require record_type=medication",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub schema_version: SchemaVersion,
    pub id: MedicalRecordId,
    pub care_recipient_id: CareRecipientId,
    #[serde(flatten)]
    pub details: MedicalRecordDraft,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MedicalRecord {
    pub fn is_medication(&self) -> bool {
        self.details.record_type == MedicalRecordType::Medication
    }

    pub fn is_care_log(&self) -> bool {
        self.details.record_type == MedicalRecordType::Condition
    }
}

impl Validate for MedicalRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.care_recipient_id.validate()?;
        self.details.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Medical,
    Insurance,
    Legal,
    Personal,
    Financial,
    Identification,
}

/// Metadata supplied with an upload; file fields are derived from the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub name: String,
    pub category: DocumentCategory,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for DocumentDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("document.name", &self.name, 256)?;
        validate_opt_text("document.description", &self.description, 2048)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub schema_version: SchemaVersion,
    pub id: DocumentId,
    pub care_recipient_id: CareRecipientId,
    #[serde(flatten)]
    pub details: DocumentDraft,
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub checksum_sha256: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Validate for DocumentRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.care_recipient_id.validate()?;
        self.details.validate()?;
        validate_text("document.file_url", &self.file_url, 1024)?;
        validate_text("document.file_name", &self.file_name, 256)?;
        if self.checksum_sha256.len() != 64
            || !self.checksum_sha256.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(ContractViolation::InvalidValue {
                field: "document.checksum_sha256",
                reason: "must be 64 hex chars",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContactDraft {
    pub name: String,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl Validate for EmergencyContactDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("emergency_contact.name", &self.name, 256)?;
        validate_opt_text("emergency_contact.relationship", &self.relationship, 128)?;
        validate_opt_text("emergency_contact.phone", &self.phone, 64)?;
        validate_opt_email("emergency_contact.email", &self.email)?;
        if self.phone.is_none() && self.email.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "emergency_contact.phone",
                reason: "phone or email must be present",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub schema_version: SchemaVersion,
    pub id: EmergencyContactId,
    pub care_recipient_id: CareRecipientId,
    #[serde(flatten)]
    pub details: EmergencyContactDraft,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Validate for EmergencyContact {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.care_recipient_id.validate()?;
        self.details.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dob() -> NaiveDate {
        NaiveDate::from_ymd_opt(1941, 3, 9).unwrap()
    }

    fn draft() -> CareRecipientDraft {
        CareRecipientDraft {
            patient_email: Some("mum@example.org".to_string()),
            first_name: "Iris".to_string(),
            last_name: "Hale".to_string(),
            date_of_birth: dob(),
            diagnosis: None,
            medical_conditions: None,
            allergies: Some("penicillin".to_string()),
            emergency_contact_name: None,
            emergency_contact_phone: None,
            emergency_contact_relationship: None,
            notes: None,
        }
    }

    #[test]
    fn at_care_01_recipient_draft_validates_names_and_email() {
        assert!(draft().validate().is_ok());

        let mut blank = draft();
        blank.first_name = "  ".to_string();
        assert!(blank.validate().is_err());

        let mut bad_email = draft();
        bad_email.patient_email = Some("mum.example.org".to_string());
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn at_care_02_medication_fields_only_on_medication_records() {
        let mut log = MedicalRecordDraft::care_log("slept badly".to_string(), None, dob());
        assert!(log.validate().is_ok());
        log.medication_dosage = Some("5mg".to_string());
        assert!(log.validate().is_err());

        let mut med =
            MedicalRecordDraft::medication("Donepezil".to_string(), None, dob());
        med.medication_frequency = Some(MedicationFrequency::Daily);
        assert!(med.validate().is_ok());
    }

    #[test]
    fn at_care_03_emergency_contact_needs_a_channel() {
        let contact = EmergencyContactDraft {
            name: "Tom Hale".to_string(),
            relationship: Some("son".to_string()),
            phone: None,
            email: None,
            is_primary: true,
        };
        assert!(contact.validate().is_err());
        let contact = EmergencyContactDraft {
            phone: Some("+44 20 7946 0000".to_string()),
            ..contact
        };
        assert!(contact.validate().is_ok());
    }
}
