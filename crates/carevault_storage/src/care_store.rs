#![forbid(unsafe_code)]

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::PathBuf;

use carevault_kernel_contracts::access::{UserId, UserProfile};
use carevault_kernel_contracts::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentStatus,
};
use carevault_kernel_contracts::care::{
    CareRecipient, CareRecipientDraft, CareRecipientId, DocumentCategory, DocumentDraft,
    DocumentId, DocumentRecord, EmergencyContact, EmergencyContactDraft, EmergencyContactId,
    MedicalRecord, MedicalRecordDraft, MedicalRecordId, MedicalRecordType,
    CARE_CONTRACT_VERSION,
};
use carevault_kernel_contracts::{ContractViolation, Validate};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{table}: no row for key {key}")]
    NotFound { table: &'static str, key: String },
    #[error("{table}: duplicate key {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table}: foreign key {key} does not exist")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("journal i/o failed for '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("journal '{}' corrupt at line {line}: {reason}", path.display())]
    Journal {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Object-store style file name: keeps `[A-Za-z0-9._-]`, maps the rest to `_`.
fn storage_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// In-memory stand-in for the managed relational backend and its object
/// bucket. Tables are keyed by id; ids are `<prefix>_<seq>` and never reused.
#[derive(Debug, Clone)]
pub struct CareStore {
    users: BTreeMap<UserId, UserProfile>,
    care_recipients: BTreeMap<CareRecipientId, CareRecipient>,
    medical_records: BTreeMap<MedicalRecordId, MedicalRecord>,
    appointments: BTreeMap<AppointmentId, Appointment>,
    documents: BTreeMap<DocumentId, DocumentRecord>,
    // Object storage: file_url -> bytes.
    document_blobs: BTreeMap<String, Vec<u8>>,
    emergency_contacts: BTreeMap<EmergencyContactId, EmergencyContact>,
    next_seq: u64,
}

impl Default for CareStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl CareStore {
    pub fn new_in_memory() -> Self {
        Self {
            users: BTreeMap::new(),
            care_recipients: BTreeMap::new(),
            medical_records: BTreeMap::new(),
            appointments: BTreeMap::new(),
            documents: BTreeMap::new(),
            document_blobs: BTreeMap::new(),
            emergency_contacts: BTreeMap::new(),
            next_seq: 1,
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        format!("{prefix}_{seq:06}")
    }

    fn require_care_recipient(
        &self,
        table: &'static str,
        id: &CareRecipientId,
    ) -> Result<(), StorageError> {
        if !self.care_recipients.contains_key(id) {
            return Err(StorageError::ForeignKeyViolation {
                table,
                key: id.as_str().to_string(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // users
    // ------------------------------------------------------------------

    pub fn insert_user(&mut self, profile: UserProfile) -> Result<(), StorageError> {
        profile.validate()?;
        if self.users.contains_key(&profile.user_id) {
            return Err(StorageError::DuplicateKey {
                table: "users",
                key: profile.user_id.as_str().to_string(),
            });
        }
        self.users.insert(profile.user_id.clone(), profile);
        Ok(())
    }

    pub fn user(&self, user_id: &UserId) -> Option<&UserProfile> {
        self.users.get(user_id)
    }

    // ------------------------------------------------------------------
    // care_recipients
    // ------------------------------------------------------------------

    pub fn create_care_recipient(
        &mut self,
        caregiver_id: &UserId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> Result<CareRecipientId, StorageError> {
        draft.validate()?;
        if let Some(email) = &draft.patient_email {
            if self.care_recipient_by_patient_email(email).is_some() {
                return Err(StorageError::DuplicateKey {
                    table: "care_recipients.patient_email",
                    key: email.clone(),
                });
            }
        }
        let id = CareRecipientId::new(self.next_id("cr"))?;
        let row = CareRecipient {
            schema_version: CARE_CONTRACT_VERSION,
            id: id.clone(),
            caregiver_id: caregiver_id.clone(),
            details: draft,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        row.validate()?;
        self.care_recipients.insert(id.clone(), row);
        Ok(id)
    }

    pub fn care_recipient(&self, id: &CareRecipientId) -> Option<&CareRecipient> {
        self.care_recipients.get(id)
    }

    /// Active recipients managed by `caregiver_id`, newest first.
    pub fn care_recipients_by_caregiver(&self, caregiver_id: &UserId) -> Vec<&CareRecipient> {
        let mut out: Vec<&CareRecipient> = self
            .care_recipients
            .values()
            .filter(|r| r.is_active && &r.caregiver_id == caregiver_id)
            .collect();
        out.sort_by_key(|r| (Reverse(r.created_at), Reverse(r.id.clone())));
        out
    }

    pub fn care_recipient_by_patient_email(&self, email: &str) -> Option<&CareRecipient> {
        self.care_recipients.values().find(|r| {
            r.is_active
                && r.details
                    .patient_email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
        })
    }

    pub fn update_care_recipient(
        &mut self,
        id: &CareRecipientId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        draft.validate()?;
        let row = self
            .care_recipients
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "care_recipients",
                key: id.as_str().to_string(),
            })?;
        row.details = draft;
        row.updated_at = now.max(row.created_at);
        Ok(())
    }

    /// Removes the recipient and every dependent row. Returns the ids of the
    /// appointments that went with it.
    pub fn delete_care_recipient(
        &mut self,
        id: &CareRecipientId,
    ) -> Result<Vec<AppointmentId>, StorageError> {
        if self.care_recipients.remove(id).is_none() {
            return Err(StorageError::NotFound {
                table: "care_recipients",
                key: id.as_str().to_string(),
            });
        }
        self.medical_records
            .retain(|_, r| &r.care_recipient_id != id);
        self.emergency_contacts
            .retain(|_, c| &c.care_recipient_id != id);

        let doc_urls: Vec<String> = self
            .documents
            .values()
            .filter(|d| &d.care_recipient_id == id)
            .map(|d| d.file_url.clone())
            .collect();
        for url in &doc_urls {
            self.document_blobs.remove(url);
        }
        self.documents.retain(|_, d| &d.care_recipient_id != id);

        let removed: Vec<AppointmentId> = self
            .appointments
            .values()
            .filter(|a| &a.care_recipient_id == id)
            .map(|a| a.id.clone())
            .collect();
        self.appointments.retain(|_, a| &a.care_recipient_id != id);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // medical_records (medications and care logs)
    // ------------------------------------------------------------------

    pub fn create_medical_record(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> Result<MedicalRecordId, StorageError> {
        draft.validate()?;
        self.require_care_recipient("medical_records", care_recipient_id)?;
        let id = MedicalRecordId::new(self.next_id("mr"))?;
        let row = MedicalRecord {
            schema_version: CARE_CONTRACT_VERSION,
            id: id.clone(),
            care_recipient_id: care_recipient_id.clone(),
            details: draft,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.medical_records.insert(id.clone(), row);
        Ok(id)
    }

    pub fn medical_record(&self, id: &MedicalRecordId) -> Option<&MedicalRecord> {
        self.medical_records.get(id)
    }

    pub fn update_medical_record(
        &mut self,
        id: &MedicalRecordId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        draft.validate()?;
        let row = self
            .medical_records
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "medical_records",
                key: id.as_str().to_string(),
            })?;
        row.details = draft;
        row.updated_at = now.max(row.created_at);
        Ok(())
    }

    pub fn delete_medical_record(&mut self, id: &MedicalRecordId) -> Result<(), StorageError> {
        self.medical_records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                table: "medical_records",
                key: id.as_str().to_string(),
            })
    }

    /// All records for a recipient, most recent `date` first.
    pub fn medical_records(&self, care_recipient_id: &CareRecipientId) -> Vec<&MedicalRecord> {
        let mut out: Vec<&MedicalRecord> = self
            .medical_records
            .values()
            .filter(|r| &r.care_recipient_id == care_recipient_id)
            .collect();
        out.sort_by_key(|r| (Reverse(r.details.date), Reverse(r.id.clone())));
        out
    }

    pub fn medical_records_by_type(
        &self,
        care_recipient_id: &CareRecipientId,
        record_type: MedicalRecordType,
    ) -> Vec<&MedicalRecord> {
        self.medical_records(care_recipient_id)
            .into_iter()
            .filter(|r| r.details.record_type == record_type)
            .collect()
    }

    pub fn active_medications(&self, care_recipient_id: &CareRecipientId) -> Vec<&MedicalRecord> {
        self.medical_records_by_type(care_recipient_id, MedicalRecordType::Medication)
            .into_iter()
            .filter(|r| r.is_active)
            .collect()
    }

    // ------------------------------------------------------------------
    // appointments
    // ------------------------------------------------------------------

    pub fn create_appointment(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<AppointmentId, StorageError> {
        draft.validate()?;
        self.require_care_recipient("appointments", care_recipient_id)?;
        let id = AppointmentId::new(self.next_id("appt"))?;
        let row = Appointment::from_draft(id.clone(), care_recipient_id.clone(), draft, now)?;
        self.appointments.insert(id.clone(), row);
        Ok(id)
    }

    /// Inserts a row as-is, e.g. one loaded from an external backend that may
    /// be missing its scheduled time.
    pub fn insert_appointment_row(&mut self, row: Appointment) -> Result<(), StorageError> {
        row.validate()?;
        self.require_care_recipient("appointments", &row.care_recipient_id)?;
        if self.appointments.contains_key(&row.id) {
            return Err(StorageError::DuplicateKey {
                table: "appointments",
                key: row.id.as_str().to_string(),
            });
        }
        self.appointments.insert(row.id.clone(), row);
        Ok(())
    }

    pub fn appointment(&self, id: &AppointmentId) -> Option<&Appointment> {
        self.appointments.get(id)
    }

    fn appointment_mut(&mut self, id: &AppointmentId) -> Result<&mut Appointment, StorageError> {
        self.appointments
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "appointments",
                key: id.as_str().to_string(),
            })
    }

    pub fn set_appointment_status(
        &mut self,
        id: &AppointmentId,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let row = self.appointment_mut(id)?;
        row.status = status;
        row.updated_at = now.max(row.created_at);
        Ok(())
    }

    /// Moves the appointment in time. The id is kept, so a reminder already
    /// sent for it is not sent again.
    pub fn reschedule_appointment(
        &mut self,
        id: &AppointmentId,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let row = self.appointment_mut(id)?;
        row.scheduled_at = Some(scheduled_at);
        if row.status == AppointmentStatus::Scheduled {
            row.status = AppointmentStatus::Rescheduled;
        }
        row.updated_at = now.max(row.created_at);
        Ok(())
    }

    pub fn delete_appointment(&mut self, id: &AppointmentId) -> Result<(), StorageError> {
        self.appointments
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                table: "appointments",
                key: id.as_str().to_string(),
            })
    }

    /// Ascending by scheduled time; rows without a time sort last.
    pub fn appointments(&self, care_recipient_id: &CareRecipientId) -> Vec<&Appointment> {
        let mut out: Vec<&Appointment> = self
            .appointments
            .values()
            .filter(|a| &a.care_recipient_id == care_recipient_id)
            .collect();
        out.sort_by_key(|a| (a.scheduled_at.is_none(), a.scheduled_at, a.id.clone()));
        out
    }

    pub fn upcoming_appointments(
        &self,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> Vec<&Appointment> {
        self.appointments(care_recipient_id)
            .into_iter()
            .filter(|a| a.status == AppointmentStatus::Scheduled)
            .filter(|a| a.scheduled_at.is_some_and(|t| t >= now))
            .collect()
    }

    // ------------------------------------------------------------------
    // documents
    // ------------------------------------------------------------------

    /// Stores the bytes first, then the metadata row, as one step.
    pub fn upload_document(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: DocumentDraft,
        file_name: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<DocumentId, StorageError> {
        draft.validate()?;
        self.require_care_recipient("documents", care_recipient_id)?;
        if file_name.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "document.file_name",
                reason: "must not be empty",
            }
            .into());
        }
        let raw_id = self.next_id("doc");
        let file_url = format!("documents/{raw_id}_{}", storage_file_name(file_name));
        let row = DocumentRecord {
            schema_version: CARE_CONTRACT_VERSION,
            id: DocumentId::new(raw_id)?,
            care_recipient_id: care_recipient_id.clone(),
            details: draft,
            file_url: file_url.clone(),
            file_name: file_name.to_string(),
            file_size: bytes.len() as u64,
            checksum_sha256: sha256_hex(&bytes),
            created_at: now,
            updated_at: now,
        };
        row.validate()?;
        let id = row.id.clone();
        self.document_blobs.insert(file_url, bytes);
        self.documents.insert(id.clone(), row);
        Ok(id)
    }

    pub fn document(&self, id: &DocumentId) -> Option<&DocumentRecord> {
        self.documents.get(id)
    }

    pub fn document_blob(&self, file_url: &str) -> Option<&[u8]> {
        self.document_blobs.get(file_url).map(Vec::as_slice)
    }

    /// Newest first.
    pub fn documents(&self, care_recipient_id: &CareRecipientId) -> Vec<&DocumentRecord> {
        let mut out: Vec<&DocumentRecord> = self
            .documents
            .values()
            .filter(|d| &d.care_recipient_id == care_recipient_id)
            .collect();
        out.sort_by_key(|d| (Reverse(d.created_at), Reverse(d.id.clone())));
        out
    }

    pub fn documents_by_category(
        &self,
        care_recipient_id: &CareRecipientId,
        category: DocumentCategory,
    ) -> Vec<&DocumentRecord> {
        self.documents(care_recipient_id)
            .into_iter()
            .filter(|d| d.details.category == category)
            .collect()
    }

    pub fn delete_document(&mut self, id: &DocumentId) -> Result<(), StorageError> {
        let row = self
            .documents
            .remove(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "documents",
                key: id.as_str().to_string(),
            })?;
        self.document_blobs.remove(&row.file_url);
        Ok(())
    }

    // ------------------------------------------------------------------
    // emergency_contacts
    // ------------------------------------------------------------------

    pub fn create_emergency_contact(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> Result<EmergencyContactId, StorageError> {
        draft.validate()?;
        self.require_care_recipient("emergency_contacts", care_recipient_id)?;
        let id = EmergencyContactId::new(self.next_id("ec"))?;
        let row = EmergencyContact {
            schema_version: CARE_CONTRACT_VERSION,
            id: id.clone(),
            care_recipient_id: care_recipient_id.clone(),
            details: draft,
            created_at: now,
            updated_at: now,
        };
        self.emergency_contacts.insert(id.clone(), row);
        Ok(id)
    }

    pub fn update_emergency_contact(
        &mut self,
        id: &EmergencyContactId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        draft.validate()?;
        let row = self
            .emergency_contacts
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "emergency_contacts",
                key: id.as_str().to_string(),
            })?;
        row.details = draft;
        row.updated_at = now.max(row.created_at);
        Ok(())
    }

    pub fn delete_emergency_contact(&mut self, id: &EmergencyContactId) -> Result<(), StorageError> {
        self.emergency_contacts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                table: "emergency_contacts",
                key: id.as_str().to_string(),
            })
    }

    pub fn emergency_contact(&self, id: &EmergencyContactId) -> Option<&EmergencyContact> {
        self.emergency_contacts.get(id)
    }

    /// Primary contact first, then by name.
    pub fn emergency_contacts(
        &self,
        care_recipient_id: &CareRecipientId,
    ) -> Vec<&EmergencyContact> {
        let mut out: Vec<&EmergencyContact> = self
            .emergency_contacts
            .values()
            .filter(|c| &c.care_recipient_id == care_recipient_id)
            .collect();
        out.sort_by(|a, b| {
            b.details
                .is_primary
                .cmp(&a.details.is_primary)
                .then_with(|| a.details.name.cmp(&b.details.name))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_store_01_file_names_are_sanitized_for_object_keys() {
        assert_eq!(storage_file_name("scan 01.pdf"), "scan_01.pdf");
        assert_eq!(storage_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(storage_file_name(".."), "upload");
    }

    #[test]
    fn at_store_02_sha256_hex_is_lowercase_64() {
        let h = sha256_hex(b"abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn at_store_03_ids_are_sequential_and_prefixed() {
        let mut s = CareStore::new_in_memory();
        assert_eq!(s.next_id("cr"), "cr_000001");
        assert_eq!(s.next_id("appt"), "appt_000002");
    }
}
