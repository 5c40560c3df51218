#![forbid(unsafe_code)]

use carevault_kernel_contracts::access::{UserId, UserProfile};
use carevault_kernel_contracts::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentStatus,
};
use carevault_kernel_contracts::care::{
    CareRecipient, CareRecipientDraft, CareRecipientId, DocumentCategory, DocumentDraft,
    DocumentId, DocumentRecord, EmergencyContact, EmergencyContactDraft, EmergencyContactId,
    MedicalRecord, MedicalRecordDraft, MedicalRecordId, MedicalRecordType,
};
use chrono::{DateTime, Utc};

use crate::care_store::{CareStore, StorageError};

/// Typed repository interface for profiles and care recipient rows.
pub trait CareRecipientsRepo {
    fn insert_user_row(&mut self, profile: UserProfile) -> Result<(), StorageError>;
    fn user_row(&self, user_id: &UserId) -> Option<&UserProfile>;

    fn create_care_recipient_row(
        &mut self,
        caregiver_id: &UserId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> Result<CareRecipientId, StorageError>;
    fn care_recipient_row(&self, id: &CareRecipientId) -> Option<&CareRecipient>;
    fn care_recipient_rows_by_caregiver(&self, caregiver_id: &UserId) -> Vec<&CareRecipient>;
    fn care_recipient_row_by_patient_email(&self, email: &str) -> Option<&CareRecipient>;
    fn update_care_recipient_row(
        &mut self,
        id: &CareRecipientId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn delete_care_recipient_row(
        &mut self,
        id: &CareRecipientId,
    ) -> Result<Vec<AppointmentId>, StorageError>;
}

/// Typed repository interface for medication and care-log rows.
pub trait MedicalRecordsRepo {
    fn create_medical_record_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> Result<MedicalRecordId, StorageError>;
    fn medical_record_row(&self, id: &MedicalRecordId) -> Option<&MedicalRecord>;
    fn update_medical_record_row(
        &mut self,
        id: &MedicalRecordId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn delete_medical_record_row(&mut self, id: &MedicalRecordId) -> Result<(), StorageError>;
    fn medical_record_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&MedicalRecord>;
    fn medical_record_rows_by_type(
        &self,
        care_recipient_id: &CareRecipientId,
        record_type: MedicalRecordType,
    ) -> Vec<&MedicalRecord>;
    fn active_medication_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&MedicalRecord>;
}

/// Typed repository interface for appointment rows.
pub trait AppointmentsRepo {
    fn create_appointment_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<AppointmentId, StorageError>;
    fn appointment_row(&self, id: &AppointmentId) -> Option<&Appointment>;
    fn set_appointment_status_row(
        &mut self,
        id: &AppointmentId,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn reschedule_appointment_row(
        &mut self,
        id: &AppointmentId,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn delete_appointment_row(&mut self, id: &AppointmentId) -> Result<(), StorageError>;
    fn appointment_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&Appointment>;
    fn upcoming_appointment_rows(
        &self,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> Vec<&Appointment>;
}

/// Typed repository interface for document metadata plus object bytes.
pub trait DocumentsRepo {
    fn upload_document_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: DocumentDraft,
        file_name: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<DocumentId, StorageError>;
    fn document_row(&self, id: &DocumentId) -> Option<&DocumentRecord>;
    fn document_blob_bytes(&self, file_url: &str) -> Option<&[u8]>;
    fn document_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&DocumentRecord>;
    fn document_rows_by_category(
        &self,
        care_recipient_id: &CareRecipientId,
        category: DocumentCategory,
    ) -> Vec<&DocumentRecord>;
    fn delete_document_row(&mut self, id: &DocumentId) -> Result<(), StorageError>;
}

/// Typed repository interface for emergency contact rows.
pub trait EmergencyContactsRepo {
    fn create_emergency_contact_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> Result<EmergencyContactId, StorageError>;
    fn update_emergency_contact_row(
        &mut self,
        id: &EmergencyContactId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn delete_emergency_contact_row(&mut self, id: &EmergencyContactId)
        -> Result<(), StorageError>;
    fn emergency_contact_rows(&self, care_recipient_id: &CareRecipientId)
        -> Vec<&EmergencyContact>;
}

/// The full persistence port the action runtime is written against.
pub trait CareRepo:
    CareRecipientsRepo + MedicalRecordsRepo + AppointmentsRepo + DocumentsRepo + EmergencyContactsRepo
{
}

impl<T> CareRepo for T where
    T: CareRecipientsRepo
        + MedicalRecordsRepo
        + AppointmentsRepo
        + DocumentsRepo
        + EmergencyContactsRepo
{
}

impl CareRecipientsRepo for CareStore {
    fn insert_user_row(&mut self, profile: UserProfile) -> Result<(), StorageError> {
        self.insert_user(profile)
    }

    fn user_row(&self, user_id: &UserId) -> Option<&UserProfile> {
        self.user(user_id)
    }

    fn create_care_recipient_row(
        &mut self,
        caregiver_id: &UserId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> Result<CareRecipientId, StorageError> {
        self.create_care_recipient(caregiver_id, draft, now)
    }

    fn care_recipient_row(&self, id: &CareRecipientId) -> Option<&CareRecipient> {
        self.care_recipient(id)
    }

    fn care_recipient_rows_by_caregiver(&self, caregiver_id: &UserId) -> Vec<&CareRecipient> {
        self.care_recipients_by_caregiver(caregiver_id)
    }

    fn care_recipient_row_by_patient_email(&self, email: &str) -> Option<&CareRecipient> {
        self.care_recipient_by_patient_email(email)
    }

    fn update_care_recipient_row(
        &mut self,
        id: &CareRecipientId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.update_care_recipient(id, draft, now)
    }

    fn delete_care_recipient_row(
        &mut self,
        id: &CareRecipientId,
    ) -> Result<Vec<AppointmentId>, StorageError> {
        self.delete_care_recipient(id)
    }
}

impl MedicalRecordsRepo for CareStore {
    fn create_medical_record_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> Result<MedicalRecordId, StorageError> {
        self.create_medical_record(care_recipient_id, draft, now)
    }

    fn medical_record_row(&self, id: &MedicalRecordId) -> Option<&MedicalRecord> {
        self.medical_record(id)
    }

    fn update_medical_record_row(
        &mut self,
        id: &MedicalRecordId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.update_medical_record(id, draft, now)
    }

    fn delete_medical_record_row(&mut self, id: &MedicalRecordId) -> Result<(), StorageError> {
        self.delete_medical_record(id)
    }

    fn medical_record_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&MedicalRecord> {
        self.medical_records(care_recipient_id)
    }

    fn medical_record_rows_by_type(
        &self,
        care_recipient_id: &CareRecipientId,
        record_type: MedicalRecordType,
    ) -> Vec<&MedicalRecord> {
        self.medical_records_by_type(care_recipient_id, record_type)
    }

    fn active_medication_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&MedicalRecord> {
        self.active_medications(care_recipient_id)
    }
}

impl AppointmentsRepo for CareStore {
    fn create_appointment_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<AppointmentId, StorageError> {
        self.create_appointment(care_recipient_id, draft, now)
    }

    fn appointment_row(&self, id: &AppointmentId) -> Option<&Appointment> {
        self.appointment(id)
    }

    fn set_appointment_status_row(
        &mut self,
        id: &AppointmentId,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.set_appointment_status(id, status, now)
    }

    fn reschedule_appointment_row(
        &mut self,
        id: &AppointmentId,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.reschedule_appointment(id, scheduled_at, now)
    }

    fn delete_appointment_row(&mut self, id: &AppointmentId) -> Result<(), StorageError> {
        self.delete_appointment(id)
    }

    fn appointment_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&Appointment> {
        self.appointments(care_recipient_id)
    }

    fn upcoming_appointment_rows(
        &self,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> Vec<&Appointment> {
        self.upcoming_appointments(care_recipient_id, now)
    }
}

impl DocumentsRepo for CareStore {
    fn upload_document_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: DocumentDraft,
        file_name: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<DocumentId, StorageError> {
        self.upload_document(care_recipient_id, draft, file_name, bytes, now)
    }

    fn document_row(&self, id: &DocumentId) -> Option<&DocumentRecord> {
        self.document(id)
    }

    fn document_blob_bytes(&self, file_url: &str) -> Option<&[u8]> {
        self.document_blob(file_url)
    }

    fn document_rows(&self, care_recipient_id: &CareRecipientId) -> Vec<&DocumentRecord> {
        self.documents(care_recipient_id)
    }

    fn document_rows_by_category(
        &self,
        care_recipient_id: &CareRecipientId,
        category: DocumentCategory,
    ) -> Vec<&DocumentRecord> {
        self.documents_by_category(care_recipient_id, category)
    }

    fn delete_document_row(&mut self, id: &DocumentId) -> Result<(), StorageError> {
        self.delete_document(id)
    }
}

impl EmergencyContactsRepo for CareStore {
    fn create_emergency_contact_row(
        &mut self,
        care_recipient_id: &CareRecipientId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> Result<EmergencyContactId, StorageError> {
        self.create_emergency_contact(care_recipient_id, draft, now)
    }

    fn update_emergency_contact_row(
        &mut self,
        id: &EmergencyContactId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.update_emergency_contact(id, draft, now)
    }

    fn delete_emergency_contact_row(
        &mut self,
        id: &EmergencyContactId,
    ) -> Result<(), StorageError> {
        self.delete_emergency_contact(id)
    }

    fn emergency_contact_rows(
        &self,
        care_recipient_id: &CareRecipientId,
    ) -> Vec<&EmergencyContact> {
        self.emergency_contacts(care_recipient_id)
    }
}
