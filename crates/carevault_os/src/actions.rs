#![forbid(unsafe_code)]

use carevault_engines::permissions::{decide, permissions_for, AccessDecision, PermissionError};
use carevault_kernel_contracts::access::{Capability, PermissionSet, Role, SessionContext, UserId};
use carevault_kernel_contracts::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentSnapshot, AppointmentStatus,
};
use carevault_kernel_contracts::care::{
    CareRecipient, CareRecipientDraft, CareRecipientId, DocumentCategory, DocumentDraft,
    DocumentId, DocumentRecord, EmergencyContact, EmergencyContactDraft, EmergencyContactId,
    MedicalRecord, MedicalRecordDraft, MedicalRecordId, MedicalRecordType,
};
use carevault_kernel_contracts::emergency::EmergencySummary;
use carevault_kernel_contracts::ContractViolation;
use carevault_storage::kv::{KeyValueStore, NotifiedState};
use carevault_storage::repo::CareRepo;
use carevault_storage::StorageError;
use chrono::{DateTime, Utc};

use crate::emergency::{build_emergency_summary, render_text};

/// Result of a gated handler. `Denied` means the persistence port was not
/// touched at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome<T> {
    Applied(T),
    Denied(AccessDecision),
}

impl<T> ActionOutcome<T> {
    pub fn is_denied(&self) -> bool {
        matches!(self, ActionOutcome::Denied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            ActionOutcome::Applied(v) => Some(v),
            ActionOutcome::Denied(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ActionOutcome<U> {
        match self {
            ActionOutcome::Applied(v) => ActionOutcome::Applied(f(v)),
            ActionOutcome::Denied(d) => ActionOutcome::Denied(d),
        }
    }
}

pub type ActionResult<T> = Result<ActionOutcome<T>, StorageError>;

fn not_found(table: &'static str, key: &str) -> StorageError {
    StorageError::NotFound {
        table,
        key: key.to_string(),
    }
}

fn require_user(session: &SessionContext) -> Result<&UserId, StorageError> {
    session.user_id.as_ref().ok_or_else(|| {
        StorageError::ContractViolation(ContractViolation::InvalidValue {
            field: "session.user_id",
            reason: "must be present",
        })
    })
}

/// A patient reaches only the recipient registered under their profile
/// email. Anything else reads as missing so ids of other households do not
/// leak.
fn own_recipient_only<R: CareRepo>(
    store: &R,
    session: &SessionContext,
    care_recipient_id: &CareRecipientId,
) -> Result<(), StorageError> {
    if session.role != Some(Role::Patient) {
        return Ok(());
    }
    let user_id = require_user(session)?;
    let own = store
        .user_row(user_id)
        .and_then(|profile| store.care_recipient_row_by_patient_email(&profile.email))
        .is_some_and(|cr| &cr.id == care_recipient_id);
    if own {
        Ok(())
    } else {
        Err(not_found("care_recipients", care_recipient_id.as_str()))
    }
}

fn require_record_type(
    draft: &MedicalRecordDraft,
    expected: MedicalRecordType,
) -> Result<(), StorageError> {
    if draft.record_type != expected {
        return Err(ContractViolation::InvalidValue {
            field: "medical_record.record_type",
            reason: "does not match the action",
        }
        .into());
    }
    Ok(())
}

/// The dashboard's action handlers. Every handler resolves its capability for
/// the session role first and returns [`ActionOutcome::Denied`] without
/// calling the store when the role lacks it.
#[derive(Debug, Clone, Default)]
pub struct CareActionRuntime;

impl CareActionRuntime {
    pub fn new() -> Self {
        Self
    }

    pub fn permissions(&self, session: &SessionContext) -> Result<PermissionSet, PermissionError> {
        permissions_for(session.role)
    }

    fn gated<T>(
        &self,
        session: &SessionContext,
        capability: Capability,
        action: &'static str,
        f: impl FnOnce() -> Result<T, StorageError>,
    ) -> ActionResult<T> {
        let decision = decide(session.role, capability);
        if !decision.allowed {
            tracing::debug!(
                action,
                capability = %capability,
                role = ?session.role,
                user_id = ?session.user_id.as_ref().map(UserId::as_str),
                reason_code = decision.reason_code.0,
                "action denied"
            );
            return Ok(ActionOutcome::Denied(decision));
        }
        f().map(ActionOutcome::Applied)
    }

    // ------------------------------------------------------------------
    // care recipients
    // ------------------------------------------------------------------

    /// Caregivers see the recipients they manage; a patient sees the record
    /// registered under their profile email.
    pub fn list_care_recipients<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
    ) -> ActionResult<Vec<CareRecipient>> {
        self.gated(session, Capability::ViewPatientInfo, "list_care_recipients", || {
            let user_id = require_user(session)?;
            match session.role {
                Some(Role::Patient) => {
                    let Some(profile) = store.user_row(user_id) else {
                        return Ok(Vec::new());
                    };
                    Ok(store
                        .care_recipient_row_by_patient_email(&profile.email)
                        .into_iter()
                        .cloned()
                        .collect())
                }
                _ => Ok(store
                    .care_recipient_rows_by_caregiver(user_id)
                    .into_iter()
                    .cloned()
                    .collect()),
            }
        })
    }

    pub fn care_recipient<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        id: &CareRecipientId,
    ) -> ActionResult<CareRecipient> {
        self.gated(session, Capability::ViewPatientInfo, "view_care_recipient", || {
            own_recipient_only(store, session, id)?;
            store
                .care_recipient_row(id)
                .cloned()
                .ok_or_else(|| not_found("care_recipients", id.as_str()))
        })
    }

    pub fn add_care_recipient<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<CareRecipientId> {
        self.gated(session, Capability::EditPatientInfo, "add_care_recipient", || {
            let caregiver_id = require_user(session)?;
            store.create_care_recipient_row(caregiver_id, draft, now)
        })
    }

    pub fn update_care_recipient<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &CareRecipientId,
        draft: CareRecipientDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<()> {
        self.gated(session, Capability::EditPatientInfo, "update_care_recipient", || {
            store.update_care_recipient_row(id, draft, now)
        })
    }

    /// Removes the recipient with everything under it, including the
    /// reminder flags of its appointments.
    pub fn delete_care_recipient<R: CareRepo, S: KeyValueStore>(
        &self,
        store: &mut R,
        notified: &mut NotifiedState<S>,
        session: &SessionContext,
        id: &CareRecipientId,
    ) -> ActionResult<Vec<AppointmentId>> {
        self.gated(session, Capability::EditPatientInfo, "delete_care_recipient", || {
            let removed = store.delete_care_recipient_row(id)?;
            for appt_id in &removed {
                forget_reminder(notified, appt_id);
            }
            Ok(removed)
        })
    }

    // ------------------------------------------------------------------
    // medications
    // ------------------------------------------------------------------

    pub fn list_medications<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> ActionResult<Vec<MedicalRecord>> {
        self.gated(session, Capability::ViewPatientInfo, "list_medications", || {
            own_recipient_only(store, session, care_recipient_id)?;
            Ok(store
                .active_medication_rows(care_recipient_id)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    pub fn add_medication<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<MedicalRecordId> {
        self.gated(session, Capability::ManageMedications, "add_medication", || {
            require_record_type(&draft, MedicalRecordType::Medication)?;
            store.create_medical_record_row(care_recipient_id, draft, now)
        })
    }

    pub fn delete_medication<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &MedicalRecordId,
    ) -> ActionResult<()> {
        self.gated(session, Capability::ManageMedications, "delete_medication", || {
            if !store
                .medical_record_row(id)
                .is_some_and(MedicalRecord::is_medication)
            {
                return Err(not_found("medical_records.medication", id.as_str()));
            }
            store.delete_medical_record_row(id)
        })
    }

    // ------------------------------------------------------------------
    // care logs
    // ------------------------------------------------------------------

    pub fn list_care_logs<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> ActionResult<Vec<MedicalRecord>> {
        self.gated(session, Capability::ViewPatientInfo, "list_care_logs", || {
            own_recipient_only(store, session, care_recipient_id)?;
            Ok(store
                .medical_record_rows_by_type(care_recipient_id, MedicalRecordType::Condition)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    pub fn add_care_log<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<MedicalRecordId> {
        self.gated(session, Capability::AddCareLogs, "add_care_log", || {
            require_record_type(&draft, MedicalRecordType::Condition)?;
            store.create_medical_record_row(care_recipient_id, draft, now)
        })
    }

    pub fn edit_care_log<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &MedicalRecordId,
        draft: MedicalRecordDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<()> {
        self.gated(session, Capability::EditCareLogs, "edit_care_log", || {
            require_record_type(&draft, MedicalRecordType::Condition)?;
            if !store
                .medical_record_row(id)
                .is_some_and(MedicalRecord::is_care_log)
            {
                return Err(not_found("medical_records.care_log", id.as_str()));
            }
            store.update_medical_record_row(id, draft, now)
        })
    }

    pub fn delete_care_log<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &MedicalRecordId,
    ) -> ActionResult<()> {
        self.gated(session, Capability::DeleteCareLogs, "delete_care_log", || {
            if !store
                .medical_record_row(id)
                .is_some_and(MedicalRecord::is_care_log)
            {
                return Err(not_found("medical_records.care_log", id.as_str()));
            }
            store.delete_medical_record_row(id)
        })
    }

    // ------------------------------------------------------------------
    // appointments
    // ------------------------------------------------------------------

    pub fn list_appointments<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> ActionResult<Vec<Appointment>> {
        self.gated(session, Capability::ViewPatientInfo, "list_appointments", || {
            own_recipient_only(store, session, care_recipient_id)?;
            Ok(store
                .appointment_rows(care_recipient_id)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    pub fn upcoming_appointments<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> ActionResult<Vec<Appointment>> {
        self.gated(session, Capability::ViewPatientInfo, "upcoming_appointments", || {
            own_recipient_only(store, session, care_recipient_id)?;
            Ok(store
                .upcoming_appointment_rows(care_recipient_id, now)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    /// Immutable copy of the recipient's appointments for the reminder poller.
    pub fn appointment_snapshot<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> ActionResult<AppointmentSnapshot> {
        self.gated(session, Capability::ViewPatientInfo, "load_appointment_snapshot", || {
            own_recipient_only(store, session, care_recipient_id)?;
            if store.care_recipient_row(care_recipient_id).is_none() {
                return Err(not_found("care_recipients", care_recipient_id.as_str()));
            }
            let rows = store
                .appointment_rows(care_recipient_id)
                .into_iter()
                .cloned()
                .collect();
            Ok(AppointmentSnapshot::new(
                care_recipient_id.clone(),
                rows,
                now,
            ))
        })
    }

    pub fn add_appointment<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        draft: AppointmentDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<AppointmentId> {
        self.gated(session, Capability::ManageAppointments, "add_appointment", || {
            store.create_appointment_row(care_recipient_id, draft, now)
        })
    }

    /// Flips completed <-> scheduled and returns the new status.
    pub fn toggle_appointment_complete<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &AppointmentId,
        now: DateTime<Utc>,
    ) -> ActionResult<AppointmentStatus> {
        self.gated(session, Capability::ManageAppointments, "toggle_appointment", || {
            let current = store
                .appointment_row(id)
                .map(|a| a.status)
                .ok_or_else(|| not_found("appointments", id.as_str()))?;
            let next = match current {
                AppointmentStatus::Completed => AppointmentStatus::Scheduled,
                _ => AppointmentStatus::Completed,
            };
            store.set_appointment_status_row(id, next, now)?;
            Ok(next)
        })
    }

    pub fn reschedule_appointment<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &AppointmentId,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ActionResult<()> {
        self.gated(session, Capability::ManageAppointments, "reschedule_appointment", || {
            store.reschedule_appointment_row(id, scheduled_at, now)
        })
    }

    pub fn delete_appointment<R: CareRepo, S: KeyValueStore>(
        &self,
        store: &mut R,
        notified: &mut NotifiedState<S>,
        session: &SessionContext,
        id: &AppointmentId,
    ) -> ActionResult<()> {
        self.gated(session, Capability::ManageAppointments, "delete_appointment", || {
            store.delete_appointment_row(id)?;
            forget_reminder(notified, id);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // documents
    // ------------------------------------------------------------------

    pub fn list_documents<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        category: Option<DocumentCategory>,
    ) -> ActionResult<Vec<DocumentRecord>> {
        self.gated(session, Capability::ViewPatientInfo, "list_documents", || {
            own_recipient_only(store, session, care_recipient_id)?;
            let rows = match category {
                Some(c) => store.document_rows_by_category(care_recipient_id, c),
                None => store.document_rows(care_recipient_id),
            };
            Ok(rows.into_iter().cloned().collect())
        })
    }

    pub fn upload_document<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        draft: DocumentDraft,
        file_name: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> ActionResult<DocumentId> {
        self.gated(session, Capability::UploadDocuments, "upload_document", || {
            store.upload_document_row(care_recipient_id, draft, file_name, bytes, now)
        })
    }

    pub fn delete_document<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &DocumentId,
    ) -> ActionResult<()> {
        self.gated(session, Capability::DeleteDocuments, "delete_document", || {
            store.delete_document_row(id)
        })
    }

    // ------------------------------------------------------------------
    // emergency contacts
    // ------------------------------------------------------------------

    pub fn list_emergency_contacts<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> ActionResult<Vec<EmergencyContact>> {
        self.gated(session, Capability::ViewPatientInfo, "list_emergency_contacts", || {
            own_recipient_only(store, session, care_recipient_id)?;
            Ok(store
                .emergency_contact_rows(care_recipient_id)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    pub fn add_emergency_contact<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<EmergencyContactId> {
        self.gated(session, Capability::EditPatientInfo, "add_emergency_contact", || {
            store.create_emergency_contact_row(care_recipient_id, draft, now)
        })
    }

    pub fn update_emergency_contact<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &EmergencyContactId,
        draft: EmergencyContactDraft,
        now: DateTime<Utc>,
    ) -> ActionResult<()> {
        self.gated(session, Capability::EditPatientInfo, "update_emergency_contact", || {
            store.update_emergency_contact_row(id, draft, now)
        })
    }

    pub fn delete_emergency_contact<R: CareRepo>(
        &self,
        store: &mut R,
        session: &SessionContext,
        id: &EmergencyContactId,
    ) -> ActionResult<()> {
        self.gated(session, Capability::EditPatientInfo, "delete_emergency_contact", || {
            store.delete_emergency_contact_row(id)
        })
    }

    // ------------------------------------------------------------------
    // emergency summary
    // ------------------------------------------------------------------

    pub fn emergency_summary<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> ActionResult<EmergencySummary> {
        self.gated(session, Capability::ViewEmergencySummary, "view_emergency_summary", || {
            own_recipient_only(store, session, care_recipient_id)?;
            assemble_summary(store, care_recipient_id, now)
        })
    }

    /// Text rendition for download or print.
    pub fn export_emergency_summary<R: CareRepo>(
        &self,
        store: &R,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        now: DateTime<Utc>,
    ) -> ActionResult<String> {
        self.gated(
            session,
            Capability::ExportEmergencySummary,
            "export_emergency_summary",
            || {
                own_recipient_only(store, session, care_recipient_id)?;
                assemble_summary(store, care_recipient_id, now).map(|s| render_text(&s))
            },
        )
    }
}

fn assemble_summary<R: CareRepo>(
    store: &R,
    care_recipient_id: &CareRecipientId,
    now: DateTime<Utc>,
) -> Result<EmergencySummary, StorageError> {
    let recipient = store
        .care_recipient_row(care_recipient_id)
        .ok_or_else(|| not_found("care_recipients", care_recipient_id.as_str()))?;
    let contacts = store.emergency_contact_rows(care_recipient_id);
    let primary = contacts.iter().copied().find(|c| c.details.is_primary);
    Ok(build_emergency_summary(
        recipient,
        store.active_medication_rows(care_recipient_id),
        primary,
        now,
    ))
}

fn forget_reminder<S: KeyValueStore>(notified: &mut NotifiedState<S>, id: &AppointmentId) {
    if let Err(err) = notified.forget(id) {
        tracing::warn!(appointment_id = %id, error = %err, "failed to clear reminder flag");
    }
}
