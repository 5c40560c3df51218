#![forbid(unsafe_code)]

use carevault_kernel_contracts::access::{Role, UserId, UserProfile};
use carevault_kernel_contracts::appointment::{AppointmentDraft, AppointmentStatus, RepeatInterval};
use carevault_kernel_contracts::care::{
    CareRecipientDraft, CareRecipientId, DocumentCategory, DocumentDraft, EmergencyContactDraft,
    MedicalRecordDraft, MedicalRecordType,
};
use carevault_storage::care_store::{CareStore, StorageError};
use carevault_storage::repo::{
    AppointmentsRepo, CareRecipientsRepo, DocumentsRepo, EmergencyContactsRepo,
    MedicalRecordsRepo,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn recipient_draft(first: &str, email: Option<&str>) -> CareRecipientDraft {
    CareRecipientDraft {
        patient_email: email.map(str::to_string),
        first_name: first.to_string(),
        last_name: "Hale".to_string(),
        date_of_birth: day(1941, 3, 9),
        diagnosis: Some("early-stage dementia".to_string()),
        medical_conditions: None,
        allergies: Some("penicillin".to_string()),
        emergency_contact_name: None,
        emergency_contact_phone: None,
        emergency_contact_relationship: None,
        notes: None,
    }
}

fn appointment_draft(title: &str, at: DateTime<Utc>) -> AppointmentDraft {
    AppointmentDraft {
        title: title.to_string(),
        description: None,
        scheduled_at: at,
        location: None,
        doctor_name: None,
        remind_before_minutes: 30,
        repeat_interval: RepeatInterval::None,
        notes: None,
    }
}

fn seed_recipient(s: &mut CareStore) -> CareRecipientId {
    let carer = user("carer_1");
    s.insert_user_row(
        UserProfile::v1(
            carer.clone(),
            "carer@example.org".to_string(),
            "Ada Carer".to_string(),
            None,
            Role::Caregiver,
        )
        .unwrap(),
    )
    .unwrap();
    s.create_care_recipient_row(&carer, recipient_draft("Iris", Some("iris@example.org")), t0())
        .unwrap()
}

#[test]
fn at_store_db_01_recipients_listed_newest_first_and_by_patient_email() {
    let mut s = CareStore::new_in_memory();
    let carer = user("carer_1");
    let older = s
        .create_care_recipient_row(&carer, recipient_draft("Iris", Some("iris@example.org")), t0())
        .unwrap();
    let newer = s
        .create_care_recipient_row(
            &carer,
            recipient_draft("Walter", None),
            t0() + Duration::hours(1),
        )
        .unwrap();
    s.create_care_recipient_row(&user("carer_2"), recipient_draft("Other", None), t0())
        .unwrap();

    let ids: Vec<_> = s
        .care_recipient_rows_by_caregiver(&carer)
        .into_iter()
        .map(|r| r.id.clone())
        .collect();
    assert_eq!(ids, vec![newer, older.clone()]);

    let by_email = s
        .care_recipient_row_by_patient_email("IRIS@example.org")
        .unwrap();
    assert_eq!(by_email.id, older);
}

#[test]
fn at_store_db_02_duplicate_user_and_patient_email_rejected() {
    let mut s = CareStore::new_in_memory();
    seed_recipient(&mut s);
    let dup_user = UserProfile::v1(
        user("carer_1"),
        "carer@example.org".to_string(),
        "Ada Carer".to_string(),
        None,
        Role::Caregiver,
    )
    .unwrap();
    assert!(matches!(
        s.insert_user_row(dup_user),
        Err(StorageError::DuplicateKey { table: "users", .. })
    ));
    assert!(matches!(
        s.create_care_recipient_row(
            &user("carer_9"),
            recipient_draft("Copy", Some("iris@example.org")),
            t0()
        ),
        Err(StorageError::DuplicateKey { .. })
    ));
}

#[test]
fn at_store_db_03_children_require_existing_recipient() {
    let mut s = CareStore::new_in_memory();
    let missing = CareRecipientId::new("cr_999999").unwrap();
    assert!(matches!(
        s.create_appointment_row(&missing, appointment_draft("GP", t0()), t0()),
        Err(StorageError::ForeignKeyViolation { table: "appointments", .. })
    ));
    assert!(matches!(
        s.create_medical_record_row(
            &missing,
            MedicalRecordDraft::care_log("note".to_string(), None, day(2026, 10, 18)),
            t0()
        ),
        Err(StorageError::ForeignKeyViolation { .. })
    ));
}

#[test]
fn at_store_db_04_appointments_ascending_and_upcoming_filters_status() {
    let mut s = CareStore::new_in_memory();
    let cr = seed_recipient(&mut s);
    let late = s
        .create_appointment_row(&cr, appointment_draft("late", t0() + Duration::days(3)), t0())
        .unwrap();
    let early = s
        .create_appointment_row(&cr, appointment_draft("early", t0() + Duration::days(1)), t0())
        .unwrap();
    let past = s
        .create_appointment_row(&cr, appointment_draft("past", t0() - Duration::days(1)), t0())
        .unwrap();

    let order: Vec<_> = s
        .appointment_rows(&cr)
        .into_iter()
        .map(|a| a.id.clone())
        .collect();
    assert_eq!(order, vec![past, early.clone(), late.clone()]);

    s.set_appointment_status_row(&early, AppointmentStatus::Completed, t0())
        .unwrap();
    let upcoming: Vec<_> = s
        .upcoming_appointment_rows(&cr, t0())
        .into_iter()
        .map(|a| a.id.clone())
        .collect();
    assert_eq!(upcoming, vec![late]);
}

#[test]
fn at_store_db_05_reschedule_keeps_id_and_marks_rescheduled() {
    let mut s = CareStore::new_in_memory();
    let cr = seed_recipient(&mut s);
    let id = s
        .create_appointment_row(&cr, appointment_draft("GP", t0() + Duration::days(1)), t0())
        .unwrap();
    let moved_to = t0() + Duration::days(2);
    s.reschedule_appointment_row(&id, moved_to, t0() + Duration::minutes(5))
        .unwrap();
    let row = s.appointment_row(&id).unwrap();
    assert_eq!(row.scheduled_at, Some(moved_to));
    assert_eq!(row.status, AppointmentStatus::Rescheduled);
    assert_eq!(row.updated_at, t0() + Duration::minutes(5));
}

#[test]
fn at_store_db_06_medications_filtered_and_newest_first() {
    let mut s = CareStore::new_in_memory();
    let cr = seed_recipient(&mut s);
    s.create_medical_record_row(
        &cr,
        MedicalRecordDraft::medication("Donepezil".to_string(), None, day(2026, 1, 5)),
        t0(),
    )
    .unwrap();
    s.create_medical_record_row(
        &cr,
        MedicalRecordDraft::medication("Sertraline".to_string(), None, day(2026, 6, 1)),
        t0(),
    )
    .unwrap();
    s.create_medical_record_row(
        &cr,
        MedicalRecordDraft::care_log("restless night".to_string(), None, day(2026, 9, 1)),
        t0(),
    )
    .unwrap();

    let meds: Vec<_> = s
        .active_medication_rows(&cr)
        .into_iter()
        .map(|r| r.details.title.clone())
        .collect();
    assert_eq!(meds, vec!["Sertraline", "Donepezil"]);
    assert_eq!(
        s.medical_record_rows_by_type(&cr, MedicalRecordType::Condition)
            .len(),
        1
    );
    assert_eq!(s.medical_record_rows(&cr).len(), 3);
}

#[test]
fn at_store_db_07_document_upload_stores_blob_and_checksum() {
    let mut s = CareStore::new_in_memory();
    let cr = seed_recipient(&mut s);
    let bytes = b"%PDF-1.4 insurance card".to_vec();
    let id = s
        .upload_document_row(
            &cr,
            DocumentDraft {
                name: "Insurance card".to_string(),
                category: DocumentCategory::Insurance,
                description: None,
            },
            "insurance card.pdf",
            bytes.clone(),
            t0(),
        )
        .unwrap();
    let row = s.document_row(&id).unwrap().clone();
    assert!(row.file_url.starts_with("documents/doc_"));
    assert!(row.file_url.ends_with("_insurance_card.pdf"));
    assert_eq!(row.file_size, bytes.len() as u64);
    assert_eq!(row.checksum_sha256.len(), 64);
    assert_eq!(s.document_blob_bytes(&row.file_url), Some(bytes.as_slice()));
    assert_eq!(
        s.document_rows_by_category(&cr, DocumentCategory::Legal).len(),
        0
    );

    s.delete_document_row(&id).unwrap();
    assert!(s.document_blob_bytes(&row.file_url).is_none());
    assert!(s.document_rows(&cr).is_empty());
}

#[test]
fn at_store_db_08_emergency_contacts_primary_first() {
    let mut s = CareStore::new_in_memory();
    let cr = seed_recipient(&mut s);
    for (name, primary) in [("Zoe", false), ("Tom", true), ("Amy", false)] {
        s.create_emergency_contact_row(
            &cr,
            EmergencyContactDraft {
                name: name.to_string(),
                relationship: None,
                phone: Some("+44 20 7946 0000".to_string()),
                email: None,
                is_primary: primary,
            },
            t0(),
        )
        .unwrap();
    }
    let names: Vec<_> = s
        .emergency_contact_rows(&cr)
        .into_iter()
        .map(|c| c.details.name.clone())
        .collect();
    assert_eq!(names, vec!["Tom", "Amy", "Zoe"]);
}

#[test]
fn at_store_db_09_recipient_delete_cascades_and_reports_appointments() {
    let mut s = CareStore::new_in_memory();
    let cr = seed_recipient(&mut s);
    let a1 = s
        .create_appointment_row(&cr, appointment_draft("GP", t0()), t0())
        .unwrap();
    s.create_medical_record_row(
        &cr,
        MedicalRecordDraft::care_log("ok day".to_string(), None, day(2026, 10, 1)),
        t0(),
    )
    .unwrap();

    let removed = s.delete_care_recipient_row(&cr).unwrap();
    assert_eq!(removed, vec![a1.clone()]);
    assert!(s.appointment_row(&a1).is_none());
    assert!(s.medical_record_rows(&cr).is_empty());
    assert!(matches!(
        s.delete_care_recipient_row(&cr),
        Err(StorageError::NotFound { .. })
    ));
}
