#![forbid(unsafe_code)]

use std::fmt::Write as _;

use carevault_kernel_contracts::care::{CareRecipient, EmergencyContact, MedicalRecord};
use carevault_kernel_contracts::emergency::{
    EmergencyContactLine, EmergencySummary, MedicationLine, EMERGENCY_CONTRACT_VERSION,
};
use chrono::{DateTime, Utc};

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Assembles the one-page summary. The contact written on the recipient row
/// wins; otherwise the primary emergency contact row is used.
pub fn build_emergency_summary<'a>(
    recipient: &CareRecipient,
    medications: impl IntoIterator<Item = &'a MedicalRecord>,
    primary_contact: Option<&EmergencyContact>,
    generated_at: DateTime<Utc>,
) -> EmergencySummary {
    let d = &recipient.details;
    let emergency_contact = match non_blank(&d.emergency_contact_name) {
        Some(name) => Some(EmergencyContactLine {
            name,
            phone: non_blank(&d.emergency_contact_phone),
            relationship: non_blank(&d.emergency_contact_relationship),
        }),
        None => primary_contact.map(|c| EmergencyContactLine {
            name: c.details.name.clone(),
            phone: non_blank(&c.details.phone),
            relationship: non_blank(&c.details.relationship),
        }),
    };
    let medications = medications
        .into_iter()
        .filter(|m| m.is_medication() && m.is_active)
        .map(|m| MedicationLine {
            title: m.details.title.clone(),
            description: non_blank(&m.details.description),
        })
        .collect();

    EmergencySummary {
        schema_version: EMERGENCY_CONTRACT_VERSION,
        care_recipient_id: recipient.id.clone(),
        full_name: recipient.full_name(),
        date_of_birth: d.date_of_birth,
        emergency_contact,
        allergies: non_blank(&d.allergies),
        medications,
        diagnosis: non_blank(&d.diagnosis),
        medical_conditions: non_blank(&d.medical_conditions),
        generated_at,
    }
}

/// Plain-text export. Sections with nothing to say are left out.
pub fn render_text(summary: &EmergencySummary) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "EMERGENCY MEDICAL SUMMARY");
    let _ = writeln!(out);
    let _ = writeln!(out, "PATIENT INFORMATION");
    let _ = writeln!(out, "Name: {}", summary.full_name);
    let _ = writeln!(out, "DOB: {}", summary.date_of_birth.format("%Y-%m-%d"));

    if let Some(c) = &summary.emergency_contact {
        let _ = writeln!(out);
        let _ = writeln!(out, "EMERGENCY CONTACT");
        let phone = c.phone.as_deref().unwrap_or("N/A");
        match &c.relationship {
            Some(rel) => {
                let _ = writeln!(out, "{} - {} ({})", c.name, phone, rel);
            }
            None => {
                let _ = writeln!(out, "{} - {}", c.name, phone);
            }
        }
    }

    if let Some(allergies) = &summary.allergies {
        let _ = writeln!(out);
        let _ = writeln!(out, "ALLERGIES");
        let _ = writeln!(out, "{allergies}");
    }

    if !summary.medications.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "CURRENT MEDICATIONS");
        for med in &summary.medications {
            let _ = writeln!(out, "- {}", med.title);
            if let Some(desc) = &med.description {
                let _ = writeln!(out, "  {desc}");
            }
        }
    }

    if let Some(diagnosis) = &summary.diagnosis {
        let _ = writeln!(out);
        let _ = writeln!(out, "DIAGNOSIS");
        let _ = writeln!(out, "{diagnosis}");
    }

    if let Some(conditions) = &summary.medical_conditions {
        let _ = writeln!(out);
        let _ = writeln!(out, "MEDICAL CONDITIONS");
        let _ = writeln!(out, "{conditions}");
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Generated: {}",
        summary.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "CareVault Emergency Summary");
    out
}
