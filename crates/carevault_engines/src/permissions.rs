#![forbid(unsafe_code)]

use carevault_kernel_contracts::access::{Capability, PermissionSet, Role};
use carevault_kernel_contracts::ReasonCodeId;

pub mod reason_codes {
    use carevault_kernel_contracts::ReasonCodeId;

    // Permission resolver reason-code namespace.
    pub const PERM_OK_GRANTED: ReasonCodeId = ReasonCodeId(0x5045_0001);
    pub const PERM_DENIED_CAPABILITY: ReasonCodeId = ReasonCodeId(0x5045_0010);
    pub const PERM_DENIED_NO_ROLE: ReasonCodeId = ReasonCodeId(0x5045_0011);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("session has no recognized role")]
    InvalidRole,
}

pub const CAREGIVER_PERMISSIONS: PermissionSet = PermissionSet {
    can_view_patient_info: true,
    can_edit_patient_info: true,
    can_manage_medications: true,
    can_add_care_logs: true,
    can_edit_care_logs: true,
    can_delete_care_logs: true,
    can_manage_appointments: true,
    can_upload_documents: true,
    can_delete_documents: true,
    can_view_emergency_summary: true,
    can_export_emergency_summary: true,
};

pub const PATIENT_PERMISSIONS: PermissionSet = PermissionSet {
    can_view_patient_info: true,
    can_edit_patient_info: false,
    can_manage_medications: false,
    can_add_care_logs: false,
    can_edit_care_logs: false,
    can_delete_care_logs: false,
    can_manage_appointments: false,
    can_upload_documents: false,
    can_delete_documents: false,
    can_view_emergency_summary: true,
    can_export_emergency_summary: true,
};

/// Static table lookup. Total over [`Role`]; `None` means the session has not
/// produced a role (still loading, or a profile without one).
pub fn permissions_for(role: Option<Role>) -> Result<PermissionSet, PermissionError> {
    match role {
        Some(Role::Caregiver) => Ok(CAREGIVER_PERMISSIONS),
        Some(Role::Patient) => Ok(PATIENT_PERMISSIONS),
        None => Err(PermissionError::InvalidRole),
    }
}

/// Fail-closed: an absent role grants nothing.
pub fn has_permission(role: Option<Role>, capability: Capability) -> bool {
    permissions_for(role).is_ok_and(|set| set.allows(capability))
}

/// Same check for a role still in its raw string form. Unrecognized strings
/// grant nothing.
pub fn has_permission_str(role: Option<&str>, capability: Capability) -> bool {
    has_permission(role.and_then(|r| r.parse::<Role>().ok()), capability)
}

pub fn is_caregiver(role: Option<Role>) -> bool {
    role == Some(Role::Caregiver)
}

pub fn is_patient(role: Option<Role>) -> bool {
    role == Some(Role::Patient)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub capability: Capability,
    pub allowed: bool,
    pub reason_code: ReasonCodeId,
}

/// [`has_permission`] plus the reason it came out that way.
pub fn decide(role: Option<Role>, capability: Capability) -> AccessDecision {
    let (allowed, reason_code) = match permissions_for(role) {
        Err(PermissionError::InvalidRole) => (false, reason_codes::PERM_DENIED_NO_ROLE),
        Ok(set) if set.allows(capability) => (true, reason_codes::PERM_OK_GRANTED),
        Ok(_) => (false, reason_codes::PERM_DENIED_CAPABILITY),
    };
    AccessDecision {
        capability,
        allowed,
        reason_code,
    }
}
