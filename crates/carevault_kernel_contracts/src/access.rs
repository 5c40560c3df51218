#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::{string_id, validate_email, validate_opt_text, validate_text};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const ACCESS_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

string_id!(
    /// Identity-provider user id of a signed-in caregiver or patient.
    UserId,
    "user_id",
    128
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Caregiver,
    Patient,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Caregiver, Role::Patient];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Caregiver => "caregiver",
            Role::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "caregiver" => Ok(Role::Caregiver),
            "patient" => Ok(Role::Patient),
            _ => Err(ContractViolation::InvalidValue {
                field: "role",
                reason: "must be caregiver or patient",
            }),
        }
    }
}

/// Every action the application gates. The set is closed: a new variant must
/// also be given an explicit value in every role's [`PermissionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "canViewPatientInfo")]
    ViewPatientInfo,
    #[serde(rename = "canEditPatientInfo")]
    EditPatientInfo,
    #[serde(rename = "canManageMedications")]
    ManageMedications,
    #[serde(rename = "canAddCareLogs")]
    AddCareLogs,
    #[serde(rename = "canEditCareLogs")]
    EditCareLogs,
    #[serde(rename = "canDeleteCareLogs")]
    DeleteCareLogs,
    #[serde(rename = "canManageAppointments")]
    ManageAppointments,
    #[serde(rename = "canUploadDocuments")]
    UploadDocuments,
    #[serde(rename = "canDeleteDocuments")]
    DeleteDocuments,
    #[serde(rename = "canViewEmergencySummary")]
    ViewEmergencySummary,
    #[serde(rename = "canExportEmergencySummary")]
    ExportEmergencySummary,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::ViewPatientInfo,
        Capability::EditPatientInfo,
        Capability::ManageMedications,
        Capability::AddCareLogs,
        Capability::EditCareLogs,
        Capability::DeleteCareLogs,
        Capability::ManageAppointments,
        Capability::UploadDocuments,
        Capability::DeleteDocuments,
        Capability::ViewEmergencySummary,
        Capability::ExportEmergencySummary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ViewPatientInfo => "canViewPatientInfo",
            Capability::EditPatientInfo => "canEditPatientInfo",
            Capability::ManageMedications => "canManageMedications",
            Capability::AddCareLogs => "canAddCareLogs",
            Capability::EditCareLogs => "canEditCareLogs",
            Capability::DeleteCareLogs => "canDeleteCareLogs",
            Capability::ManageAppointments => "canManageAppointments",
            Capability::UploadDocuments => "canUploadDocuments",
            Capability::DeleteDocuments => "canDeleteDocuments",
            Capability::ViewEmergencySummary => "canViewEmergencySummary",
            Capability::ExportEmergencySummary => "canExportEmergencySummary",
        }
    }

    /// Capabilities that only read or export data.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Capability::ViewPatientInfo
                | Capability::ViewEmergencySummary
                | Capability::ExportEmergencySummary
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or(ContractViolation::InvalidValue {
                field: "capability",
                reason: "unknown capability name",
            })
    }
}

/// Fixed capability table for one role. Field-per-capability so that a table
/// literal cannot omit an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub can_view_patient_info: bool,
    pub can_edit_patient_info: bool,
    pub can_manage_medications: bool,
    pub can_add_care_logs: bool,
    pub can_edit_care_logs: bool,
    pub can_delete_care_logs: bool,
    pub can_manage_appointments: bool,
    pub can_upload_documents: bool,
    pub can_delete_documents: bool,
    pub can_view_emergency_summary: bool,
    pub can_export_emergency_summary: bool,
}

impl PermissionSet {
    pub const NONE: PermissionSet = PermissionSet {
        can_view_patient_info: false,
        can_edit_patient_info: false,
        can_manage_medications: false,
        can_add_care_logs: false,
        can_edit_care_logs: false,
        can_delete_care_logs: false,
        can_manage_appointments: false,
        can_upload_documents: false,
        can_delete_documents: false,
        can_view_emergency_summary: false,
        can_export_emergency_summary: false,
    };

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::ViewPatientInfo => self.can_view_patient_info,
            Capability::EditPatientInfo => self.can_edit_patient_info,
            Capability::ManageMedications => self.can_manage_medications,
            Capability::AddCareLogs => self.can_add_care_logs,
            Capability::EditCareLogs => self.can_edit_care_logs,
            Capability::DeleteCareLogs => self.can_delete_care_logs,
            Capability::ManageAppointments => self.can_manage_appointments,
            Capability::UploadDocuments => self.can_upload_documents,
            Capability::DeleteDocuments => self.can_delete_documents,
            Capability::ViewEmergencySummary => self.can_view_emergency_summary,
            Capability::ExportEmergencySummary => self.can_export_emergency_summary,
        }
    }

    pub fn granted(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.allows(*c))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub schema_version: SchemaVersion,
    pub user_id: UserId,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

impl UserProfile {
    pub fn v1(
        user_id: UserId,
        email: String,
        full_name: String,
        phone: Option<String>,
        role: Role,
    ) -> Result<Self, ContractViolation> {
        let v = Self {
            schema_version: ACCESS_CONTRACT_VERSION,
            user_id,
            email,
            full_name,
            phone,
            role,
        };
        v.validate()?;
        Ok(v)
    }
}

impl Validate for UserProfile {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.user_id.validate()?;
        validate_email("user_profile.email", &self.email)?;
        validate_text("user_profile.full_name", &self.full_name, 256)?;
        validate_opt_text("user_profile.phone", &self.phone, 64)?;
        Ok(())
    }
}

/// What the identity collaborator tells us about the caller. `role` is absent
/// while the profile is still loading or when the profile has no role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Option<UserId>,
    pub role: Option<Role>,
}

impl SessionContext {
    pub fn new(user_id: Option<UserId>, role: Option<Role>) -> Self {
        Self { user_id, role }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            role: None,
        }
    }
}
