#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaVersion(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReasonCodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field} out of range: expected {min}..={max}, got {got}")]
    InvalidRange {
        field: &'static str,
        min: i64,
        max: i64,
        got: i64,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_id(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    if !value.is_ascii() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be ASCII",
        });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

pub(crate) fn validate_text(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.chars().count() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    Ok(())
}

pub(crate) fn validate_opt_text(
    field: &'static str,
    value: &Option<String>,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if let Some(v) = value {
        if v.chars().count() > max_len {
            return Err(ContractViolation::InvalidValue {
                field,
                reason: "exceeds max length",
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_email(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    validate_id(field, value, 254)?;
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must contain '@'",
        });
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be local@domain",
        });
    }
    Ok(())
}

/// Declares a validated string id newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal, $max:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, $crate::ContractViolation> {
                let v = Self(id.into());
                $crate::Validate::validate(&v)?;
                Ok(v)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl $crate::Validate for $name {
            fn validate(&self) -> Result<(), $crate::ContractViolation> {
                $crate::common::validate_id($field, &self.0, $max)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::ContractViolation;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

pub(crate) use string_id;
