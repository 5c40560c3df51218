#![forbid(unsafe_code)]

pub mod access;
pub mod appointment;
pub mod care;
pub mod common;
pub mod emergency;
pub mod reminder;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};
