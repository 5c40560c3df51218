#![forbid(unsafe_code)]

pub mod care_store;
pub mod kv;
pub mod repo;

pub use care_store::{CareStore, StorageError};
