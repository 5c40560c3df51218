#![forbid(unsafe_code)]

pub mod actions;
pub mod emergency;
pub mod reminder;
