//! Core domain types: identifiers, cron schedules, definitions and instances.

pub mod definition;
pub mod instance;
pub mod schedule;
pub mod types;
