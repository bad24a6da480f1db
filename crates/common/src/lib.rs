//! Shared configuration, errors and domain types for the Nudge push scheduler.

pub mod config;
pub mod db;
pub mod error;
pub mod types;
