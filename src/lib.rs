//! Agentsched - time-windowed activation schedules for automated agents

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod scheduling;

pub use error::{Result, StoreError, ValidationError};
