//! Display formatting for terminal output
//!
//! Renders backup listings and job records as tables and detail views.

pub mod backup;
pub mod job;

pub use backup::{format_backup_list, format_size};
pub use job::{format_job_details, format_job_list};
