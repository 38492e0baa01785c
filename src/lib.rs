//! CohortForge: A Rust CLI application for customer cohort retention analysis
//!
//! Customers are grouped by the calendar month of their first purchase and
//! followed month by month, producing a matrix of active-customer counts and
//! the same matrix as a percentage of each cohort's first month.

pub mod cleaner;
pub mod cli;
pub mod cohort;
pub mod data;
pub mod error;
pub mod matrix;
pub mod pipeline;
pub mod report;

// Re-export public items for easier access
pub use cleaner::{clean, CleanTransaction, Cleaned, CleaningStats};
pub use cli::Args;
pub use cohort::{assign_cohorts, compute_offsets, CohortAssignment, OffsetRecord};
pub use data::{load_transactions, Transaction};
pub use error::{CohortError, PipelineResult};
pub use matrix::{build_matrix, to_percent, RetentionMatrix, RetentionPercentMatrix};
pub use pipeline::{run, CohortReport, ColumnWindow};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
