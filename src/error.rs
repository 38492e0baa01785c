//! Error types for the retention pipeline

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CohortError {
    #[error("No transactions supplied for customer {customer_id}")]
    EmptyInput { customer_id: i64 },

    #[error("Customer {customer_id} has no cohort assignment")]
    MissingCohort { customer_id: i64 },

    #[error(
        "Cohort index {cohort_index} for customer {customer_id} at {invoice_date} \
         precedes cohort month {cohort_month}"
    )]
    InvariantViolation {
        customer_id: i64,
        invoice_date: NaiveDateTime,
        cohort_month: NaiveDate,
        cohort_index: i64,
    },

    #[error("Column window must cover at least one month, got {0}")]
    InvalidWindow(u32),

    #[error("Malformed retention matrix: {0}")]
    MalformedMatrix(String),

    /// Polars failures are kept as text so the error stays comparable
    #[error("Frame operation failed: {0}")]
    Frame(String),
}

impl From<PolarsError> for CohortError {
    fn from(err: PolarsError) -> Self {
        CohortError::Frame(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, CohortError>;
