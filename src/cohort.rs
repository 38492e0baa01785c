//! Cohort assignment and month-offset computation

use crate::cleaner::CleanTransaction;
use crate::data::{from_timestamp_micros, timestamp_micros, CUSTOMER_ID, INVOICE_TS};
use crate::error::{CohortError, PipelineResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;

const FIRST_PURCHASE: &str = "FirstPurchase";

/// A customer's cohort, fixed by the month of their first purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortAssignment {
    pub customer_id: i64,
    pub first_purchase: NaiveDateTime,
    /// First calendar day of the first-purchase month
    pub cohort_month: NaiveDate,
}

/// A clean transaction placed relative to its customer's cohort month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetRecord {
    pub customer_id: i64,
    pub cohort_month: NaiveDate,
    pub invoice_date: NaiveDateTime,
    /// 1 for the cohort month itself, 2 for the month after, and so on
    pub cohort_index: u32,
}

/// Truncate a timestamp to the first day of its calendar month
pub fn month_start(timestamp: NaiveDateTime) -> NaiveDate {
    timestamp.date().with_day(1).unwrap_or(timestamp.date())
}

/// 1-based number of calendar months from `cohort_month` to `timestamp`
///
/// Zero or negative when `timestamp` falls before the cohort month.
pub fn cohort_index(cohort_month: NaiveDate, timestamp: NaiveDateTime) -> i64 {
    let years = i64::from(timestamp.year()) - i64::from(cohort_month.year());
    let months = i64::from(timestamp.month()) - i64::from(cohort_month.month());
    years * 12 + months + 1
}

/// Build the assignment for one customer from their earliest purchase
///
/// `None` means the customer had no transactions to take a minimum over.
pub fn assign_cohort(
    customer_id: i64,
    first_purchase: Option<NaiveDateTime>,
) -> PipelineResult<CohortAssignment> {
    let first_purchase = first_purchase.ok_or(CohortError::EmptyInput { customer_id })?;

    Ok(CohortAssignment {
        customer_id,
        first_purchase,
        cohort_month: month_start(first_purchase),
    })
}

/// Assign every customer present in `clean` to a cohort
pub fn assign_cohorts(
    clean: &[CleanTransaction],
) -> PipelineResult<BTreeMap<i64, CohortAssignment>> {
    let customer_ids: Vec<i64> = clean.iter().map(|t| t.customer_id).collect();
    let invoice_ts: Vec<i64> = clean
        .iter()
        .map(|t| timestamp_micros(t.invoice_date))
        .collect();

    let first_purchases = DataFrame::new(vec![
        Series::new(CUSTOMER_ID, customer_ids),
        Series::new(INVOICE_TS, invoice_ts),
    ])?
    .lazy()
    .group_by([col(CUSTOMER_ID)])
    .agg([col(INVOICE_TS).min().alias(FIRST_PURCHASE)])
    .collect()?;

    let customers = first_purchases.column(CUSTOMER_ID)?.i64()?;
    let firsts = first_purchases.column(FIRST_PURCHASE)?.i64()?;

    let mut cohorts = BTreeMap::new();
    for (customer_id, first) in customers.into_iter().zip(firsts.into_iter()) {
        let customer_id = customer_id
            .ok_or_else(|| CohortError::Frame("Null customer id after grouping".to_string()))?;
        let first_purchase = first.map(from_timestamp_micros).transpose()?;
        cohorts.insert(customer_id, assign_cohort(customer_id, first_purchase)?);
    }

    log::debug!("Assigned {} customers to cohorts", cohorts.len());
    Ok(cohorts)
}

/// Compute the cohort index of every clean transaction
///
/// Fails fast if a customer has no assignment or if a transaction predates
/// its customer's cohort month; both mean the inputs did not come from the
/// same cleaned data set.
pub fn compute_offsets(
    clean: &[CleanTransaction],
    cohorts: &BTreeMap<i64, CohortAssignment>,
) -> PipelineResult<Vec<OffsetRecord>> {
    clean
        .iter()
        .map(|transaction| {
            let customer_id = transaction.customer_id;
            let assignment = cohorts
                .get(&customer_id)
                .ok_or(CohortError::MissingCohort { customer_id })?;

            let index = cohort_index(assignment.cohort_month, transaction.invoice_date);
            let cohort_index = u32::try_from(index)
                .ok()
                .filter(|&i| i >= 1)
                .ok_or_else(|| CohortError::InvariantViolation {
                    customer_id,
                    invoice_date: transaction.invoice_date,
                    cohort_month: assignment.cohort_month,
                    cohort_index: index,
                })?;

            Ok(OffsetRecord {
                customer_id,
                cohort_month: assignment.cohort_month,
                invoice_date: transaction.invoice_date,
                cohort_index,
            })
        })
        .collect()
}
