//! Retention matrices: distinct-customer counts pivoted by cohort month and
//! cohort index, and their percentage form

use crate::cohort::OffsetRecord;
use crate::data::CUSTOMER_ID;
use crate::error::{CohortError, PipelineResult};
use chrono::{Datelike, NaiveDate};
use ndarray::{Array2, ArrayView1};
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};

/// Cohort month as days since 0001-01-01, the grouping key inside frames
const COHORT_DAY: &str = "CohortDay";
const COHORT_INDEX: &str = "CohortIndex";
const CUSTOMERS: &str = "Customers";

/// Absolute retention counts
///
/// Row `r` is `cohorts()[r]`, column `c` is cohort index `indices()[c]`. Both
/// are strictly ascending and the cell holds the number of distinct customers
/// of that cohort active at that index (zero when none were).
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionMatrix {
    cohorts: Vec<NaiveDate>,
    indices: Vec<u32>,
    counts: Array2<u64>,
}

/// Retention relative to month 1, in percent
///
/// `None` marks a row without month-1 activity.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPercentMatrix {
    cohorts: Vec<NaiveDate>,
    indices: Vec<u32>,
    values: Array2<Option<f64>>,
}

fn check_axes<T>(
    cohorts: &[NaiveDate],
    indices: &[u32],
    cells: &Array2<T>,
) -> PipelineResult<()> {
    if cells.dim() != (cohorts.len(), indices.len()) {
        return Err(CohortError::MalformedMatrix(format!(
            "{}x{} cells for {} cohorts and {} indices",
            cells.nrows(),
            cells.ncols(),
            cohorts.len(),
            indices.len()
        )));
    }
    if !cohorts.windows(2).all(|w| w[0] < w[1]) {
        return Err(CohortError::MalformedMatrix(
            "cohort months must be strictly ascending".to_string(),
        ));
    }
    if !indices.windows(2).all(|w| w[0] < w[1]) || indices.first() == Some(&0) {
        return Err(CohortError::MalformedMatrix(
            "cohort indices must be strictly ascending and start at 1 or later".to_string(),
        ));
    }
    Ok(())
}

/// Count distinct customers per (cohort month, cohort index)
///
/// The column set is every cohort index observed in `offsets`. A customer
/// buying several times within one month counts once for that month.
pub fn build_matrix(offsets: &[OffsetRecord]) -> PipelineResult<RetentionMatrix> {
    let customer_ids: Vec<i64> = offsets.iter().map(|o| o.customer_id).collect();
    let cohort_days: Vec<i32> = offsets
        .iter()
        .map(|o| o.cohort_month.num_days_from_ce())
        .collect();
    let cohort_indices: Vec<u32> = offsets.iter().map(|o| o.cohort_index).collect();

    let grouped = DataFrame::new(vec![
        Series::new(CUSTOMER_ID, customer_ids),
        Series::new(COHORT_DAY, cohort_days),
        Series::new(COHORT_INDEX, cohort_indices),
    ])?
    .lazy()
    .group_by([col(COHORT_DAY), col(COHORT_INDEX)])
    .agg([col(CUSTOMER_ID)
        .n_unique()
        .cast(DataType::UInt64)
        .alias(CUSTOMERS)])
    .collect()?;

    let days = grouped.column(COHORT_DAY)?.i32()?;
    let index_column = grouped.column(COHORT_INDEX)?.u32()?;
    let customers = grouped.column(CUSTOMERS)?.u64()?;

    let mut cells: HashMap<(NaiveDate, u32), u64> = HashMap::new();
    let mut cohort_set = BTreeSet::new();
    let mut index_set = BTreeSet::new();
    for ((day, index), count) in days
        .into_no_null_iter()
        .zip(index_column.into_no_null_iter())
        .zip(customers.into_no_null_iter())
    {
        let cohort = NaiveDate::from_num_days_from_ce_opt(day)
            .ok_or_else(|| CohortError::Frame(format!("Cohort day {day} is out of range")))?;
        cells.insert((cohort, index), count);
        cohort_set.insert(cohort);
        index_set.insert(index);
    }

    let cohorts: Vec<NaiveDate> = cohort_set.into_iter().collect();
    let indices: Vec<u32> = index_set.into_iter().collect();
    let counts = Array2::from_shape_fn((cohorts.len(), indices.len()), |(r, c)| {
        cells.get(&(cohorts[r], indices[c])).copied().unwrap_or(0)
    });

    log::debug!(
        "Pivoted {} cohort-offset cells into {} cohorts x {} offsets",
        cells.len(),
        cohorts.len(),
        indices.len()
    );

    RetentionMatrix::new(cohorts, indices, counts)
}

impl RetentionMatrix {
    /// Assemble a matrix, checking that the grid matches both axes and that
    /// the axes are sorted
    pub fn new(
        cohorts: Vec<NaiveDate>,
        indices: Vec<u32>,
        counts: Array2<u64>,
    ) -> PipelineResult<RetentionMatrix> {
        check_axes(&cohorts, &indices, &counts)?;
        Ok(RetentionMatrix {
            cohorts,
            indices,
            counts,
        })
    }

    pub fn cohorts(&self) -> &[NaiveDate] {
        &self.cohorts
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    fn row_of(&self, cohort: NaiveDate) -> Option<usize> {
        self.cohorts.binary_search(&cohort).ok()
    }

    fn column_of(&self, index: u32) -> Option<usize> {
        self.indices.binary_search(&index).ok()
    }

    /// Cell value, or `None` if the cohort or index is not part of the matrix
    pub fn count(&self, cohort: NaiveDate, index: u32) -> Option<u64> {
        Some(self.counts[[self.row_of(cohort)?, self.column_of(index)?]])
    }

    /// Number of customers in a cohort (its month-1 count)
    pub fn cohort_size(&self, cohort: NaiveDate) -> u64 {
        self.count(cohort, 1).unwrap_or(0)
    }

    /// Number of customers across all cohorts
    pub fn total_customers(&self) -> u64 {
        self.column_of(1)
            .map(|c| self.counts.column(c).sum())
            .unwrap_or(0)
    }

    /// Rows in cohort order
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, ArrayView1<'_, u64>)> {
        self.cohorts.iter().copied().zip(self.counts.rows())
    }

    /// Reshape to exactly the columns `1..=max_index`
    ///
    /// Unobserved indices are zero-filled and indices past the window are
    /// dropped; a window of 13 gives the classic one-year layout.
    pub fn with_window(&self, max_index: u32) -> PipelineResult<RetentionMatrix> {
        if max_index == 0 {
            return Err(CohortError::InvalidWindow(max_index));
        }

        let indices: Vec<u32> = (1..=max_index).collect();
        let counts = Array2::from_shape_fn((self.cohorts.len(), indices.len()), |(r, c)| {
            self.column_of(indices[c])
                .map(|source| self.counts[[r, source]])
                .unwrap_or(0)
        });

        Ok(RetentionMatrix {
            cohorts: self.cohorts.clone(),
            indices,
            counts,
        })
    }
}

/// Express every row as a percentage of its month-1 count
///
/// Rows whose month-1 count is zero, or matrices without a month-1 column,
/// produce `None` cells instead of dividing by zero.
pub fn to_percent(matrix: &RetentionMatrix) -> RetentionPercentMatrix {
    let base_column = matrix.column_of(1);
    let values = Array2::from_shape_fn(matrix.counts.dim(), |(r, c)| {
        let base = base_column.map(|b| matrix.counts[[r, b]]).unwrap_or(0);
        if base == 0 {
            None
        } else {
            Some(100.0 * matrix.counts[[r, c]] as f64 / base as f64)
        }
    });

    RetentionPercentMatrix {
        cohorts: matrix.cohorts.clone(),
        indices: matrix.indices.clone(),
        values,
    }
}

impl RetentionPercentMatrix {
    /// Assemble a percent matrix with the same checks as [`RetentionMatrix::new`]
    pub fn new(
        cohorts: Vec<NaiveDate>,
        indices: Vec<u32>,
        values: Array2<Option<f64>>,
    ) -> PipelineResult<RetentionPercentMatrix> {
        check_axes(&cohorts, &indices, &values)?;
        Ok(RetentionPercentMatrix {
            cohorts,
            indices,
            values,
        })
    }

    pub fn cohorts(&self) -> &[NaiveDate] {
        &self.cohorts
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn values(&self) -> &Array2<Option<f64>> {
        &self.values
    }

    pub fn value(&self, cohort: NaiveDate, index: u32) -> Option<f64> {
        let r = self.cohorts.binary_search(&cohort).ok()?;
        let c = self.indices.binary_search(&index).ok()?;
        self.values[[r, c]]
    }

    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, ArrayView1<'_, Option<f64>>)> {
        self.cohorts.iter().copied().zip(self.values.rows())
    }

    /// Mean retention per column over the rows where it is defined
    pub fn average_by_index(&self) -> Vec<Option<f64>> {
        self.values
            .columns()
            .into_iter()
            .map(|column| {
                let defined: Vec<f64> = column.iter().flatten().copied().collect();
                if defined.is_empty() {
                    None
                } else {
                    Some(defined.iter().sum::<f64>() / defined.len() as f64)
                }
            })
            .collect()
    }
}
