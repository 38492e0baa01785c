//! Top-level retention pipeline: clean, assign cohorts, compute offsets,
//! pivot and normalize

use crate::cleaner::{clean, CleaningStats};
use crate::cohort::{assign_cohorts, compute_offsets, CohortAssignment};
use crate::data::Transaction;
use crate::error::{CohortError, PipelineResult};
use crate::matrix::{build_matrix, to_percent, RetentionMatrix, RetentionPercentMatrix};
use std::collections::BTreeMap;

/// Which cohort indices become matrix columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnWindow {
    /// Every index observed in the data
    #[default]
    Dynamic,
    /// Exactly `1..=n`
    Fixed(u32),
}

/// Everything produced by one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct CohortReport {
    pub stats: CleaningStats,
    pub cohorts: BTreeMap<i64, CohortAssignment>,
    pub counts: RetentionMatrix,
    pub percent: RetentionPercentMatrix,
}

/// Run the full retention computation over a batch of raw transactions
///
/// Either both matrices are produced or an error is returned; nothing
/// partial escapes a failed run.
pub fn run<I>(raw: I, window: ColumnWindow) -> PipelineResult<CohortReport>
where
    I: IntoIterator<Item = Transaction>,
{
    if let ColumnWindow::Fixed(0) = window {
        return Err(CohortError::InvalidWindow(0));
    }

    let cleaned = clean(raw)?;
    log::info!(
        "Cleaned {} raw records into {} transactions",
        cleaned.stats.read,
        cleaned.stats.kept
    );
    if cleaned.transactions.is_empty() && cleaned.stats.read > 0 {
        log::warn!("No transactions survived cleaning; the report will be empty");
    }

    let cohorts = assign_cohorts(&cleaned.transactions)?;
    let offsets = compute_offsets(&cleaned.transactions, &cohorts)?;
    let dynamic = build_matrix(&offsets)?;

    let counts = match window {
        ColumnWindow::Dynamic => dynamic,
        ColumnWindow::Fixed(max_index) => dynamic.with_window(max_index)?,
    };
    let percent = to_percent(&counts);

    log::info!(
        "Built retention matrix: {} customers in {} cohorts over {} offsets",
        cohorts.len(),
        counts.cohorts().len(),
        counts.indices().len()
    );

    Ok(CohortReport {
        stats: cleaned.stats,
        cohorts,
        counts,
        percent,
    })
}
