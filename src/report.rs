//! Text tables and CSV export for retention matrices

use crate::cleaner::CleaningStats;
use crate::matrix::{RetentionMatrix, RetentionPercentMatrix};
use anyhow::Context;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Name of the row-key column in exported CSV files
pub const COHORT_COLUMN: &str = "CohortMonth";

/// Placeholder for undefined percentages in text tables
const UNDEFINED: &str = "-";

/// Render absolute counts as an aligned text table
pub fn render_counts(matrix: &RetentionMatrix) -> String {
    let rows: Vec<(String, Vec<String>)> = matrix
        .rows()
        .map(|(cohort, row)| {
            (
                month_label(cohort),
                row.iter().map(|count| count.to_string()).collect(),
            )
        })
        .collect();

    render_table(matrix.indices(), &rows)
}

/// Render percentages with `precision` decimals, followed by an average row
pub fn render_percent(matrix: &RetentionPercentMatrix, precision: usize) -> String {
    let format_cell = |value: &Option<f64>| match value {
        Some(v) => format!("{v:.precision$}"),
        None => UNDEFINED.to_string(),
    };

    let mut rows: Vec<(String, Vec<String>)> = matrix
        .rows()
        .map(|(cohort, row)| (month_label(cohort), row.iter().map(format_cell).collect()))
        .collect();

    if !matrix.cohorts().is_empty() {
        rows.push((
            "Average".to_string(),
            matrix.average_by_index().iter().map(format_cell).collect(),
        ));
    }

    render_table(matrix.indices(), &rows)
}

/// One-paragraph description of what cleaning kept and dropped
pub fn render_cleaning_summary(stats: &CleaningStats) -> String {
    format!(
        "Records read: {}\n\
         Records kept: {}\n\
         Skipped (no customer): {}\n\
         Skipped (quantity <= 0): {}\n\
         Skipped (price <= 0): {}\n\
         Skipped (duplicate line): {}",
        stats.read,
        stats.kept,
        stats.missing_customer,
        stats.non_positive_quantity,
        stats.non_positive_price,
        stats.duplicates
    )
}

fn month_label(cohort: NaiveDate) -> String {
    cohort.format("%Y-%m").to_string()
}

fn render_table(indices: &[u32], rows: &[(String, Vec<String>)]) -> String {
    let headers: Vec<String> = indices.iter().map(|i| i.to_string()).collect();

    let label_width = rows
        .iter()
        .map(|(label, _)| label.len())
        .chain(std::iter::once("Cohort".len()))
        .max()
        .unwrap_or(0);
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(c, header)| {
            rows.iter()
                .filter_map(|(_, cells)| cells.get(c))
                .map(String::len)
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let mut push_line = |label: &str, cells: &[String]| {
        out.push_str(&format!("{label:<label_width$}"));
        for (cell, &width) in cells.iter().zip(&widths) {
            out.push_str(&format!("  {cell:>width$}"));
        }
        out.push('\n');
    };

    push_line("Cohort", headers.as_slice());
    for (label, cells) in rows {
        push_line(label.as_str(), cells.as_slice());
    }
    out
}

/// Build a frame with one row per cohort and one column per cohort index
pub fn counts_frame(matrix: &RetentionMatrix) -> crate::Result<DataFrame> {
    let mut columns = vec![cohort_series(matrix.cohorts())];
    for (c, index) in matrix.indices().iter().enumerate() {
        let values: Vec<u64> = matrix.counts().column(c).to_vec();
        columns.push(Series::new(&index.to_string(), values));
    }
    Ok(DataFrame::new(columns)?)
}

/// Same layout as [`counts_frame`]; undefined cells become nulls
pub fn percent_frame(matrix: &RetentionPercentMatrix) -> crate::Result<DataFrame> {
    let mut columns = vec![cohort_series(matrix.cohorts())];
    for (c, index) in matrix.indices().iter().enumerate() {
        let values: Vec<Option<f64>> = matrix.values().column(c).to_vec();
        columns.push(Series::new(&index.to_string(), values));
    }
    Ok(DataFrame::new(columns)?)
}

fn cohort_series(cohorts: &[NaiveDate]) -> Series {
    let labels: Vec<String> = cohorts
        .iter()
        .map(|c| c.format("%Y-%m-%d").to_string())
        .collect();
    Series::new(COHORT_COLUMN, labels)
}

/// Write absolute counts to a CSV file
pub fn write_counts_csv(matrix: &RetentionMatrix, output_path: &Path) -> crate::Result<()> {
    let mut df = counts_frame(matrix)?;
    write_frame(&mut df, output_path)
}

/// Write percentages to a CSV file
pub fn write_percent_csv(matrix: &RetentionPercentMatrix, output_path: &Path) -> crate::Result<()> {
    let mut df = percent_frame(matrix)?;
    write_frame(&mut df, output_path)
}

fn write_frame(df: &mut DataFrame, output_path: &Path) -> crate::Result<()> {
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::to_percent;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample_cohorts() -> Vec<NaiveDate> {
        vec![
            NaiveDate::from_ymd_opt(2010, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2011, 1, 1).unwrap(),
        ]
    }

    fn sample_matrix() -> RetentionMatrix {
        RetentionMatrix::new(sample_cohorts(), vec![1, 2, 3], array![[4u64, 2, 1], [10, 3, 0]])
            .unwrap()
    }

    /// Second cohort has no month-1 activity
    fn headless_matrix() -> RetentionMatrix {
        RetentionMatrix::new(sample_cohorts(), vec![1, 2, 3], array![[4u64, 2, 1], [0, 3, 0]])
            .unwrap()
    }

    #[test]
    fn test_render_counts() {
        let table = render_counts(&sample_matrix());
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Cohort    1  2  3");
        assert_eq!(lines[1], "2010-12   4  2  1");
        assert_eq!(lines[2], "2011-01  10  3  0");
    }

    #[test]
    fn test_render_percent_with_average_and_undefined() {
        let matrix = headless_matrix();
        let table = render_percent(&to_percent(&matrix), 1);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("2010-12"));
        assert!(lines[1].contains("100.0"));
        assert!(lines[1].contains("50.0"));
        assert!(lines[1].contains("25.0"));
        assert!(lines[2].trim_end().ends_with('-'));
        assert!(lines[3].starts_with("Average"));
    }

    #[test]
    fn test_render_cleaning_summary() {
        let stats = CleaningStats {
            read: 10,
            kept: 6,
            missing_customer: 2,
            non_positive_quantity: 1,
            non_positive_price: 0,
            duplicates: 1,
        };

        let summary = render_cleaning_summary(&stats);
        assert!(summary.contains("Records read: 10"));
        assert!(summary.contains("Skipped (no customer): 2"));
        assert!(summary.contains("Skipped (duplicate line): 1"));
    }

    #[test]
    fn test_counts_frame_shape() {
        let df = counts_frame(&sample_matrix()).unwrap();
        assert_eq!(df.shape(), (2, 4));
        assert_eq!(df.get_column_names(), &[COHORT_COLUMN, "1", "2", "3"]);
    }

    #[test]
    fn test_write_csv_files() {
        let dir = tempdir().unwrap();
        let counts_path = dir.path().join("counts.csv");
        let percent_path = dir.path().join("percent.csv");

        let matrix = headless_matrix();
        write_counts_csv(&matrix, &counts_path).unwrap();
        write_percent_csv(&to_percent(&matrix), &percent_path).unwrap();

        let counts = std::fs::read_to_string(&counts_path).unwrap();
        let lines: Vec<&str> = counts.lines().collect();
        assert_eq!(lines[0], "CohortMonth,1,2,3");
        assert_eq!(lines[1], "2010-12-01,4,2,1");
        assert_eq!(lines[2], "2011-01-01,0,3,0");

        let percent = std::fs::read_to_string(&percent_path).unwrap();
        let lines: Vec<&str> = percent.lines().collect();
        assert_eq!(lines[0], "CohortMonth,1,2,3");
        assert!(lines[1].starts_with("2010-12-01,100"));
        assert_eq!(lines[2], "2011-01-01,,,");
    }
}
