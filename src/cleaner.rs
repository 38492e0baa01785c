//! Filtering and deduplication of raw transactions using Polars

use crate::data::{
    from_timestamp_micros, transactions_frame, Transaction, COUNTRY, CUSTOMER_ID, DESCRIPTION,
    INVOICE_NO, INVOICE_TS, QUANTITY, STOCK_CODE, UNIT_PRICE,
};
use crate::error::{CohortError, PipelineResult};
use chrono::NaiveDateTime;
use polars::prelude::*;

/// Customer id used by the sales export for guest checkouts
pub const NO_CUSTOMER: i64 = 0;

/// Input position, used to break timestamp ties during deduplication
const ROW: &str = "Row";

const MISSING_CUSTOMER: &str = "MissingCustomer";
const NON_POSITIVE_QUANTITY: &str = "NonPositiveQuantity";
const NON_POSITIVE_PRICE: &str = "NonPositivePrice";

/// A transaction that passed cleaning: known customer, positive quantity and
/// price, unique under (invoice, item, quantity)
#[derive(Debug, Clone, PartialEq)]
pub struct CleanTransaction {
    pub invoice_no: String,
    pub stock_code: String,
    pub description: String,
    pub quantity: i64,
    pub invoice_date: NaiveDateTime,
    pub unit_price: f64,
    pub customer_id: i64,
    pub country: String,
}

/// Counts of what happened to each raw record during cleaning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub read: usize,
    pub kept: usize,
    pub missing_customer: usize,
    pub non_positive_quantity: usize,
    pub non_positive_price: usize,
    pub duplicates: usize,
}

impl CleaningStats {
    /// Total number of records excluded for any reason
    pub fn skipped(&self) -> usize {
        self.missing_customer + self.non_positive_quantity + self.non_positive_price + self.duplicates
    }
}

/// Output of [`clean`]
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub transactions: Vec<CleanTransaction>,
    pub stats: CleaningStats,
}

fn has_customer() -> Expr {
    col(CUSTOMER_ID).neq(lit(NO_CUSTOMER)).fill_null(lit(false))
}

fn positive_quantity() -> Expr {
    col(QUANTITY).gt(lit(0i64))
}

// Null marks a NaN price
fn positive_price() -> Expr {
    col(UNIT_PRICE).gt(lit(0.0)).fill_null(lit(false))
}

fn count_where(predicate: Expr, name: &str) -> Expr {
    predicate.cast(DataType::UInt64).sum().alias(name)
}

/// Filter out guest checkouts, returns and bad prices, then deduplicate
///
/// Each rejected record is counted under the first rule it fails, in the
/// order customer, quantity, price. Records sharing (invoice, item code,
/// quantity) collapse to the one with the earliest timestamp; on equal
/// timestamps the first one read wins. Price and description are not part
/// of the key, so two distinct lines that happen to share those three fields
/// are merged as well.
///
/// Output is ordered by timestamp, then by input position.
pub fn clean<I>(raw: I) -> PipelineResult<Cleaned>
where
    I: IntoIterator<Item = Transaction>,
{
    let frame = transactions_frame(raw)?;
    let read = frame.height();

    let skips = frame
        .clone()
        .lazy()
        .select([
            count_where(has_customer().not(), MISSING_CUSTOMER),
            count_where(
                has_customer().and(positive_quantity().not()),
                NON_POSITIVE_QUANTITY,
            ),
            count_where(
                has_customer()
                    .and(positive_quantity())
                    .and(positive_price().not()),
                NON_POSITIVE_PRICE,
            ),
        ])
        .collect()?;

    let kept = frame
        .lazy()
        .filter(has_customer().and(positive_quantity()).and(positive_price()))
        .with_row_index(ROW, None)
        .sort_by_exprs([col(INVOICE_TS), col(ROW)], SortMultipleOptions::default())
        .unique_stable(
            Some(vec![
                INVOICE_NO.to_string(),
                STOCK_CODE.to_string(),
                QUANTITY.to_string(),
            ]),
            UniqueKeepStrategy::First,
        )
        .collect()?;

    let missing_customer = skip_count(&skips, MISSING_CUSTOMER)?;
    let non_positive_quantity = skip_count(&skips, NON_POSITIVE_QUANTITY)?;
    let non_positive_price = skip_count(&skips, NON_POSITIVE_PRICE)?;
    let valid = read - missing_customer - non_positive_quantity - non_positive_price;

    let transactions = clean_transactions_from_frame(&kept)?;
    let stats = CleaningStats {
        read,
        kept: transactions.len(),
        missing_customer,
        non_positive_quantity,
        non_positive_price,
        duplicates: valid - transactions.len(),
    };

    if stats.skipped() > 0 {
        log::info!(
            "Cleaning skipped {} of {} records (no customer: {}, quantity <= 0: {}, price <= 0: {}, duplicates: {})",
            stats.skipped(),
            stats.read,
            stats.missing_customer,
            stats.non_positive_quantity,
            stats.non_positive_price,
            stats.duplicates
        );
    }

    Ok(Cleaned {
        transactions,
        stats,
    })
}

fn skip_count(skips: &DataFrame, name: &str) -> PipelineResult<usize> {
    Ok(skips.column(name)?.u64()?.get(0).unwrap_or(0) as usize)
}

fn present<T>(value: Option<T>, column: &str, row: usize) -> PipelineResult<T> {
    value.ok_or_else(|| CohortError::Frame(format!("Null {column} in cleaned row {row}")))
}

fn clean_transactions_from_frame(df: &DataFrame) -> PipelineResult<Vec<CleanTransaction>> {
    let invoice_no = df.column(INVOICE_NO)?.str()?;
    let stock_code = df.column(STOCK_CODE)?.str()?;
    let description = df.column(DESCRIPTION)?.str()?;
    let quantity = df.column(QUANTITY)?.i64()?;
    let invoice_ts = df.column(INVOICE_TS)?.i64()?;
    let unit_price = df.column(UNIT_PRICE)?.f64()?;
    let customer_id = df.column(CUSTOMER_ID)?.i64()?;
    let country = df.column(COUNTRY)?.str()?;

    (0..df.height())
        .map(|i| {
            Ok(CleanTransaction {
                invoice_no: invoice_no.get(i).unwrap_or_default().to_string(),
                stock_code: stock_code.get(i).unwrap_or_default().to_string(),
                description: description.get(i).unwrap_or_default().to_string(),
                quantity: present(quantity.get(i), QUANTITY, i)?,
                invoice_date: from_timestamp_micros(present(invoice_ts.get(i), INVOICE_TS, i)?)?,
                unit_price: present(unit_price.get(i), UNIT_PRICE, i)?,
                customer_id: present(customer_id.get(i), CUSTOMER_ID, i)?,
                country: country.get(i).unwrap_or_default().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    pub(crate) fn txn(
        invoice: &str,
        item: &str,
        quantity: i64,
        date: NaiveDateTime,
        price: f64,
        customer: Option<i64>,
    ) -> Transaction {
        Transaction {
            invoice_no: invoice.to_string(),
            stock_code: item.to_string(),
            description: format!("ITEM {item}"),
            quantity,
            invoice_date: date,
            unit_price: price,
            customer_id: customer,
            country: "United Kingdom".to_string(),
        }
    }

    #[test]
    fn test_filters_invalid_records() {
        let raw = vec![
            txn("1", "A", 2, at(2011, 1, 5), 1.0, Some(10)),
            txn("2", "A", 2, at(2011, 1, 5), 1.0, None),
            txn("3", "A", 2, at(2011, 1, 5), 1.0, Some(0)),
            txn("C4", "A", -2, at(2011, 1, 5), 1.0, Some(10)),
            txn("5", "A", 0, at(2011, 1, 5), 1.0, Some(10)),
            txn("6", "A", 2, at(2011, 1, 5), 0.0, Some(10)),
            txn("7", "A", 2, at(2011, 1, 5), -3.5, Some(10)),
            txn("8", "A", 2, at(2011, 1, 5), f64::NAN, Some(10)),
        ];

        let cleaned = clean(raw).unwrap();
        assert_eq!(cleaned.transactions.len(), 1);
        assert_eq!(cleaned.transactions[0].invoice_no, "1");
        assert_eq!(
            cleaned.stats,
            CleaningStats {
                read: 8,
                kept: 1,
                missing_customer: 2,
                non_positive_quantity: 2,
                non_positive_price: 3,
                duplicates: 0,
            }
        );
        assert_eq!(cleaned.stats.skipped(), 7);
    }

    #[test]
    fn test_keeps_earliest_duplicate() {
        let raw = vec![
            txn("100", "X", 3, at(2011, 3, 9), 2.0, Some(7)),
            txn("100", "X", 3, at(2011, 2, 1), 2.0, Some(7)),
            txn("100", "X", 3, at(2011, 4, 1), 2.0, Some(7)),
        ];

        let cleaned = clean(raw).unwrap();
        assert_eq!(cleaned.transactions.len(), 1);
        assert_eq!(cleaned.transactions[0].invoice_date, at(2011, 2, 1));
        assert_eq!(cleaned.stats.duplicates, 2);
    }

    #[test]
    fn test_duplicate_tie_keeps_first_seen() {
        let mut first = txn("100", "X", 3, at(2011, 3, 9), 2.0, Some(7));
        first.description = "first".to_string();
        let mut second = first.clone();
        second.description = "second".to_string();

        let cleaned = clean(vec![first, second]).unwrap();
        assert_eq!(cleaned.transactions.len(), 1);
        assert_eq!(cleaned.transactions[0].description, "first");
    }

    #[test]
    fn test_dedup_key_ignores_price_and_description() {
        let mut a = txn("100", "X", 3, at(2011, 3, 9), 2.0, Some(7));
        a.description = "red".to_string();
        let mut b = txn("100", "X", 3, at(2011, 3, 9), 9.0, Some(7));
        b.description = "blue".to_string();
        let c = txn("100", "X", 4, at(2011, 3, 9), 2.0, Some(7));
        let d = txn("100", "Y", 3, at(2011, 3, 9), 2.0, Some(7));

        let cleaned = clean(vec![a, b, c, d]).unwrap();
        assert_eq!(cleaned.transactions.len(), 3);
        assert_eq!(cleaned.transactions[0].unit_price, 2.0);
    }

    #[test]
    fn test_filter_runs_before_dedup() {
        // A rejected return must not shadow the valid line with the same key
        let raw = vec![
            txn("100", "X", 3, at(2011, 1, 1), 0.0, Some(7)),
            txn("100", "X", 3, at(2011, 2, 1), 2.0, Some(7)),
        ];

        let cleaned = clean(raw).unwrap();
        assert_eq!(cleaned.transactions.len(), 1);
        assert_eq!(cleaned.transactions[0].invoice_date, at(2011, 2, 1));
        assert_eq!(cleaned.stats.duplicates, 0);
    }

    #[test]
    fn test_output_ordered_by_timestamp() {
        let raw = vec![
            txn("3", "A", 1, at(2011, 3, 1), 1.0, Some(1)),
            txn("1", "A", 1, at(2011, 1, 1), 1.0, Some(2)),
            txn("2", "A", 1, at(2011, 2, 1), 1.0, Some(1)),
            txn("0", "A", 1, at(2011, 1, 1), 1.0, Some(3)),
        ];

        let cleaned = clean(raw).unwrap();
        let invoices: Vec<&str> = cleaned
            .transactions
            .iter()
            .map(|t| t.invoice_no.as_str())
            .collect();
        assert_eq!(invoices, vec!["1", "0", "2", "3"]);
        assert_eq!(cleaned.transactions[0].customer_id, 2);
        assert_eq!(cleaned.transactions[0].invoice_date, at(2011, 1, 1));
    }

    #[test]
    fn test_clean_empty_input() {
        let cleaned = clean(Vec::new()).unwrap();
        assert!(cleaned.transactions.is_empty());
        assert_eq!(cleaned.stats, CleaningStats::default());
    }
}
