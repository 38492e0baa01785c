//! Transaction records and CSV loading using Polars

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;

use crate::error::{CohortError, PipelineResult};

pub const INVOICE_NO: &str = "InvoiceNo";
pub const STOCK_CODE: &str = "StockCode";
pub const DESCRIPTION: &str = "Description";
pub const QUANTITY: &str = "Quantity";
pub const INVOICE_DATE: &str = "InvoiceDate";
pub const UNIT_PRICE: &str = "UnitPrice";
pub const CUSTOMER_ID: &str = "CustomerID";
pub const COUNTRY: &str = "Country";

/// Invoice timestamp as microseconds since the epoch, used inside frames
pub const INVOICE_TS: &str = "InvoiceTs";

/// 2^63; every `f64` strictly inside `(-BOUND, BOUND)` fits in an `i64`
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Timestamp layouts accepted in the `InvoiceDate` column, tried in order
/// after RFC 3339.
const DATE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// One raw invoice line as it appears in the sales export
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Invoice number; cancellations carry a `C` prefix
    pub invoice_no: String,
    /// Product (item) code
    pub stock_code: String,
    pub description: String,
    /// Units sold, negative for returns
    pub quantity: i64,
    pub invoice_date: NaiveDateTime,
    pub unit_price: f64,
    /// `None` or `Some(0)` for guest checkouts
    pub customer_id: Option<i64>,
    pub country: String,
}

/// Load raw transactions from a CSV file
///
/// Every column is read as text and parsed here, so mixed columns such as
/// `InvoiceNo` (`536365` next to `C536379`) never trip schema inference.
///
/// # Arguments
/// * `file_path` - Path to the CSV file
///
/// # Returns
/// * All rows of the file in file order, unfiltered
pub fn load_transactions(file_path: &str) -> crate::Result<Vec<Transaction>> {
    let df = LazyCsvReader::new(file_path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .with_context(|| format!("Failed to open {file_path}"))?
        .select([
            col(INVOICE_NO),
            col(STOCK_CODE),
            col(DESCRIPTION),
            col(QUANTITY),
            col(INVOICE_DATE),
            col(UNIT_PRICE),
            col(CUSTOMER_ID),
            col(COUNTRY),
        ])
        .collect()
        .with_context(|| format!("Failed to read transactions from {file_path}"))?;

    let transactions = transactions_from_frame(&df)?;
    log::debug!("Loaded {} raw rows from {}", transactions.len(), file_path);
    Ok(transactions)
}

/// Convert a string-typed frame with the export columns into transactions
pub fn transactions_from_frame(df: &DataFrame) -> crate::Result<Vec<Transaction>> {
    let invoice_no = df.column(INVOICE_NO)?.str()?;
    let stock_code = df.column(STOCK_CODE)?.str()?;
    let description = df.column(DESCRIPTION)?.str()?;
    let quantity = df.column(QUANTITY)?.str()?;
    let invoice_date = df.column(INVOICE_DATE)?.str()?;
    let unit_price = df.column(UNIT_PRICE)?.str()?;
    let customer_id = df.column(CUSTOMER_ID)?.str()?;
    let country = df.column(COUNTRY)?.str()?;

    let mut transactions = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        // Header is line 1
        let line = i + 2;

        let quantity_text = required(quantity.get(i), QUANTITY, line)?;
        let date_text = required(invoice_date.get(i), INVOICE_DATE, line)?;
        let price_text = required(unit_price.get(i), UNIT_PRICE, line)?;

        transactions.push(Transaction {
            invoice_no: invoice_no.get(i).unwrap_or_default().trim().to_string(),
            stock_code: stock_code.get(i).unwrap_or_default().trim().to_string(),
            description: description.get(i).unwrap_or_default().trim().to_string(),
            quantity: quantity_text
                .parse()
                .with_context(|| format!("Invalid {QUANTITY} '{quantity_text}' on line {line}"))?,
            invoice_date: parse_timestamp(date_text)
                .with_context(|| format!("Invalid {INVOICE_DATE} on line {line}"))?,
            unit_price: price_text
                .parse()
                .with_context(|| format!("Invalid {UNIT_PRICE} '{price_text}' on line {line}"))?,
            customer_id: parse_customer_id(customer_id.get(i))
                .with_context(|| format!("Invalid {CUSTOMER_ID} on line {line}"))?,
            country: country.get(i).unwrap_or_default().trim().to_string(),
        });
    }

    Ok(transactions)
}

/// Build a typed frame from raw transactions, one row per record in input
/// order
///
/// Timestamps are stored under [`INVOICE_TS`] as epoch microseconds and NaN
/// prices become nulls so that price filters treat them as invalid.
pub fn transactions_frame<I>(raw: I) -> PolarsResult<DataFrame>
where
    I: IntoIterator<Item = Transaction>,
{
    let mut invoice_no = Vec::new();
    let mut stock_code = Vec::new();
    let mut description = Vec::new();
    let mut quantity = Vec::new();
    let mut invoice_ts = Vec::new();
    let mut unit_price = Vec::new();
    let mut customer_id = Vec::new();
    let mut country = Vec::new();

    for record in raw {
        invoice_ts.push(timestamp_micros(record.invoice_date));
        unit_price.push(Some(record.unit_price).filter(|price| !price.is_nan()));
        quantity.push(record.quantity);
        customer_id.push(record.customer_id);
        invoice_no.push(record.invoice_no);
        stock_code.push(record.stock_code);
        description.push(record.description);
        country.push(record.country);
    }

    DataFrame::new(vec![
        Series::new(INVOICE_NO, invoice_no),
        Series::new(STOCK_CODE, stock_code),
        Series::new(DESCRIPTION, description),
        Series::new(QUANTITY, quantity),
        Series::new(INVOICE_TS, invoice_ts),
        Series::new(UNIT_PRICE, unit_price),
        Series::new(CUSTOMER_ID, customer_id),
        Series::new(COUNTRY, country),
    ])
}

pub fn timestamp_micros(timestamp: NaiveDateTime) -> i64 {
    timestamp.and_utc().timestamp_micros()
}

/// Inverse of [`timestamp_micros`]
pub fn from_timestamp_micros(micros: i64) -> PipelineResult<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros)
        .map(|timestamp| timestamp.naive_utc())
        .ok_or_else(|| CohortError::Frame(format!("Timestamp {micros}us is out of range")))
}

fn required<'a>(value: Option<&'a str>, column: &str, line: usize) -> crate::Result<&'a str> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => anyhow::bail!("Missing {column} on line {line}"),
    }
}

/// Parse an invoice timestamp in any of the supported layouts
///
/// Timestamps carrying a UTC offset keep their own wall-clock time, so an
/// invoice is bucketed into the month it was written in locally.
pub fn parse_timestamp(text: &str) -> crate::Result<NaiveDateTime> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.naive_local());
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| anyhow::anyhow!("Unrecognised timestamp '{text}'"))
}

/// Parse a customer id written as `17850` or `17850.0`; blank means absent
pub fn parse_customer_id(value: Option<&str>) -> crate::Result<Option<i64>> {
    let text = match value.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => return Ok(None),
    };

    if let Ok(id) = text.parse::<i64>() {
        return Ok(Some(id));
    }

    let id: f64 = text
        .parse()
        .map_err(|_| anyhow::anyhow!("Customer id '{text}' is not a number"))?;
    if !id.is_finite() || id.fract() != 0.0 {
        anyhow::bail!("Customer id '{text}' is not a whole number");
    }
    if id < -I64_BOUND || id >= I64_BOUND {
        anyhow::bail!("Customer id '{text}' is out of range");
    }
    Ok(Some(id as i64))
}
