use serde::Serialize;

use super::table::{Cell, RawRow, RawTable};
use crate::date_cursor::{FileReference, TradingDate};
use crate::error::ValidationError;

pub const MIN_PRODUCT_CODE_LEN: usize = 8;
const TOTAL_MARK: &str = "Итого";
/// Trailing per-section and grand total rows.
const FOOTER_ROWS: usize = 2;

/// One instrument's trading result for one day. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingRecord {
    product_code: String,
    product_name: String,
    oil_code: String,
    delivery_basis_code: String,
    delivery_basis_name: String,
    delivery_type_code: String,
    volume: i64,
    total: i64,
    contract_count: i64,
    trading_date: TradingDate,
}

impl TradingRecord {
    /// Decomposes the product code; `trading_date` always comes from the file reference.
    pub fn new(
        product_code: &str,
        product_name: &str,
        delivery_basis_name: &str,
        volume: i64,
        total: i64,
        contract_count: i64,
        trading_date: TradingDate,
    ) -> Result<Self, ValidationError> {
        let code: Vec<char> = product_code.trim().chars().collect();
        if code.len() < MIN_PRODUCT_CODE_LEN {
            return Err(ValidationError::ProductCodeTooShort {
                code: product_code.to_string(),
                min: MIN_PRODUCT_CODE_LEN,
            });
        }
        for (column, value) in [("volume", volume), ("total", total), ("contract count", contract_count)] {
            if value < 0 {
                return Err(ValidationError::Negative {
                    column,
                    value: value.to_string(),
                });
            }
        }

        Ok(TradingRecord {
            product_code: code.iter().collect(),
            product_name: product_name.to_string(),
            oil_code: code[..4].iter().collect(),
            delivery_basis_code: code[4..7].iter().collect(),
            delivery_basis_name: delivery_basis_name.to_string(),
            delivery_type_code: code[code.len() - 1].to_string(),
            volume,
            total,
            contract_count,
            trading_date,
        })
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }
    pub fn product_name(&self) -> &str {
        &self.product_name
    }
    pub fn oil_code(&self) -> &str {
        &self.oil_code
    }
    pub fn delivery_basis_code(&self) -> &str {
        &self.delivery_basis_code
    }
    pub fn delivery_basis_name(&self) -> &str {
        &self.delivery_basis_name
    }
    pub fn delivery_type_code(&self) -> &str {
        &self.delivery_type_code
    }
    pub fn volume(&self) -> i64 {
        self.volume
    }
    pub fn total(&self) -> i64 {
        self.total
    }
    pub fn contract_count(&self) -> i64 {
        self.contract_count
    }
    pub fn trading_date(&self) -> &TradingDate {
        &self.trading_date
    }
}

/// Lazily turn a table into records. Positional and total rows are skipped
/// silently; rows breaking the record contract come out as `Err`.
pub fn build<'a>(
    table: &'a RawTable,
    reference: &'a FileReference,
) -> impl Iterator<Item = Result<TradingRecord, ValidationError>> + 'a {
    let rows = table.rows();
    let end = rows.len().saturating_sub(FOOTER_ROWS);
    rows.get(1..end)
        .unwrap_or_default()
        .iter()
        .filter(|row| !is_filler(row))
        .map(move |row| to_record(row, reference.date()))
}

fn is_filler(row: &RawRow) -> bool {
    row.volume.is_empty()
        || row
            .cells()
            .iter()
            .any(|c| matches!(c, Cell::Text(s) if s.contains(TOTAL_MARK)))
}

fn to_record(row: &RawRow, date: &TradingDate) -> Result<TradingRecord, ValidationError> {
    if row.product_code.is_empty() {
        return Err(ValidationError::MissingCell {
            column: "product code",
        });
    }
    TradingRecord::new(
        &row.product_code.text(),
        &row.product_name.text(),
        &row.delivery_basis_name.text(),
        integer(&row.volume, "volume")?,
        integer(&row.total, "total")?,
        integer(&row.contract_count, "contract count")?,
        date.clone(),
    )
}

fn integer(cell: &Cell, column: &'static str) -> Result<i64, ValidationError> {
    let value = match cell {
        Cell::Empty => return Err(ValidationError::MissingCell { column }),
        Cell::Number(n) => *n,
        Cell::Text(s) => {
            let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            if digits.is_empty() {
                return Err(ValidationError::MissingCell { column });
            }
            digits
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| ValidationError::NotANumber {
                    column,
                    value: s.clone(),
                })?
        }
    };
    if !value.is_finite() {
        return Err(ValidationError::NotANumber {
            column,
            value: cell.text(),
        });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            column,
            value: cell.text(),
        });
    }
    Ok(value.trunc() as i64)
}
