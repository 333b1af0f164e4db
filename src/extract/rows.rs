//! Turns the table under the header into [`TradeRow`]s.

use chrono::NaiveDate;

use super::grid::{Cell, Grid};
use crate::db::TradeRow;
use crate::error::LayoutError;

/// Summary rows carry this in the instrument-code column.
const TOTALS_MARKER: &str = "Итого";

// Fixed column positions under the two-level header.
const COL_CODE: usize = 1;
const COL_NAME: usize = 2;
const COL_BASIS_NAME: usize = 3;
const COL_VOLUME: usize = 4;
const COL_TOTAL: usize = 5;
const COL_COUNT: usize = 14;

// Contract code layout: exchange product (4), delivery basis (3),
// delivery type (last character).
const OIL_LEN: usize = 4;
const BASIS_LEN: usize = 3;
const MIN_CODE_LEN: usize = 7;

/// Walk the data rows below the two header levels at `header_row` and
/// keep every instrument that actually traded.
pub fn parse_rows(
    grid: &Grid,
    header_row: usize,
    trade_date: NaiveDate,
) -> Result<Vec<TradeRow>, LayoutError> {
    let mut rows = Vec::new();

    for r in header_row + 2..grid.row_count() {
        let code = cell_str(grid.cell(r, COL_CODE));
        if code.contains(TOTALS_MARKER) {
            continue;
        }
        if grid.cell(r, COL_COUNT).is_missing() {
            // no trades reported for this instrument
            continue;
        }
        let contract_count = int_value(grid, r, COL_COUNT, "contract count")?;
        if contract_count <= 0 {
            continue;
        }

        let (oil_code, delivery_basis_code, delivery_type_code) = split_product_code(&code)?;
        rows.push(TradeRow {
            product_name: cell_str(grid.cell(r, COL_NAME)),
            delivery_basis_name: cell_str(grid.cell(r, COL_BASIS_NAME)),
            volume: int_value(grid, r, COL_VOLUME, "volume")?,
            total: int_value(grid, r, COL_TOTAL, "total")?,
            product_code: code,
            oil_code,
            delivery_basis_code,
            delivery_type_code,
            contract_count,
            trade_date,
        });
    }

    Ok(rows)
}

/// Slices are in characters: the codes are Cyrillic-adjacent and a byte
/// slice could split a code point.
fn split_product_code(code: &str) -> Result<(String, String, String), LayoutError> {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() < MIN_CODE_LEN {
        return Err(LayoutError::ShortProductCode(code.to_string()));
    }
    let oil = chars[..OIL_LEN].iter().collect();
    let basis = chars[OIL_LEN..OIL_LEN + BASIS_LEN].iter().collect();
    let kind = chars[chars.len() - 1].to_string();
    Ok((oil, basis, kind))
}

fn cell_str(cell: &Cell) -> String {
    match cell {
        Cell::Empty => String::new(),
        Cell::Text(t) => t.trim().to_string(),
        Cell::Number(n) => {
            if n.fract() == 0.0 {
                format!("{}", *n as i64)
            } else {
                n.to_string()
            }
        }
    }
}

fn int_value(grid: &Grid, row: usize, col: usize, column: &'static str) -> Result<i64, LayoutError> {
    let cell = grid.cell(row, col);
    match cell {
        Cell::Number(n) if n.fract() == 0.0 => Ok(*n as i64),
        Cell::Text(t) => {
            // totals sometimes come through with thousands separators
            let cleaned: String = t.chars().filter(|c| !c.is_whitespace()).collect();
            cleaned
                .parse::<i64>()
                .map_err(|_| LayoutError::NonIntegerCell {
                    row,
                    column,
                    value: t.trim().to_string(),
                })
        }
        _ => Err(LayoutError::NonIntegerCell {
            row,
            column,
            value: cell_str(cell),
        }),
    }
}

// ── Tests ──
