//! Untyped cell grid for one bulletin sheet, plus the marker searches
//! that anchor parsing inside it.

use chrono::NaiveDate;

use crate::error::LayoutError;

/// Metadata cell that carries the trading date.
pub const DATE_MARKER: &str = "Дата торгов:";
/// Cell directly above the header block.
pub const UNIT_MARKER: &str = "Единица измерения: Метрическая тонна";

const DATE_FORMAT: &str = "%d.%m.%Y";
const EMPTY_CELL: Cell = Cell::Empty;

/// One cell, reduced to what parsing needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// The sheet writes "-" (or nothing) where an instrument had no trades.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(t) => {
                let t = t.trim();
                t.is_empty() || t == "-"
            }
            Cell::Number(_) => false,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Cell::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// A whole sheet at absolute coordinates. Lives only long enough to be
/// parsed into rows.
#[derive(Debug, Default)]
pub struct Grid {
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Grid { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Out-of-range coordinates read as empty, like a real sheet.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Position of the single cell whose text contains `marker`. Zero or
    /// several matches mean the sheet layout changed under us.
    pub fn find_unique(&self, marker: &'static str) -> Result<(usize, usize), LayoutError> {
        let mut found = None;
        let mut count = 0;
        for (r, row) in self.rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if cell.text().is_some_and(|t| t.contains(marker)) {
                    count += 1;
                    if found.is_none() {
                        found = Some((r, c));
                    }
                }
            }
        }
        match (found, count) {
            (Some(pos), 1) => Ok(pos),
            (None, _) => Err(LayoutError::MarkerMissing(marker)),
            (_, count) => Err(LayoutError::MarkerAmbiguous { marker, count }),
        }
    }
}

/// Trading date from the unique date-marker cell: everything after the
/// final colon, `DD.MM.YYYY`.
pub fn trade_date(grid: &Grid) -> Result<NaiveDate, LayoutError> {
    let (row, col) = grid.find_unique(DATE_MARKER)?;
    let text = grid.cell(row, col).text().unwrap_or("");
    let value = text.rsplit(':').next().unwrap_or("").trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| LayoutError::BadDate {
        value: value.to_string(),
    })
}

/// The two-level header starts on the row after the unit-of-measure
/// marker.
pub fn header_row(grid: &Grid) -> Result<usize, LayoutError> {
    let (row, _) = grid.find_unique(UNIT_MARKER)?;
    Ok(row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_grid(rows: &[&[&str]]) -> Grid {
        Grid::new(
            rows.iter()
                .map(|row| {
                    row.iter()
                        .map(|s| {
                            if s.is_empty() {
                                Cell::Empty
                            } else {
                                Cell::Text(s.to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
        )
    }

    #[test]
    fn finds_date_and_header() {
        let grid = text_grid(&[
            &[],
            &[],
            &["", "Дата торгов: 01.06.2024"],
            &[],
            &["", "Единица измерения: Метрическая тонна"],
        ]);
        assert_eq!(
            trade_date(&grid).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
        assert_eq!(header_row(&grid).unwrap(), 5);
    }

    #[test]
    fn missing_marker_is_fatal() {
        let grid = text_grid(&[&["nothing", "relevant"]]);
        assert_eq!(
            trade_date(&grid).unwrap_err(),
            LayoutError::MarkerMissing(DATE_MARKER)
        );
    }

    #[test]
    fn ambiguous_marker() {
        let grid = text_grid(&[
            &["Дата торгов: 01.06.2024"],
            &["Дата торгов: 02.06.2024"],
        ]);
        assert_eq!(
            trade_date(&grid).unwrap_err(),
            LayoutError::MarkerAmbiguous {
                marker: DATE_MARKER,
                count: 2
            }
        );
    }

    #[test]
    fn date_after_last_colon() {
        let grid = text_grid(&[&["Дата торгов:  15.01.2023 "]]);
        assert_eq!(
            trade_date(&grid).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 15).unwrap()
        );
    }

    #[test]
    fn unparsable_date() {
        let grid = text_grid(&[&["Дата торгов: вчера"]]);
        assert_eq!(
            trade_date(&grid).unwrap_err(),
            LayoutError::BadDate {
                value: "вчера".to_string()
            }
        );
    }

    #[test]
    fn out_of_range_reads_empty() {
        let grid = text_grid(&[&["a"]]);
        assert_eq!(*grid.cell(10, 10), Cell::Empty);
        assert!(grid.cell(10, 10).is_missing());
    }

    #[test]
    fn dash_means_missing() {
        assert!(Cell::Text("-".into()).is_missing());
        assert!(Cell::Text("  - ".into()).is_missing());
        assert!(Cell::Empty.is_missing());
        assert!(!Cell::Number(0.0).is_missing());
        assert!(!Cell::Text("5".into()).is_missing());
    }
}
