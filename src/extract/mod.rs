//! Per-bulletin extraction and the CPU-parallel directory run.

pub mod grid;
pub mod rows;
pub mod xls;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::db::TradeRow;
use crate::error::LayoutError;
use grid::Grid;

/// Everything one bulletin contributed, stamped with its trading date.
pub struct BulletinRows {
    pub trade_date: NaiveDate,
    pub source: PathBuf,
    pub rows: Vec<TradeRow>,
}

/// Locate the metadata markers, then parse the table under the header.
fn parse_bulletin(grid: &Grid) -> Result<(NaiveDate, Vec<TradeRow>), LayoutError> {
    let trade_date = grid::trade_date(grid)?;
    let header = grid::header_row(grid)?;
    let rows = rows::parse_rows(grid, header, trade_date)?;
    Ok((trade_date, rows))
}

pub fn extract_file(path: &Path) -> Result<BulletinRows> {
    let grid = xls::load_grid(path)?;
    let (trade_date, rows) =
        parse_bulletin(&grid).with_context(|| format!("cannot parse {}", path.display()))?;
    debug!(file = %path.display(), %trade_date, rows = rows.len(), "bulletin extracted");
    Ok(BulletinRows {
        trade_date,
        source: path.to_path_buf(),
        rows,
    })
}

/// Extract every bulletin in `dir` on the rayon pool. Any sheet that no
/// longer matches the expected layout fails the whole phase.
pub fn extract_dir(dir: &Path) -> Result<Vec<BulletinRows>> {
    let mut files = bulletin_files(dir)?;
    files.sort();
    if files.is_empty() {
        info!(dir = %dir.display(), "no bulletins to extract");
        return Ok(Vec::new());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let batches: Result<Vec<BulletinRows>> = files
        .par_iter()
        .map(|path| {
            let parsed = extract_file(path);
            pb.inc(1);
            parsed
        })
        .collect();
    pb.finish_and_clear();

    let batches = batches?;
    let rows: usize = batches.iter().map(|b| b.rows.len()).sum();
    info!(files = batches.len(), rows, "extraction finished");
    Ok(batches)
}

fn bulletin_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_sheet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xls") || ext.eq_ignore_ascii_case("xlsx"));
        if is_sheet && entry.file_type()?.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::grid::Cell;
    use super::*;

    /// A miniature bulletin in the real layout: date marker at (2, 1),
    /// unit marker on row 5, two header levels on rows 6 and 7, data
    /// from row 8.
    fn bulletin_grid() -> Grid {
        let text = |s: &str| Cell::Text(s.to_string());
        let mut sheet = vec![vec![Cell::Empty; 15]; 8];
        sheet[2][1] = text("Дата торгов: 01.06.2024");
        sheet[5][1] = text("Единица измерения: Метрическая тонна");
        sheet[6][1] = text("Код Инструмента");
        sheet[7][1] = text("");

        let mut traded = vec![Cell::Empty; 15];
        traded[1] = text("A001WNP");
        traded[2] = text("Бензин (АИ-92-К5)");
        traded[3] = text("ст. Аллагуват");
        traded[4] = text("300");
        traded[5] = text("17000000");
        traded[14] = text("5");
        sheet.push(traded);

        let mut totals = vec![Cell::Empty; 15];
        totals[1] = text("Итого");
        totals[14] = text("0");
        sheet.push(totals);

        Grid::new(sheet)
    }

    #[test]
    fn full_bulletin() {
        let (trade_date, rows) = parse_bulletin(&bulletin_grid()).unwrap();

        assert_eq!(trade_date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.product_code, "A001WNP");
        assert_eq!(row.oil_code, "A001");
        assert_eq!(row.delivery_basis_code, "WNP");
        assert_eq!(row.delivery_type_code, "P");
        assert_eq!(row.contract_count, 5);
        assert_eq!(row.trade_date, trade_date);
    }

    #[test]
    fn missing_unit_marker() {
        let mut sheet = vec![vec![Cell::Empty; 15]; 3];
        sheet[2][1] = Cell::Text("Дата торгов: 01.06.2024".to_string());
        let err = parse_bulletin(&Grid::new(sheet)).unwrap_err();
        assert_eq!(err, LayoutError::MarkerMissing(grid::UNIT_MARKER));
    }
}
