//! Loads the first worksheet of a bulletin file into a [`Grid`].

use std::path::Path;

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};

use super::grid::{Cell, Grid};

pub fn load_grid(path: &Path) -> Result<Grid> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("cannot open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .with_context(|| format!("workbook {} has no sheets", path.display()))?
        .with_context(|| format!("cannot read first sheet of {}", path.display()))?;

    let Some((end_row, end_col)) = range.end() else {
        return Ok(Grid::default());
    };

    // Ranges start at their first non-empty cell, but column positions in
    // the bulletin are absolute sheet coordinates, so rebuild from (0, 0).
    let mut rows = Vec::with_capacity(end_row as usize + 1);
    for r in 0..=end_row {
        let mut row = Vec::with_capacity(end_col as usize + 1);
        for c in 0..=end_col {
            row.push(convert(range.get_value((r, c))));
        }
        rows.push(row);
    }
    Ok(Grid::new(rows))
}

fn convert(value: Option<&Data>) -> Cell {
    match value {
        None | Some(Data::Empty) => Cell::Empty,
        Some(Data::String(s)) => Cell::Text(s.clone()),
        Some(Data::Float(f)) => Cell::Number(*f),
        Some(Data::Int(i)) => Cell::Number(*i as f64),
        Some(Data::Bool(b)) => Cell::Text(b.to_string()),
        Some(Data::Error(e)) => Cell::Text(format!("{e:?}")),
        Some(Data::DateTime(dt)) => Cell::Number(dt.as_f64()),
        Some(Data::DateTimeIso(s)) | Some(Data::DurationIso(s)) => Cell::Text(s.clone()),
    }
}
