//! Error types for upstream drift and schema violations.

use thiserror::Error;

/// The listing markup or a bulletin sheet no longer has the shape the
/// pipeline was written against. Never retried: someone has to look at
/// the upstream format before the run can mean anything.
#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("marker {0:?} not found")]
    MarkerMissing(&'static str),

    #[error("marker {marker:?} matched {count} cells, expected exactly one")]
    MarkerAmbiguous { marker: &'static str, count: usize },

    #[error("bulletin item has no date label")]
    MissingDateLabel,

    #[error("pagination control has no link")]
    MissingNextLink,

    #[error("cannot parse date {value:?}")]
    BadDate { value: String },

    #[error("product code {0:?} is too short to split")]
    ShortProductCode(String),

    #[error("row {row}: {column} is not an integer ({value:?})")]
    NonIntegerCell {
        row: usize,
        column: &'static str,
        value: String,
    },
}

/// A row that breaks the persisted schema's length constraints.
/// One bad row fails the whole batch before anything is written.
#[derive(Debug, Error, PartialEq)]
#[error("{field} is longer than {max} characters: {value:?}")]
pub struct ValidationError {
    pub field: &'static str,
    pub max: usize,
    pub value: String,
}
