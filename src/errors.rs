//! Error types for form validation, CSV import, reporting and export.

use std::io;

use thiserror::Error;

/// Message shown in place of a result when the form cannot be computed.
pub const VALIDATION_MESSAGE: &str = "Por favor, preencha os campos corretamente.";

/// Why a form submission (or a CSV row) was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("area is missing or not a number: {0:?}")]
    InvalidArea(String),
    #[error("area must be greater than zero: {0}")]
    NonPositiveArea(String),
    #[error("quantity is missing or not a number: {0:?}")]
    InvalidQuantity(String),
    #[error("quantity must not be negative: {0}")]
    NegativeQuantity(String),
    #[error("productivity is too large to represent")]
    ProductivityOverflow,
}

impl ValidationError {
    /// Human-readable text surfaced to the user instead of a result.
    pub fn user_message(&self) -> &'static str {
        VALIDATION_MESSAGE
    }
}

/// Failures that abort a CSV import as a whole.
///
/// Per-row problems are not errors; they are reported as skipped rows.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("csv header is missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("csv file could not be read: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("no records to report")]
    Empty,
}

/// Failures of the chart/PDF export tasks.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("a {0} export is already in progress")]
    Busy(&'static str),
    #[error("{0} export was cancelled")]
    Cancelled(&'static str),
    #[error("nothing to export: history is empty")]
    NothingToExport,
    #[error("{kind} export failed: {source}")]
    Failed {
        kind: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
