//! Error taxonomy surfaced by the loading and reconciliation stages.
//!
//! Only structural failures reach the caller. Cell-level problems (undecodable
//! bytes, odd spreadsheet cells, values that refuse to coerce) are absorbed
//! where they happen and never show up here.

use std::fmt;

use thiserror::Error;

/// Which side of a join an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Base,
    Incoming,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRole::Base => f.write_str("base layer"),
            TableRole::Incoming => f.write_str("attribute table"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Input could not be classified as delimited text or a workbook.
    #[error("Unsupported table format: {detail}")]
    UnsupportedFormat { detail: String },

    /// Nothing left to join once empty rows were removed.
    #[error("No data rows found: {detail}")]
    EmptyInput { detail: String },

    #[error("Column '{column}' not found in {table} fields")]
    KeyColumnNotFound { column: String, table: TableRole },

    /// The join itself could not be computed; the base table is untouched.
    #[error("Merging attributes failed: {source:#}")]
    MergeFailed {
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    pub fn unsupported(detail: impl Into<String>) -> Self {
        ReconcileError::UnsupportedFormat {
            detail: detail.into(),
        }
    }

    pub fn empty(detail: impl Into<String>) -> Self {
        ReconcileError::EmptyInput {
            detail: detail.into(),
        }
    }

    pub fn missing_key(column: impl Into<String>, table: TableRole) -> Self {
        ReconcileError::KeyColumnNotFound {
            column: column.into(),
            table,
        }
    }

    pub fn merge_failed(source: anyhow::Error) -> Self {
        ReconcileError::MergeFailed { source }
    }
}
