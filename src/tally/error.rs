//! Error types for parsing and counting download content.

use thiserror::Error;

use crate::transport::TransportError;

/// Ways a download's CSV content can be malformed.
///
/// Line numbers are 1-based physical lines of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedInput {
    /// The stream ended before a header line.
    #[error("missing header line")]
    MissingHeader,

    /// A header column has an empty name.
    #[error("line {line}: header column {column} has an empty name")]
    EmptyColumnName {
        /// Header line number.
        line: usize,
        /// 1-based column position.
        column: usize,
    },

    /// A header column name appears twice.
    #[error("line {line}: duplicate header column '{name}'")]
    DuplicateColumn {
        /// Header line number.
        line: usize,
        /// The repeated name.
        name: String,
    },

    /// A data row has a different number of fields than the header.
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCountMismatch {
        /// Offending line number.
        line: usize,
        /// Header column count.
        expected: usize,
        /// Fields on the offending line.
        found: usize,
    },

    /// A required column is absent.
    #[error("line {line}: required field '{field}' is missing")]
    MissingField {
        /// Line where the absence was detected.
        line: usize,
        /// Name of the missing field.
        field: String,
    },

    /// A required field is present but empty.
    #[error("line {line}: required field '{field}' is empty")]
    EmptyField {
        /// Offending line number.
        line: usize,
        /// Name of the empty field.
        field: String,
    },

    /// The CSV reader rejected the line.
    #[error("line {line}: {reason}")]
    InvalidCsv {
        /// Offending line number.
        line: usize,
        /// Reader diagnostic.
        reason: String,
    },
}

impl MalformedInput {
    /// Line number the problem was detected at, when known.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::MissingHeader => None,
            Self::EmptyColumnName { line, .. }
            | Self::DuplicateColumn { line, .. }
            | Self::FieldCountMismatch { line, .. }
            | Self::MissingField { line, .. }
            | Self::EmptyField { line, .. }
            | Self::InvalidCsv { line, .. } => Some(*line),
        }
    }
}

/// Errors raised while turning a download into counts or merging counts.
#[derive(Debug, Error)]
pub enum TallyError {
    /// The content is not valid tabular input.
    #[error("malformed input")]
    Malformed(#[from] MalformedInput),

    /// The line stream failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A count would exceed `u64::MAX`.
    #[error("count overflow for entity '{entity}', category '{category}'")]
    CountOverflow {
        /// Entity whose count overflowed.
        entity: String,
        /// Category whose count overflowed.
        category: String,
    },

    /// A category total would exceed `u64::MAX`.
    #[error("total overflow for category '{category}'")]
    TotalOverflow {
        /// Category whose total overflowed.
        category: String,
    },

    /// A count table holds an entity without categories or a zero count.
    #[error("entity '{entity}' has no counted categories or a zero count")]
    IllFormedTable {
        /// First offending entity.
        entity: String,
    },

    /// A report's totals disagree with its per-entity counts.
    #[error(
        "totals mismatch for category '{category}': report has {reported}, counts sum to {derived}"
    )]
    TotalsMismatch {
        /// Category that disagrees.
        category: String,
        /// Total stored in the report.
        reported: u64,
        /// Total re-derived from the per-entity table.
        derived: u64,
    },
}

impl TallyError {
    /// Creates a count overflow error.
    pub fn count_overflow(entity: impl Into<String>, category: impl Into<String>) -> Self {
        Self::CountOverflow {
            entity: entity.into(),
            category: category.into(),
        }
    }

    /// Returns the malformed-input detail, if this is a malformed-input error.
    #[must_use]
    pub fn as_malformed(&self) -> Option<&MalformedInput> {
        match self {
            Self::Malformed(inner) => Some(inner),
            _ => None,
        }
    }
}
