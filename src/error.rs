//! Error types for rsdump.

use thiserror::Error;

use crate::value::TypeCategory;

/// Longest statement prefix shown in an execution failure message.
const STATEMENT_PREVIEW_LEN: usize = 120;

/// The main error type for dump and restore operations.
#[derive(Debug, Error)]
pub enum DumpError {
    /// A column's declared type is outside the supported set.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A value's runtime representation does not fit its declared type.
    #[error("Type conversion mismatch: {category} column holds a {found} value")]
    TypeConversionMismatch {
        category: TypeCategory,
        found: &'static str,
    },

    /// A binary frame ended before its declared length.
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// A binary frame carries a kind other than schema or row data.
    #[error("Unknown package kind: {0}")]
    UnknownPackageKind(i32),

    /// Payload too large for the 32-bit length field.
    #[error("Frame payload of {0} bytes exceeds the 4 GiB limit")]
    FrameTooLarge(usize),

    /// A frame payload is not valid UTF-8 SQL text.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A statement could not be parsed into an insert shape.
    #[error("Malformed statement: {0}")]
    MalformedStatement(String),

    /// The destination rejected a statement during restore.
    #[error("Execution failed at statement {index} ({}): {message}", preview(.statement))]
    ExecutionFailure {
        index: usize,
        statement: String,
        message: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DumpError {
    /// Create a type mismatch error for the given category.
    pub fn mismatch(category: TypeCategory, found: &'static str) -> Self {
        Self::TypeConversionMismatch { category, found }
    }
}

fn preview(statement: &str) -> String {
    let statement = statement.trim();
    match statement.char_indices().nth(STATEMENT_PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => statement.to_string(),
    }
}

/// Result type alias for rsdump operations.
pub type DumpResult<T> = Result<T, DumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DumpError::TruncatedFrame {
            expected: 12,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Truncated frame: expected 12 bytes, got 3");

        let err = DumpError::mismatch(TypeCategory::Date, "text");
        assert_eq!(
            err.to_string(),
            "Type conversion mismatch: DATE column holds a text value"
        );
    }

    #[test]
    fn test_execution_failure_preview() {
        let long = format!("INSERT INTO `t` VALUES ({});", "1,".repeat(200));
        let err = DumpError::ExecutionFailure {
            index: 7,
            statement: long.clone(),
            message: "duplicate key".to_string(),
        };
        let shown = err.to_string();
        assert!(shown.starts_with("Execution failed at statement 7 (INSERT INTO `t`"));
        assert!(shown.contains("...): duplicate key"));
        assert!(shown.len() < long.len());
    }
}
