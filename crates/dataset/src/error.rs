use thiserror::Error;

/// Errors from frame operations and CSV I/O.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("Column '{0}' is not numeric")]
    NonNumeric(String),

    #[error("No numeric feature columns available")]
    NoNumericFeatures,

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("CSV error at line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
