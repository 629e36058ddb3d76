//! The in-memory tabular frame and its transformations.
//!
//! Everything the stage tools do to data goes through this crate: CSV I/O,
//! per-column statistics, imputation, dtype conversion, encoding, feature
//! expressions, and correlation-based feature ranking.

pub mod csv;
pub mod error;
pub mod expr;
pub mod frame;

pub use csv::{read_csv, read_csv_str, write_csv};
pub use error::DatasetError;
pub use frame::{ColumnStats, DType, DataFrame, ImputeStrategy, Value};
