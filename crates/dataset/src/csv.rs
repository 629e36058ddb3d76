//! Minimal CSV reader/writer with quote handling and dtype inference.
//!
//! Reads RFC-4180-style files: quoted fields may contain commas, newlines,
//! and doubled quotes. On read, each column's dtype is inferred from its
//! non-empty cells: all integers → int, all numbers → float, otherwise
//! string. Empty cells become nulls.

use std::path::Path;

use crate::error::DatasetError;
use crate::frame::{DType, DataFrame, Value};

/// Read a CSV file into a frame. The first record is the header.
pub fn read_csv(path: &Path) -> Result<DataFrame, DatasetError> {
    let text = std::fs::read_to_string(path)?;
    read_csv_str(&text)
}

/// Read CSV text into a frame.
pub fn read_csv_str(text: &str) -> Result<DataFrame, DatasetError> {
    let records = parse_records(text)?;
    let mut records = records.into_iter();
    let header = records.next().ok_or(DatasetError::Csv {
        line: 1,
        message: "empty file".into(),
    })?;
    let n_cols = header.len();

    let mut raw_columns: Vec<Vec<Option<String>>> = vec![Vec::new(); n_cols];
    for (i, record) in records.enumerate() {
        if record.len() != n_cols {
            return Err(DatasetError::Csv {
                line: i + 2,
                message: format!("expected {} fields, got {}", n_cols, record.len()),
            });
        }
        for (col, field) in raw_columns.iter_mut().zip(record) {
            col.push(if field.is_empty() { None } else { Some(field) });
        }
    }

    let mut dtypes = Vec::with_capacity(n_cols);
    let mut columns = Vec::with_capacity(n_cols);
    for raw in raw_columns {
        let dtype = infer_dtype(&raw);
        let cells = raw
            .into_iter()
            .map(|cell| match cell {
                None => Value::Null,
                Some(s) => match dtype {
                    DType::Int => Value::Int(s.trim().parse().unwrap_or(0)),
                    DType::Float => Value::Float(s.trim().parse().unwrap_or(0.0)),
                    _ => Value::Str(s),
                },
            })
            .collect();
        dtypes.push(dtype);
        columns.push(cells);
    }

    DataFrame::from_columns(header, dtypes, columns)
}

/// Write a frame as CSV, creating parent directories.
pub fn write_csv(frame: &DataFrame, path: &Path) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut out = String::new();
    out.push_str(
        &frame
            .names()
            .iter()
            .map(|n| escape_field(n))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    let (n_rows, _) = frame.shape();
    let columns: Vec<&[Value]> = frame
        .names()
        .iter()
        .map(|n| frame.column(n))
        .collect::<Result<_, _>>()?;
    for row in 0..n_rows {
        let line = columns
            .iter()
            .map(|col| escape_field(&col[row].render()))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn infer_dtype(cells: &[Option<String>]) -> DType {
    let mut any = false;
    let mut all_int = true;
    let mut all_float = true;
    for cell in cells.iter().flatten() {
        any = true;
        let t = cell.trim();
        if t.parse::<i64>().is_err() {
            all_int = false;
        }
        if t.parse::<f64>().is_err() {
            all_float = false;
        }
        if !all_float {
            break;
        }
    }
    if !any {
        return DType::Str; // all-null column
    }
    if all_int {
        DType::Int
    } else if all_float {
        DType::Float
    } else {
        DType::Str
    }
}

/// Split CSV text into records of fields, honoring quotes.
fn parse_records(text: &str) -> Result<Vec<Vec<String>>, DatasetError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                if field.is_empty() {
                    in_quotes = true;
                } else {
                    return Err(DatasetError::Csv {
                        line,
                        message: "quote inside unquoted field".into(),
                    });
                }
            }
            ',' => {
                record.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                line += 1;
                record.push(std::mem::take(&mut field));
                // Skip fully blank lines (e.g. a trailing newline).
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(DatasetError::Csv {
            line,
            message: "unterminated quoted field".into(),
        });
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        if !(record.len() == 1 && record[0].is_empty()) {
            records.push(record);
        }
    }
    Ok(records)
}
