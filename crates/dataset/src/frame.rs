//! The in-memory columnar frame that tool handlers mutate.
//!
//! Columns are typed vectors of nullable cells. Every mutating operation
//! validates its inputs before touching the data, so a failed call leaves
//! the frame exactly as it was; the stage loop relies on that to report
//! handler errors to the model without corrupting the working dataset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DatasetError;

/// The logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int,
    Float,
    Str,
    Datetime,
    Category,
}

impl DType {
    pub fn is_numeric(self) -> bool {
        matches!(self, DType::Int | DType::Float)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::Int => write!(f, "int"),
            DType::Float => write!(f, "float"),
            DType::Str => write!(f, "string"),
            DType::Datetime => write!(f, "datetime"),
            DType::Category => write!(f, "category"),
        }
    }
}

/// A single nullable cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Render the cell for CSV output and value-count keys. Null renders
    /// as the empty string.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::Str(s) => s.clone(),
        }
    }
}

/// Strategy for filling missing values in a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ImputeStrategy {
    Mean,
    Median,
    Mode,
    Constant(String),
}

impl ImputeStrategy {
    /// Parse the strategy name used in tool arguments.
    pub fn parse(name: &str, fill_value: Option<&str>) -> Result<Self, DatasetError> {
        match name {
            "mean" => Ok(ImputeStrategy::Mean),
            "median" => Ok(ImputeStrategy::Median),
            "mode" => Ok(ImputeStrategy::Mode),
            "constant" => {
                let v = fill_value.ok_or_else(|| {
                    DatasetError::Parse("strategy 'constant' requires a fill_value".into())
                })?;
                Ok(ImputeStrategy::Constant(v.to_string()))
            }
            other => Err(DatasetError::Parse(format!(
                "unknown imputation strategy '{other}'"
            ))),
        }
    }
}

/// Per-column summary used by `get_column_stats` and target inference.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub dtype: String,
    pub null_count: usize,
    pub null_percentage: f64,
    pub unique_count: usize,
    pub unique_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<(String, usize)>>,
    pub sample_values: Vec<String>,
}

/// A column-major table with named, typed columns.
#[derive(Debug, Clone)]
pub struct DataFrame {
    names: Vec<String>,
    dtypes: Vec<DType>,
    columns: Vec<Vec<Value>>,
    n_rows: usize,
}

impl DataFrame {
    /// Build a frame from parallel column vectors. All columns must have
    /// the same length and names must be unique.
    pub fn from_columns(
        names: Vec<String>,
        dtypes: Vec<DType>,
        columns: Vec<Vec<Value>>,
    ) -> Result<Self, DatasetError> {
        if names.len() != columns.len() || names.len() != dtypes.len() {
            return Err(DatasetError::Shape(
                "names, dtypes and columns must have equal length".into(),
            ));
        }
        let n_rows = columns.first().map(Vec::len).unwrap_or(0);
        if columns.iter().any(|c| c.len() != n_rows) {
            return Err(DatasetError::Shape("ragged columns".into()));
        }
        let mut seen = HashMap::new();
        for name in &names {
            if seen.insert(name.clone(), ()).is_some() {
                return Err(DatasetError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Self {
            names,
            dtypes,
            columns,
            n_rows,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.names.len())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn dtype(&self, name: &str) -> Result<DType, DatasetError> {
        Ok(self.dtypes[self.index_of(name)?])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn index_of(&self, name: &str) -> Result<usize, DatasetError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DatasetError::ColumnNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<&[Value], DatasetError> {
        Ok(&self.columns[self.index_of(name)?])
    }

    // --- Inspection -------------------------------------------------------

    pub fn null_count(&self, name: &str) -> Result<usize, DatasetError> {
        Ok(self.column(name)?.iter().filter(|v| v.is_null()).count())
    }

    /// Null counts for every column, in column order.
    pub fn null_counts(&self) -> Vec<(String, usize)> {
        self.names
            .iter()
            .zip(&self.columns)
            .map(|(n, c)| (n.clone(), c.iter().filter(|v| v.is_null()).count()))
            .collect()
    }

    pub fn unique_count(&self, name: &str) -> Result<usize, DatasetError> {
        let col = self.column(name)?;
        let mut seen: Vec<String> = col
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::render)
            .collect();
        seen.sort();
        seen.dedup();
        Ok(seen.len())
    }

    /// The `n` most frequent non-null values, by descending count.
    pub fn top_values(&self, name: &str, n: usize) -> Result<Vec<(String, usize)>, DatasetError> {
        let col = self.column(name)?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for v in col.iter().filter(|v| !v.is_null()) {
            *counts.entry(v.render()).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, usize)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        Ok(counts)
    }

    fn numeric_non_null(&self, name: &str) -> Result<Vec<f64>, DatasetError> {
        Ok(self
            .column(name)?
            .iter()
            .filter_map(Value::as_f64)
            .collect())
    }

    pub fn mean(&self, name: &str) -> Result<Option<f64>, DatasetError> {
        let xs = self.numeric_non_null(name)?;
        if xs.is_empty() {
            return Ok(None);
        }
        Ok(Some(xs.iter().sum::<f64>() / xs.len() as f64))
    }

    pub fn median(&self, name: &str) -> Result<Option<f64>, DatasetError> {
        let mut xs = self.numeric_non_null(name)?;
        if xs.is_empty() {
            return Ok(None);
        }
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = xs.len() / 2;
        Ok(Some(if xs.len() % 2 == 0 {
            (xs[mid - 1] + xs[mid]) / 2.0
        } else {
            xs[mid]
        }))
    }

    /// Sample standard deviation (n - 1 denominator).
    pub fn std(&self, name: &str) -> Result<Option<f64>, DatasetError> {
        let xs = self.numeric_non_null(name)?;
        if xs.len() < 2 {
            return Ok(None);
        }
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
        Ok(Some(var.sqrt()))
    }

    pub fn min(&self, name: &str) -> Result<Option<f64>, DatasetError> {
        Ok(self
            .numeric_non_null(name)?
            .into_iter()
            .fold(None, |acc: Option<f64>, x| {
                Some(acc.map_or(x, |a| a.min(x)))
            }))
    }

    pub fn max(&self, name: &str) -> Result<Option<f64>, DatasetError> {
        Ok(self
            .numeric_non_null(name)?
            .into_iter()
            .fold(None, |acc: Option<f64>, x| {
                Some(acc.map_or(x, |a| a.max(x)))
            }))
    }

    /// Most frequent non-null value; ties break toward the lexically
    /// smaller rendering, for determinism.
    pub fn mode(&self, name: &str) -> Result<Option<Value>, DatasetError> {
        let top = self.top_values(name, 1)?;
        let Some((rendered, _)) = top.into_iter().next() else {
            return Ok(None);
        };
        // Recover the original cell so dtype is preserved.
        let col = self.column(name)?;
        Ok(col.iter().find(|v| v.render() == rendered).cloned())
    }

    /// Full stats bundle for one column.
    pub fn column_stats(&self, name: &str) -> Result<ColumnStats, DatasetError> {
        let dtype = self.dtype(name)?;
        let col = self.column(name)?;
        let nulls = col.iter().filter(|v| v.is_null()).count();
        let uniques = self.unique_count(name)?;
        let rows = self.n_rows.max(1);
        let sample_values = col
            .iter()
            .filter(|v| !v.is_null())
            .take(5)
            .map(Value::render)
            .collect();

        let (mean, median, std, min, max, top_values) = if dtype.is_numeric() {
            (
                self.mean(name)?,
                self.median(name)?,
                self.std(name)?,
                self.min(name)?,
                self.max(name)?,
                None,
            )
        } else {
            (None, None, None, None, None, Some(self.top_values(name, 10)?))
        };

        Ok(ColumnStats {
            column: name.to_string(),
            dtype: dtype.to_string(),
            null_count: nulls,
            null_percentage: nulls as f64 * 100.0 / rows as f64,
            unique_count: uniques,
            unique_percentage: uniques as f64 * 100.0 / rows as f64,
            mean,
            median,
            std,
            min,
            max,
            top_values,
            sample_values,
        })
    }

    // --- Mutation ---------------------------------------------------------

    /// Fill missing values in a column. Returns how many cells were filled.
    pub fn impute(&mut self, name: &str, strategy: ImputeStrategy) -> Result<usize, DatasetError> {
        let idx = self.index_of(name)?;
        let dtype = self.dtypes[idx];

        let fill: Value = match &strategy {
            ImputeStrategy::Mean | ImputeStrategy::Median => {
                if !dtype.is_numeric() {
                    return Err(DatasetError::NonNumeric(name.to_string()));
                }
                let v = match strategy {
                    ImputeStrategy::Mean => self.mean(name)?,
                    _ => self.median(name)?,
                };
                match v {
                    Some(x) if dtype == DType::Int && x.fract() == 0.0 => Value::Int(x as i64),
                    Some(x) => Value::Float(x),
                    None => return Ok(0), // all-null column, nothing to anchor on
                }
            }
            ImputeStrategy::Mode => match self.mode(name)? {
                Some(v) => v,
                None => return Ok(0),
            },
            ImputeStrategy::Constant(raw) => match dtype {
                DType::Int => raw
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| DatasetError::Parse(format!("'{raw}' is not an integer")))?,
                DType::Float => raw
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| DatasetError::Parse(format!("'{raw}' is not a number")))?,
                _ => Value::Str(raw.clone()),
            },
        };

        // Mean imputation may widen an int column.
        if dtype == DType::Int && matches!(fill, Value::Float(_)) {
            self.dtypes[idx] = DType::Float;
            for v in self.columns[idx].iter_mut() {
                if let Value::Int(i) = v {
                    *v = Value::Float(*i as f64);
                }
            }
        }

        let mut filled = 0;
        for v in self.columns[idx].iter_mut() {
            if v.is_null() {
                *v = fill.clone();
                filled += 1;
            }
        }
        Ok(filled)
    }

    /// Remove a column. Atomic: either the column existed and is gone, or
    /// the frame is unchanged.
    pub fn drop_column(&mut self, name: &str) -> Result<(), DatasetError> {
        let idx = self.index_of(name)?;
        self.names.remove(idx);
        self.dtypes.remove(idx);
        self.columns.remove(idx);
        Ok(())
    }

    /// Convert a column to a different logical type, coercing unparsable
    /// cells to null (the original's `errors='coerce'` behavior).
    pub fn convert(&mut self, name: &str, target: DType) -> Result<(), DatasetError> {
        let idx = self.index_of(name)?;
        let converted: Vec<Value> = self.columns[idx]
            .iter()
            .map(|v| convert_cell(v, target))
            .collect();
        self.columns[idx] = converted;
        self.dtypes[idx] = target;
        Ok(())
    }

    /// Append a float column derived from an expression.
    pub fn add_float_column(
        &mut self,
        name: &str,
        values: Vec<Option<f64>>,
    ) -> Result<(), DatasetError> {
        if self.has_column(name) {
            return Err(DatasetError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.n_rows {
            return Err(DatasetError::Shape(format!(
                "expected {} rows, got {}",
                self.n_rows,
                values.len()
            )));
        }
        self.names.push(name.to_string());
        self.dtypes.push(DType::Float);
        self.columns.push(
            values
                .into_iter()
                .map(|v| v.map(Value::Float).unwrap_or(Value::Null))
                .collect(),
        );
        Ok(())
    }

    /// One-hot encode a column: one 0/1 indicator per distinct value
    /// (first distinct value dropped as the reference level), original
    /// column removed. Returns the names of the created columns.
    pub fn one_hot_encode(&mut self, name: &str) -> Result<Vec<String>, DatasetError> {
        let idx = self.index_of(name)?;

        let mut levels: Vec<String> = self.columns[idx]
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::render)
            .collect();
        levels.sort();
        levels.dedup();
        if levels.len() < 2 {
            return Err(DatasetError::Parse(format!(
                "column '{name}' has fewer than two distinct values"
            )));
        }

        let source = self.columns[idx].clone();
        let mut created = Vec::new();
        for level in levels.iter().skip(1) {
            let col_name = format!("{name}_{level}");
            if self.has_column(&col_name) {
                return Err(DatasetError::DuplicateColumn(col_name));
            }
            let cells: Vec<Value> = source
                .iter()
                .map(|v| Value::Int((!v.is_null() && v.render() == *level) as i64))
                .collect();
            self.names.push(col_name.clone());
            self.dtypes.push(DType::Int);
            self.columns.push(cells);
            created.push(col_name);
        }
        self.drop_column(name)?;
        Ok(created)
    }

    /// Label encode a column in place: distinct values (sorted) become
    /// integer codes, nulls become -1. Returns the number of levels.
    pub fn label_encode(&mut self, name: &str) -> Result<usize, DatasetError> {
        let idx = self.index_of(name)?;
        let mut levels: Vec<String> = self.columns[idx]
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::render)
            .collect();
        levels.sort();
        levels.dedup();

        let code_of: HashMap<&str, i64> = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i as i64))
            .collect();

        self.columns[idx] = self.columns[idx]
            .iter()
            .map(|v| {
                if v.is_null() {
                    Value::Int(-1)
                } else {
                    Value::Int(code_of[v.render().as_str()])
                }
            })
            .collect();
        self.dtypes[idx] = DType::Int;
        Ok(levels.len())
    }

    /// Move a column to the last position (conventionally the target).
    pub fn move_to_end(&mut self, name: &str) -> Result<(), DatasetError> {
        let idx = self.index_of(name)?;
        let n = self.names.remove(idx);
        let d = self.dtypes.remove(idx);
        let c = self.columns.remove(idx);
        self.names.push(n);
        self.dtypes.push(d);
        self.columns.push(c);
        Ok(())
    }

    /// Keep only the named columns, in the given order.
    pub fn select_columns(&mut self, keep: &[String]) -> Result<(), DatasetError> {
        let indices: Vec<usize> = keep
            .iter()
            .map(|n| self.index_of(n))
            .collect::<Result<_, _>>()?;
        self.names = indices.iter().map(|&i| self.names[i].clone()).collect();
        self.dtypes = indices.iter().map(|&i| self.dtypes[i]).collect();
        self.columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        Ok(())
    }

    // --- Feature scoring --------------------------------------------------

    /// Numeric view of a column with nulls treated as 0.0 (matching the
    /// original's `fillna(0)` before scoring).
    pub fn numeric_filled(&self, name: &str) -> Result<Vec<f64>, DatasetError> {
        if !self.dtype(name)?.is_numeric() {
            return Err(DatasetError::NonNumeric(name.to_string()));
        }
        Ok(self
            .column(name)?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0))
            .collect())
    }

    /// Integer codes for an arbitrary column (sorted distinct values),
    /// used to score against a categorical target.
    pub fn factorize(&self, name: &str) -> Result<Vec<f64>, DatasetError> {
        let col = self.column(name)?;
        let mut levels: Vec<String> = col
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::render)
            .collect();
        levels.sort();
        levels.dedup();
        let code_of: HashMap<&str, f64> = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i as f64))
            .collect();
        Ok(col
            .iter()
            .map(|v| {
                if v.is_null() {
                    -1.0
                } else {
                    code_of[v.render().as_str()]
                }
            })
            .collect())
    }

    /// Rank numeric feature columns by absolute Pearson correlation with
    /// the target (factorized when the target is not numeric). Sorted by
    /// descending score.
    pub fn correlation_ranking(&self, target: &str) -> Result<Vec<(String, f64)>, DatasetError> {
        let target_dtype = self.dtype(target)?;
        let y = if target_dtype.is_numeric() {
            self.numeric_filled(target)?
        } else {
            self.factorize(target)?
        };

        let features: Vec<&String> = self
            .names
            .iter()
            .filter(|n| *n != target)
            .filter(|n| self.dtype(n).map(DType::is_numeric).unwrap_or(false))
            .collect();
        if features.is_empty() {
            return Err(DatasetError::NoNumericFeatures);
        }

        let mut scores: Vec<(String, f64)> = features
            .into_iter()
            .map(|n| {
                let x = self.numeric_filled(n)?;
                Ok((n.clone(), pearson(&x, &y).abs()))
            })
            .collect::<Result<_, DatasetError>>()?;
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scores)
    }
}

fn convert_cell(v: &Value, target: DType) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    match target {
        DType::Int => match v {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Int(*f as i64),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| s.trim().parse::<f64>().map(|f| Value::Int(f as i64)))
                .unwrap_or(Value::Null),
            Value::Null => Value::Null,
        },
        DType::Float => match v {
            Value::Int(i) => Value::Float(*i as f64),
            Value::Float(f) => Value::Float(*f),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or(Value::Null),
            Value::Null => Value::Null,
        },
        DType::Str | DType::Category => Value::Str(v.render()),
        DType::Datetime => {
            let s = v.render();
            let parsed = chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.to_string())
                .or_else(|_| {
                    chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d").map(|d| d.to_string())
                })
                .or_else(|_| {
                    chrono::DateTime::parse_from_rfc3339(&s)
                        .map(|dt| dt.naive_utc().to_string())
                });
            parsed.map(Value::Str).unwrap_or(Value::Null)
        }
    }
}

/// Pearson correlation coefficient. Returns 0.0 for degenerate inputs
/// (constant series, mismatched lengths) so ranking never panics.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx) * (x - mx);
        vy += (y - my) * (y - my);
    }
    if vx == 0.0 || vy == 0.0 {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}
