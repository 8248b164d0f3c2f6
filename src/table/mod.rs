pub mod aggregate;
pub mod delta;
pub mod derive;
pub mod join;
pub mod load;
pub mod write;

use crate::error::{MetricsError, Result};
use std::collections::HashMap;

/// A single cell. `Null` is an absent value, distinct from 0.0 or "".
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Str(String),
    Null,
}

/// A nullable, typed column. Columns own their data; tables never share them.
#[derive(Debug, Clone)]
pub enum Column {
    Float(Vec<Option<f64>>),
    Int(Vec<Option<i64>>),
    Str(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Float(_) => "float",
            Column::Int(_) => "int",
            Column::Str(_) => "str",
        }
    }

    pub fn value(&self, row: usize) -> Value {
        match self {
            Column::Float(v) => v[row].map(Value::Float).unwrap_or(Value::Null),
            Column::Int(v) => v[row].map(Value::Int).unwrap_or(Value::Null),
            Column::Str(v) => v[row]
                .as_ref()
                .map(|s| Value::Str(s.clone()))
                .unwrap_or(Value::Null),
        }
    }

    /// Numeric view of a cell; integer columns widen to f64, strings are None.
    pub fn get_f64(&self, row: usize) -> Option<f64> {
        match self {
            Column::Float(v) => v[row],
            Column::Int(v) => v[row].map(|i| i as f64),
            Column::Str(_) => None,
        }
    }

    pub fn get_str(&self, row: usize) -> Option<&str> {
        match self {
            Column::Str(v) => v[row].as_deref(),
            _ => None,
        }
    }

    /// Canonical key representation for joins and group-bys. Integral floats
    /// render like ints so `taz = 100.0` matches `taz = 100` across sources.
    /// Null cells have no key.
    pub fn key_string(&self, row: usize) -> Option<String> {
        match self {
            Column::Float(v) => v[row].map(|f| {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    format!("{}", f as i64)
                } else {
                    format!("{f}")
                }
            }),
            Column::Int(v) => v[row].map(|i| i.to_string()),
            Column::Str(v) => v[row].clone(),
        }
    }

    fn filtered(&self, keep: &[bool]) -> Column {
        fn pick<T: Clone>(v: &[Option<T>], keep: &[bool]) -> Vec<Option<T>> {
            v.iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(x, _)| x.clone())
                .collect()
        }
        match self {
            Column::Float(v) => Column::Float(pick(v, keep)),
            Column::Int(v) => Column::Int(pick(v, keep)),
            Column::Str(v) => Column::Str(pick(v, keep)),
        }
    }
}

/// An in-memory table: ordered named columns over an unordered row set.
/// Every transform produces a new `Table`; nothing mutates in place except
/// explicit column append/overwrite on an owned value.
#[derive(Debug, Clone, Default)]
pub struct Table {
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Column>,
    len: usize,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn from_columns(cols: Vec<(String, Column)>) -> Result<Table> {
        let mut t = Table::new();
        for (name, col) in cols {
            t.push_column(name, col)?;
        }
        Ok(t)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn require_column(&self, name: &str, source_name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| MetricsError::SchemaMismatch {
            source_name: source_name.to_string(),
            column: name.to_string(),
        })
    }

    /// Numeric column accessor; errors on string columns so formula authors
    /// find type problems instead of silent nulls.
    pub fn require_numeric(&self, name: &str, source_name: &str) -> Result<&Column> {
        let col = self.require_column(name, source_name)?;
        if matches!(col, Column::Str(_)) {
            return Err(MetricsError::ColumnType {
                column: name.to_string(),
                expected: "float or int",
                actual: col.type_name(),
            });
        }
        Ok(col)
    }

    /// Append a column; replaces an existing column of the same name.
    pub fn push_column(&mut self, name: String, col: Column) -> Result<()> {
        if !self.columns.is_empty() && col.len() != self.len {
            return Err(MetricsError::ColumnType {
                column: name,
                expected: "column matching table row count",
                actual: "mismatched length",
            });
        }
        if self.columns.is_empty() {
            self.len = col.len();
        }
        if let Some(&i) = self.index.get(&name) {
            self.columns[i] = col;
        } else {
            self.index.insert(name.clone(), self.columns.len());
            self.names.push(name);
            self.columns.push(col);
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(i) = self.index.remove(from) {
            self.names[i] = to.to_string();
            self.index.insert(to.to_string(), i);
        }
    }

    pub fn drop_columns(&mut self, names: &[&str]) {
        for name in names {
            if let Some(i) = self.index.remove(*name) {
                self.names.remove(i);
                self.columns.remove(i);
                for v in self.index.values_mut() {
                    if *v > i {
                        *v -= 1;
                    }
                }
            }
        }
    }

    /// New table containing only rows where `keep` is true.
    pub fn filter(&self, keep: &[bool]) -> Table {
        let mut t = Table::new();
        for (name, col) in self.names.iter().zip(&self.columns) {
            // filtered columns all share one length, push cannot fail
            let _ = t.push_column(name.clone(), col.filtered(keep));
        }
        t.len = keep.iter().filter(|k| **k).count();
        t
    }

    /// Composite key string for a row over `key_cols`, None if any part is null.
    pub fn row_key(&self, key_cols: &[&Column], row: usize) -> Option<String> {
        let mut parts = Vec::with_capacity(key_cols.len());
        for col in key_cols {
            parts.push(col.key_string(row)?);
        }
        Some(parts.join("\u{1f}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            (
                "taz".to_string(),
                Column::Int(vec![Some(1), Some(2), Some(3)]),
            ),
            (
                "pop".to_string(),
                Column::Float(vec![Some(10.0), None, Some(30.0)]),
            ),
            (
                "city".to_string(),
                Column::Str(vec![
                    Some("OAKLAND".to_string()),
                    Some("VALLEJO".to_string()),
                    None,
                ]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn column_access_and_types() {
        let t = sample();
        assert_eq!(t.len(), 3);
        assert_eq!(t.column("pop").unwrap().get_f64(0), Some(10.0));
        assert_eq!(t.column("pop").unwrap().get_f64(1), None);
        assert_eq!(t.column("city").unwrap().get_str(1), Some("VALLEJO"));
        assert!(t.require_numeric("city", "sample").is_err());
        assert!(t.require_column("missing", "sample").is_err());
    }

    #[test]
    fn key_string_matches_int_and_integral_float() {
        let ints = Column::Int(vec![Some(100)]);
        let floats = Column::Float(vec![Some(100.0)]);
        assert_eq!(ints.key_string(0), floats.key_string(0));
    }

    #[test]
    fn filter_keeps_selected_rows() {
        let t = sample();
        let f = t.filter(&[true, false, true]);
        assert_eq!(f.len(), 2);
        assert_eq!(f.column("taz").unwrap().value(1), Value::Int(3));
    }

    #[test]
    fn push_column_rejects_length_mismatch() {
        let mut t = sample();
        let err = t.push_column("bad".to_string(), Column::Int(vec![Some(1)]));
        assert!(err.is_err());
    }

    #[test]
    fn row_key_is_none_when_any_part_null() {
        let t = sample();
        let cols = vec![t.column("taz").unwrap(), t.column("city").unwrap()];
        assert!(t.row_key(&cols, 2).is_none());
        assert!(t.row_key(&cols, 0).is_some());
    }
}
