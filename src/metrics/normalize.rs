use crate::error::{MetricsError, Result};
use crate::metrics::{MetricRow, Stage};
use crate::table::{Column, Table};

/// How an id column of a wide table maps into the normalized schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRole {
    Grouping1,
    Grouping2,
    Grouping3,
    Key,
}

/// Declared wide-to-long mapping: which columns are ids and where they land;
/// every remaining column becomes a `metric_desc`.
#[derive(Debug, Clone)]
pub struct NormalizeSpec {
    pub ids: Vec<(String, IdRole)>,
}

impl NormalizeSpec {
    pub fn new(ids: &[(&str, IdRole)]) -> NormalizeSpec {
        NormalizeSpec {
            ids: ids.iter().map(|(n, r)| (n.to_string(), *r)).collect(),
        }
    }
}

/// Fixed fields stamped onto every normalized row of one metric.
#[derive(Debug, Clone)]
pub struct RowStamp {
    pub run_id: String,
    pub metric_id: String,
    pub stage: Stage,
    pub year: String,
}

/// Melt a wide aggregate into MetricRows: each non-id column contributes one
/// row per input row, named by the column. Non-id columns must be numeric;
/// a stray string column means the normalize mapping is wrong, and that
/// should fail the metric rather than drop data.
pub fn normalize(table: &Table, spec: &NormalizeSpec, stamp: &RowStamp) -> Result<Vec<MetricRow>> {
    let mut id_cols: Vec<(&Column, IdRole)> = Vec::with_capacity(spec.ids.len());
    for (name, role) in &spec.ids {
        id_cols.push((table.require_column(name, "normalize")?, *role));
    }

    let mut value_cols: Vec<(&str, &Column)> = Vec::new();
    for name in table.column_names() {
        if spec.ids.iter().any(|(id, _)| id == name) {
            continue;
        }
        let col = table.column(name).expect("iterating own columns");
        if matches!(col, Column::Str(_)) {
            return Err(MetricsError::UnmappedColumn {
                column: name.clone(),
            });
        }
        value_cols.push((name, col));
    }

    let mut rows = Vec::with_capacity(table.len() * value_cols.len());
    for row in 0..table.len() {
        let mut grouping1 = String::new();
        let mut grouping2 = String::new();
        let mut grouping3 = String::new();
        let mut key = String::new();
        for (col, role) in &id_cols {
            let text = col.key_string(row).unwrap_or_default();
            match role {
                IdRole::Grouping1 => grouping1 = text,
                IdRole::Grouping2 => grouping2 = text,
                IdRole::Grouping3 => grouping3 = text,
                IdRole::Key => key = text,
            }
        }
        for (desc, col) in &value_cols {
            rows.push(MetricRow {
                grouping1: grouping1.clone(),
                grouping2: grouping2.clone(),
                grouping3: grouping3.clone(),
                run_id: stamp.run_id.clone(),
                metric_id: stamp.metric_id.clone(),
                stage: stamp.stage,
                key: key.clone(),
                metric_desc: desc.to_string(),
                year: stamp.year.clone(),
                value: col.get_f64(row),
            });
        }
    }
    Ok(rows)
}
