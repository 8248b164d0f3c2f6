use crate::error::{MetricsError, Result};
use crate::table::{Column, Table};
use std::collections::HashMap;
use tracing::warn;

/// Compare a current-run aggregate against the identically keyed baseline
/// aggregate. Emits, per current row and per value column `v`, `<v>_current`,
/// `<v>_base`, `<v>_delta_abs` and `<v>_delta_pct`. Every key in `current`
/// must exist in `base`; a missing baseline comparator invalidates the metric
/// and is fatal for its delta stage. `<v>_delta_pct` is null (with a warning)
/// when the baseline value is zero, never infinity.
pub fn delta(
    current: &Table,
    base: &Table,
    match_keys: &[&str],
    value_cols: &[&str],
) -> Result<Table> {
    let cur_keys: Vec<&Column> = match_keys
        .iter()
        .map(|k| current.require_column(k, "delta current"))
        .collect::<Result<_>>()?;
    let base_keys: Vec<&Column> = match_keys
        .iter()
        .map(|k| base.require_column(k, "delta base"))
        .collect::<Result<_>>()?;

    let mut base_row_by_key: HashMap<String, usize> = HashMap::with_capacity(base.len());
    for row in 0..base.len() {
        if let Some(key) = base.row_key(&base_keys, row) {
            base_row_by_key.insert(key, row);
        }
    }

    // resolve every current row's baseline row up front so an unmatched key
    // fails before any columns are built
    let mut base_row_of: Vec<Option<usize>> = Vec::with_capacity(current.len());
    for row in 0..current.len() {
        match current.row_key(&cur_keys, row) {
            // null-keyed rows never aggregate, so nothing to compare
            None => base_row_of.push(None),
            Some(key) => {
                let base_row = *base_row_by_key
                    .get(&key)
                    .ok_or_else(|| MetricsError::UnmatchedRow { key: key.clone() })?;
                base_row_of.push(Some(base_row));
            }
        }
    }

    let mut out = Table::new();
    for (name, col) in match_keys.iter().zip(&cur_keys) {
        out.push_column(name.to_string(), (*col).clone())?;
    }

    for value_col in value_cols {
        let cur_vals = current.require_numeric(value_col, "delta current")?;
        let base_vals = base.require_numeric(value_col, "delta base")?;

        let mut current_out = Vec::with_capacity(current.len());
        let mut base_out = Vec::with_capacity(current.len());
        let mut abs_out = Vec::with_capacity(current.len());
        let mut pct_out = Vec::with_capacity(current.len());
        for row in 0..current.len() {
            let c = cur_vals.get_f64(row);
            let b = base_row_of[row].and_then(|r| base_vals.get_f64(r));
            current_out.push(base_row_of[row].and(c));
            base_out.push(b);
            match (base_row_of[row].and(c), b) {
                (Some(c), Some(b)) => {
                    abs_out.push(Some(c - b));
                    if b == 0.0 {
                        warn!(
                            column = *value_col,
                            "baseline value is zero, delta_pct is null"
                        );
                        pct_out.push(None);
                    } else {
                        pct_out.push(Some((c - b) / b));
                    }
                }
                _ => {
                    abs_out.push(None);
                    pct_out.push(None);
                }
            }
        }

        out.push_column(format!("{value_col}_current"), Column::Float(current_out))?;
        out.push_column(format!("{value_col}_base"), Column::Float(base_out))?;
        out.push_column(format!("{value_col}_delta_abs"), Column::Float(abs_out))?;
        out.push_column(format!("{value_col}_delta_pct"), Column::Float(pct_out))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(values: &[(&str, f64)]) -> Table {
        Table::from_columns(vec![
            (
                "key".to_string(),
                Column::Str(values.iter().map(|(k, _)| Some(k.to_string())).collect()),
            ),
            (
                "time".to_string(),
                Column::Float(values.iter().map(|(_, v)| Some(*v)).collect()),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn absolute_and_percent_deltas() {
        let current = keyed(&[("corridor_a", 120.0)]);
        let base = keyed(&[("corridor_a", 100.0)]);
        let d = delta(&current, &base, &["key"], &["time"]).unwrap();
        assert_eq!(d.column("time_delta_abs").unwrap().get_f64(0), Some(20.0));
        assert_eq!(d.column("time_delta_pct").unwrap().get_f64(0), Some(0.2));
        assert_eq!(d.column("time_current").unwrap().get_f64(0), Some(120.0));
        assert_eq!(d.column("time_base").unwrap().get_f64(0), Some(100.0));
    }

    #[test]
    fn missing_baseline_key_is_fatal() {
        let current = keyed(&[("corridor_a", 120.0), ("corridor_b", 50.0)]);
        let base = keyed(&[("corridor_a", 100.0)]);
        match delta(&current, &base, &["key"], &["time"]) {
            Err(MetricsError::UnmatchedRow { key }) => assert_eq!(key, "corridor_b"),
            other => panic!("expected UnmatchedRow, got {other:?}"),
        }
    }

    #[test]
    fn zero_baseline_yields_null_pct() {
        let current = keyed(&[("corridor_a", 120.0)]);
        let base = keyed(&[("corridor_a", 0.0)]);
        let d = delta(&current, &base, &["key"], &["time"]).unwrap();
        assert_eq!(d.column("time_delta_abs").unwrap().get_f64(0), Some(120.0));
        assert_eq!(d.column("time_delta_pct").unwrap().get_f64(0), None);
    }

    #[test]
    fn multiple_value_columns_in_one_pass() {
        let mut current = keyed(&[("inc1", 80.0)]);
        current
            .push_column("toll".to_string(), Column::Float(vec![Some(30.0)]))
            .unwrap();
        let mut base = keyed(&[("inc1", 100.0)]);
        base.push_column("toll".to_string(), Column::Float(vec![Some(10.0)]))
            .unwrap();

        let d = delta(&current, &base, &["key"], &["time", "toll"]).unwrap();
        assert_eq!(d.column("time_delta_abs").unwrap().get_f64(0), Some(-20.0));
        assert_eq!(d.column("toll_delta_abs").unwrap().get_f64(0), Some(20.0));
    }
}
