use crate::error::Result;
use crate::table::{Column, Table};
use std::collections::HashMap;
use tracing::warn;

/// Reduction applied to one value column within each group.
#[derive(Debug, Clone)]
pub enum Reducer {
    Sum,
    Mean,
    WeightedMean { weight: String },
}

#[derive(Debug, Clone)]
pub struct Reduction {
    pub column: String,
    pub reducer: Reducer,
}

impl Reduction {
    pub fn sum(column: &str) -> Reduction {
        Reduction {
            column: column.to_string(),
            reducer: Reducer::Sum,
        }
    }

    pub fn mean(column: &str) -> Reduction {
        Reduction {
            column: column.to_string(),
            reducer: Reducer::Mean,
        }
    }

    pub fn weighted_mean(column: &str, weight: &str) -> Reduction {
        Reduction {
            column: column.to_string(),
            reducer: Reducer::WeightedMean {
                weight: weight.to_string(),
            },
        }
    }
}

/// Group `table` by the distinct key tuples over `group_keys` and reduce each
/// value column. Rows where any group key is null are excluded entirely
/// (unmapped categories drop out, matching the reference summaries). Output
/// group order is first-seen; callers that need a stable order sort the
/// normalized rows, not this table. A weighted mean whose weights sum to zero
/// yields null and a warning rather than a fault.
pub fn aggregate(table: &Table, group_keys: &[&str], reductions: &[Reduction]) -> Result<Table> {
    let key_cols: Vec<&Column> = group_keys
        .iter()
        .map(|k| table.require_column(k, "aggregate"))
        .collect::<Result<_>>()?;
    for r in reductions {
        table.require_numeric(&r.column, "aggregate")?;
        if let Reducer::WeightedMean { weight } = &r.reducer {
            table.require_numeric(weight, "aggregate")?;
        }
    }

    // bucket row indices by composite key, first-seen order
    let mut group_of: HashMap<String, usize> = HashMap::new();
    let mut rows_of: Vec<Vec<usize>> = Vec::new();
    let mut first_row: Vec<usize> = Vec::new();
    for row in 0..table.len() {
        let Some(key) = table.row_key(&key_cols, row) else {
            continue;
        };
        let g = *group_of.entry(key).or_insert_with(|| {
            rows_of.push(Vec::new());
            first_row.push(row);
            rows_of.len() - 1
        });
        rows_of[g].push(row);
    }

    let mut out = Table::new();

    // key columns keep their input types, taken from each group's first row
    for (name, col) in group_keys.iter().zip(&key_cols) {
        let rebuilt = match col {
            Column::Float(v) => Column::Float(first_row.iter().map(|&r| v[r]).collect()),
            Column::Int(v) => Column::Int(first_row.iter().map(|&r| v[r]).collect()),
            Column::Str(v) => Column::Str(first_row.iter().map(|&r| v[r].clone()).collect()),
        };
        out.push_column(name.to_string(), rebuilt)?;
    }

    for r in reductions {
        let value_col = table.require_numeric(&r.column, "aggregate")?;
        let reduced: Vec<Option<f64>> = match &r.reducer {
            Reducer::Sum => rows_of
                .iter()
                .map(|rows| {
                    Some(rows.iter().filter_map(|&row| value_col.get_f64(row)).sum())
                })
                .collect(),
            Reducer::Mean => rows_of
                .iter()
                .map(|rows| {
                    let vals: Vec<f64> =
                        rows.iter().filter_map(|&row| value_col.get_f64(row)).collect();
                    if vals.is_empty() {
                        None
                    } else {
                        Some(vals.iter().sum::<f64>() / vals.len() as f64)
                    }
                })
                .collect(),
            Reducer::WeightedMean { weight } => {
                let weight_col = table.require_numeric(weight, "aggregate")?;
                rows_of
                    .iter()
                    .map(|rows| {
                        let mut num = 0.0;
                        let mut den = 0.0;
                        for &row in rows {
                            if let (Some(v), Some(w)) =
                                (value_col.get_f64(row), weight_col.get_f64(row))
                            {
                                num += v * w;
                                den += w;
                            }
                        }
                        if den == 0.0 {
                            warn!(
                                column = r.column.as_str(),
                                weight = weight.as_str(),
                                "weighted mean with all-zero weights, emitting null"
                            );
                            None
                        } else {
                            Some(num / den)
                        }
                    })
                    .collect()
            }
        };
        out.push_column(r.column.clone(), Column::Float(reduced))?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::derive::{add_column, add_recode, col, sum_of, Predicate, Recode};

    /// The two-link facility-grouping scenario: freeway link (ft=1) with
    /// volume 100 over 2 miles, arterial link (ft=7) with volume 50 over 1.
    fn grouped_network() -> Table {
        let t = Table::from_columns(vec![
            ("ft".to_string(), Column::Int(vec![Some(1), Some(7)])),
            (
                "volume".to_string(),
                Column::Float(vec![Some(100.0), Some(50.0)]),
            ),
            (
                "distance".to_string(),
                Column::Float(vec![Some(2.0), Some(1.0)]),
            ),
        ])
        .unwrap();
        let t = add_column(&t, "VMT", &col("volume").mul(col("distance"))).unwrap();
        add_recode(
            &t,
            &Recode {
                name: "grouping1".to_string(),
                on: "ft".to_string(),
                rules: vec![
                    (Predicate::InInts(vec![1, 2, 8]), "Freeway".to_string()),
                    (
                        Predicate::InInts(vec![3, 4, 7]),
                        "Non-Freeway".to_string(),
                    ),
                ],
                default: None,
            },
        )
        .unwrap()
    }

    fn group_value(t: &Table, key: &str, value: &str) -> Option<f64> {
        let g = t.column("grouping1").unwrap();
        let v = t.column(value).unwrap();
        (0..t.len()).find(|&r| g.get_str(r) == Some(key)).and_then(|r| v.get_f64(r))
    }

    #[test]
    fn vmt_by_facility_grouping() {
        let agg = aggregate(
            &grouped_network(),
            &["grouping1"],
            &[Reduction::sum("VMT")],
        )
        .unwrap();
        assert_eq!(agg.len(), 2);
        assert_eq!(group_value(&agg, "Freeway", "VMT"), Some(200.0));
        assert_eq!(group_value(&agg, "Non-Freeway", "VMT"), Some(50.0));
    }

    #[test]
    fn sum_is_conserved_across_groupings() {
        let t = grouped_network();
        let total_direct: f64 = (0..t.len())
            .filter_map(|r| t.column("VMT").unwrap().get_f64(r))
            .sum();
        let agg = aggregate(&t, &["grouping1"], &[Reduction::sum("VMT")]).unwrap();
        let total_grouped: f64 = (0..agg.len())
            .filter_map(|r| agg.column("VMT").unwrap().get_f64(r))
            .sum();
        assert_eq!(total_direct, total_grouped);
    }

    #[test]
    fn null_group_keys_are_dropped() {
        let t = Table::from_columns(vec![
            (
                "grouping1".to_string(),
                Column::Str(vec![Some("Freeway".to_string()), None]),
            ),
            ("VMT".to_string(), Column::Float(vec![Some(10.0), Some(99.0)])),
        ])
        .unwrap();
        let agg = aggregate(&t, &["grouping1"], &[Reduction::sum("VMT")]).unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.column("VMT").unwrap().get_f64(0), Some(10.0));
    }

    #[test]
    fn weighted_mean_and_zero_weight_sentinel() {
        let t = Table::from_columns(vec![
            (
                "corridor".to_string(),
                Column::Str(vec![
                    Some("EastBay_880680".to_string()),
                    Some("EastBay_880680".to_string()),
                    Some("Empty".to_string()),
                ]),
            ),
            (
                "ctimAM".to_string(),
                Column::Float(vec![Some(10.0), Some(20.0), Some(5.0)]),
            ),
            (
                "distance".to_string(),
                Column::Float(vec![Some(3.0), Some(1.0), Some(0.0)]),
            ),
        ])
        .unwrap();
        let agg = aggregate(
            &t,
            &["corridor"],
            &[Reduction::weighted_mean("ctimAM", "distance")],
        )
        .unwrap();
        let c = agg.column("corridor").unwrap();
        let v = agg.column("ctimAM").unwrap();
        let find = |key: &str| {
            (0..agg.len())
                .find(|&r| c.get_str(r) == Some(key))
                .map(|r| v.get_f64(r))
        };
        assert_eq!(find("EastBay_880680"), Some(Some(12.5)));
        assert_eq!(find("Empty"), Some(None)); // null, never NaN
    }

    #[test]
    fn mean_reduction() {
        let t = Table::from_columns(vec![
            (
                "grouping1".to_string(),
                Column::Str(vec![Some("a".to_string()), Some("a".to_string())]),
            ),
            ("x".to_string(), Column::Float(vec![Some(4.0), None])),
        ])
        .unwrap();
        let agg = aggregate(&t, &["grouping1"], &[Reduction::mean("x")]).unwrap();
        // nulls are skipped, not counted
        assert_eq!(agg.column("x").unwrap().get_f64(0), Some(4.0));
    }

    #[test]
    fn multi_key_grouping() {
        let t = Table::from_columns(vec![
            (
                "grouping1".to_string(),
                Column::Str(vec![
                    Some("Freeway".to_string()),
                    Some("Freeway".to_string()),
                    Some("Freeway".to_string()),
                ]),
            ),
            (
                "key".to_string(),
                Column::Str(vec![
                    Some("EPCs".to_string()),
                    Some("Non-EPCs".to_string()),
                    Some("EPCs".to_string()),
                ]),
            ),
            (
                "VMT".to_string(),
                Column::Float(vec![Some(1.0), Some(2.0), Some(3.0)]),
            ),
        ])
        .unwrap();
        let agg = aggregate(&t, &["grouping1", "key"], &[Reduction::sum("VMT")]).unwrap();
        assert_eq!(agg.len(), 2);
        let k = agg.column("key").unwrap();
        let v = agg.column("VMT").unwrap();
        let epc_row = (0..2).find(|&r| k.get_str(r) == Some("EPCs")).unwrap();
        assert_eq!(v.get_f64(epc_row), Some(4.0));
    }

    #[test]
    fn sum_expr_feeds_aggregate() {
        let t = Table::from_columns(vec![
            ("grouping1".to_string(), Column::Str(vec![Some("x".to_string())])),
            ("volEA".to_string(), Column::Float(vec![Some(1.0)])),
            ("volAM".to_string(), Column::Float(vec![Some(2.0)])),
        ])
        .unwrap();
        let t = add_column(&t, "vol", &sum_of(vec![col("volEA"), col("volAM")])).unwrap();
        let agg = aggregate(&t, &["grouping1"], &[Reduction::sum("vol")]).unwrap();
        assert_eq!(agg.column("vol").unwrap().get_f64(0), Some(3.0));
    }
}
