use crate::error::{MetricsError, Result};
use crate::table::{Column, Table};
use std::collections::HashMap;
use tracing::debug;

/// Resolution rule for one-to-many lookup matches: order the candidate lookup
/// rows by a column and keep the first. The usual geographic case is
/// "largest overlap share wins" (`descending = true`).
#[derive(Debug, Clone)]
pub struct TieBreak {
    pub order_by: String,
    pub descending: bool,
}

impl TieBreak {
    pub fn largest(order_by: &str) -> TieBreak {
        TieBreak {
            order_by: order_by.to_string(),
            descending: true,
        }
    }
}

/// Left join `primary` to `lookup` on equal-named key columns. Every primary
/// row appears exactly once in the output; unmatched rows carry nulls for the
/// appended lookup columns. A lookup key matching more than one lookup row
/// without a declared tie-break is a definition error, not a data condition.
pub fn left_join(
    primary: &Table,
    lookup: &Table,
    keys: &[&str],
    tie_break: Option<&TieBreak>,
) -> Result<Table> {
    let p_keys: Vec<&Column> = keys
        .iter()
        .map(|k| primary.require_column(k, "join primary"))
        .collect::<Result<_>>()?;
    let l_keys: Vec<&Column> = keys
        .iter()
        .map(|k| lookup.require_column(k, "join lookup"))
        .collect::<Result<_>>()?;

    // index the lookup side
    let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..lookup.len() {
        if let Some(key) = lookup.row_key(&l_keys, row) {
            by_key.entry(key).or_default().push(row);
        }
    }

    // resolve one-to-many groups up front so ambiguity fails loudly
    let order_col = match tie_break {
        Some(tb) => Some(lookup.require_numeric(&tb.order_by, "join tie-break")?),
        None => None,
    };
    let mut resolved: HashMap<&str, usize> = HashMap::with_capacity(by_key.len());
    for (key, rows) in &by_key {
        let row = if rows.len() == 1 {
            rows[0]
        } else {
            let tb = tie_break.ok_or_else(|| MetricsError::AmbiguousJoin {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                key: key.clone(),
                count: rows.len(),
            })?;
            let order = order_col.expect("tie-break column resolved above");
            let mut best = rows[0];
            let mut best_val = order.get_f64(best);
            for &r in &rows[1..] {
                let v = order.get_f64(r);
                let better = match (v, best_val) {
                    (Some(a), Some(b)) => {
                        if tb.descending {
                            a > b
                        } else {
                            a < b
                        }
                    }
                    (Some(_), None) => true,
                    _ => false,
                };
                if better {
                    best = r;
                    best_val = v;
                }
            }
            best
        };
        resolved.insert(key.as_str(), row);
    }

    // one lookup row index (or none) per primary row
    let matches: Vec<Option<usize>> = (0..primary.len())
        .map(|row| {
            primary
                .row_key(&p_keys, row)
                .and_then(|k| resolved.get(k.as_str()).copied())
        })
        .collect();
    let hit = matches.iter().filter(|m| m.is_some()).count();
    debug!(
        keys = ?keys,
        rows = primary.len(),
        matched = hit,
        "left join"
    );

    let mut out = primary.clone();
    for name in lookup.column_names() {
        if keys.contains(&name.as_str()) {
            continue;
        }
        let col = lookup.column(name).expect("iterating lookup's own columns");
        let out_name = if out.has_column(name) {
            format!("{name}_rhs")
        } else {
            name.clone()
        };
        let appended = match col {
            Column::Float(v) => {
                Column::Float(matches.iter().map(|m| m.and_then(|r| v[r])).collect())
            }
            Column::Int(v) => Column::Int(matches.iter().map(|m| m.and_then(|r| v[r])).collect()),
            Column::Str(v) => {
                Column::Str(matches.iter().map(|m| m.and_then(|r| v[r].clone())).collect())
            }
        };
        out.push_column(out_name, appended)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    fn network() -> Table {
        Table::from_columns(vec![
            (
                "taz".to_string(),
                Column::Int(vec![Some(1), Some(2), Some(3), Some(1)]),
            ),
            (
                "vmt".to_string(),
                Column::Float(vec![Some(10.0), Some(20.0), Some(30.0), Some(40.0)]),
            ),
        ])
        .unwrap()
    }

    fn cities(duplicate_taz1: bool) -> Table {
        let mut taz = vec![Some(1), Some(2)];
        let mut city = vec![Some("OAKLAND".to_string()), Some("VALLEJO".to_string())];
        let mut share = vec![Some(0.9), Some(1.0)];
        if duplicate_taz1 {
            taz.push(Some(1));
            city.push(Some("ALAMEDA".to_string()));
            share.push(Some(0.1));
        }
        Table::from_columns(vec![
            ("taz".to_string(), Column::Int(taz)),
            ("city".to_string(), Column::Str(city)),
            ("area_share".to_string(), Column::Float(share)),
        ])
        .unwrap()
    }

    #[test]
    fn preserves_primary_cardinality() {
        let joined = left_join(&network(), &cities(false), &["taz"], None).unwrap();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.column("city").unwrap().get_str(0), Some("OAKLAND"));
        // taz=3 has no lookup row
        assert_eq!(joined.column("city").unwrap().value(2), Value::Null);
        // primary columns untouched
        assert_eq!(joined.column("vmt").unwrap().get_f64(3), Some(40.0));
    }

    #[test]
    fn one_to_many_without_tie_break_is_an_error() {
        match left_join(&network(), &cities(true), &["taz"], None) {
            Err(MetricsError::AmbiguousJoin { key, count, .. }) => {
                assert_eq!(key, "1");
                assert_eq!(count, 2);
            }
            other => panic!("expected AmbiguousJoin, got {other:?}"),
        }
    }

    #[test]
    fn tie_break_takes_largest_share() {
        let tb = TieBreak::largest("area_share");
        let joined = left_join(&network(), &cities(true), &["taz"], Some(&tb)).unwrap();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.column("city").unwrap().get_str(0), Some("OAKLAND"));
        assert_eq!(joined.column("city").unwrap().get_str(3), Some("OAKLAND"));
    }
}
