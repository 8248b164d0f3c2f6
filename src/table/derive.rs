use crate::error::{MetricsError, Result};
use crate::table::{Column, Table, Value};
use std::collections::HashMap;

/// What a division yields when its denominator is exactly zero. Each formula
/// declares this itself; there is no crate-wide default. `ZeroWhenZeroDenom`
/// is the domain convention for "no signal" denominators (e.g. zero tolled
/// trips); `NullWhenZeroDenom` marks the ratio as genuinely undefined.
/// A null denominator yields null under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivPolicy {
    ZeroWhenZeroDenom,
    NullWhenZeroDenom,
}

/// Arithmetic formula over existing columns, declared as data so metric
/// definitions stay declarative. Nulls propagate through every operator.
#[derive(Debug, Clone)]
pub enum Expr {
    Col(String),
    Lit(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sum(Vec<Expr>),
    Div {
        num: Box<Expr>,
        den: Box<Expr>,
        policy: DivPolicy,
    },
}

pub fn col(name: &str) -> Expr {
    Expr::Col(name.to_string())
}

pub fn lit(v: f64) -> Expr {
    Expr::Lit(v)
}

pub fn sum_of(terms: Vec<Expr>) -> Expr {
    Expr::Sum(terms)
}

impl Expr {
    pub fn add(self, rhs: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }

    pub fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }

    pub fn div_or_zero(self, den: Expr) -> Expr {
        Expr::Div {
            num: Box::new(self),
            den: Box::new(den),
            policy: DivPolicy::ZeroWhenZeroDenom,
        }
    }

    pub fn div_or_null(self, den: Expr) -> Expr {
        Expr::Div {
            num: Box::new(self),
            den: Box::new(den),
            policy: DivPolicy::NullWhenZeroDenom,
        }
    }

    fn column_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Col(name) => out.push(name),
            Expr::Lit(_) => {}
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => {
                a.column_refs(out);
                b.column_refs(out);
            }
            Expr::Neg(a) => a.column_refs(out),
            Expr::Sum(terms) => {
                for t in terms {
                    t.column_refs(out);
                }
            }
            Expr::Div { num, den, .. } => {
                num.column_refs(out);
                den.column_refs(out);
            }
        }
    }

    fn eval(&self, cols: &HashMap<&str, &Column>, row: usize) -> Option<f64> {
        match self {
            Expr::Col(name) => cols[name.as_str()].get_f64(row),
            Expr::Lit(v) => Some(*v),
            Expr::Add(a, b) => Some(a.eval(cols, row)? + b.eval(cols, row)?),
            Expr::Sub(a, b) => Some(a.eval(cols, row)? - b.eval(cols, row)?),
            Expr::Mul(a, b) => Some(a.eval(cols, row)? * b.eval(cols, row)?),
            Expr::Neg(a) => Some(-a.eval(cols, row)?),
            Expr::Sum(terms) => {
                let mut acc = 0.0;
                for t in terms {
                    acc += t.eval(cols, row)?;
                }
                Some(acc)
            }
            Expr::Div { num, den, policy } => {
                let n = num.eval(cols, row)?;
                let d = den.eval(cols, row)?;
                if d == 0.0 {
                    return match policy {
                        DivPolicy::ZeroWhenZeroDenom => Some(0.0),
                        DivPolicy::NullWhenZeroDenom => None,
                    };
                }
                Some(n / d)
            }
        }
    }
}

/// Evaluate `expr` for every row and return a new table with the result
/// appended as float column `name`. All referenced columns must exist and be
/// numeric.
pub fn add_column(table: &Table, name: &str, expr: &Expr) -> Result<Table> {
    let mut refs = Vec::new();
    expr.column_refs(&mut refs);
    refs.sort_unstable();
    refs.dedup();

    let mut cols: HashMap<&str, &Column> = HashMap::with_capacity(refs.len());
    for r in refs {
        cols.insert(r, table.require_numeric(r, "derive")?);
    }

    let values: Vec<Option<f64>> = (0..table.len()).map(|row| expr.eval(&cols, row)).collect();
    let mut out = table.clone();
    out.push_column(name.to_string(), Column::Float(values))?;
    Ok(out)
}

/// Row-level test against a single column.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// ge <= x < lt, either bound optional.
    Range { ge: Option<f64>, lt: Option<f64> },
    InInts(Vec<i64>),
    InStrs(Vec<String>),
    StrPrefix(String),
    StrSuffix(String),
    StrEquals(String),
    IsNull,
}

impl Predicate {
    pub fn matches(&self, column: &Column, row: usize) -> bool {
        match self {
            Predicate::Range { ge, lt } => match column.get_f64(row) {
                Some(x) => ge.map_or(true, |g| x >= g) && lt.map_or(true, |l| x < l),
                None => false,
            },
            Predicate::InInts(set) => match column.get_f64(row) {
                Some(x) => x.fract() == 0.0 && set.contains(&(x as i64)),
                None => false,
            },
            Predicate::InStrs(set) => column
                .get_str(row)
                .map_or(false, |s| set.iter().any(|v| v == s)),
            Predicate::StrPrefix(p) => column.get_str(row).map_or(false, |s| s.starts_with(p)),
            Predicate::StrSuffix(p) => column.get_str(row).map_or(false, |s| s.ends_with(p)),
            Predicate::StrEquals(p) => column.get_str(row).map_or(false, |s| s == p),
            Predicate::IsNull => matches!(column.value(row), Value::Null),
        }
    }
}

/// Ordered categorical recode: first matching rule labels the row; rows with
/// no match take the default label, or null when no default is declared.
#[derive(Debug, Clone)]
pub struct Recode {
    pub name: String,
    pub on: String,
    pub rules: Vec<(Predicate, String)>,
    pub default: Option<String>,
}

pub fn add_recode(table: &Table, recode: &Recode) -> Result<Table> {
    let on = table.require_column(&recode.on, "recode")?;
    let labels: Vec<Option<String>> = (0..table.len())
        .map(|row| {
            for (pred, label) in &recode.rules {
                if pred.matches(on, row) {
                    return Some(label.clone());
                }
            }
            recode.default.clone()
        })
        .collect();
    let mut out = table.clone();
    out.push_column(recode.name.clone(), Column::Str(labels))?;
    Ok(out)
}

/// Conditional overwrite: where `when` matches, replace the values of the
/// target columns. Replacement types must agree with the column types.
#[derive(Debug, Clone)]
pub struct Overwrite {
    pub on: String,
    pub when: Predicate,
    pub set: Vec<(String, Value)>,
}

pub fn apply_overwrite(table: &Table, ow: &Overwrite) -> Result<Table> {
    let on = table.require_column(&ow.on, "overwrite")?;
    let mask: Vec<bool> = (0..table.len()).map(|row| ow.when.matches(on, row)).collect();

    let mut out = table.clone();
    for (target, replacement) in &ow.set {
        let col = out.require_column(target, "overwrite")?;
        let rewritten = match (col, replacement) {
            (Column::Float(v), Value::Float(r)) => Column::Float(
                v.iter()
                    .zip(&mask)
                    .map(|(x, m)| if *m { Some(*r) } else { *x })
                    .collect(),
            ),
            (Column::Float(v), Value::Int(r)) => Column::Float(
                v.iter()
                    .zip(&mask)
                    .map(|(x, m)| if *m { Some(*r as f64) } else { *x })
                    .collect(),
            ),
            (Column::Int(v), Value::Int(r)) => Column::Int(
                v.iter()
                    .zip(&mask)
                    .map(|(x, m)| if *m { Some(*r) } else { *x })
                    .collect(),
            ),
            (Column::Str(v), Value::Str(r)) => Column::Str(
                v.iter()
                    .zip(&mask)
                    .map(|(x, m)| if *m { Some(r.clone()) } else { x.clone() })
                    .collect(),
            ),
            (c, r) => {
                return Err(MetricsError::ColumnType {
                    column: target.clone(),
                    expected: c.type_name(),
                    actual: match r {
                        Value::Float(_) => "float",
                        Value::Int(_) => "int",
                        Value::Str(_) => "str",
                        Value::Null => "null",
                    },
                })
            }
        };
        out.push_column(target.clone(), rewritten)?;
    }
    Ok(out)
}

/// Keep only the rows where `when` matches on column `on`.
pub fn filter_rows(table: &Table, on: &str, when: &Predicate) -> Result<Table> {
    let col = table.require_column(on, "filter")?;
    let keep: Vec<bool> = (0..table.len()).map(|row| when.matches(col, row)).collect();
    Ok(table.filter(&keep))
}

/// Composite text key built from existing columns, e.g. `OAKLAND_SAN
/// FRANCISCO` or `incQ1 auto_no_transit`. Any null part nulls the whole key,
/// so rows with an unmapped component drop out of keyed aggregation.
#[derive(Debug, Clone)]
pub struct Concat {
    pub name: String,
    pub cols: Vec<String>,
    pub sep: String,
}

pub fn add_concat(table: &Table, concat: &Concat) -> Result<Table> {
    let cols: Vec<&Column> = concat
        .cols
        .iter()
        .map(|c| table.require_column(c, "concat"))
        .collect::<Result<_>>()?;

    let keys: Vec<Option<String>> = (0..table.len())
        .map(|row| {
            let parts: Option<Vec<String>> = cols.iter().map(|c| c.key_string(row)).collect();
            parts.map(|p| p.join(&concat.sep))
        })
        .collect();
    let mut out = table.clone();
    out.push_column(concat.name.clone(), Column::Str(keys))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links() -> Table {
        Table::from_columns(vec![
            (
                "distance".to_string(),
                Column::Float(vec![Some(2.0), Some(1.0), Some(3.0)]),
            ),
            (
                "volAM".to_string(),
                Column::Float(vec![Some(60.0), Some(30.0), None]),
            ),
            (
                "volPM".to_string(),
                Column::Float(vec![Some(40.0), Some(20.0), Some(5.0)]),
            ),
            ("ft".to_string(), Column::Int(vec![Some(1), Some(7), Some(5)])),
        ])
        .unwrap()
    }

    #[test]
    fn arithmetic_with_null_propagation() {
        let expr = sum_of(vec![col("volAM"), col("volPM")]).mul(col("distance"));
        let t = add_column(&links(), "vmt", &expr).unwrap();
        let vmt = t.column("vmt").unwrap();
        assert_eq!(vmt.get_f64(0), Some(200.0));
        assert_eq!(vmt.get_f64(1), Some(50.0));
        assert_eq!(vmt.get_f64(2), None); // null volAM poisons the row
    }

    #[test]
    fn division_policies_differ_only_at_zero_denominator() {
        let t = Table::from_columns(vec![
            ("toll".to_string(), Column::Float(vec![Some(5.0), Some(5.0)])),
            ("trips".to_string(), Column::Float(vec![Some(2.0), Some(0.0)])),
        ])
        .unwrap();

        let zeroed = add_column(&t, "r", &col("toll").div_or_zero(col("trips"))).unwrap();
        assert_eq!(zeroed.column("r").unwrap().get_f64(0), Some(2.5));
        assert_eq!(zeroed.column("r").unwrap().get_f64(1), Some(0.0));

        let nulled = add_column(&t, "r", &col("toll").div_or_null(col("trips"))).unwrap();
        assert_eq!(nulled.column("r").unwrap().get_f64(0), Some(2.5));
        assert_eq!(nulled.column("r").unwrap().get_f64(1), None);
    }

    #[test]
    fn null_numerator_divides_to_null_under_either_policy() {
        let t = Table::from_columns(vec![
            ("toll".to_string(), Column::Float(vec![None, None])),
            ("trips".to_string(), Column::Float(vec![Some(0.0), Some(2.0)])),
        ])
        .unwrap();

        let zeroed = add_column(&t, "r", &col("toll").div_or_zero(col("trips"))).unwrap();
        assert_eq!(zeroed.column("r").unwrap().get_f64(0), None);
        assert_eq!(zeroed.column("r").unwrap().get_f64(1), None);

        let nulled = add_column(&t, "r", &col("toll").div_or_null(col("trips"))).unwrap();
        assert_eq!(nulled.column("r").unwrap().get_f64(0), None);
        assert_eq!(nulled.column("r").unwrap().get_f64(1), None);
    }

    #[test]
    fn derive_rejects_string_columns() {
        let t = Table::from_columns(vec![(
            "mode".to_string(),
            Column::Str(vec![Some("da".to_string())]),
        )])
        .unwrap();
        assert!(add_column(&t, "x", &col("mode").mul(lit(2.0))).is_err());
    }

    #[test]
    fn recode_first_match_wins_with_default() {
        let recode = Recode {
            name: "grouping1".to_string(),
            on: "ft".to_string(),
            rules: vec![
                (Predicate::InInts(vec![1, 2, 8]), "Freeway".to_string()),
                (Predicate::InInts(vec![3, 4, 7]), "Non-Freeway".to_string()),
            ],
            default: None,
        };
        let t = add_recode(&links(), &recode).unwrap();
        let g = t.column("grouping1").unwrap();
        assert_eq!(g.get_str(0), Some("Freeway"));
        assert_eq!(g.get_str(1), Some("Non-Freeway"));
        assert_eq!(g.get_str(2), None); // ft=5 (ramp) unmapped
    }

    #[test]
    fn filter_keeps_matching_rows_only() {
        let t = filter_rows(&links(), "ft", &Predicate::InInts(vec![1, 7])).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.column("distance").unwrap().get_f64(1), Some(1.0));
    }

    #[test]
    fn concat_builds_composite_keys_and_nulls_on_missing_parts() {
        let t = Table::from_columns(vec![
            (
                "orig".to_string(),
                Column::Str(vec![Some("OAKLAND".to_string()), None]),
            ),
            (
                "dest".to_string(),
                Column::Str(vec![
                    Some("SAN FRANCISCO".to_string()),
                    Some("SAN JOSE".to_string()),
                ]),
            ),
        ])
        .unwrap();
        let concat = Concat {
            name: "od".to_string(),
            cols: vec!["orig".to_string(), "dest".to_string()],
            sep: "_".to_string(),
        };
        let t = add_concat(&t, &concat).unwrap();
        assert_eq!(t.column("od").unwrap().get_str(0), Some("OAKLAND_SAN FRANCISCO"));
        assert_eq!(t.column("od").unwrap().get_str(1), None);
    }

    #[test]
    fn overwrite_replaces_only_masked_rows() {
        let ow = Overwrite {
            on: "ft".to_string(),
            when: Predicate::InInts(vec![1]),
            set: vec![("volPM".to_string(), Value::Float(0.0))],
        };
        let t = apply_overwrite(&links(), &ow).unwrap();
        assert_eq!(t.column("volPM").unwrap().get_f64(0), Some(0.0));
        assert_eq!(t.column("volPM").unwrap().get_f64(1), Some(20.0));
    }
}
