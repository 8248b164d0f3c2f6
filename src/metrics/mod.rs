pub mod definitions;
pub mod normalize;
pub mod pipeline;

use std::cmp::Ordering;
use std::fmt;

/// Reporting readiness of a metric value: final numbers feed dashboards,
/// the rest are working or diagnostic values kept in the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    TopLevel,
    Extra,
    Intermediate,
    Final,
    Debug,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TopLevel => "top_level",
            Stage::Extra => "extra",
            Stage::Intermediate => "intermediate",
            Stage::Final => "final",
            Stage::Debug => "debug",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value in the normalized long-form output. Blank groupings are empty
/// strings; a null `value` is an explicitly flagged undefined quantity (e.g.
/// a ratio against a zero baseline) and writes as an empty cell.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub grouping1: String,
    pub grouping2: String,
    pub grouping3: String,
    pub run_id: String,
    pub metric_id: String,
    pub stage: Stage,
    pub key: String,
    pub metric_desc: String,
    pub year: String,
    pub value: Option<f64>,
}

impl MetricRow {
    /// The tuple that must be unique within one run's output.
    pub fn identity(&self) -> (&str, &str, &str, &str, &str, &str) {
        (
            &self.run_id,
            &self.metric_id,
            self.stage.as_str(),
            &self.key,
            &self.metric_desc,
            &self.year,
        )
    }

    fn order_key(&self) -> (&str, Stage, &str, &str, &str, &str, &str) {
        (
            &self.metric_id,
            self.stage,
            &self.grouping1,
            &self.grouping2,
            &self.grouping3,
            &self.key,
            &self.metric_desc,
        )
    }
}

/// Stable output ordering so identical inputs produce identical files.
pub fn sort_rows(rows: &mut [MetricRow]) {
    rows.sort_by(|a, b| match a.order_key().cmp(&b.order_key()) {
        Ordering::Equal => a.run_id.cmp(&b.run_id),
        other => other,
    });
}
