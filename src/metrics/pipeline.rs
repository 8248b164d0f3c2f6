use crate::error::MetricsError;
use crate::lookup::Lookups;
use crate::metrics::normalize::{normalize, NormalizeSpec, RowStamp};
use crate::metrics::{definitions, MetricRow, Stage};
use crate::run::RunContext;
use crate::table::aggregate::{aggregate, Reduction};
use crate::table::delta::delta;
use crate::table::derive::{
    add_column, add_concat, add_recode, apply_overwrite, filter_rows, Concat, Expr, Overwrite,
    Predicate, Recode,
};
use crate::table::join::{left_join, TieBreak};
use crate::table::load::SourceSpec;
use crate::table::{Column, Table};
use crate::ModelConfig;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info};

/// Which shared lookup table a join step references.
#[derive(Debug, Clone, Copy)]
pub enum LookupRef {
    TazCities,
    TazEpc,
    TollclassGroups,
    CorridorLinks,
}

impl LookupRef {
    fn table<'a>(&self, lookups: &'a Lookups) -> &'a Table {
        match self {
            LookupRef::TazCities => &lookups.taz_cities,
            LookupRef::TazEpc => &lookups.taz_epc,
            LookupRef::TollclassGroups => &lookups.tollclass_groups,
            LookupRef::CorridorLinks => &lookups.corridor_links,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinStep {
    pub lookup: LookupRef,
    pub keys: Vec<String>,
    pub tie_break: Option<TieBreak>,
}

/// Column- or row-producing step applied between source load and aggregation.
#[derive(Debug, Clone)]
pub enum DeriveStep {
    Formula { name: String, expr: Expr },
    Recode(Recode),
    Overwrite(Overwrite),
    Concat(Concat),
    Filter { on: String, when: Predicate },
    Rename { from: String, to: String },
    Drop(Vec<String>),
}

/// One pre-aggregation step of a branch. Joins and derives interleave freely
/// so a branch can rename a key, join, then rename again (the pattern for
/// joining the same crosswalk on both trip ends).
#[derive(Debug, Clone)]
pub enum Step {
    Join(JoinStep),
    Derive(DeriveStep),
}

impl Step {
    pub fn join(lookup: LookupRef, keys: &[&str], tie_break: Option<TieBreak>) -> Step {
        Step::Join(JoinStep {
            lookup,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            tie_break,
        })
    }

    pub fn formula(name: &str, expr: Expr) -> Step {
        Step::Derive(DeriveStep::Formula {
            name: name.to_string(),
            expr,
        })
    }

    pub fn recode(recode: Recode) -> Step {
        Step::Derive(DeriveStep::Recode(recode))
    }

    pub fn overwrite(ow: Overwrite) -> Step {
        Step::Derive(DeriveStep::Overwrite(ow))
    }

    pub fn concat(name: &str, cols: &[&str], sep: &str) -> Step {
        Step::Derive(DeriveStep::Concat(Concat {
            name: name.to_string(),
            cols: cols.iter().map(|c| c.to_string()).collect(),
            sep: sep.to_string(),
        }))
    }

    pub fn filter(on: &str, when: Predicate) -> Step {
        Step::Derive(DeriveStep::Filter {
            on: on.to_string(),
            when,
        })
    }

    pub fn rename(from: &str, to: &str) -> Step {
        Step::Derive(DeriveStep::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn drop(names: &[&str]) -> Step {
        Step::Derive(DeriveStep::Drop(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct AggregateStep {
    pub group_keys: Vec<String>,
    pub reductions: Vec<Reduction>,
}

impl AggregateStep {
    pub fn new(group_keys: &[&str], reductions: Vec<Reduction>) -> AggregateStep {
        AggregateStep {
            group_keys: group_keys.iter().map(|k| k.to_string()).collect(),
            reductions,
        }
    }
}

/// Post-aggregation step: row-wise derivation on the (small) aggregate, a
/// share-of-total column, or a collapse of the whole aggregate into a single
/// labelled row (the aggregate-of-aggregates case, e.g. the mean ratio across
/// the representative OD pairs). Shares are null when the grand total is zero.
#[derive(Debug, Clone)]
pub enum PostStep {
    Derive(DeriveStep),
    ShareOfTotal { column: String, name: String },
    Collapse {
        key: String,
        label: String,
        reductions: Vec<Reduction>,
    },
}

impl PostStep {
    pub fn formula(name: &str, expr: Expr) -> PostStep {
        PostStep::Derive(DeriveStep::Formula {
            name: name.to_string(),
            expr,
        })
    }

    pub fn recode(recode: Recode) -> PostStep {
        PostStep::Derive(DeriveStep::Recode(recode))
    }

    pub fn overwrite(ow: Overwrite) -> PostStep {
        PostStep::Derive(DeriveStep::Overwrite(ow))
    }

    pub fn concat(name: &str, cols: &[&str], sep: &str) -> PostStep {
        PostStep::Derive(DeriveStep::Concat(Concat {
            name: name.to_string(),
            cols: cols.iter().map(|c| c.to_string()).collect(),
            sep: sep.to_string(),
        }))
    }

    pub fn filter(on: &str, when: Predicate) -> PostStep {
        PostStep::Derive(DeriveStep::Filter {
            on: on.to_string(),
            when,
        })
    }

    pub fn rename(from: &str, to: &str) -> PostStep {
        PostStep::Derive(DeriveStep::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn drop(names: &[&str]) -> PostStep {
        PostStep::Derive(DeriveStep::Drop(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }

    pub fn share_of_total(column: &str, name: &str) -> PostStep {
        PostStep::ShareOfTotal {
            column: column.to_string(),
            name: name.to_string(),
        }
    }

    pub fn collapse(key: &str, label: &str, reductions: Vec<Reduction>) -> PostStep {
        PostStep::Collapse {
            key: key.to_string(),
            label: label.to_string(),
            reductions,
        }
    }
}

/// Run-vs-baseline comparison of the branch aggregate.
#[derive(Debug, Clone)]
pub struct DeltaStep {
    pub match_keys: Vec<String>,
    pub values: Vec<String>,
}

impl DeltaStep {
    pub fn new(match_keys: &[&str], values: &[&str]) -> DeltaStep {
        DeltaStep {
            match_keys: match_keys.iter().map(|k| k.to_string()).collect(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// One aggregation pass of a metric: source table through interleaved
/// join/derive steps, aggregation, post steps, an optional baseline delta
/// with its own post steps, and the melt into MetricRows. Branch outputs of
/// one metric concatenate.
#[derive(Debug, Clone)]
pub struct BranchDef {
    pub name: &'static str,
    pub source: SourceSpec,
    pub steps: Vec<Step>,
    pub aggregate: AggregateStep,
    pub post: Vec<PostStep>,
    pub delta: Option<DeltaStep>,
    pub post_delta: Vec<PostStep>,
    pub normalize: NormalizeSpec,
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct MetricDef {
    pub id: &'static str,
    pub branches: Vec<BranchDef>,
}

/// Pipeline stages, in execution order, for failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    LoadInputs,
    JoinLookups,
    DeriveFields,
    Aggregate,
    Delta,
    Normalize,
    Emit,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::LoadInputs => "LOAD_INPUTS",
            PipelineStage::JoinLookups => "JOIN_LOOKUPS",
            PipelineStage::DeriveFields => "DERIVE_FIELDS",
            PipelineStage::Aggregate => "AGGREGATE",
            PipelineStage::Delta => "DELTA",
            PipelineStage::Normalize => "NORMALIZE",
            PipelineStage::Emit => "EMIT",
        };
        f.write_str(s)
    }
}

/// A branch failure tagged with the stage it died in.
#[derive(Debug)]
pub struct StageError {
    pub stage: PipelineStage,
    pub source: MetricsError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {}

fn at(stage: PipelineStage) -> impl Fn(MetricsError) -> StageError {
    move |source| StageError { stage, source }
}

/// Baseline branch aggregates, keyed by (metric id, branch name), computed
/// once per batch and shared read-only across run workers.
pub type BaselineAggregates = HashMap<(String, String), Table>;

pub struct Pipeline<'a> {
    pub cfg: &'a ModelConfig,
    pub lookups: &'a Lookups,
}

impl<'a> Pipeline<'a> {
    pub fn new(cfg: &'a ModelConfig, lookups: &'a Lookups) -> Pipeline<'a> {
        Pipeline { cfg, lookups }
    }

    /// Run every metric for one run, recovering per branch: a failed branch
    /// is logged with run id, metric id and stage, and its rows are dropped
    /// while sibling branches and metrics still emit.
    pub fn run(&self, ctx: &mut RunContext, baseline: &BaselineAggregates) -> Vec<MetricRow> {
        let defs = definitions::all(self.cfg, &ctx.meta);
        let mut rows = Vec::new();
        for def in &defs {
            let mut metric_rows = Vec::new();
            let mut failed_branches = 0usize;
            for branch in &def.branches {
                match self.run_branch(ctx, def.id, branch, baseline) {
                    Ok(mut branch_rows) => metric_rows.append(&mut branch_rows),
                    Err(e) => {
                        failed_branches += 1;
                        error!(
                            run_id = ctx.meta.run_id.as_str(),
                            metric_id = def.id,
                            branch = branch.name,
                            stage = %e.stage,
                            "metric branch failed: {}",
                            e.source
                        );
                    }
                }
            }
            info!(
                run_id = ctx.meta.run_id.as_str(),
                metric_id = def.id,
                rows = metric_rows.len(),
                failed_branches,
                "metric done"
            );
            rows.append(&mut metric_rows);
        }
        rows
    }

    /// Compute baseline aggregates for every delta branch. Failures are
    /// logged here and surface later as MissingBaseline on the metrics that
    /// needed them.
    pub fn baseline_aggregates(&self, base_ctx: &mut RunContext) -> BaselineAggregates {
        let defs = definitions::all(self.cfg, &base_ctx.meta);
        let mut out = BaselineAggregates::new();
        for def in &defs {
            for branch in &def.branches {
                if branch.delta.is_none() {
                    continue;
                }
                match self.branch_aggregate(base_ctx, branch) {
                    Ok(table) => {
                        out.insert((def.id.to_string(), branch.name.to_string()), table);
                    }
                    Err(e) => error!(
                        run_id = base_ctx.meta.run_id.as_str(),
                        metric_id = def.id,
                        branch = branch.name,
                        stage = %e.stage,
                        "baseline aggregate failed: {}",
                        e.source
                    ),
                }
            }
        }
        info!(
            run_id = base_ctx.meta.run_id.as_str(),
            aggregates = out.len(),
            "baseline aggregates ready"
        );
        out
    }

    /// LOAD -> JOIN/DERIVE -> AGGREGATE (+ post steps) for one branch.
    fn branch_aggregate(
        &self,
        ctx: &mut RunContext,
        branch: &BranchDef,
    ) -> Result<Table, StageError> {
        let mut table = ctx
            .source(&branch.source)
            .map_err(at(PipelineStage::LoadInputs))?
            .clone();
        debug!(branch = branch.name, rows = table.len(), "loaded source");

        for step in &branch.steps {
            table = match step {
                Step::Join(join) => {
                    let keys: Vec<&str> = join.keys.iter().map(String::as_str).collect();
                    left_join(
                        &table,
                        join.lookup.table(self.lookups),
                        &keys,
                        join.tie_break.as_ref(),
                    )
                    .map_err(at(PipelineStage::JoinLookups))?
                }
                Step::Derive(d) => {
                    apply_derive(&table, d).map_err(at(PipelineStage::DeriveFields))?
                }
            };
        }

        let group_keys: Vec<&str> = branch
            .aggregate
            .group_keys
            .iter()
            .map(String::as_str)
            .collect();
        let mut agg = aggregate(&table, &group_keys, &branch.aggregate.reductions)
            .map_err(at(PipelineStage::Aggregate))?;
        if agg.is_empty() {
            return Err(StageError {
                stage: PipelineStage::Aggregate,
                source: MetricsError::EmptyAggregate {
                    group_keys: branch.aggregate.group_keys.clone(),
                },
            });
        }

        for step in &branch.post {
            agg = apply_post(&agg, step).map_err(at(PipelineStage::Aggregate))?;
        }
        Ok(agg)
    }

    fn run_branch(
        &self,
        ctx: &mut RunContext,
        metric_id: &str,
        branch: &BranchDef,
        baseline: &BaselineAggregates,
    ) -> Result<Vec<MetricRow>, StageError> {
        let mut agg = self.branch_aggregate(ctx, branch)?;

        if let Some(step) = &branch.delta {
            let base = baseline
                .get(&(metric_id.to_string(), branch.name.to_string()))
                .ok_or(StageError {
                    stage: PipelineStage::Delta,
                    source: MetricsError::MissingBaseline {
                        metric: metric_id.to_string(),
                        branch: branch.name.to_string(),
                    },
                })?;
            let match_keys: Vec<&str> = step.match_keys.iter().map(String::as_str).collect();
            let values: Vec<&str> = step.values.iter().map(String::as_str).collect();
            agg = delta(&agg, base, &match_keys, &values).map_err(at(PipelineStage::Delta))?;
            for post in &branch.post_delta {
                agg = apply_post(&agg, post).map_err(at(PipelineStage::Delta))?;
            }
        }

        let stamp = RowStamp {
            run_id: ctx.meta.run_id.clone(),
            metric_id: metric_id.to_string(),
            stage: branch.stage,
            year: ctx.meta.year.clone(),
        };
        normalize(&agg, &branch.normalize, &stamp).map_err(at(PipelineStage::Normalize))
    }
}

fn apply_derive(table: &Table, step: &DeriveStep) -> crate::error::Result<Table> {
    match step {
        DeriveStep::Formula { name, expr } => add_column(table, name, expr),
        DeriveStep::Recode(recode) => add_recode(table, recode),
        DeriveStep::Overwrite(ow) => apply_overwrite(table, ow),
        DeriveStep::Concat(concat) => add_concat(table, concat),
        DeriveStep::Filter { on, when } => filter_rows(table, on, when),
        DeriveStep::Rename { from, to } => {
            let mut out = table.clone();
            out.rename_column(from, to);
            Ok(out)
        }
        DeriveStep::Drop(names) => {
            let mut out = table.clone();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            out.drop_columns(&refs);
            Ok(out)
        }
    }
}

fn apply_post(agg: &Table, step: &PostStep) -> crate::error::Result<Table> {
    match step {
        PostStep::Derive(d) => apply_derive(agg, d),
        PostStep::ShareOfTotal { column, name } => share_of_total(agg, column, name),
        PostStep::Collapse {
            key,
            label,
            reductions,
        } => collapse(agg, key, label, reductions),
    }
}

/// Re-aggregate the whole aggregate into one row under a constant key, so a
/// branch can report a summary statistic of its own per-group results. The
/// mean reducer skips nulls, so groups with an undefined value do not drag
/// the summary down.
fn collapse(
    agg: &Table,
    key: &str,
    label: &str,
    reductions: &[Reduction],
) -> crate::error::Result<Table> {
    let mut labelled = agg.clone();
    labelled.push_column(
        key.to_string(),
        Column::Str(vec![Some(label.to_string()); agg.len()]),
    )?;
    aggregate(&labelled, &[key], reductions)
}

/// Each group's share of the column's grand total; null when the total is
/// zero since a share of nothing is undefined.
fn share_of_total(agg: &Table, column: &str, name: &str) -> crate::error::Result<Table> {
    let col = agg.require_numeric(column, "share_of_total")?;
    let total: f64 = (0..agg.len()).filter_map(|r| col.get_f64(r)).sum();
    let shares: Vec<Option<f64>> = (0..agg.len())
        .map(|r| {
            if total == 0.0 {
                None
            } else {
                col.get_f64(r).map(|v| v / total)
            }
        })
        .collect();
    let mut out = agg.clone();
    out.push_column(name.to_string(), Column::Float(shares))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunMetadata;
    use std::fs;
    use tempfile::TempDir;

    fn write_lookups(dir: &std::path::Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("taz_with_cities.csv"),
            "TAZ1454,CITY,area_share\n1,OAKLAND,1.0\n",
        )
        .unwrap();
        fs::write(dir.join("taz_epc_crosswalk.csv"), "TAZ1454,taz_epc\n1,1\n").unwrap();
        fs::write(
            dir.join("tollclass_designations.csv"),
            "tollclass,Grouping major,Grouping minor\n1,680,680_AM\n",
        )
        .unwrap();
        fs::write(
            dir.join("a_b_with_minor_groupings.csv"),
            "a,b,Grouping minor\n1,2,680_AM\n",
        )
        .unwrap();
        fs::write(
            dir.join("model_runs.csv"),
            "directory,year,category,status\n2035_TM152_NGF_NP10_Path4_02,2035,Pathway 4,current\n",
        )
        .unwrap();
    }

    /// A scenario with only the loaded network present: network-based
    /// branches produce rows, every other branch fails LOAD_INPUTS and is
    /// skipped without sinking the run.
    #[test]
    fn network_branches_survive_missing_sibling_sources() {
        let dir = TempDir::new().unwrap();
        let lookup_dir = dir.path().join("lookups");
        write_lookups(&lookup_dir);
        let lookups = crate::lookup::Lookups::load(&lookup_dir).unwrap();

        let run_id = "2035_TM152_NGF_NP10_Path4_02";
        let scenarios = dir.path().join("scenarios");
        let out_dir = scenarios.join(run_id).join("OUTPUT");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(
            out_dir.join("avgload5period.csv"),
            "a,b,distance,ft,volEA_tot,volAM_tot,volMD_tot,volPM_tot,volEV_tot,\
             ctimEA,ctimAM,ctimMD,ctimPM,ctimEV,cspdAM\n\
             1,2,2.0,1,0,100,0,0,0,0,2.0,0,0,0,60.0\n\
             2,3,1.0,7,0,50,0,0,0,0,1.5,0,0,0,30.0\n",
        )
        .unwrap();

        fs::create_dir_all(out_dir.join("metrics")).unwrap();
        fs::write(
            out_dir.join("metrics/transit_times_by_mode_income.csv"),
            "Income,Mode,Daily Trips\n\
             _no_zpv_inc1,local_bus,10\n\
             _no_zpv_inc1,heavy_rail,5\n\
             _no_zpv_inc2,local_bus,20\n\
             zpv_inc1,local_bus,99\n",
        )
        .unwrap();

        let cfg = ModelConfig::default();
        let pipeline = Pipeline::new(&cfg, &lookups);
        let meta = RunMetadata::parse(run_id, "Pathway 4");
        let mut ctx = RunContext::new(&scenarios, meta);
        let rows = pipeline.run(&mut ctx, &BaselineAggregates::new());

        let vmt = |key: &str| {
            rows.iter()
                .find(|r| r.metric_id == "overall" && r.key == key && r.metric_desc == "daily_vmt")
                .map(|r| r.value)
                .unwrap()
        };
        assert_eq!(vmt("Freeway"), Some(200.0));
        assert_eq!(vmt("Non-Freeway"), Some(50.0));

        // transit trips: per-quartile sums plus the overall total, with the
        // zero-passenger rows excluded
        let trips = |key: &str| {
            rows.iter()
                .find(|r| {
                    r.metric_id == "overall"
                        && r.key == key
                        && r.metric_desc == "daily_transit_trips"
                })
                .map(|r| r.value)
                .unwrap()
        };
        assert_eq!(trips("inc1"), Some(15.0));
        assert_eq!(trips("inc2"), Some(20.0));
        assert_eq!(trips("overall"), Some(35.0));

        // fatality estimates come from the same network table
        assert!(rows
            .iter()
            .any(|r| r.metric_id == "Safe 1" && r.metric_desc == "annual_fatalities"));
        // no rows from the sources that are absent
        assert!(!rows.iter().any(|r| r.metric_id == "Affordable 1"));
    }

    #[test]
    fn share_of_total_sums_to_one() {
        let t = Table::from_columns(vec![
            (
                "key".to_string(),
                Column::Str(vec![Some("transit".to_string()), Some("auto".to_string())]),
            ),
            (
                "trips".to_string(),
                Column::Float(vec![Some(25.0), Some(75.0)]),
            ),
        ])
        .unwrap();
        let out = share_of_total(&t, "trips", "share").unwrap();
        let s = out.column("share").unwrap();
        assert_eq!(s.get_f64(0), Some(0.25));
        assert_eq!(s.get_f64(1), Some(0.75));
    }

    #[test]
    fn collapse_averages_across_groups_skipping_nulls() {
        // three OD markets, one with no transit service and so no ratio
        let t = Table::from_columns(vec![
            (
                "od".to_string(),
                Column::Str(vec![
                    Some("OAKLAND_SAN FRANCISCO".to_string()),
                    Some("ANTIOCH_OAKLAND".to_string()),
                    Some("FAIRFIELD_DUBLIN".to_string()),
                ]),
            ),
            (
                "ratio_travel_time_transit_auto".to_string(),
                Column::Float(vec![Some(1.5), Some(2.5), None]),
            ),
        ])
        .unwrap();
        let out = collapse(
            &t,
            "od",
            "Average across OD pairs",
            &[Reduction::mean("ratio_travel_time_transit_auto")],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out.column("od").unwrap().get_str(0),
            Some("Average across OD pairs")
        );
        assert_eq!(
            out.column("ratio_travel_time_transit_auto").unwrap().get_f64(0),
            Some(2.0)
        );
    }

    #[test]
    fn share_of_zero_total_is_null() {
        let t = Table::from_columns(vec![
            ("key".to_string(), Column::Str(vec![Some("x".to_string())])),
            ("trips".to_string(), Column::Float(vec![Some(0.0)])),
        ])
        .unwrap();
        let out = share_of_total(&t, "trips", "share").unwrap();
        assert_eq!(out.column("share").unwrap().get_f64(0), None);
    }
}
