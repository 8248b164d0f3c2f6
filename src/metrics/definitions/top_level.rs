//! Overall daily travel totals: network VMT/VHT by facility grouping,
//! household auto travel by income quartile, non-household categories,
//! transit trips by income quartile, and daily/annual toll revenue.

use super::{label, recode, AUTO_TIMES, LOADED_NETWORK, TRANSIT_TIMES};
use crate::metrics::normalize::{IdRole, NormalizeSpec};
use crate::metrics::pipeline::{AggregateStep, BranchDef, MetricDef, PostStep, Step};
use crate::metrics::Stage;
use crate::table::aggregate::Reduction;
use crate::table::derive::{col, lit, sum_of, Expr, Predicate};
use crate::ModelConfig;

/// Daily link VMT across the five time periods.
pub(super) fn network_vmt() -> Expr {
    sum_of(vec![
        col("volEA_tot"),
        col("volAM_tot"),
        col("volMD_tot"),
        col("volPM_tot"),
        col("volEV_tot"),
    ])
    .mul(col("distance"))
}

/// Daily link VHT: congested minutes times volume, per period, over 60.
pub(super) fn network_vht() -> Expr {
    sum_of(vec![
        col("ctimEA").mul(col("volEA_tot")),
        col("ctimAM").mul(col("volAM_tot")),
        col("ctimMD").mul(col("volMD_tot")),
        col("ctimPM").mul(col("volPM_tot")),
        col("ctimEV").mul(col("volEV_tot")),
    ])
    .mul(lit(1.0 / 60.0))
}

/// Freeway vs non-freeway facility recode; ramps and other facility types
/// stay unmapped and drop out of grouped totals.
pub(super) fn facility_recode(name: &str) -> Step {
    Step::recode(recode(
        name,
        "ft",
        vec![
            (Predicate::InInts(vec![1, 2, 8]), "Freeway"),
            (Predicate::InInts(vec![3, 4, 7]), "Non-Freeway"),
        ],
        None,
    ))
}

/// Non-household travel categories from the auto-times mode column.
pub(super) fn nonhousehold_recode(name: &str, default: Option<&str>) -> Step {
    Step::recode(recode(
        name,
        "Mode",
        vec![
            (Predicate::StrSuffix("ix".to_string()), "Interregional Travel"),
            (Predicate::StrSuffix("air".to_string()), "Interregional Travel"),
            (
                Predicate::StrEquals("zpv_tnc".to_string()),
                "Zero-Passenger Vehicles",
            ),
            (Predicate::StrPrefix("truck".to_string()), "Trucks"),
        ],
        default,
    ))
}

pub fn def(cfg: &ModelConfig) -> MetricDef {
    let network_vmt_vht = BranchDef {
        name: "network_vmt_vht",
        source: LOADED_NETWORK,
        steps: vec![
            facility_recode("facility"),
            Step::formula("daily_vmt", network_vmt()),
            Step::formula("daily_vht", network_vht()),
        ],
        aggregate: AggregateStep::new(
            &["facility"],
            vec![Reduction::sum("daily_vmt"), Reduction::sum("daily_vht")],
        ),
        post: Vec::new(),
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("facility", IdRole::Key)]),
        stage: Stage::TopLevel,
    };

    let household_auto = BranchDef {
        name: "household_auto",
        source: AUTO_TIMES,
        steps: vec![
            nonhousehold_recode("category", Some("Household")),
            Step::filter("category", Predicate::StrEquals("Household".to_string())),
            Step::recode(label("grouping1", "Income", "Income Level")),
        ],
        aggregate: AggregateStep::new(
            &["grouping1", "Income"],
            vec![
                Reduction::sum("Daily Person Trips"),
                Reduction::sum("Vehicle Miles"),
                Reduction::sum("Vehicle Minutes"),
            ],
        ),
        post: vec![
            PostStep::formula("daily_vht", col("Vehicle Minutes").mul(lit(1.0 / 60.0))),
            PostStep::rename("Daily Person Trips", "auto_trips"),
            PostStep::rename("Vehicle Miles", "daily_vmt"),
            PostStep::drop(&["Vehicle Minutes"]),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[
            ("grouping1", IdRole::Grouping1),
            ("Income", IdRole::Key),
        ]),
        stage: Stage::TopLevel,
    };

    // household rows get no category label here, so they drop in the groupby
    let nonhousehold_auto = BranchDef {
        name: "nonhousehold_auto",
        source: AUTO_TIMES,
        steps: vec![nonhousehold_recode("category", None)],
        aggregate: AggregateStep::new(
            &["category"],
            vec![
                Reduction::sum("Daily Person Trips"),
                Reduction::sum("Vehicle Miles"),
                Reduction::sum("Vehicle Minutes"),
            ],
        ),
        post: vec![
            PostStep::formula("daily_vht", col("Vehicle Minutes").mul(lit(1.0 / 60.0))),
            PostStep::rename("Daily Person Trips", "trips"),
            PostStep::rename("Vehicle Miles", "daily_vmt"),
            PostStep::drop(&["Vehicle Minutes"]),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("category", IdRole::Key)]),
        stage: Stage::TopLevel,
    };

    // transit trips by income quartile; `_no_zpv_inc*` rows carry the
    // passenger trips, other income codes drop out of the recode
    let transit_trips = BranchDef {
        name: "transit_trips",
        source: TRANSIT_TIMES,
        steps: vec![
            Step::recode(recode(
                "income_label",
                "Income",
                vec![
                    (Predicate::StrEquals("_no_zpv_inc1".to_string()), "inc1"),
                    (Predicate::StrEquals("_no_zpv_inc2".to_string()), "inc2"),
                    (Predicate::StrEquals("_no_zpv_inc3".to_string()), "inc3"),
                    (Predicate::StrEquals("_no_zpv_inc4".to_string()), "inc4"),
                ],
                None,
            )),
            Step::recode(label("grouping1", "Income", "Income Level")),
        ],
        aggregate: AggregateStep::new(
            &["grouping1", "income_label"],
            vec![Reduction::sum("Daily Trips")],
        ),
        post: vec![PostStep::rename("Daily Trips", "daily_transit_trips")],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[
            ("grouping1", IdRole::Grouping1),
            ("income_label", IdRole::Key),
        ]),
        stage: Stage::TopLevel,
    };

    let transit_trips_overall = BranchDef {
        name: "transit_trips_overall",
        source: TRANSIT_TIMES,
        steps: vec![Step::recode(recode(
            "bucket",
            "Income",
            vec![(Predicate::StrPrefix("_no_zpv_inc".to_string()), "overall")],
            None,
        ))],
        aggregate: AggregateStep::new(&["bucket"], vec![Reduction::sum("Daily Trips")]),
        post: vec![PostStep::rename("Daily Trips", "daily_transit_trips")],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("bucket", IdRole::Key)]),
        stage: Stage::TopLevel,
    };

    // value tolls are daily 2000 cents; report daily and annualized 2023$
    let toll_revenue = BranchDef {
        name: "toll_revenue",
        source: AUTO_TIMES,
        steps: vec![Step::recode(label("bucket", "Mode", "Toll Revenues"))],
        aggregate: AggregateStep::new(&["bucket"], vec![Reduction::sum("Value Tolls")]),
        post: vec![
            PostStep::formula(
                "daily_toll_revenue_2023d",
                col("Value Tolls").mul(lit(0.01 * cfg.inflation_00_23)),
            ),
            PostStep::formula(
                "annual_toll_revenue_2023d",
                col("daily_toll_revenue_2023d").mul(lit(cfg.revenue_days_per_year)),
            ),
            PostStep::drop(&["Value Tolls"]),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("bucket", IdRole::Key)]),
        stage: Stage::TopLevel,
    };

    MetricDef {
        id: "overall",
        branches: vec![
            network_vmt_vht,
            household_auto,
            nonhousehold_auto,
            transit_trips,
            transit_trips_overall,
            toll_revenue,
        ],
    }
}
