//! Affordability metrics: household transportation costs as a share of
//! income (Affordable 1) and the value of auto travel-time savings against
//! incremental toll costs vs the baseline run (Affordable 2).

use super::top_level::nonhousehold_recode;
use super::{in_strs, recode, set_floats, AUTO_TIMES, TRAVEL_COST};
use crate::metrics::normalize::{IdRole, NormalizeSpec};
use crate::metrics::pipeline::{
    AggregateStep, BranchDef, DeltaStep, DeriveStep, MetricDef, PostStep, Step,
};
use crate::metrics::Stage;
use crate::run::{RunMetadata, TollDiscountVariant};
use crate::table::aggregate::Reduction;
use crate::table::derive::{col, lit, sum_of, Predicate};
use crate::ModelConfig;

/// Raw travel-cost columns summed per household segment. Costs are daily
/// 2000 cents; trip and household counts are daily units.
const RAW_SUMS: [&str; 16] = [
    "num_hhlds",
    "total_hhld_autos",
    "total_hhld_income",
    "total_auto_op_cost",
    "total_parking_cost",
    "total_bridge_toll",
    "total_value_toll",
    "total_cordon_toll",
    "total_fare",
    "total_drv_trn_op_cost",
    "total_taxitnc_cost",
    "total_detailed_auto_cost",
    "total_detailed_transit_cost",
    "num_auto_trips",
    "num_transit_trips",
    "num_taxitnc_trips",
];

/// Annualized 2023$ columns derived from the raw sums, in derivation order.
const ANNUAL_COLS: [&str; 14] = [
    "auto_op_cost_annual_2023d",
    "parking_cost_annual_2023d",
    "bridge_toll_cost_annual_2023d",
    "value_toll_cost_annual_2023d",
    "cordon_toll_cost_annual_2023d",
    "transit_fare_annual_2023d",
    "drive_to_transit_cost_annual_2023d",
    "taxitnc_cost_annual_2023d",
    "auto_cost_annual_2023d",
    "transit_cost_annual_2023d",
    "auto_own_finance_cost_annual_2023d",
    "auto_insurance_cost_annual_2023d",
    "auto_registration_cost_annual_2023d",
    "transportation_cost_annual_2023d",
];

/// The components reported as a share of household income.
const PCT_OF_INCOME_BASES: [&str; 12] = [
    "auto_op_cost",
    "parking_cost",
    "bridge_toll_cost",
    "value_toll_cost",
    "cordon_toll_cost",
    "transit_fare",
    "drive_to_transit_cost",
    "taxitnc_cost",
    "auto_own_finance_cost",
    "auto_insurance_cost",
    "auto_registration_cost",
    "transportation_cost",
];

fn sum_reductions() -> Vec<Reduction> {
    RAW_SUMS.iter().map(|c| Reduction::sum(c)).collect()
}

/// Daily 2000-cent sums to annual 2023 dollars, plus the AAA fixed ownership
/// costs scaled by household autos, the all-in total, and annual income.
fn annualize(cfg: &ModelConfig) -> Vec<PostStep> {
    let daily = cfg.days_per_year * 0.01 * cfg.inflation_00_23;
    let fixed = cfg.inflation_00_23 / cfg.inflation_00_20;
    vec![
        PostStep::formula("auto_op_cost_annual_2023d", col("total_auto_op_cost").mul(lit(daily))),
        PostStep::formula("parking_cost_annual_2023d", col("total_parking_cost").mul(lit(daily))),
        PostStep::formula("bridge_toll_cost_annual_2023d", col("total_bridge_toll").mul(lit(daily))),
        PostStep::formula("value_toll_cost_annual_2023d", col("total_value_toll").mul(lit(daily))),
        PostStep::formula("cordon_toll_cost_annual_2023d", col("total_cordon_toll").mul(lit(daily))),
        PostStep::formula("transit_fare_annual_2023d", col("total_fare").mul(lit(daily))),
        PostStep::formula(
            "drive_to_transit_cost_annual_2023d",
            col("total_drv_trn_op_cost").mul(lit(daily)),
        ),
        PostStep::formula("taxitnc_cost_annual_2023d", col("total_taxitnc_cost").mul(lit(daily))),
        PostStep::formula(
            "auto_cost_annual_2023d",
            col("total_detailed_auto_cost").mul(lit(daily)),
        ),
        PostStep::formula(
            "transit_cost_annual_2023d",
            col("total_detailed_transit_cost").mul(lit(daily)),
        ),
        PostStep::formula(
            "auto_own_finance_cost_annual_2023d",
            col("total_hhld_autos").mul(lit(
                (cfg.auto_ownership_cost_2020d + cfg.auto_finance_cost_2020d) * fixed,
            )),
        ),
        PostStep::formula(
            "auto_insurance_cost_annual_2023d",
            col("total_hhld_autos").mul(lit(cfg.auto_insurance_cost_2020d * fixed)),
        ),
        PostStep::formula(
            "auto_registration_cost_annual_2023d",
            col("total_hhld_autos").mul(lit(cfg.auto_registration_cost_2020d * fixed)),
        ),
        PostStep::formula(
            "transportation_cost_annual_2023d",
            sum_of(vec![
                col("auto_cost_annual_2023d"),
                col("transit_cost_annual_2023d"),
                col("auto_own_finance_cost_annual_2023d"),
                col("auto_insurance_cost_annual_2023d"),
                col("auto_registration_cost_annual_2023d"),
                col("taxitnc_cost_annual_2023d"),
            ]),
        ),
        PostStep::formula(
            "hhld_income_annual_2023d",
            col("total_hhld_income").mul(lit(cfg.inflation_00_23)),
        ),
    ]
}

fn drop_owned(names: Vec<String>) -> PostStep {
    PostStep::Derive(DeriveStep::Drop(names))
}

fn quartile_label() -> Step {
    Step::recode(recode(
        "incQ_label",
        "incQ",
        vec![
            (Predicate::InInts(vec![1]), "incQ1"),
            (Predicate::InInts(vec![2]), "incQ2"),
            (Predicate::InInts(vec![3]), "incQ3"),
            (Predicate::InInts(vec![4]), "incQ4"),
        ],
        None,
    ))
}

pub fn transportation_costs(cfg: &ModelConfig) -> MetricDef {
    // annual cost components per household segment, incQ1/incQ2 only
    let mut costs_post = annualize(cfg);
    costs_post.extend([
        PostStep::formula(
            "avg_num_autos_per_hhld",
            col("total_hhld_autos").div_or_null(col("num_hhlds")),
        ),
        PostStep::formula(
            "avg_hhld_income_annual_2023d_per_hhld",
            col("hhld_income_annual_2023d").div_or_null(col("num_hhlds")),
        ),
        PostStep::formula(
            "avg_transportation_cost_annual_2023d_per_hhld",
            col("transportation_cost_annual_2023d").div_or_null(col("num_hhlds")),
        ),
        PostStep::filter("incQ_label", in_strs(&["incQ1", "incQ2"])),
        PostStep::concat("key", &["incQ_label", "hhld_travel"], " "),
    ]);
    let mut costs_drop: Vec<String> = RAW_SUMS
        .iter()
        .filter(|c| **c != "num_hhlds")
        .map(|c| c.to_string())
        .collect();
    costs_drop.extend(["incQ_label".to_string(), "hhld_travel".to_string()]);
    costs_post.push(drop_owned(costs_drop));

    let costs = BranchDef {
        name: "household_costs",
        source: TRAVEL_COST,
        steps: vec![quartile_label()],
        aggregate: AggregateStep::new(&["incQ_label", "hhld_travel"], sum_reductions()),
        post: costs_post,
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("key", IdRole::Key)]),
        stage: Stage::Intermediate,
    };

    // cost components as a share of annual household income
    let mut share_post = annualize(cfg);
    for base in PCT_OF_INCOME_BASES {
        share_post.push(PostStep::formula(
            &format!("{base}_pct_of_income"),
            col(&format!("{base}_annual_2023d")).div_or_null(col("hhld_income_annual_2023d")),
        ));
    }
    share_post.extend([
        PostStep::filter("incQ_label", in_strs(&["incQ1", "incQ2"])),
        PostStep::concat("key", &["incQ_label", "hhld_travel"], " "),
    ]);
    let mut share_drop: Vec<String> = RAW_SUMS.iter().map(|c| c.to_string()).collect();
    share_drop.extend(ANNUAL_COLS.iter().map(|c| c.to_string()));
    share_drop.extend([
        "hhld_income_annual_2023d".to_string(),
        "incQ_label".to_string(),
        "hhld_travel".to_string(),
    ]);
    share_post.push(drop_owned(share_drop));

    let income_share = BranchDef {
        name: "income_share",
        source: TRAVEL_COST,
        steps: vec![quartile_label()],
        aggregate: AggregateStep::new(&["incQ_label", "hhld_travel"], sum_reductions()),
        post: share_post,
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("key", IdRole::Key)]),
        stage: Stage::Final,
    };

    // same shares across all income quartiles combined
    let mut all_inc_post = annualize(cfg);
    for base in PCT_OF_INCOME_BASES {
        all_inc_post.push(PostStep::formula(
            &format!("{base}_pct_of_income"),
            col(&format!("{base}_annual_2023d")).div_or_null(col("hhld_income_annual_2023d")),
        ));
    }
    all_inc_post.push(PostStep::concat("key", &["inc_all", "hhld_travel"], " "));
    let mut all_inc_drop: Vec<String> = RAW_SUMS.iter().map(|c| c.to_string()).collect();
    all_inc_drop.extend(ANNUAL_COLS.iter().map(|c| c.to_string()));
    all_inc_drop.extend([
        "hhld_income_annual_2023d".to_string(),
        "inc_all".to_string(),
        "hhld_travel".to_string(),
    ]);
    all_inc_post.push(drop_owned(all_inc_drop));

    let income_share_all = BranchDef {
        name: "income_share_all",
        source: TRAVEL_COST,
        steps: vec![Step::recode(recode("inc_all", "incQ", Vec::new(), Some("all_inc")))],
        aggregate: AggregateStep::new(&["inc_all", "hhld_travel"], sum_reductions()),
        post: all_inc_post,
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("key", IdRole::Key)]),
        stage: Stage::Final,
    };

    MetricDef {
        id: "Affordable 1",
        branches: vec![costs, income_share, income_share_all],
    }
}

/// Per-quartile value-of-time overwrites; the target column must already
/// exist (seeded with zero).
fn vot_by_quartile(cfg: &ModelConfig, target: &str) -> Vec<PostStep> {
    (1..=4)
        .map(|q| {
            PostStep::overwrite(set_floats(
                "Income",
                Predicate::StrEquals(format!("inc{q}")),
                vec![(target, cfg.household_vot_2023d(q))],
            ))
        })
        .collect()
}

pub fn time_savings_vs_tolls(cfg: &ModelConfig, meta: &RunMetadata) -> MetricDef {
    let mut steps = vec![
        nonhousehold_recode("category", Some("Household")),
        Step::filter("category", Predicate::StrEquals("Household".to_string())),
        Step::formula("vt_factor", lit(1.0)),
    ];
    // the means-based program discounts value tolls for the lowest quartile
    if meta.discount == TollDiscountVariant::MeansBased {
        steps.push(Step::overwrite(set_floats(
            "Income",
            Predicate::StrEquals("inc1".to_string()),
            vec![("vt_factor", cfg.means_based_toll_factor_q1)],
        )));
    }
    steps.push(Step::formula(
        "daily_toll_cost_2023d",
        col("Bridge Tolls")
            .add(col("Value Tolls").mul(col("vt_factor")))
            .mul(lit(0.01 * cfg.inflation_00_23)),
    ));

    let aggregate = AggregateStep::new(
        &["Income"],
        vec![
            Reduction::sum("Vehicle Minutes"),
            Reduction::sum("daily_toll_cost_2023d"),
        ],
    );

    let mut post_delta = vec![PostStep::formula("vot", lit(0.0))];
    post_delta.extend(vot_by_quartile(cfg, "vot"));
    post_delta.extend([
        PostStep::formula(
            "auto_time_savings_minutes",
            col("Vehicle Minutes_delta_abs").neg(),
        ),
        PostStep::formula(
            "value_of_auto_time_savings_2023d",
            col("auto_time_savings_minutes")
                .mul(lit(1.0 / 60.0))
                .mul(col("vot")),
        ),
        PostStep::formula(
            "incremental_toll_cost_2023d",
            col("daily_toll_cost_2023d_delta_abs"),
        ),
        // zero incremental tolls means the pathway prices nothing for this
        // quartile, reported as zero rather than undefined
        PostStep::formula(
            "ratio_time_savings_to_toll_costs",
            col("value_of_auto_time_savings_2023d")
                .div_or_zero(col("daily_toll_cost_2023d_delta_abs")),
        ),
        PostStep::drop(&[
            "Vehicle Minutes_current",
            "Vehicle Minutes_base",
            "Vehicle Minutes_delta_abs",
            "Vehicle Minutes_delta_pct",
            "daily_toll_cost_2023d_current",
            "daily_toll_cost_2023d_base",
            "daily_toll_cost_2023d_delta_abs",
            "daily_toll_cost_2023d_delta_pct",
            "vot",
        ]),
    ]);

    let savings = BranchDef {
        name: "time_savings_vs_tolls",
        source: AUTO_TIMES,
        steps: steps.clone(),
        aggregate: aggregate.clone(),
        post: Vec::new(),
        delta: Some(DeltaStep::new(
            &["Income"],
            &["Vehicle Minutes", "daily_toll_cost_2023d"],
        )),
        post_delta,
        normalize: NormalizeSpec::new(&[("Income", IdRole::Key)]),
        stage: Stage::Final,
    };

    let daily_tolls = BranchDef {
        name: "daily_tolls_by_income",
        source: AUTO_TIMES,
        steps,
        aggregate,
        post: vec![PostStep::rename("Vehicle Minutes", "daily_vehicle_minutes")],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("Income", IdRole::Key)]),
        stage: Stage::Intermediate,
    };

    MetricDef {
        id: "Affordable 2",
        branches: vec![savings, daily_tolls],
    }
}
