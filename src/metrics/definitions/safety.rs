//! Safety metrics: estimated annual fatalities by facility grouping (Safe 1)
//! and change in VMT vs the baseline run across travel categories, facility
//! types and Equity Priority Communities (Safe 2).

use super::top_level::{facility_recode, network_vht, network_vmt, nonhousehold_recode};
use super::{label, recode, set_floats, AUTO_TIMES, LOADED_NETWORK, VMT_VHT_BY_TAZ};
use crate::metrics::normalize::{IdRole, NormalizeSpec};
use crate::metrics::pipeline::{
    AggregateStep, BranchDef, DeltaStep, LookupRef, MetricDef, PostStep, Step,
};
use crate::metrics::Stage;
use crate::table::aggregate::Reduction;
use crate::table::derive::{col, lit, Predicate};
use crate::ModelConfig;

pub fn fatalities(cfg: &ModelConfig) -> MetricDef {
    let facility_fatalities = BranchDef {
        name: "facility_fatalities",
        source: LOADED_NETWORK,
        steps: vec![
            facility_recode("grouping1"),
            Step::formula("daily_vmt", network_vmt()),
        ],
        aggregate: AggregateStep::new(&["grouping1"], vec![Reduction::sum("daily_vmt")]),
        post: vec![
            PostStep::formula("annual_vmt", col("daily_vmt").mul(lit(cfg.days_per_year))),
            PostStep::formula("rate", lit(0.0)),
            PostStep::overwrite(set_floats(
                "grouping1",
                Predicate::StrEquals("Freeway".to_string()),
                vec![("rate", cfg.fatality_rate_per_mvmt_freeway)],
            )),
            PostStep::overwrite(set_floats(
                "grouping1",
                Predicate::StrEquals("Non-Freeway".to_string()),
                vec![("rate", cfg.fatality_rate_per_mvmt_nonfreeway)],
            )),
            PostStep::formula(
                "annual_fatalities",
                col("annual_vmt").mul(lit(1e-6)).mul(col("rate")),
            ),
            // a grouping with no VMT has no fatality exposure at all
            PostStep::formula(
                "fatalities_per_million_vmt",
                col("annual_fatalities").div_or_zero(col("annual_vmt").mul(lit(1e-6))),
            ),
            PostStep::drop(&["rate", "daily_vmt"]),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("grouping1", IdRole::Key)]),
        stage: Stage::Final,
    };

    MetricDef {
        id: "Safe 1",
        branches: vec![facility_fatalities],
    }
}

pub fn vmt_change() -> MetricDef {
    // household quartiles keep their income key; interregional, ZPV and
    // truck rows carry a placeholder income and group by category alone
    let travel_category = BranchDef {
        name: "travel_category_vmt",
        source: AUTO_TIMES,
        steps: vec![nonhousehold_recode("grouping1", Some("Household"))],
        aggregate: AggregateStep::new(
            &["grouping1", "Income"],
            vec![
                Reduction::sum("Vehicle Miles"),
                Reduction::sum("Vehicle Minutes"),
            ],
        ),
        post: vec![
            PostStep::formula("daily_vht", col("Vehicle Minutes").mul(lit(1.0 / 60.0))),
            PostStep::rename("Vehicle Miles", "daily_vmt"),
            PostStep::drop(&["Vehicle Minutes"]),
        ],
        delta: Some(DeltaStep::new(
            &["grouping1", "Income"],
            &["daily_vmt", "daily_vht"],
        )),
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[
            ("grouping1", IdRole::Grouping1),
            ("Income", IdRole::Key),
        ]),
        stage: Stage::Final,
    };

    let facility_type = BranchDef {
        name: "facility_vmt",
        source: LOADED_NETWORK,
        steps: vec![
            facility_recode("grouping1"),
            Step::recode(recode(
                "key",
                "ft",
                vec![
                    (Predicate::InInts(vec![1, 2, 8]), "Freeway"),
                    (Predicate::InInts(vec![3]), "Expressway"),
                    (Predicate::InInts(vec![4]), "Collector"),
                    (Predicate::InInts(vec![7]), "Arterial"),
                ],
                None,
            )),
            Step::formula("daily_vmt", network_vmt()),
            Step::formula("daily_vht", network_vht()),
        ],
        aggregate: AggregateStep::new(
            &["grouping1", "key"],
            vec![Reduction::sum("daily_vmt"), Reduction::sum("daily_vht")],
        ),
        post: Vec::new(),
        delta: Some(DeltaStep::new(
            &["grouping1", "key"],
            &["daily_vmt", "daily_vht"],
        )),
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("grouping1", IdRole::Grouping1), ("key", IdRole::Key)]),
        stage: Stage::Final,
    };

    let epc = BranchDef {
        name: "taz_epc_vmt",
        source: VMT_VHT_BY_TAZ,
        steps: vec![
            Step::join(LookupRef::TazEpc, &["TAZ1454"], None),
            Step::recode(recode(
                "grouping1",
                "taz_epc",
                vec![(Predicate::InInts(vec![1]), "EPCs")],
                Some("Non-EPCs"),
            )),
            Step::recode(recode(
                "key",
                "road_type",
                vec![(Predicate::StrEquals("freeway".to_string()), "Freeway")],
                Some("Non-Freeway"),
            )),
        ],
        aggregate: AggregateStep::new(
            &["grouping1", "key"],
            vec![Reduction::sum("VMT"), Reduction::sum("VHT")],
        ),
        post: Vec::new(),
        delta: Some(DeltaStep::new(&["grouping1", "key"], &["VMT", "VHT"])),
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("grouping1", IdRole::Grouping1), ("key", IdRole::Key)]),
        stage: Stage::Final,
    };

    let region = BranchDef {
        name: "region_vmt",
        source: VMT_VHT_BY_TAZ,
        steps: vec![
            Step::recode(label("grouping1", "road_type", "Region")),
            Step::recode(recode(
                "key",
                "road_type",
                vec![(Predicate::StrEquals("freeway".to_string()), "Freeway")],
                Some("Non-Freeway"),
            )),
        ],
        aggregate: AggregateStep::new(
            &["grouping1", "key"],
            vec![Reduction::sum("VMT"), Reduction::sum("VHT")],
        ),
        post: Vec::new(),
        delta: Some(DeltaStep::new(&["grouping1", "key"], &["VMT", "VHT"])),
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("grouping1", IdRole::Grouping1), ("key", IdRole::Key)]),
        stage: Stage::Final,
    };

    MetricDef {
        id: "Safe 2",
        branches: vec![travel_category, facility_type, epc, region],
    }
}
