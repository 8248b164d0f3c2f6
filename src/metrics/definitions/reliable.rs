//! Reliability metrics: change in AM congested travel time on the tolled
//! corridors vs the baseline run (Reliable 1) and the peak/off-peak
//! travel-time ratio for the representative OD pairs (Reliable 2).

use super::efficient::join_city;
use super::{in_strs, set_floats, LOADED_NETWORK, OD_PAIRS_OF_INTEREST, OD_TRAVEL_TIME};
use crate::metrics::normalize::{IdRole, NormalizeSpec};
use crate::metrics::pipeline::{AggregateStep, BranchDef, DeltaStep, MetricDef, PostStep, Step};
use crate::metrics::Stage;
use crate::table::aggregate::Reduction;
use crate::table::derive::{col, Predicate};

/// Links tagged with their AM corridor; links outside the corridor system
/// join to nothing and drop out of the grouped sums.
fn corridor_steps() -> Vec<Step> {
    use crate::metrics::pipeline::LookupRef;
    vec![
        Step::join(LookupRef::CorridorLinks, &["a", "b"], None),
        Step::rename("Grouping minor", "corridor"),
        Step::filter("corridor", Predicate::StrSuffix("_AM".to_string())),
    ]
}

fn corridor_sums() -> Vec<Reduction> {
    vec![
        Reduction::sum("ctimAM"),
        Reduction::sum("distance"),
        Reduction::weighted_mean("cspdAM", "distance"),
    ]
}

pub fn corridor_travel_time() -> MetricDef {
    let peak_time = BranchDef {
        name: "corridor_peak_time",
        source: LOADED_NETWORK,
        steps: corridor_steps(),
        aggregate: AggregateStep::new(&["corridor"], corridor_sums()),
        post: vec![
            PostStep::rename("ctimAM", "corridor_travel_time_AM"),
            PostStep::rename("cspdAM", "avg_speed_AM"),
            PostStep::drop(&["distance"]),
        ],
        delta: Some(DeltaStep::new(
            &["corridor"],
            &["corridor_travel_time_AM", "avg_speed_AM"],
        )),
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("corridor", IdRole::Key)]),
        stage: Stage::Final,
    };

    // corridor definitions sanity numbers, kept out of dashboards
    let lengths = BranchDef {
        name: "corridor_lengths",
        source: LOADED_NETWORK,
        steps: corridor_steps(),
        aggregate: AggregateStep::new(&["corridor"], corridor_sums()),
        post: vec![
            PostStep::rename("ctimAM", "corridor_travel_time_AM"),
            PostStep::rename("cspdAM", "avg_speed_AM"),
            PostStep::rename("distance", "corridor_miles"),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("corridor", IdRole::Key)]),
        stage: Stage::Debug,
    };

    MetricDef {
        id: "Reliable 1",
        branches: vec![peak_time, lengths],
    }
}

pub fn peak_offpeak_ratio() -> MetricDef {
    let mut steps = Vec::new();
    steps.extend(join_city("orig_taz", "orig_CITY"));
    steps.extend(join_city("dest_taz", "dest_CITY"));
    steps.push(Step::concat("od", &["orig_CITY", "dest_CITY"], "_"));
    steps.push(Step::filter("od", in_strs(&OD_PAIRS_OF_INTEREST)));
    steps.extend([
        Step::recode(super::recode(
            "peak_non",
            "timeperiod_label",
            vec![(in_strs(&["AM Peak", "PM Peak"]), "peak")],
            Some("offpeak"),
        )),
        Step::formula(
            "tot_minutes",
            col("avg_travel_time_in_mins").mul(col("num_trips")),
        ),
        Step::formula("peak_minutes", col("tot_minutes")),
        Step::formula("peak_trips", col("num_trips")),
        Step::formula("offpeak_minutes", col("tot_minutes")),
        Step::formula("offpeak_trips", col("num_trips")),
        Step::overwrite(set_floats(
            "peak_non",
            Predicate::StrEquals("peak".to_string()),
            vec![("offpeak_minutes", 0.0), ("offpeak_trips", 0.0)],
        )),
        Step::overwrite(set_floats(
            "peak_non",
            Predicate::StrEquals("offpeak".to_string()),
            vec![("peak_minutes", 0.0), ("peak_trips", 0.0)],
        )),
    ]);

    let od_ratio = BranchDef {
        name: "od_peak_offpeak",
        source: OD_TRAVEL_TIME,
        steps,
        aggregate: AggregateStep::new(
            &["od"],
            vec![
                Reduction::sum("peak_minutes"),
                Reduction::sum("peak_trips"),
                Reduction::sum("offpeak_minutes"),
                Reduction::sum("offpeak_trips"),
            ],
        ),
        post: vec![
            PostStep::formula(
                "avg_travel_time_in_mins_peak",
                col("peak_minutes").div_or_null(col("peak_trips")),
            ),
            PostStep::formula(
                "avg_travel_time_in_mins_offpeak",
                col("offpeak_minutes").div_or_null(col("offpeak_trips")),
            ),
            PostStep::formula(
                "ratio_travel_time_peak_offpeak",
                col("avg_travel_time_in_mins_peak").div_or_null(col("avg_travel_time_in_mins_offpeak")),
            ),
            PostStep::rename("peak_trips", "num_trips_peak"),
            PostStep::rename("offpeak_trips", "num_trips_offpeak"),
            PostStep::drop(&["peak_minutes", "offpeak_minutes"]),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("od", IdRole::Key)]),
        stage: Stage::Final,
    };

    MetricDef {
        id: "Reliable 2",
        branches: vec![od_ratio],
    }
}
