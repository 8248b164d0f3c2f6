//! Efficiency metrics: transit vs auto door-to-door travel time for the
//! representative OD city pairs (Efficient 1) and commute mode share
//! (Efficient 2).

use super::{
    in_strs, label, recode, DEST_CITIES_OF_INTEREST, MODES_PRIVATE_AUTO, MODES_TAXI_TNC,
    MODES_TRANSIT, OD_PAIRS_OF_INTEREST, OD_TRAVEL_TIME, PURPOSES_COMMUTE, TRIP_DISTANCE,
};
use crate::metrics::normalize::{IdRole, NormalizeSpec};
use crate::metrics::pipeline::{AggregateStep, BranchDef, LookupRef, MetricDef, PostStep, Step};
use crate::metrics::Stage;
use crate::table::aggregate::Reduction;
use crate::table::derive::{col, Predicate};
use crate::table::join::TieBreak;

/// Resolve one trip end to its city. The crosswalk is keyed TAZ1454 and is
/// one-to-many for split zones, so the largest-overlap city wins.
pub(super) fn join_city(taz_col: &str, city_col: &str) -> Vec<Step> {
    vec![
        Step::rename(taz_col, "TAZ1454"),
        Step::join(
            LookupRef::TazCities,
            &["TAZ1454"],
            Some(TieBreak::largest("area_share")),
        ),
        Step::rename("CITY", city_col),
        Step::drop(&["area_share"]),
        Step::rename("TAZ1454", taz_col),
    ]
}

/// Split weighted travel time and trip counts into transit and auto columns
/// so one keyed aggregation yields both sides of the ratio. Taxi and TNC
/// trips count as auto, walk and bike as neither.
fn transit_auto_split() -> Vec<Step> {
    vec![
        Step::recode(recode(
            "agg_mode",
            "trip_mode",
            vec![
                (Predicate::InInts(MODES_TRANSIT.to_vec()), "transit"),
                (Predicate::InInts(MODES_PRIVATE_AUTO.to_vec()), "auto"),
                (Predicate::InInts(MODES_TAXI_TNC.to_vec()), "auto"),
            ],
            Some("other"),
        )),
        Step::formula(
            "tot_minutes",
            col("avg_travel_time_in_mins").mul(col("num_trips")),
        ),
        Step::formula("transit_minutes", col("tot_minutes")),
        Step::formula("transit_trips", col("num_trips")),
        Step::formula("auto_minutes", col("tot_minutes")),
        Step::formula("auto_trips", col("num_trips")),
        Step::overwrite(super::set_floats(
            "agg_mode",
            Predicate::StrEquals("auto".to_string()),
            vec![("transit_minutes", 0.0), ("transit_trips", 0.0)],
        )),
        Step::overwrite(super::set_floats(
            "agg_mode",
            Predicate::StrEquals("transit".to_string()),
            vec![("auto_minutes", 0.0), ("auto_trips", 0.0)],
        )),
        Step::overwrite(super::set_floats(
            "agg_mode",
            Predicate::StrEquals("other".to_string()),
            vec![
                ("transit_minutes", 0.0),
                ("transit_trips", 0.0),
                ("auto_minutes", 0.0),
                ("auto_trips", 0.0),
            ],
        )),
    ]
}

fn mode_sums() -> Vec<Reduction> {
    vec![
        Reduction::sum("transit_minutes"),
        Reduction::sum("transit_trips"),
        Reduction::sum("auto_minutes"),
        Reduction::sum("auto_trips"),
    ]
}

/// Trip-weighted mean travel times per mode and their ratio. An OD market
/// with no transit (or no auto) trips has an undefined ratio.
fn ratio_post() -> Vec<PostStep> {
    vec![
        PostStep::formula(
            "avg_travel_time_in_mins_transit",
            col("transit_minutes").div_or_null(col("transit_trips")),
        ),
        PostStep::formula(
            "avg_travel_time_in_mins_auto",
            col("auto_minutes").div_or_null(col("auto_trips")),
        ),
        PostStep::formula(
            "ratio_travel_time_transit_auto",
            col("avg_travel_time_in_mins_transit").div_or_null(col("avg_travel_time_in_mins_auto")),
        ),
        PostStep::rename("transit_trips", "num_trips_transit"),
        PostStep::rename("auto_trips", "num_trips_auto"),
        PostStep::drop(&["transit_minutes", "auto_minutes"]),
    ]
}

fn od_pair_steps() -> Vec<Step> {
    let mut steps = vec![Step::filter(
        "timeperiod_label",
        Predicate::StrEquals("AM Peak".to_string()),
    )];
    steps.extend(join_city("orig_taz", "orig_CITY"));
    steps.extend(join_city("dest_taz", "dest_CITY"));
    steps.push(Step::concat("od", &["orig_CITY", "dest_CITY"], "_"));
    steps.push(Step::filter("od", in_strs(&OD_PAIRS_OF_INTEREST)));
    steps.extend(transit_auto_split());
    steps
}

pub fn transit_auto_time_ratio() -> MetricDef {
    let od_pairs = BranchDef {
        name: "od_pairs",
        source: OD_TRAVEL_TIME,
        steps: od_pair_steps(),
        aggregate: AggregateStep::new(&["od"], mode_sums()),
        post: ratio_post(),
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("od", IdRole::Key)]),
        stage: Stage::Final,
    };

    // the headline number: unweighted mean of the per-pair ratios, pairs
    // without transit service excluded rather than counted as zero
    let mut average_post = ratio_post();
    average_post.extend([
        PostStep::collapse(
            "od",
            "Average across OD pairs",
            vec![Reduction::mean("ratio_travel_time_transit_auto")],
        ),
        PostStep::rename(
            "ratio_travel_time_transit_auto",
            "ratio_travel_time_transit_auto_across_pairs",
        ),
    ]);
    let od_pairs_average = BranchDef {
        name: "od_pairs_average",
        source: OD_TRAVEL_TIME,
        steps: od_pair_steps(),
        aggregate: AggregateStep::new(&["od"], mode_sums()),
        post: average_post,
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("od", IdRole::Key)]),
        stage: Stage::Final,
    };

    MetricDef {
        id: "Efficient 1",
        branches: vec![
            od_pairs,
            od_pairs_average,
            origin_cut("all_origins", "All origins", false),
            origin_cut("epc_origins", "EPC origins", true),
        ],
    }
}

/// AM trips into the three downtown destinations, grouped by destination
/// city, for all origins or only origins inside Equity Priority Communities.
fn origin_cut(name: &'static str, grouping: &str, epc_only: bool) -> BranchDef {
    let mut steps = vec![Step::filter(
        "timeperiod_label",
        Predicate::StrEquals("AM Peak".to_string()),
    )];
    if epc_only {
        steps.extend([
            Step::rename("orig_taz", "TAZ1454"),
            Step::join(LookupRef::TazEpc, &["TAZ1454"], None),
            Step::filter("taz_epc", Predicate::InInts(vec![1])),
            Step::rename("TAZ1454", "orig_taz"),
        ]);
    }
    steps.extend(join_city("dest_taz", "dest_CITY"));
    steps.push(Step::filter("dest_CITY", in_strs(&DEST_CITIES_OF_INTEREST)));
    steps.push(Step::recode(label("grouping1", "dest_CITY", grouping)));
    steps.extend(transit_auto_split());

    BranchDef {
        name,
        source: OD_TRAVEL_TIME,
        steps,
        aggregate: AggregateStep::new(&["grouping1", "dest_CITY"], mode_sums()),
        post: ratio_post(),
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[
            ("grouping1", IdRole::Grouping1),
            ("dest_CITY", IdRole::Key),
        ]),
        stage: Stage::Extra,
    }
}

/// Trip modes collapsed to the four commute mode-share groups.
fn commute_recodes() -> Vec<Step> {
    vec![
        Step::recode(recode(
            "agg_trip_mode",
            "trip_mode",
            vec![
                (Predicate::InInts(MODES_TRANSIT.to_vec()), "transit"),
                (Predicate::InInts(MODES_PRIVATE_AUTO.to_vec()), "auto"),
                (Predicate::InInts(MODES_TAXI_TNC.to_vec()), "other"),
            ],
            Some("active"),
        )),
        Step::recode(recode(
            "commute_non",
            "tour_purpose",
            vec![(in_strs(&PURPOSES_COMMUTE), "commute")],
            Some("noncommute"),
        )),
    ]
}

pub fn commute_mode_share() -> MetricDef {
    let mut share_steps = commute_recodes();
    share_steps.push(Step::filter(
        "commute_non",
        Predicate::StrEquals("commute".to_string()),
    ));

    let share = BranchDef {
        name: "commute_mode_share",
        source: TRIP_DISTANCE,
        steps: share_steps,
        aggregate: AggregateStep::new(&["agg_trip_mode"], vec![Reduction::sum("freq")]),
        post: vec![
            PostStep::share_of_total("freq", "commute_mode_share"),
            PostStep::rename("freq", "commute_trips"),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[("agg_trip_mode", IdRole::Key)]),
        stage: Stage::Final,
    };

    let mut market_steps = commute_recodes();
    market_steps.push(Step::recode(recode(
        "peak_non",
        "timeCode",
        vec![(in_strs(&["AM", "PM"]), "peak")],
        Some("offpeak"),
    )));

    let markets = BranchDef {
        name: "trips_by_market",
        source: TRIP_DISTANCE,
        steps: market_steps,
        aggregate: AggregateStep::new(
            &["commute_non", "agg_trip_mode", "peak_non"],
            vec![Reduction::sum("freq")],
        ),
        post: vec![
            PostStep::rename("freq", "trips"),
            PostStep::concat("key", &["commute_non", "agg_trip_mode", "peak_non"], "_"),
        ],
        delta: None,
        post_delta: Vec::new(),
        normalize: NormalizeSpec::new(&[
            ("commute_non", IdRole::Grouping1),
            ("agg_trip_mode", IdRole::Grouping2),
            ("peak_non", IdRole::Grouping3),
            ("key", IdRole::Key),
        ]),
        stage: Stage::Intermediate,
    };

    MetricDef {
        id: "Efficient 2",
        branches: vec![share, markets],
    }
}
