//! Declarative metric definitions for one batch. `all` builds the full set
//! for a run; constants come from `ModelConfig` and per-run facts (scenario
//! year, toll-discount variant) from `RunMetadata`.

mod affordable;
mod efficient;
mod reliable;
mod safety;
mod top_level;

use crate::metrics::pipeline::MetricDef;
use crate::run::RunMetadata;
use crate::table::derive::{Overwrite, Predicate, Recode};
use crate::table::load::SourceSpec;
use crate::table::Value;
use crate::ModelConfig;

pub const LOADED_NETWORK: SourceSpec = SourceSpec {
    name: "loaded_network",
    rel_path: "OUTPUT/avgload5period.csv",
    required: &[
        "a",
        "b",
        "distance",
        "ft",
        "volEA_tot",
        "volAM_tot",
        "volMD_tot",
        "volPM_tot",
        "volEV_tot",
        "ctimEA",
        "ctimAM",
        "ctimMD",
        "ctimPM",
        "ctimEV",
        "cspdAM",
    ],
};

pub const AUTO_TIMES: SourceSpec = SourceSpec {
    name: "auto_times",
    rel_path: "OUTPUT/metrics/auto_times.csv",
    required: &[
        "Income",
        "Mode",
        "Daily Person Trips",
        "Vehicle Miles",
        "Vehicle Minutes",
        "Bridge Tolls",
        "Value Tolls",
    ],
};

pub const TRANSIT_TIMES: SourceSpec = SourceSpec {
    name: "transit_times",
    rel_path: "OUTPUT/metrics/transit_times_by_mode_income.csv",
    required: &["Income", "Mode", "Daily Trips"],
};

pub const TRAVEL_COST: SourceSpec = SourceSpec {
    name: "travel_cost",
    rel_path: "OUTPUT/core_summaries/travel-cost-hhldtraveltype.csv",
    required: &[
        "incQ",
        "hhld_travel",
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
    ],
};

pub const OD_TRAVEL_TIME: SourceSpec = SourceSpec {
    name: "od_travel_time",
    rel_path: "OUTPUT/core_summaries/ODTravelTime_byModeTimeperiodIncome.csv",
    required: &[
        "orig_taz",
        "dest_taz",
        "trip_mode",
        "timeperiod_label",
        "num_trips",
        "avg_travel_time_in_mins",
    ],
};

pub const TRIP_DISTANCE: SourceSpec = SourceSpec {
    name: "trip_distance",
    rel_path: "OUTPUT/core_summaries/TripDistance.csv",
    required: &["trip_mode", "tour_purpose", "timeCode", "freq"],
};

pub const VMT_VHT_BY_TAZ: SourceSpec = SourceSpec {
    name: "vmt_vht_by_taz",
    rel_path: "OUTPUT/metrics/vmt_vht_metrics_by_taz.csv",
    required: &["TAZ1454", "road_type", "VMT", "VHT"],
};

/// Trip modes, per the travel model mode codes.
pub const MODES_TRANSIT: [i64; 10] = [9, 10, 11, 12, 13, 14, 15, 16, 17, 18];
pub const MODES_PRIVATE_AUTO: [i64; 6] = [1, 2, 3, 4, 5, 6];
pub const MODES_TAXI_TNC: [i64; 3] = [19, 20, 21];

/// Tour purposes counted as commute.
pub const PURPOSES_COMMUTE: [&str; 4] = ["work_low", "work_med", "work_high", "work_very high"];

/// Representative origin-destination city pairs, keyed `ORIG_DEST`.
pub const OD_PAIRS_OF_INTEREST: [&str; 10] = [
    "OAKLAND_SAN FRANCISCO",
    "VALLEJO_SAN FRANCISCO",
    "ANTIOCH_SAN FRANCISCO",
    "ANTIOCH_OAKLAND",
    "SAN JOSE_SAN FRANCISCO",
    "OAKLAND_PALO ALTO",
    "OAKLAND_SAN JOSE",
    "LIVERMORE_SAN JOSE",
    "FAIRFIELD_DUBLIN",
    "SANTA ROSA_SAN FRANCISCO",
];

/// Downtown destinations used for the origin-population travel-time cuts.
pub const DEST_CITIES_OF_INTEREST: [&str; 3] = ["SAN FRANCISCO", "OAKLAND", "SAN JOSE"];

pub fn all(cfg: &ModelConfig, meta: &RunMetadata) -> Vec<MetricDef> {
    vec![
        top_level::def(cfg),
        affordable::transportation_costs(cfg),
        affordable::time_savings_vs_tolls(cfg, meta),
        efficient::transit_auto_time_ratio(),
        efficient::commute_mode_share(),
        reliable::corridor_travel_time(),
        reliable::peak_offpeak_ratio(),
        safety::fatalities(cfg),
        safety::vmt_change(),
    ]
}

pub(crate) fn in_strs(values: &[&str]) -> Predicate {
    Predicate::InStrs(values.iter().map(|v| v.to_string()).collect())
}

pub(crate) fn recode(
    name: &str,
    on: &str,
    rules: Vec<(Predicate, &str)>,
    default: Option<&str>,
) -> Recode {
    Recode {
        name: name.to_string(),
        on: on.to_string(),
        rules: rules
            .into_iter()
            .map(|(p, label)| (p, label.to_string()))
            .collect(),
        default: default.map(|d| d.to_string()),
    }
}

/// Constant text column; groups everything into one bucket or stamps a fixed
/// grouping label.
pub(crate) fn label(name: &str, on: &str, text: &str) -> Recode {
    recode(name, on, Vec::new(), Some(text))
}

pub(crate) fn set_floats(on: &str, when: Predicate, set: Vec<(&str, f64)>) -> Overwrite {
    Overwrite {
        on: on.to_string(),
        when,
        set: set
            .into_iter()
            .map(|(c, v)| (c.to_string(), Value::Float(v)))
            .collect(),
    }
}
