use crate::error::Result as MetricsResult;
use crate::table::load::load_lookup;
use crate::table::Table;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

/// One row of the model-runs listing.
#[derive(Debug, Clone)]
pub struct InventoryRow {
    pub directory: String,
    pub year: i64,
    pub category: String,
    pub status: String,
}

/// The batch's run listing (a CSV export of the scenario tracking workbook):
/// which runs exist, their scenario year and pathway category, and which are
/// current.
#[derive(Debug, Clone)]
pub struct RunInventory {
    rows: Vec<InventoryRow>,
}

impl RunInventory {
    pub fn from_table(table: &Table) -> MetricsResult<RunInventory> {
        let directory = table.require_column("directory", "model_runs")?;
        let year = table.require_column("year", "model_runs")?;
        let category = table.require_column("category", "model_runs")?;
        let status = table.require_column("status", "model_runs")?;

        let mut rows = Vec::with_capacity(table.len());
        for r in 0..table.len() {
            rows.push(InventoryRow {
                directory: directory.key_string(r).unwrap_or_default(),
                year: year.get_f64(r).map(|y| y as i64).unwrap_or(0),
                category: category.get_str(r).unwrap_or("").to_string(),
                status: status.get_str(r).unwrap_or("").to_string(),
            });
        }
        Ok(RunInventory { rows })
    }

    /// Current runs for the forecast year, in listing order.
    pub fn current_for_year(&self, year: i64) -> Vec<&InventoryRow> {
        self.rows
            .iter()
            .filter(|r| r.status == "current" && r.year == year && !r.directory.is_empty())
            .collect()
    }

    /// Default baseline: the last current "Pathway 4" (no new pricing) run.
    pub fn baseline_for_year(&self, year: i64) -> Option<&InventoryRow> {
        self.current_for_year(year)
            .into_iter()
            .filter(|r| r.category.starts_with("Pathway 4"))
            .next_back()
    }

    pub fn category_of(&self, run_id: &str) -> &str {
        self.rows
            .iter()
            .find(|r| r.directory == run_id)
            .map(|r| r.category.as_str())
            .unwrap_or("")
    }
}

/// The static lookup tables shared read-only by every run in the batch.
/// A failure here is fatal to the whole batch; there is no meaningful
/// partial result without geography.
pub struct Lookups {
    /// TAZ1454 -> CITY with an `area_share` column for overlap tie-breaks.
    pub taz_cities: Table,
    /// TAZ1454 -> `taz_epc` Equity Priority Community flag (0/1).
    pub taz_epc: Table,
    /// tollclass -> `Grouping major` / `Grouping minor` corridor designations.
    pub tollclass_groups: Table,
    /// Link `a`,`b` -> `Grouping minor` corridor membership.
    pub corridor_links: Table,
    pub inventory: RunInventory,
}

impl Lookups {
    pub fn load(lookup_dir: &Path) -> Result<Lookups> {
        if !lookup_dir.is_dir() {
            bail!("lookup directory `{}` does not exist", lookup_dir.display());
        }

        let taz_cities = load_lookup(
            &lookup_dir.join("taz_with_cities.csv"),
            "taz_with_cities",
            &["TAZ1454", "CITY", "area_share"],
        )
        .context("loading TAZ/city crosswalk")?;

        let taz_epc = load_lookup(
            &lookup_dir.join("taz_epc_crosswalk.csv"),
            "taz_epc_crosswalk",
            &["TAZ1454", "taz_epc"],
        )
        .context("loading TAZ/EPC crosswalk")?;

        let tollclass_groups = load_lookup(
            &lookup_dir.join("tollclass_designations.csv"),
            "tollclass_designations",
            &["tollclass", "Grouping major", "Grouping minor"],
        )
        .context("loading tollclass designations")?;

        let corridor_links = load_lookup(
            &lookup_dir.join("a_b_with_minor_groupings.csv"),
            "a_b_with_minor_groupings",
            &["a", "b", "Grouping minor"],
        )
        .context("loading corridor link groupings")?;

        let inventory_table = load_lookup(
            &lookup_dir.join("model_runs.csv"),
            "model_runs",
            &["directory", "year", "category", "status"],
        )
        .context("loading model runs listing")?;
        let inventory = RunInventory::from_table(&inventory_table)?;

        info!("loaded shared lookup tables from {}", lookup_dir.display());
        Ok(Lookups {
            taz_cities,
            taz_epc,
            tollclass_groups,
            corridor_links,
            inventory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn inventory() -> RunInventory {
        let t = Table::from_columns(vec![
            (
                "directory".to_string(),
                Column::Str(vec![
                    Some("2035_TM152_NGF_NP10_Path4_01".to_string()),
                    Some("2035_TM152_NGF_NP10_Path4_02".to_string()),
                    Some("2035_TM152_NGF_NP10_Path1a_02".to_string()),
                    Some("2025_TM152_NGF_NP10_Path1a_01".to_string()),
                ]),
            ),
            (
                "year".to_string(),
                Column::Int(vec![Some(2035), Some(2035), Some(2035), Some(2025)]),
            ),
            (
                "category".to_string(),
                Column::Str(vec![
                    Some("Pathway 4".to_string()),
                    Some("Pathway 4".to_string()),
                    Some("Pathway 1".to_string()),
                    Some("Pathway 1".to_string()),
                ]),
            ),
            (
                "status".to_string(),
                Column::Str(vec![
                    Some("superseded".to_string()),
                    Some("current".to_string()),
                    Some("current".to_string()),
                    Some("current".to_string()),
                ]),
            ),
        ])
        .unwrap();
        RunInventory::from_table(&t).unwrap()
    }

    #[test]
    fn filters_current_runs_by_year() {
        let inv = inventory();
        let runs = inv.current_for_year(2035);
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == "current" && r.year == 2035));
    }

    #[test]
    fn baseline_is_last_current_pathway4() {
        let inv = inventory();
        let base = inv.baseline_for_year(2035).unwrap();
        assert_eq!(base.directory, "2035_TM152_NGF_NP10_Path4_02");
    }
}
