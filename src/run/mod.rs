use crate::error::Result;
use crate::table::load::SourceSpec;
use crate::table::Table;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Scenario pathway of a model run, taken from the run inventory's category
/// column with the run-id token as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathwayCategory {
    NoProject,
    Pathway(u8),
    Other,
}

/// Whether the run models the means-based toll discount program. Resolved
/// once here from the pathway variant letter so formulas consume a declared
/// fact instead of sniffing run-id substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TollDiscountVariant {
    Standard,
    MeansBased,
}

/// Per-run facts parsed once at load time and carried for the whole pipeline.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: String,
    /// Scenario year, conventionally the first four characters of the id.
    pub year: String,
    pub category: PathwayCategory,
    pub discount: TollDiscountVariant,
}

fn pathway_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Path(\d)([a-z])?").expect("valid pathway pattern"))
}

impl RunMetadata {
    /// `category` is the inventory's category text, e.g. "Pathway 1" or
    /// "No Project"; the run id supplies the year and the variant letter,
    /// e.g. `2035_TM152_NGF_NP10_Path1b_02`.
    pub fn parse(run_id: &str, category: &str) -> RunMetadata {
        let year = run_id
            .get(..4)
            .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or("")
            .to_string();

        let parsed = pathway_re().captures(run_id);
        let pathway_digit = parsed
            .as_ref()
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u8>().ok());
        let variant_letter = parsed
            .as_ref()
            .and_then(|c| c.get(2))
            .and_then(|m| m.as_str().chars().next());

        let category = if category.starts_with("No Project") {
            PathwayCategory::NoProject
        } else if let Some(rest) = category.strip_prefix("Pathway ") {
            rest.trim()
                .chars()
                .next()
                .and_then(|c| c.to_digit(10))
                .map(|d| PathwayCategory::Pathway(d as u8))
                .unwrap_or(PathwayCategory::Other)
        } else if let Some(d) = pathway_digit {
            PathwayCategory::Pathway(d)
        } else {
            PathwayCategory::Other
        };

        // discount pathways are the 'b' variants of pathways 1-3
        let discount = match (pathway_digit, variant_letter) {
            (Some(1..=3), Some('b')) => TollDiscountVariant::MeansBased,
            _ => TollDiscountVariant::Standard,
        };

        RunMetadata {
            run_id: run_id.to_string(),
            year,
            category,
            discount,
        }
    }

    /// Whether this run models the no-new-pricing pathway used as the
    /// comparison baseline.
    pub fn is_baseline_pathway(&self) -> bool {
        self.category == PathwayCategory::Pathway(4)
    }
}

/// One run's working state: metadata plus lazily loaded source tables.
/// Exclusively owned by the worker processing the run; sources are read at
/// most once per run.
pub struct RunContext {
    pub meta: RunMetadata,
    run_dir: PathBuf,
    cache: HashMap<&'static str, Table>,
}

impl RunContext {
    pub fn new(scenarios_dir: &Path, meta: RunMetadata) -> RunContext {
        let run_dir = scenarios_dir.join(&meta.run_id);
        RunContext {
            meta,
            run_dir,
            cache: HashMap::new(),
        }
    }

    /// Load (or return the cached) source table for this run.
    pub fn source(&mut self, spec: &SourceSpec) -> Result<&Table> {
        if !self.cache.contains_key(spec.name) {
            let table = spec.load(&self.run_dir)?;
            self.cache.insert(spec.name, table);
        }
        Ok(&self.cache[spec.name])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_year_category_and_discount_variant() {
        let meta = RunMetadata::parse("2035_TM152_NGF_NP10_Path1b_02", "Pathway 1");
        assert_eq!(meta.year, "2035");
        assert_eq!(meta.category, PathwayCategory::Pathway(1));
        assert_eq!(meta.discount, TollDiscountVariant::MeansBased);
        assert!(!meta.is_baseline_pathway());

        let meta = RunMetadata::parse("2035_TM152_NGF_NP10_Path4_02", "Pathway 4");
        assert_eq!(meta.discount, TollDiscountVariant::Standard);
        assert_eq!(meta.category, PathwayCategory::Pathway(4));
        assert!(meta.is_baseline_pathway());

        let meta = RunMetadata::parse("2035_TM152_NGF_NP07_02", "No Project");
        assert_eq!(meta.category, PathwayCategory::NoProject);
        assert_eq!(meta.discount, TollDiscountVariant::Standard);
    }

    #[test]
    fn category_falls_back_to_run_id_token() {
        let meta = RunMetadata::parse("2035_TM152_NGF_NP10_Path2a_04", "");
        assert_eq!(meta.category, PathwayCategory::Pathway(2));
        assert_eq!(meta.discount, TollDiscountVariant::Standard);
    }
}
