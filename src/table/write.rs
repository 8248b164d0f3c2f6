use crate::metrics::{sort_rows, MetricRow};
use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Output column order matches the reference metrics files so downstream
/// workbooks keep working.
const OUTPUT_COLUMNS: [&str; 10] = [
    "grouping1",
    "grouping2",
    "grouping3",
    "modelrun_id",
    "metric_id",
    "intermediate/final",
    "key",
    "metric_desc",
    "year",
    "value",
];

/// Canonical output location for one run's metrics file.
pub fn output_path(output_dir: &Path, run_id: &str) -> std::path::PathBuf {
    output_dir.join(format!("scenario_metrics_{run_id}.csv"))
}

/// Idempotent re-run guard: a run whose output file already exists is left
/// untouched when the caller asked for that.
pub fn skip_existing(path: &Path, skip_if_exists: bool) -> bool {
    skip_if_exists && path.is_file()
}

/// Write one run's MetricRows as delimited text. Rows are sorted into a
/// stable order first, values are formatted to five decimals, and the file
/// lands via tmp-then-rename so a crash never leaves a half-written output.
/// Duplicate identity tuples indicate a pipeline bug and are warned about,
/// not rejected.
pub fn write_metrics(path: &Path, mut rows: Vec<MetricRow>) -> Result<()> {
    sort_rows(&mut rows);

    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
    for row in &rows {
        let id = format!("{:?}", row.identity());
        if !seen.insert(id) {
            warn!(
                metric_id = row.metric_id.as_str(),
                key = row.key.as_str(),
                metric_desc = row.metric_desc.as_str(),
                "duplicate metric identity in output"
            );
        }
    }

    let schema = Arc::new(Schema::new(
        OUTPUT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));

    let text_col = |f: &dyn Fn(&MetricRow) -> String| -> ArrayRef {
        Arc::new(StringArray::from(
            rows.iter().map(f).collect::<Vec<String>>(),
        ))
    };
    let columns: Vec<ArrayRef> = vec![
        text_col(&|r| r.grouping1.clone()),
        text_col(&|r| r.grouping2.clone()),
        text_col(&|r| r.grouping3.clone()),
        text_col(&|r| r.run_id.clone()),
        text_col(&|r| r.metric_id.clone()),
        text_col(&|r| r.stage.as_str().to_string()),
        text_col(&|r| r.key.clone()),
        text_col(&|r| r.metric_desc.clone()),
        text_col(&|r| r.year.clone()),
        text_col(&|r| r.value.map(|v| format!("{v:.5}")).unwrap_or_default()),
    ];
    let batch = RecordBatch::try_new(schema, columns).context("building output RecordBatch")?;

    let tmp_path = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp_path)
            .with_context(|| format!("creating `{}`", tmp_path.display()))?;
        let mut writer = WriterBuilder::new()
            .with_header(true)
            .build(BufWriter::new(file));
        writer.write(&batch).context("writing metrics batch")?;
    }
    fs::rename(&tmp_path, path).with_context(|| {
        format!("renaming `{}` to `{}`", tmp_path.display(), path.display())
    })?;

    info!(rows = rows.len(), "wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Stage;
    use tempfile::TempDir;

    fn row(key: &str, desc: &str, value: Option<f64>) -> MetricRow {
        MetricRow {
            grouping1: "Freeway".to_string(),
            grouping2: String::new(),
            grouping3: String::new(),
            run_id: "2035_TM152_NGF_NP10_Path1a_02".to_string(),
            metric_id: "Safe 2".to_string(),
            stage: Stage::Final,
            key: key.to_string(),
            metric_desc: desc.to_string(),
            year: "2035".to_string(),
            value,
        }
    }

    #[test]
    fn writes_fixed_precision_and_blank_nulls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scenario_metrics_test.csv");
        write_metrics(
            &path,
            vec![row("Freeway", "VMT", Some(200.0)), row("Freeway", "VHT", None)],
        )
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "grouping1,grouping2,grouping3,modelrun_id,metric_id,intermediate/final,key,metric_desc,year,value"
        );
        assert!(content.contains("VMT,2035,200.00000"));
        // VHT row sorts before VMT and carries an empty value cell
        assert!(content.contains("VHT,2035,"));
    }

    #[test]
    fn skip_if_exists_leaves_existing_output_untouched() {
        let dir = TempDir::new().unwrap();
        let path = output_path(dir.path(), "2035_TM152_NGF_NP10_Path1a_02");

        // nothing on disk yet, so the run proceeds either way
        assert!(!skip_existing(&path, true));
        assert!(!skip_existing(&path, false));

        fs::write(&path, "earlier output\n").unwrap();
        assert!(skip_existing(&path, true));
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier output\n");

        // without the flag an existing file is rewritten
        assert!(!skip_existing(&path, false));
        write_metrics(&path, vec![row("Freeway", "VMT", Some(200.0))]).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("VMT"));
    }

    #[test]
    fn identical_inputs_write_identical_bytes() {
        let dir = TempDir::new().unwrap();
        let rows = vec![row("b", "VMT", Some(1.0)), row("a", "VMT", Some(2.0))];
        let p1 = dir.path().join("one.csv");
        let p2 = dir.path().join("two.csv");
        write_metrics(&p1, rows.clone()).unwrap();
        write_metrics(&p2, rows.iter().rev().cloned().collect()).unwrap();
        assert_eq!(fs::read(&p1).unwrap(), fs::read(&p2).unwrap());
    }
}
