use crate::error::{MetricsError, Result};
use crate::table::{Column, Table};
use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Describes one tabular input of a run: where it lives relative to the run
/// directory and which columns the downstream formulas require.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: &'static str,
    pub rel_path: &'static str,
    pub required: &'static [&'static str],
}

impl SourceSpec {
    pub fn load(&self, run_dir: &Path) -> Result<Table> {
        let path = run_dir.join(self.rel_path);
        if !path.is_file() {
            return Err(MetricsError::SourceNotFound {
                name: self.name.to_string(),
                path,
            });
        }
        let table = read_csv(&path)?;
        info!(
            source = self.name,
            rows = table.len(),
            "read {}",
            path.display()
        );
        for col in self.required {
            if !table.has_column(col) {
                return Err(MetricsError::SchemaMismatch {
                    source_name: self.name.to_string(),
                    column: col.to_string(),
                });
            }
        }
        Ok(table)
    }
}

/// Load a static lookup table, checking required columns the same way.
pub fn load_lookup(path: &Path, name: &str, required: &[&str]) -> Result<Table> {
    if !path.is_file() {
        return Err(MetricsError::SourceNotFound {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }
    let table = read_csv(path)?;
    info!(lookup = name, rows = table.len(), "read {}", path.display());
    for col in required {
        if !table.has_column(col) {
            return Err(MetricsError::SchemaMismatch {
                source_name: name.to_string(),
                column: col.to_string(),
            });
        }
    }
    Ok(table)
}

/// Read a delimited text file into a `Table` via the arrow CSV reader.
/// Header names are whitespace-trimmed since the model writes ragged headers
/// (e.g. avgload5period.csv pads its column names).
pub fn read_csv(path: &Path) -> Result<Table> {
    let read_err = |e: &dyn std::fmt::Display| MetricsError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut file = File::open(path).map_err(|e| read_err(&e))?;
    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, Some(1024))
        .map_err(|e| read_err(&e))?;
    file.rewind().map_err(|e| read_err(&e))?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(file)
        .map_err(|e| read_err(&e))?;

    let mut batches: Vec<RecordBatch> = Vec::new();
    for batch in reader {
        batches.push(batch.map_err(|e| read_err(&e))?);
    }
    debug!(
        batches = batches.len(),
        columns = schema.fields().len(),
        "decoded {}",
        path.display()
    );

    let mut table = Table::new();
    for (i, field) in schema.fields().iter().enumerate() {
        let name = field.name().trim().to_string();
        let col = column_from_batches(&batches, i, field.data_type())
            .map_err(|e| read_err(&e))?;
        table.push_column(name, col)?;
    }
    Ok(table)
}

/// Concatenate one arrow column across batches into an owned `Column`,
/// coercing to the three supported cell types. Anything arrow inferred that
/// is not int/float/string (dates, etc.) is carried as a string.
fn column_from_batches(
    batches: &[RecordBatch],
    idx: usize,
    dtype: &DataType,
) -> std::result::Result<Column, arrow::error::ArrowError> {
    match dtype {
        DataType::Int64 => {
            let mut out = Vec::new();
            for batch in batches {
                let arr = batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .expect("schema says Int64");
                out.extend((0..arr.len()).map(|r| arr.is_valid(r).then(|| arr.value(r))));
            }
            Ok(Column::Int(out))
        }
        DataType::Float64 => {
            let mut out = Vec::new();
            for batch in batches {
                let arr = batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .expect("schema says Float64");
                out.extend((0..arr.len()).map(|r| arr.is_valid(r).then(|| arr.value(r))));
            }
            Ok(Column::Float(out))
        }
        DataType::Boolean => {
            let mut out = Vec::new();
            for batch in batches {
                let arr = batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .expect("schema says Boolean");
                out.extend(
                    (0..arr.len()).map(|r| arr.is_valid(r).then(|| arr.value(r) as i64)),
                );
            }
            Ok(Column::Int(out))
        }
        _ => {
            let mut out = Vec::new();
            for batch in batches {
                let strs = cast(batch.column(idx), &DataType::Utf8)?;
                let arr = strs
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .expect("cast to Utf8");
                out.extend(
                    (0..arr.len()).map(|r| arr.is_valid(r).then(|| arr.value(r).to_string())),
                );
            }
            Ok(Column::Str(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, rel: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_and_trims_padded_headers() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "avgload.csv",
            "a,b,       distance,ft\n1,2,2.5,1\n3,4,1.0,7\n",
        );
        let t = read_csv(&path).unwrap();
        assert!(t.has_column("distance"));
        assert_eq!(t.len(), 2);
        assert_eq!(t.column("distance").unwrap().get_f64(0), Some(2.5));
        assert_eq!(t.column("ft").unwrap().get_f64(1), Some(7.0));
    }

    #[test]
    fn source_not_found_and_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let spec = SourceSpec {
            name: "loaded_network",
            rel_path: "OUTPUT/avgload5period.csv",
            required: &["a", "b", "distance"],
        };
        match spec.load(dir.path()) {
            Err(MetricsError::SourceNotFound { name, .. }) => {
                assert_eq!(name, "loaded_network")
            }
            other => panic!("expected SourceNotFound, got {other:?}"),
        }

        write_file(&dir, "OUTPUT/avgload5period.csv", "a,b\n1,2\n");
        match spec.load(dir.path()) {
            Err(MetricsError::SchemaMismatch { column, .. }) => assert_eq!(column, "distance"),
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn mixed_numeric_column_infers_float() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.csv", "x,label\n1,alpha\n2.5,beta\n");
        let t = read_csv(&path).unwrap();
        assert_eq!(t.column("x").unwrap().get_f64(0), Some(1.0));
        assert_eq!(t.column("label").unwrap().get_str(1), Some("beta"));
    }
}
