//! Parquet artifact: the merged feature table on disk.
//!
//! Writes go to a temporary sibling first and are renamed into place, so the
//! final path holds either the previous complete file or the new complete
//! file, never a torn one.

use crate::{
    decision::{ClientFeatureRow, Decision},
    error::{PipelineError, PipelineResult},
};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ARTIFACT_FILE_NAME: &str = "client_features.parquet";

pub const COL_CLIENT_ID: &str = "client_id";
pub const COL_PAID_LOANS: &str = "paid_loans";
pub const COL_DAYS_SINCE_LATE: &str = "days_since_late";
pub const COL_PROFIT_RATE_90D: &str = "profit_rate_90d";
pub const COL_DECISION: &str = "decision";

/// Arrow schema of the artifact, in column order.
pub fn feature_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(COL_CLIENT_ID, DataType::Int64, false),
        Field::new(COL_PAID_LOANS, DataType::Int64, false),
        Field::new(COL_DAYS_SINCE_LATE, DataType::Float64, true),
        Field::new(COL_PROFIT_RATE_90D, DataType::Float64, true),
        Field::new(COL_DECISION, DataType::Utf8, false),
    ]))
}

/// Location and outcome of a completed write.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenArtifact {
    pub path:  PathBuf,
    pub rows:  usize,
    pub bytes: u64,
}

pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(ARTIFACT_FILE_NAME)
    }

    /// Serialize `rows` to `<output_dir>/client_features.parquet`.
    pub fn write(&self, rows: &[ClientFeatureRow], run_id: &str) -> PipelineResult<WrittenArtifact> {
        fs::create_dir_all(&self.output_dir)?;
        let final_path = self.artifact_path();
        let tmp_path = self.output_dir.join(format!(".{ARTIFACT_FILE_NAME}.{run_id}.tmp"));

        if let Err(e) = write_parquet(&tmp_path, rows) {
            // Best effort: the temp file is garbage either way.
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &final_path)?;

        let bytes = fs::metadata(&final_path)?.len();
        log::info!("Wrote {} row(s), {bytes} bytes to {}", rows.len(), final_path.display());
        Ok(WrittenArtifact {
            path: final_path,
            rows: rows.len(),
            bytes,
        })
    }
}

fn write_parquet(path: &Path, rows: &[ClientFeatureRow]) -> PipelineResult<()> {
    let schema = feature_schema();
    let batch = to_record_batch(schema.clone(), rows)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn to_record_batch(schema: SchemaRef, rows: &[ClientFeatureRow]) -> PipelineResult<RecordBatch> {
    let client_ids: Int64Array = rows.iter().map(|r| Some(r.client_id)).collect();
    let paid_loans: Int64Array = rows.iter().map(|r| Some(r.paid_loans)).collect();
    let days_since_late: Float64Array = rows.iter().map(|r| r.days_since_late).collect();
    let profit_rate: Float64Array = rows.iter().map(|r| r.profit_rate_90d).collect();
    let decisions: StringArray = rows.iter().map(|r| Some(r.decision.as_str())).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(client_ids),
        Arc::new(paid_loans),
        Arc::new(days_since_late),
        Arc::new(profit_rate),
        Arc::new(decisions),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Read an artifact back into rows. Used by `inspect` and tests.
pub fn read_artifact(path: &Path) -> PipelineResult<Vec<ClientFeatureRow>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let client_ids = column::<Int64Array>(path, &batch, COL_CLIENT_ID)?;
        let paid_loans = column::<Int64Array>(path, &batch, COL_PAID_LOANS)?;
        let days_since_late = column::<Float64Array>(path, &batch, COL_DAYS_SINCE_LATE)?;
        let profit_rate = column::<Float64Array>(path, &batch, COL_PROFIT_RATE_90D)?;
        let decisions = column::<StringArray>(path, &batch, COL_DECISION)?;

        for i in 0..batch.num_rows() {
            let decision = Decision::parse(decisions.value(i)).ok_or_else(|| malformed(
                path,
                format!("row {i} has decision '{}'", decisions.value(i)),
            ))?;
            rows.push(ClientFeatureRow {
                client_id: client_ids.value(i),
                paid_loans: paid_loans.value(i),
                days_since_late: nullable(days_since_late, i),
                profit_rate_90d: nullable(profit_rate, i),
                decision,
            });
        }
    }
    Ok(rows)
}

fn column<'a, T: Array + 'static>(
    path: &Path,
    batch: &'a RecordBatch,
    name: &str,
) -> PipelineResult<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| malformed(path, format!("missing column '{name}'")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| malformed(path, format!("column '{name}' has an unexpected type")))
}

fn nullable(values: &Float64Array, i: usize) -> Option<f64> {
    if values.is_null(i) {
        None
    } else {
        Some(values.value(i))
    }
}

fn malformed(path: &Path, reason: String) -> PipelineError {
    PipelineError::Artifact {
        path: path.display().to_string(),
        reason,
    }
}
