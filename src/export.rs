//! Export of result sets to files.
//!
//! The target format is inferred from the destination file extension:
//! delimited text (`csv`, `tsv`), structured text (`json`), or a column-major
//! binary document (`bin`). Rows are consumed from a [`RowStream`], so export
//! works the same over a materialized result set and a live backend cursor.
//! On I/O failure a partial file is left in place; there is no atomic rename.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adapter::{ColumnInfo, RowStream, Value};
use crate::error::{PrismError, Result};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-delimited text with a header row.
    Csv,
    /// Tab-delimited text with a header row.
    Tsv,
    /// A JSON array of objects keyed by column name.
    Json,
    /// Column-major binary document.
    ColumnarBinary,
}

impl ExportFormat {
    /// Infers the format from a destination path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                PrismError::unsupported_format(format!(
                    "'{}' has no file extension",
                    path.display()
                ))
            })?;

        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "json" => Ok(Self::Json),
            "bin" => Ok(Self::ColumnarBinary),
            other => Err(PrismError::unsupported_format(other.to_string())),
        }
    }

    fn delimiter(&self) -> u8 {
        match self {
            Self::Tsv => b'\t',
            _ => b',',
        }
    }
}

/// The on-disk layout of a columnar binary export.
///
/// Values are stored column-major: `column_data[i]` holds every value of
/// `columns[i]`, in row order.
#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnarDocument {
    pub columns: Vec<ColumnInfo>,
    pub column_data: Vec<Vec<Value>>,
}

/// Serializes all rows of `stream` to `path` in the format its extension
/// names.
///
/// A zero-row stream still produces a valid, parseable file. Returns the
/// chosen format.
pub async fn write_rows(path: &Path, stream: RowStream) -> Result<ExportFormat> {
    let format = ExportFormat::from_path(path)?;

    match format {
        ExportFormat::Csv | ExportFormat::Tsv => write_delimited(path, format, stream).await?,
        ExportFormat::Json => write_json(path, stream).await?,
        ExportFormat::ColumnarBinary => write_columnar(path, stream).await?,
    }

    Ok(format)
}

async fn write_delimited(path: &Path, format: ExportFormat, mut stream: RowStream) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(BufWriter::new(file));

    writer
        .write_record(stream.columns().iter().map(|c| c.name.as_str()))
        .map_err(|e| PrismError::write(e.to_string()))?;

    while let Some(row) = stream.next_row().await {
        let row = row?;
        writer
            .write_record(row.iter().map(delimited_cell))
            .map_err(|e| PrismError::write(e.to_string()))?;
    }

    writer.flush()?;
    Ok(())
}

/// Renders one value as a delimited-text cell. NULL becomes an empty cell.
fn delimited_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_display_string(),
    }
}

async fn write_json(path: &Path, mut stream: RowStream) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(b"[")?;

    let mut first = true;
    while let Some(row) = stream.next_row().await {
        let row = row?;
        if !first {
            out.write_all(b",")?;
        }
        first = false;
        out.write_all(b"\n  ")?;

        let object = row_to_json(stream.columns(), &row);
        serde_json::to_writer(&mut out, &object)
            .map_err(|e| PrismError::write(e.to_string()))?;
    }

    if first {
        out.write_all(b"]\n")?;
    } else {
        out.write_all(b"\n]\n")?;
    }
    out.flush()?;
    Ok(())
}

fn row_to_json(columns: &[ColumnInfo], row: &[Value]) -> serde_json::Map<String, serde_json::Value> {
    columns
        .iter()
        .zip(row.iter())
        .map(|(column, value)| (column.name.clone(), value_to_json(value)))
        .collect()
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

async fn write_columnar(path: &Path, mut stream: RowStream) -> Result<()> {
    let columns = stream.columns().to_vec();
    let mut column_data: Vec<Vec<Value>> = vec![Vec::new(); columns.len()];

    while let Some(row) = stream.next_row().await {
        let row = row?;
        for (slot, value) in column_data.iter_mut().zip(row.into_iter()) {
            slot.push(value);
        }
    }

    let document = ColumnarDocument {
        columns,
        column_data,
    };

    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &document).map_err(|e| PrismError::write(e.to_string()))
}

/// Reads a columnar binary export back into memory.
pub fn read_columnar(path: &Path) -> Result<ColumnarDocument> {
    let file = File::open(path)?;
    bincode::deserialize_from(file).map_err(|e| PrismError::write(e.to_string()))
}
