use super::Sink;
use crate::metrics::DerivedMetric;
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only delimited log: `timestamp,target,oid,value` per report
pub struct CsvLogSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvLogSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for CsvLogSink {
    fn name(&self) -> &str {
        "csv-log"
    }

    fn report(&mut self, metric: &DerivedMetric) -> Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{}",
            metric
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            escape_field(&metric.target),
            escape_field(&metric.oid),
            escape_field(&metric.value.to_string())
        )
        .context("Failed to append log row")?;

        // One row per report must survive a crash, so don't sit on the buffer
        self.writer.flush().context("Failed to flush log file")
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush log file")
    }
}

/// Quote a field when it contains the delimiter, a quote or a line break
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
