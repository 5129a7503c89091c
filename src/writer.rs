use std::fs;

use camino::Utf8Path;
use tracing::debug;

use crate::domain::ResultRow;
use crate::error::HarvestError;

/// Append-only CSV sink. The header is written exactly once, when the
/// target is new or empty, so later runs against the same file resume by
/// appending rows. Every row is flushed as it lands so a concurrent reader
/// never sees a partial record.
pub struct CsvResultWriter {
    writer: csv::Writer<fs::File>,
}

impl CsvResultWriter {
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        let needs_header = match fs::metadata(path.as_std_path()) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|_| HarvestError::OutputUnwritable(path.as_std_path().to_path_buf()))?;
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer
                .write_record(ResultRow::COLUMNS)
                .map_err(|err| HarvestError::Csv(err.to_string()))?;
            writer
                .flush()
                .map_err(|err| HarvestError::Csv(err.to_string()))?;
            debug!("wrote header to fresh output target {path}");
        } else {
            debug!("appending to existing output target {path}");
        }
        Ok(Self { writer })
    }

    pub fn append(&mut self, row: &ResultRow) -> Result<(), HarvestError> {
        self.writer
            .serialize(row)
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        self.writer
            .flush()
            .map_err(|err| HarvestError::Csv(err.to_string()))
    }
}
