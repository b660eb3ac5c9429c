use crate::{
    atomic::write_atomic, Dataset, Result, LATITUDE_COLUMN, LONGITUDE_COLUMN,
};
use csv::StringRecord;
use geodispatch_core::{Coordinates, ResultRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The results artifact: every dataset row plus latitude/longitude columns.
///
/// The file is rewritten in full on every flush.
#[derive(Debug, Clone)]
pub struct ResultsFile {
    path: PathBuf,
}

impl ResultsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ResultsFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write all dataset rows augmented with the given records.
    ///
    /// `records` must be ordered by index. Rows without a record keep whatever
    /// the dataset had in the output columns (empty when the dataset had none).
    pub fn write(&self, dataset: &Dataset, records: &[ResultRecord]) -> Result<()> {
        let (headers, lat_pos, lon_pos) = output_layout(dataset.headers());
        let width = headers.len();

        write_atomic(&self.path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(&headers)?;

            let mut pending = records.iter().peekable();
            for (index, row) in dataset.rows().iter().enumerate() {
                let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
                if fields.len() < width {
                    fields.resize(width, String::new());
                }

                // Skip records for rows the dataset does not have
                while pending.peek().map_or(false, |r| r.index < index) {
                    pending.next();
                }

                if let Some(record) = pending.next_if(|r| r.index == index) {
                    fields[lat_pos] = record.latitude().map(|v| v.to_string()).unwrap_or_default();
                    fields[lon_pos] = record.longitude().map(|v| v.to_string()).unwrap_or_default();
                }

                writer.write_record(&fields)?;
            }

            writer.flush()?;
            Ok(())
        })?;

        debug!("Wrote {} rows to {:?}", dataset.len(), self.path);
        Ok(())
    }

    /// Read back the rows that carry both coordinates.
    ///
    /// Returns `None` when the file does not exist yet or has no coordinate
    /// columns.
    pub fn load(&self) -> Result<Option<Vec<ResultRecord>>> {
        if !self.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();

        let (Some(lat_pos), Some(lon_pos)) = (
            column(&headers, LATITUDE_COLUMN),
            column(&headers, LONGITUDE_COLUMN),
        ) else {
            warn!(
                "{:?} has no {}/{} columns, not carrying results over",
                self.path, LATITUDE_COLUMN, LONGITUDE_COLUMN
            );
            return Ok(None);
        };

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row?;
            let (Some(lat), Some(lon)) = (parse_cell(&row, lat_pos), parse_cell(&row, lon_pos)) else {
                continue;
            };

            match Coordinates::new(lat, lon) {
                Ok(coordinates) => records.push(ResultRecord::new(index, Some(coordinates))),
                Err(e) => warn!("Ignoring stored result for row {}: {}", index, e),
            }
        }

        Ok(Some(records))
    }
}

/// Output headers and the positions of the coordinate columns
fn output_layout(headers: &StringRecord) -> (StringRecord, usize, usize) {
    let mut headers = headers.clone();

    let mut position = |name: &str| match headers.iter().position(|h| h == name) {
        Some(pos) => pos,
        None => {
            headers.push_field(name);
            headers.len() - 1
        }
    };

    let lat_pos = position(LATITUDE_COLUMN);
    let lon_pos = position(LONGITUDE_COLUMN);
    (headers, lat_pos, lon_pos)
}

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn parse_cell(row: &StringRecord, pos: usize) -> Option<f64> {
    row.get(pos)
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .and_then(|cell| cell.parse().ok())
}
