use crate::{PersistenceError, Result};
use csv::StringRecord;
use geodispatch_core::{AddressRow, RowIndex, WorkItem};
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Columns every dataset must carry
const REQUIRED_COLUMNS: &[&str] = &[
    "tipo_logradouro",
    "logradouro",
    "numero",
    "uf",
    "cep",
    "municipio_descricao",
];

/// The source rows, kept verbatim so the results file can reproduce them.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Dataset {
    /// Load a CSV dataset with a header row
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_reader(std::io::BufReader::new(file))?;
        info!("Loaded {} rows from {:?}", dataset.len(), path);
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == *column) {
                return Err(PersistenceError::MissingColumn(column.to_string()));
            }
        }

        // Short rows are padded on output; longer ones would collide with the
        // appended coordinate columns
        let mut rows = Vec::new();
        for (index, row) in csv_reader.records().enumerate() {
            let row = row?;
            if row.len() > headers.len() {
                return Err(PersistenceError::RaggedRow {
                    row: index,
                    found: row.len(),
                    expected: headers.len(),
                });
            }
            rows.push(row);
        }

        Ok(Dataset { headers, rows })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Address columns of one row
    pub fn address(&self, index: RowIndex) -> Result<AddressRow> {
        let record = self
            .rows
            .get(index)
            .ok_or(PersistenceError::RowOutOfRange(index))?;

        Ok(record.deserialize(Some(&self.headers))?)
    }

    /// Work items for every row from `start` onward, in row order
    pub fn work_items(&self, start: RowIndex) -> Result<Vec<WorkItem>> {
        (start..self.len())
            .map(|index| Ok(WorkItem::from_row(index, &self.address(index)?)))
            .collect()
    }
}
