use crate::COUNTRY;
use serde::{Deserialize, Serialize};

/// Address columns of one dataset row.
///
/// Columns missing from the source deserialize as empty strings so partially
/// filled rows still produce a usable address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRow {
    #[serde(default)]
    pub tipo_logradouro: String,
    #[serde(default)]
    pub logradouro: String,
    #[serde(default)]
    pub numero: String,
    #[serde(default)]
    pub uf: String,
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub municipio_descricao: String,
}

/// Format a row into the `(payload, context)` pair sent to workers.
///
/// The payload is `"{tipo_logradouro} {logradouro}, {numero}, {uf}, {cep}, Brasil"`
/// split on commas, with every segment trimmed and empty segments dropped. The
/// context is the municipality as stored in the row. The function is pure, so
/// re-running it over the same row always yields byte-identical work.
pub fn format_address(row: &AddressRow) -> (String, String) {
    let raw = format!(
        "{} {}, {}, {}, {}, {}",
        row.tipo_logradouro, row.logradouro, row.numero, row.uf, row.cep, COUNTRY
    );

    let payload = raw
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    (payload, row.municipio_descricao.clone())
}
