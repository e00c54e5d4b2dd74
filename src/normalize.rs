// 🧹 Row Normalizer
//
// Turns one raw CSV row into a typed candidate. Nothing here fails:
// blank keys skip the row, blank or junk counts fall back to the default,
// missing text becomes "".

use csv::StringRecord;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::entities::{EntityProfile, FieldType, FieldValue, DEFAULT_COUNT};
use crate::resolver::FieldMap;

/// A row after normalization, ready for reconciliation.
///
/// Holds a value for every sourced field of the profile; protected fields are
/// derived by the engine at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRecord {
    pub key: String,
    pub values: BTreeMap<&'static str, FieldValue>,
}

impl CandidateRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }
}

/// Trimmed cell text, `None` when the column is unmapped, the row is short,
/// or the cell is blank.
fn cell<'r>(row: &'r StringRecord, column: Option<usize>) -> Option<&'r str> {
    column
        .and_then(|c| row.get(c))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Integer coercion for count cells.
///
/// Accepts plain integers and integral decimals ("3.0", as spreadsheet
/// exports write them). Anything else yields `None`.
pub fn parse_count(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n);
    }

    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Normalize one row. Returns `None` when the natural key is blank.
pub fn normalize_row(
    profile: &EntityProfile,
    map: &FieldMap,
    row: &StringRecord,
) -> Option<CandidateRecord> {
    let key = cell(row, map.column(profile.key.name))?.to_string();

    let mut values = BTreeMap::new();
    for field in profile.fields.iter().filter(|f| f.is_sourced()) {
        let raw = cell(row, map.column(field.name));

        let value = match field.field_type {
            FieldType::Text => FieldValue::Text(raw.unwrap_or_default().to_string()),
            FieldType::Count => {
                FieldValue::Count(raw.and_then(parse_count).unwrap_or(DEFAULT_COUNT))
            }
        };

        values.insert(field.name, value);
    }

    Some(CandidateRecord { key, values })
}
