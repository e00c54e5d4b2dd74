// 🧭 Column Resolver
//
// Import files come from whoever exported them last, so the same logical field
// shows up as "Acc. No.", "acc_no" or "AccessionNo". Headers are normalized
// once (trim + lowercase) and each logical field takes the first of its
// aliases that is present. Exact matches only.

use csv::StringRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::entities::{EntityKind, EntityProfile};
use crate::error::{ImportError, Result};

/// Trim, drop a leading UTF-8 BOM, lowercase.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

// ============================================================================
// HEADER INDEX
// ============================================================================

/// Normalized header row of one input file
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    names: Vec<String>,
}

impl HeaderIndex {
    pub fn new<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        HeaderIndex {
            names: headers.into_iter().map(normalize_header).collect(),
        }
    }

    pub fn from_record(headers: &StringRecord) -> Self {
        Self::new(headers.iter())
    }

    /// Leftmost column whose normalized name equals `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        let wanted = normalize_header(name);
        self.names.iter().position(|h| *h == wanted)
    }

    /// First alias (in priority order) present in the header row
    pub fn find_any(&self, aliases: &[&str]) -> Option<(usize, usize)> {
        aliases
            .iter()
            .enumerate()
            .find_map(|(rank, alias)| self.position(alias).map(|col| (rank, col)))
    }

    pub fn name(&self, column: usize) -> Option<&str> {
        self.names.get(column).map(String::as_str)
    }
}

// ============================================================================
// FIELD MAP
// ============================================================================

/// Where one logical field lives in the input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedColumn {
    pub index: usize,
    pub header: String,
}

/// Logical field -> physical column, computed once per run
#[derive(Debug, Clone, Serialize)]
pub struct FieldMap {
    pub kind: EntityKind,
    columns: BTreeMap<&'static str, Option<ResolvedColumn>>,
}

impl FieldMap {
    /// Column index for a logical field, `None` if no alias matched
    pub fn column(&self, field: &str) -> Option<usize> {
        self.columns
            .get(field)
            .and_then(|c| c.as_ref())
            .map(|c| c.index)
    }

    pub fn is_resolved(&self, field: &str) -> bool {
        self.column(field).is_some()
    }

    /// Fields that matched no alias (they fall back to defaults)
    pub fn unresolved(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|(_, c)| c.is_none())
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Resolve every sourced field of `profile` against the header row.
///
/// Fails with `MissingColumn` if a required field (natural key, primary name)
/// matches none of its aliases.
pub fn resolve(profile: &EntityProfile, headers: &HeaderIndex) -> Result<FieldMap> {
    let mut columns = BTreeMap::new();

    for field in profile.sourced() {
        let resolved = headers.find_any(field.aliases).map(|(_, index)| ResolvedColumn {
            index,
            header: headers.name(index).unwrap_or_default().to_string(),
        });

        if resolved.is_none() && field.required {
            return Err(ImportError::MissingColumn {
                kind: profile.kind,
                field: field.name,
                aliases: field.aliases.to_vec(),
            });
        }

        if let Some(col) = &resolved {
            debug!(kind = %profile.kind, field = field.name, header = %col.header, column = col.index, "resolved column");
        }

        columns.insert(field.name, resolved);
    }

    Ok(FieldMap {
        kind: profile.kind,
        columns,
    })
}
