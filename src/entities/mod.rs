// Entity Profiles
//
// Each entity kind is described once, as data:
// - the store table and its natural key
// - the header aliases accepted for every logical field
// - the value type of every field
// - the merge policy of every field (overwritable vs protected)
//
// The resolver, normalizer and reconciliation engine only ever read a profile,
// so adding a kind means adding a profile, never touching the engine.

pub mod holding;
pub mod individual;

pub use holding::{Holding, HOLDING_PROFILE};
pub use individual::{Individual, INDIVIDUAL_PROFILE};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default for count fields whose cell is absent, blank or unparseable.
pub const DEFAULT_COUNT: i64 = 1;

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Library holdings (books), keyed by accession number
    Holding,

    /// Enrolled individuals (students), keyed by USN
    Individual,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Holding, EntityKind::Individual];

    pub fn profile(&self) -> &'static EntityProfile {
        match self {
            EntityKind::Holding => &HOLDING_PROFILE,
            EntityKind::Individual => &INDIVIDUAL_PROFILE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Holding => "holdings",
            EntityKind::Individual => "individuals",
        }
    }

    /// Label used in the human-readable run summary
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Holding => "Books",
            EntityKind::Individual => "Students",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FIELD SPECS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Trimmed text, empty string when missing
    Text,

    /// Integer count, `DEFAULT_COUNT` when missing or unparseable
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Replaced by the latest row on every sighting
    Overwrite,

    /// Seeded once at creation from another field of the candidate,
    /// never touched again by an import
    Protected { seed_from: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Store column name, also the logical field name
    pub name: &'static str,

    /// Accepted header names in priority order (empty for derived fields)
    pub aliases: &'static [&'static str],

    pub field_type: FieldType,
    pub policy: MergePolicy,

    /// Run fails before touching the store if no alias matches
    pub required: bool,
}

impl FieldSpec {
    pub const fn text(name: &'static str, aliases: &'static [&'static str]) -> Self {
        FieldSpec {
            name,
            aliases,
            field_type: FieldType::Text,
            policy: MergePolicy::Overwrite,
            required: false,
        }
    }

    pub const fn count(name: &'static str, aliases: &'static [&'static str]) -> Self {
        FieldSpec {
            name,
            aliases,
            field_type: FieldType::Count,
            policy: MergePolicy::Overwrite,
            required: false,
        }
    }

    /// A protected field has no aliases: it is never read from the file.
    pub const fn protected(name: &'static str, field_type: FieldType, seed_from: &'static str) -> Self {
        FieldSpec {
            name,
            aliases: &[],
            field_type,
            policy: MergePolicy::Protected { seed_from },
            required: false,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_protected(&self) -> bool {
        matches!(self.policy, MergePolicy::Protected { .. })
    }

    /// Whether the normalizer reads this field from the input file
    pub fn is_sourced(&self) -> bool {
        !self.aliases.is_empty()
    }
}

// ============================================================================
// ENTITY PROFILE
// ============================================================================

#[derive(Debug)]
pub struct EntityProfile {
    pub kind: EntityKind,

    /// Store table holding one row per natural key
    pub table: &'static str,

    /// Natural key field (always text, always required)
    pub key: FieldSpec,

    /// Every non-key field, in store column order
    pub fields: &'static [FieldSpec],

    /// Input file used when no override is configured
    pub default_path: &'static str,

    /// Environment variable overriding `default_path`
    pub path_env: &'static str,
}

impl EntityProfile {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn overwritable(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.is_protected())
    }

    pub fn protected(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_protected())
    }

    /// Key first, then every sourced field (the ones the resolver maps)
    pub fn sourced(&self) -> impl Iterator<Item = &FieldSpec> {
        std::iter::once(&self.key).chain(self.fields.iter().filter(|f| f.is_sourced()))
    }
}

// ============================================================================
// FIELD VALUES
// ============================================================================

/// A typed cell value after normalization, or as read back from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Count(i64),
}

impl FieldValue {
    /// Value used when a field's column is absent from the file
    pub fn default_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => FieldValue::Text(String::new()),
            FieldType::Count => FieldValue::Count(DEFAULT_COUNT),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Count(_) => None,
        }
    }

    pub fn as_count(&self) -> Option<i64> {
        match self {
            FieldValue::Count(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Count(n) => write!(f, "{}", n),
        }
    }
}
