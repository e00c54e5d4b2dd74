// Catalog Import - Core Library
// Reconciles flat-file exports of library holdings and enrolled students
// against the catalog database, one atomic batch per file.

pub mod config;
pub mod entities;
pub mod error;
pub mod import;
pub mod normalize;
pub mod reconcile;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use config::Settings;
pub use entities::{
    EntityKind, EntityProfile, FieldSpec, FieldType, FieldValue, MergePolicy,
    Holding, Individual, HOLDING_PROFILE, INDIVIDUAL_PROFILE,
};
pub use error::{ImportError, Result};
pub use import::{import_bytes, import_file, ImportOptions, ImportSummary};
pub use normalize::{normalize_row, CandidateRecord};
pub use reconcile::{Outcome, ReconciliationEngine};
pub use resolver::{resolve, FieldMap, HeaderIndex};
pub use store::{CatalogStore, ImportRun, RecordStore, StoreSession, StoredRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
