use thiserror::Error;

use crate::entities::EntityKind;

/// Everything that can stop an import run.
///
/// Configuration variants are raised before the unit of work opens; the rest
/// abort a run in progress and cause a full rollback.
#[derive(Debug, Error)]
pub enum ImportError {
    /// A mandatory logical field matched none of its header aliases.
    #[error("{kind} file must contain a '{field}' column (accepted headers: {})", aliases.join(", "))]
    MissingColumn {
        kind: EntityKind,
        field: &'static str,
        aliases: Vec<&'static str>,
    },

    /// A required setting is not present in the environment.
    #[error("{0} not set")]
    MissingSetting(&'static str),

    /// A setting is present but cannot be used.
    #[error("invalid value for {name}: '{value}'")]
    InvalidSetting { name: &'static str, value: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    /// True for errors detected before any row was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ImportError::MissingColumn { .. }
                | ImportError::MissingSetting(_)
                | ImportError::InvalidSetting { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_message_lists_aliases() {
        let err = ImportError::MissingColumn {
            kind: EntityKind::Holding,
            field: "accession_no",
            aliases: vec!["acc. no.", "acc_no"],
        };

        assert_eq!(
            err.to_string(),
            "holdings file must contain a 'accession_no' column (accepted headers: acc. no., acc_no)"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn test_store_error_is_not_configuration() {
        let err = ImportError::from(rusqlite::Error::InvalidQuery);
        assert!(!err.is_configuration());
    }
}
