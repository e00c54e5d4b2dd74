// ⚙️ Settings - environment-driven configuration
//
// DATABASE_URL is the only required setting. Input paths default per entity
// kind and can be overridden by the kind's own variable (HOLDINGS_CSV,
// STUDENTS_CSV). Command-line flags override both.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::entities::EntityKind;
use crate::error::{ImportError, Result};

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const IMPORT_DELIMITER: &str = "IMPORT_DELIMITER";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub delimiter: u8,
    paths: HashMap<EntityKind, PathBuf>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get(DATABASE_URL).ok_or(ImportError::MissingSetting(DATABASE_URL))?;

        let delimiter = match get(IMPORT_DELIMITER) {
            Some(raw) => parse_delimiter(&raw).ok_or(ImportError::InvalidSetting {
                name: IMPORT_DELIMITER,
                value: raw,
            })?,
            None => b',',
        };

        let paths = EntityKind::ALL
            .iter()
            .map(|kind| {
                let profile = kind.profile();
                let path = get(profile.path_env).unwrap_or_else(|| profile.default_path.to_string());
                (*kind, PathBuf::from(path))
            })
            .collect();

        Ok(Settings {
            database_url,
            delimiter,
            paths,
        })
    }

    /// Input file for an entity kind
    pub fn path_for(&self, kind: EntityKind) -> PathBuf {
        self.paths
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(kind.profile().default_path))
    }

    pub fn set_path(&mut self, kind: EntityKind, path: impl Into<PathBuf>) {
        self.paths.insert(kind, path.into());
    }
}

/// A delimiter is exactly one ASCII character; `\t` and "tab" mean tab.
pub fn parse_delimiter(raw: &str) -> Option<u8> {
    match raw {
        "\\t" | "tab" | "\t" => Some(b'\t'),
        s if s.len() == 1 && s.is_ascii() => s.bytes().next(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_database_url_required() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ImportError::MissingSetting("DATABASE_URL")));
        assert!(err.is_configuration());

        let err = Settings::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap_err();
        assert!(matches!(err, ImportError::MissingSetting(_)));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[("DATABASE_URL", "catalog.db")])).unwrap();

        assert_eq!(settings.database_url, "catalog.db");
        assert_eq!(settings.delimiter, b',');
        assert_eq!(settings.path_for(EntityKind::Holding), PathBuf::from("Library_data.csv"));
        assert_eq!(settings.path_for(EntityKind::Individual), PathBuf::from("students.csv"));
    }

    #[test]
    fn test_path_overrides() {
        let mut settings = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "catalog.db"),
            ("HOLDINGS_CSV", "/data/books.csv"),
        ]))
        .unwrap();

        assert_eq!(settings.path_for(EntityKind::Holding), PathBuf::from("/data/books.csv"));

        settings.set_path(EntityKind::Individual, "roster.csv");
        assert_eq!(settings.path_for(EntityKind::Individual), PathBuf::from("roster.csv"));
    }

    #[test]
    fn test_delimiter() {
        let settings = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "catalog.db"),
            ("IMPORT_DELIMITER", ";"),
        ]))
        .unwrap();
        assert_eq!(settings.delimiter, b';');

        let err = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "catalog.db"),
            ("IMPORT_DELIMITER", "||"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidSetting { name: "IMPORT_DELIMITER", .. }));
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(","), Some(b','));
        assert_eq!(parse_delimiter("tab"), Some(b'\t'));
        assert_eq!(parse_delimiter("\\t"), Some(b'\t'));
        assert_eq!(parse_delimiter("é"), None);
        assert_eq!(parse_delimiter(""), None);
    }
}
