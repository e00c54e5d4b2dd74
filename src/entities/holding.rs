// 📚 Holding Entity - library books keyed by accession number
//
// `available_copies` is live stock state owned by the circulation side of the
// store: it is seeded from `total_copies` when a book is first catalogued and
// never reset by later imports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, EntityProfile, FieldSpec, FieldType};
use crate::store::StoredRecord;

pub static HOLDING_PROFILE: EntityProfile = EntityProfile {
    kind: EntityKind::Holding,
    table: "holdings",
    key: FieldSpec::text(
        "accession_no",
        &["acc. no.", "acc_no", "accessionno", "accession_no"],
    )
    .required(),
    fields: &[
        FieldSpec::text("title", &["title"]).required(),
        FieldSpec::text("author", &["author"]),
        FieldSpec::text("subject", &["subject"]),
        FieldSpec::text("rack_location", &["rack_location", "rack", "location"]),
        FieldSpec::count("total_copies", &["copies", "total_copies", "no_of_copies"]),
        FieldSpec::protected("available_copies", FieldType::Count, "total_copies"),
    ],
    default_path: "Library_data.csv",
    path_env: "HOLDINGS_CSV",
};

/// Typed view of a stored holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub accession_no: String,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub rack_location: String,
    pub total_copies: i64,
    pub available_copies: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredRecord> for Holding {
    fn from(record: &StoredRecord) -> Self {
        Holding {
            accession_no: record.key.clone(),
            title: record.text("title").to_string(),
            author: record.text("author").to_string(),
            subject: record.text("subject").to_string(),
            rack_location: record.text("rack_location").to_string(),
            total_copies: record.count("total_copies"),
            available_copies: record.count("available_copies"),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
