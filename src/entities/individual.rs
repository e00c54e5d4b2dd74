// 🎓 Individual Entity - enrolled students keyed by USN
//
// Every attribute comes straight from the registrar's file, so nothing here is
// protected: each import fully refreshes a student's details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, EntityProfile, FieldSpec};
use crate::store::StoredRecord;

pub static INDIVIDUAL_PROFILE: EntityProfile = EntityProfile {
    kind: EntityKind::Individual,
    table: "individuals",
    key: FieldSpec::text("usn", &["usn"]).required(),
    fields: &[
        FieldSpec::text("name", &["name", "student_name"]).required(),
        FieldSpec::text("semester", &["semester", "sem"]),
        FieldSpec::text("branch", &["branch", "dept"]),
        FieldSpec::text("phone", &["phone", "mobile", "phone_no"]),
        FieldSpec::text("email", &["email", "mail"]),
    ],
    default_path: "students.csv",
    path_env: "STUDENTS_CSV",
};

/// Typed view of a stored individual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub usn: String,
    pub name: String,
    pub semester: String,
    pub branch: String,
    pub phone: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredRecord> for Individual {
    fn from(record: &StoredRecord) -> Self {
        Individual {
            usn: record.key.clone(),
            name: record.text("name").to_string(),
            semester: record.text("semester").to_string(),
            branch: record.text("branch").to_string(),
            phone: record.text("phone").to_string(),
            email: record.text("email").to_string(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
