// 📥 Batch Import - one file, one unit of work
//
// 1. Read the file and fingerprint it (SHA-256)
// 2. Resolve columns from the header row (fails before the store is touched)
// 3. Open a session, reconcile every row, write the run's audit entry
// 4. Commit once; on any error roll the whole batch back
//
// No retries. The session is released on every path: committed, rolled back
// explicitly, or rolled back by drop.

use chrono::Utc;
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::{error, info, info_span, trace, warn};
use uuid::Uuid;

use crate::entities::{EntityKind, EntityProfile};
use crate::error::Result;
use crate::normalize::normalize_row;
use crate::reconcile::{Outcome, ReconciliationEngine};
use crate::resolver::{resolve, FieldMap, HeaderIndex};
use crate::store::{CatalogStore, ImportRun, StoreSession};

// ============================================================================
// SUMMARY
// ============================================================================

/// Counters reported for a committed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub run_id: String,
    pub kind: EntityKind,
    pub source_path: String,
    pub created: usize,
    pub updated: usize,

    /// Rows dropped for a blank natural key (in neither count above)
    pub skipped: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} load complete. Inserted={}, Updated={}",
            self.kind.label(),
            self.created,
            self.updated
        )?;
        if self.skipped > 0 {
            write!(f, ", Skipped={}", self.skipped)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchCounts {
    created: usize,
    updated: usize,
    skipped: usize,
}

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub delimiter: u8,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions { delimiter: b',' }
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Import one file for one entity kind.
pub fn import_file(
    store: &mut CatalogStore,
    kind: EntityKind,
    path: &Path,
    options: ImportOptions,
) -> Result<ImportSummary> {
    let bytes = std::fs::read(path)
        .inspect_err(|e| error!(path = %path.display(), error = %e, "cannot read import file"))?;

    import_bytes(store, kind.profile(), &path.display().to_string(), &bytes, options)
}

/// Import already-loaded file contents. `source_path` is only recorded.
pub fn import_bytes(
    store: &mut CatalogStore,
    profile: &EntityProfile,
    source_path: &str,
    bytes: &[u8],
    options: ImportOptions,
) -> Result<ImportSummary> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4().to_string();

    let span = info_span!("import", kind = %profile.kind, run_id = %run_id);
    let _enter = span.enter();

    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .from_reader(bytes);

    let headers = HeaderIndex::from_record(reader.headers()?);
    let map = resolve(profile, &headers).inspect_err(|e| error!(error = %e, "column resolution failed"))?;

    let unresolved = map.unresolved();
    if !unresolved.is_empty() {
        info!(fields = ?unresolved, "columns not found, using defaults");
    }

    info!(source = source_path, "starting import");

    let session = store.session()?;
    let engine = ReconciliationEngine::new(profile);

    let applied = apply_rows(&session, &engine, &map, &mut reader).and_then(|counts| {
        let run = ImportRun {
            run_id: run_id.clone(),
            kind: profile.kind,
            source_path: source_path.to_string(),
            source_sha256: sha256_hex(bytes),
            columns: serde_json::to_value(&map)?,
            created: counts.created,
            updated: counts.updated,
            skipped: counts.skipped,
            started_at,
            finished_at: Utc::now(),
        };
        session.record_run(&run)?;
        Ok(counts)
    });

    let counts = match applied {
        Ok(counts) => counts,
        Err(e) => {
            error!(error = %e, "import failed, rolling back");
            if let Err(rollback_err) = session.rollback() {
                warn!(error = %rollback_err, "rollback reported an error");
            }
            return Err(e);
        }
    };

    session
        .commit()
        .inspect_err(|e| error!(error = %e, "commit failed, batch rolled back"))?;

    info!(
        created = counts.created,
        updated = counts.updated,
        skipped = counts.skipped,
        "import committed"
    );

    Ok(ImportSummary {
        run_id,
        kind: profile.kind,
        source_path: source_path.to_string(),
        created: counts.created,
        updated: counts.updated,
        skipped: counts.skipped,
    })
}

fn apply_rows<R: Read>(
    session: &StoreSession<'_>,
    engine: &ReconciliationEngine<'_>,
    map: &FieldMap,
    reader: &mut csv::Reader<R>,
) -> Result<BatchCounts> {
    let profile = engine.profile();
    let mut counts = BatchCounts::default();
    let mut row = StringRecord::new();

    while reader.read_record(&mut row)? {
        let Some(candidate) = normalize_row(profile, map, &row) else {
            trace!(line = row.position().map(|p| p.line()), "blank key, row skipped");
            counts.skipped += 1;
            continue;
        };

        match engine.reconcile(session, &candidate)? {
            Outcome::Created => counts.created += 1,
            Outcome::Updated => counts.updated += 1,
        }
    }

    Ok(counts)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Holding, Individual, HOLDING_PROFILE, INDIVIDUAL_PROFILE};
    use crate::error::ImportError;

    const BOOKS: &str = "\
Acc. No.,Title,Author,Subject,Rack,Copies
A1,Intro to X,Smith,CS,R1,3
A2,Intro to Y,,,,
";

    fn import(store: &mut CatalogStore, csv: &str) -> Result<ImportSummary> {
        import_bytes(store, &HOLDING_PROFILE, "books.csv", csv.as_bytes(), ImportOptions::default())
    }

    fn holding(store: &CatalogStore, key: &str) -> Holding {
        Holding::from(&store.find(&HOLDING_PROFILE, key).unwrap().unwrap())
    }

    /// Makes any insert or update of `key` fail inside SQLite
    fn poison_key(store: &CatalogStore, key: &str) {
        store
            .connection()
            .execute_batch(&format!(
                "CREATE TRIGGER poison_insert BEFORE INSERT ON holdings
                 WHEN NEW.accession_no = '{key}'
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;
                 CREATE TRIGGER poison_update BEFORE UPDATE ON holdings
                 WHEN NEW.accession_no = '{key}'
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"
            ))
            .unwrap();
    }

    #[test]
    fn test_end_to_end_create_then_update() {
        let mut store = CatalogStore::open_in_memory().unwrap();

        let first = import(&mut store, BOOKS).unwrap();
        assert_eq!((first.created, first.updated, first.skipped), (2, 0, 0));
        assert_eq!(first.to_string(), "Books load complete. Inserted=2, Updated=0");

        let a1 = holding(&store, "A1");
        assert_eq!(a1.title, "Intro to X");
        assert_eq!(a1.author, "Smith");
        assert_eq!(a1.subject, "CS");
        assert_eq!(a1.rack_location, "R1");
        assert_eq!(a1.available_copies, 3);

        let a2 = holding(&store, "A2");
        assert_eq!(a2.author, "");
        assert_eq!(a2.subject, "");
        assert_eq!(a2.rack_location, "");
        assert_eq!(a2.total_copies, 1);
        assert_eq!(a2.available_copies, 1);

        // A copy goes out on loan between imports
        store
            .connection()
            .execute("UPDATE holdings SET available_copies = 2 WHERE accession_no = 'A1'", [])
            .unwrap();

        let second = import(
            &mut store,
            "acc_no,title,author,subject,rack,copies\nA1,Intro to X v2,Smith,CS,R1,5\n",
        )
        .unwrap();
        assert_eq!((second.created, second.updated), (0, 1));

        let a1 = holding(&store, "A1");
        assert_eq!(a1.title, "Intro to X v2");
        assert_eq!(a1.total_copies, 5);
        assert_eq!(a1.available_copies, 2);
        assert_eq!(store.count(&HOLDING_PROFILE).unwrap(), 2);
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let mut store = CatalogStore::open_in_memory().unwrap();

        import(&mut store, BOOKS).unwrap();
        let before: Vec<Holding> = store.list(&HOLDING_PROFILE).unwrap().iter().map(Holding::from).collect();

        let again = import(&mut store, BOOKS).unwrap();
        assert_eq!((again.created, again.updated), (0, 2));

        let after: Vec<Holding> = store.list(&HOLDING_PROFILE).unwrap().iter().map(Holding::from).collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.accession_no, a.accession_no);
            assert_eq!(b.title, a.title);
            assert_eq!(b.total_copies, a.total_copies);
            assert_eq!(b.available_copies, a.available_copies);
            assert_eq!(b.created_at, a.created_at);
        }
    }

    #[test]
    fn test_reimport_after_circulation_desk_write() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        import(&mut store, BOOKS).unwrap();

        // The circulation desk stamps rows with SQLite's own timestamp format
        store
            .connection()
            .execute(
                "UPDATE holdings SET available_copies = 0, updated_at = CURRENT_TIMESTAMP
                 WHERE accession_no = 'A1'",
                [],
            )
            .unwrap();

        let again = import(
            &mut store,
            "acc_no,title,copies\nA1,Intro to X (2nd ed.),4\n",
        )
        .unwrap();
        assert_eq!((again.created, again.updated), (0, 1));

        let a1 = holding(&store, "A1");
        assert_eq!(a1.title, "Intro to X (2nd ed.)");
        assert_eq!(a1.total_copies, 4);
        assert_eq!(a1.available_copies, 0);
    }

    #[test]
    fn test_blank_keys_skipped() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let summary = import(
            &mut store,
            "acc_no,title\nA1,Kept\n  ,Dropped\n,Also dropped\n",
        )
        .unwrap();

        assert_eq!((summary.created, summary.updated, summary.skipped), (1, 0, 2));
        assert_eq!(summary.to_string(), "Books load complete. Inserted=1, Updated=0, Skipped=2");
        assert_eq!(store.count(&HOLDING_PROFILE).unwrap(), 1);
    }

    #[test]
    fn test_repeated_key_in_one_file_last_write_wins() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let summary = import(
            &mut store,
            "acc_no,title,copies\nA1,First,2\nA2,Other,1\nA1,Second,9\n",
        )
        .unwrap();

        assert_eq!((summary.created, summary.updated), (2, 1));

        let a1 = holding(&store, "A1");
        assert_eq!(a1.title, "Second");
        assert_eq!(a1.total_copies, 9);
        assert_eq!(a1.available_copies, 2);
        assert_eq!(store.count(&HOLDING_PROFILE).unwrap(), 2);
    }

    #[test]
    fn test_failure_on_last_row_rolls_back_everything() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        import(&mut store, "acc_no,title,copies\nA0,Existing,4\n").unwrap();
        poison_key(&store, "A9");

        let err = import(
            &mut store,
            "acc_no,title,copies\nA0,Renamed,4\nA1,New,1\nA9,Boom,1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::Store(_)));

        assert_eq!(store.count(&HOLDING_PROFILE).unwrap(), 1);
        assert_eq!(holding(&store, "A0").title, "Existing");
        assert!(store.find(&HOLDING_PROFILE, "A1").unwrap().is_none());
        // Only the first run left an audit entry
        assert_eq!(store.recent_runs(10).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_mandatory_column_fails_before_any_write() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let err = import(&mut store, "title,author\nNo Key,Nobody\n").unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(store.count(&HOLDING_PROFILE).unwrap(), 0);
        assert!(store.recent_runs(10).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_csv_rolls_back() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let bytes = b"acc_no,title\nA1,Fine\nA2,\"unterminated\xff\n";
        let result = import_bytes(
            &mut store,
            &HOLDING_PROFILE,
            "bad.csv",
            bytes,
            ImportOptions::default(),
        );

        assert!(matches!(result, Err(ImportError::Csv(_))));
        assert_eq!(store.count(&HOLDING_PROFILE).unwrap(), 0);
    }

    #[test]
    fn test_run_is_recorded() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let summary = import(&mut store, BOOKS).unwrap();

        let runs = store.recent_runs(1).unwrap();
        assert_eq!(runs[0].run_id, summary.run_id);
        assert_eq!(runs[0].kind, EntityKind::Holding);
        assert_eq!(runs[0].source_sha256, sha256_hex(BOOKS.as_bytes()));
        assert_eq!(runs[0].columns["columns"]["accession_no"]["header"], "acc. no.");
        assert!(store.latest_run(EntityKind::Holding).unwrap().is_some());
        assert!(store.latest_run(EntityKind::Individual).unwrap().is_none());
    }

    #[test]
    fn test_students_with_semicolons() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        let csv = "USN;Student_Name;Sem;Dept;Mobile;Mail\n1AB21CS001;Asha;5;CSE;99999;asha@example.com\n";

        let summary = import_bytes(
            &mut store,
            &INDIVIDUAL_PROFILE,
            "students.csv",
            csv.as_bytes(),
            ImportOptions { delimiter: b';' },
        )
        .unwrap();
        assert_eq!(summary.to_string(), "Students load complete. Inserted=1, Updated=0");

        let student = Individual::from(&store.find(&INDIVIDUAL_PROFILE, "1AB21CS001").unwrap().unwrap());
        assert_eq!(student.name, "Asha");
        assert_eq!(student.semester, "5");
        assert_eq!(student.branch, "CSE");
        assert_eq!(student.phone, "99999");
        assert_eq!(student.email, "asha@example.com");
    }
}
