// ⚖️ Reconciliation Engine - CREATE or UPDATE by natural key
//
// The merge policy is read from the profile, never hard-coded:
// - CREATE: overwritable fields from the candidate, protected fields seeded
//   from their declared source field
// - UPDATE: overwritable fields from the candidate, protected fields untouched

use std::collections::BTreeMap;
use tracing::debug;

use crate::entities::{EntityProfile, FieldValue, MergePolicy};
use crate::error::Result;
use crate::normalize::CandidateRecord;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting of the key: record inserted
    Created,

    /// Key already stored: overwritable fields replaced
    Updated,
}

pub struct ReconciliationEngine<'p> {
    profile: &'p EntityProfile,
}

impl<'p> ReconciliationEngine<'p> {
    pub fn new(profile: &'p EntityProfile) -> Self {
        ReconciliationEngine { profile }
    }

    pub fn profile(&self) -> &'p EntityProfile {
        self.profile
    }

    /// Merge one candidate into the store.
    ///
    /// Lookup is an exact natural-key match against the store as seen by this
    /// unit of work, so a key repeated earlier in the same batch is found and
    /// updated rather than inserted twice.
    pub fn reconcile<S>(&self, store: &S, candidate: &CandidateRecord) -> Result<Outcome>
    where
        S: RecordStore + ?Sized,
    {
        if store.exists(self.profile, &candidate.key)? {
            store.update(self.profile, &candidate.key, &self.update_values(candidate))?;
            debug!(kind = %self.profile.kind, key = %candidate.key, "updated");
            Ok(Outcome::Updated)
        } else {
            store.insert(self.profile, &candidate.key, &self.creation_values(candidate))?;
            debug!(kind = %self.profile.kind, key = %candidate.key, "created");
            Ok(Outcome::Created)
        }
    }

    /// Overwritable fields only
    pub fn update_values(&self, candidate: &CandidateRecord) -> BTreeMap<&'static str, FieldValue> {
        self.profile
            .overwritable()
            .map(|field| {
                let value = candidate
                    .get(field.name)
                    .cloned()
                    .unwrap_or_else(|| FieldValue::default_for(field.field_type));
                (field.name, value)
            })
            .collect()
    }

    /// Overwritable fields plus every protected field seeded from its source
    pub fn creation_values(&self, candidate: &CandidateRecord) -> BTreeMap<&'static str, FieldValue> {
        let mut values = self.update_values(candidate);

        for field in self.profile.protected() {
            if let MergePolicy::Protected { seed_from } = field.policy {
                let seed = values
                    .get(seed_from)
                    .cloned()
                    .unwrap_or_else(|| FieldValue::default_for(field.field_type));
                values.insert(field.name, seed);
            }
        }

        values
    }
}
