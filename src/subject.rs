//! Subject Registry
//!
//! Each subject's history is an immutable [`SubjectLog`] behind an `Arc`.
//! Readers clone the `Arc` and never see a half-applied change; writers
//! replace it wholesale. Appends are conditional on the revision the writer
//! read, which is what lets the registration path retry on conflict instead
//! of holding a lock across the compatibility check.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Result, SchemaError};
use crate::schema::Schema;
use crate::store::{SchemaId, SchemaStore};
use crate::version::{SubjectVersion, VersionNumber, VersionSelector, VersionState};

/// Immutable view of one subject's history
#[derive(Debug, Clone)]
pub struct SubjectLog {
    revision: u64,
    next_version: VersionNumber,
    rows: Vec<SubjectVersion>,
}

impl Default for SubjectLog {
    fn default() -> Self {
        Self {
            revision: 0,
            next_version: 1,
            rows: Vec::new(),
        }
    }
}

impl SubjectLog {
    /// Bumped on every change to the subject
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Next version number to hand out; survives deletions
    pub fn next_version(&self) -> VersionNumber {
        self.next_version
    }

    /// Every non-purged row, oldest first
    pub fn rows(&self) -> &[SubjectVersion] {
        &self.rows
    }

    pub fn live(&self) -> impl Iterator<Item = &SubjectVersion> {
        self.rows.iter().filter(|row| row.state == VersionState::Live)
    }

    pub fn latest_live(&self) -> Option<&SubjectVersion> {
        self.live().last()
    }

    pub fn has_live(&self) -> bool {
        self.latest_live().is_some()
    }

    fn find(&self, version: VersionNumber) -> Option<&SubjectVersion> {
        self.rows.iter().find(|row| row.version == version)
    }

    fn appended(&self, subject: &str, schema_id: SchemaId) -> Self {
        let mut next = self.clone();
        next.rows.push(SubjectVersion {
            subject: subject.to_string(),
            version: self.next_version,
            schema_id,
            state: VersionState::Live,
            registered_at: Utc::now(),
        });
        next.next_version += 1;
        next.revision += 1;
        next
    }

    fn changed(mut self) -> Self {
        self.revision += 1;
        self
    }
}

/// Outcome of a conditional append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitOutcome {
    Committed { id: SchemaId, version: VersionNumber },
    /// The history advanced since it was read; nothing was allocated
    Stale,
}

fn subject_not_found(subject: &str) -> SchemaError {
    SchemaError::SubjectNotFound {
        subject: subject.to_string(),
    }
}

fn version_not_found(subject: &str, selector: VersionSelector) -> SchemaError {
    SchemaError::VersionNotFound {
        subject: subject.to_string(),
        version: selector.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct SubjectRegistry {
    subjects: DashMap<String, Arc<SubjectLog>>,
}

impl SubjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current history of a subject, if it was ever registered to
    pub fn snapshot(&self, subject: &str) -> Option<Arc<SubjectLog>> {
        self.subjects.get(subject).map(|entry| entry.value().clone())
    }

    /// Subjects with a live version, or with any non-purged version when
    /// `include_deleted` is set
    pub fn subjects(&self, include_deleted: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .subjects
            .iter()
            .filter(|entry| {
                if include_deleted {
                    !entry.value().rows.is_empty()
                } else {
                    entry.value().has_live()
                }
            })
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn exists(&self, subject: &str) -> bool {
        self.snapshot(subject).map_or(false, |log| log.has_live())
    }

    pub fn versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<VersionNumber>> {
        let log = self.snapshot(subject).ok_or_else(|| subject_not_found(subject))?;
        let versions: Vec<VersionNumber> = if include_deleted {
            log.rows.iter().map(|row| row.version).collect()
        } else {
            log.live().map(|row| row.version).collect()
        };
        if versions.is_empty() {
            return Err(subject_not_found(subject));
        }
        Ok(versions)
    }

    /// Fetch a live version; "latest" is the highest-numbered live version
    pub fn get_version(&self, subject: &str, selector: VersionSelector) -> Result<SubjectVersion> {
        let log = self
            .snapshot(subject)
            .filter(|log| log.has_live())
            .ok_or_else(|| subject_not_found(subject))?;
        let row = match selector {
            VersionSelector::Latest => log.latest_live(),
            VersionSelector::Number(n) => log.find(n).filter(|row| row.state == VersionState::Live),
        };
        row.cloned().ok_or_else(|| version_not_found(subject, selector))
    }

    /// Fetch a version whether or not it is soft-deleted; "latest" is the
    /// highest-numbered non-purged version
    pub fn get_version_including_deleted(&self, subject: &str, selector: VersionSelector) -> Result<SubjectVersion> {
        let log = self
            .snapshot(subject)
            .filter(|log| !log.rows.is_empty())
            .ok_or_else(|| subject_not_found(subject))?;
        let row = match selector {
            VersionSelector::Latest => log.rows.last(),
            VersionSelector::Number(n) => log.find(n),
        };
        row.cloned().ok_or_else(|| version_not_found(subject, selector))
    }

    /// Every non-purged (subject, version) that references `id`
    pub fn referencing(&self, id: SchemaId) -> Vec<(String, VersionNumber)> {
        let mut found: Vec<(String, VersionNumber)> = self
            .subjects
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .rows
                    .iter()
                    .filter(|row| row.schema_id == id)
                    .map(|row| (row.subject.clone(), row.version))
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort();
        found
    }

    /// Intern `schema` and append a live version pointing at it, provided the
    /// subject is still at `expected_revision` (`None` for a subject never
    /// seen before). The id is only allocated once the revision check has
    /// passed, under the subject's shard lock.
    pub(crate) fn commit_append(
        &self,
        subject: &str,
        expected_revision: Option<u64>,
        schema: &Schema,
        store: &SchemaStore,
    ) -> CommitOutcome {
        match self.subjects.entry(subject.to_string()) {
            Entry::Occupied(mut occupied) => {
                if Some(occupied.get().revision) != expected_revision {
                    return CommitOutcome::Stale;
                }
                let id = store.intern_schema(schema);
                let next = occupied.get().appended(subject, id);
                let version = next.next_version - 1;
                occupied.insert(Arc::new(next));
                store.retain(id);
                CommitOutcome::Committed { id, version }
            }
            Entry::Vacant(vacant) => {
                if expected_revision.is_some() {
                    return CommitOutcome::Stale;
                }
                let id = store.intern_schema(schema);
                let next = SubjectLog::default().appended(subject, id);
                let version = next.next_version - 1;
                let _guard = vacant.insert(Arc::new(next));
                store.retain(id);
                CommitOutcome::Committed { id, version }
            }
        }
    }

    /// Mark every live version deleted; returns the affected versions
    pub fn soft_delete(&self, subject: &str) -> Result<Vec<VersionNumber>> {
        let mut entry = self.subjects.get_mut(subject).ok_or_else(|| subject_not_found(subject))?;
        if entry.rows.is_empty() {
            return Err(subject_not_found(subject));
        }
        let deleted: Vec<VersionNumber> = entry.live().map(|row| row.version).collect();
        if deleted.is_empty() {
            return Err(SchemaError::SubjectSoftDeleted {
                subject: subject.to_string(),
            });
        }

        let mut next = SubjectLog::clone(&entry);
        for row in next.rows.iter_mut() {
            row.state = VersionState::SoftDeleted;
        }
        *entry = Arc::new(next.changed());
        Ok(deleted)
    }

    /// Mark one live version deleted
    pub fn soft_delete_version(&self, subject: &str, selector: VersionSelector) -> Result<VersionNumber> {
        let mut entry = self.subjects.get_mut(subject).ok_or_else(|| subject_not_found(subject))?;
        if entry.rows.is_empty() {
            return Err(subject_not_found(subject));
        }
        let version = match selector {
            VersionSelector::Latest => entry.latest_live().map(|row| row.version),
            VersionSelector::Number(n) => entry.find(n).map(|row| row.version),
        }
        .ok_or_else(|| version_not_found(subject, selector))?;

        let mut next = SubjectLog::clone(&entry);
        let row = next
            .rows
            .iter_mut()
            .find(|row| row.version == version)
            .ok_or_else(|| version_not_found(subject, selector))?;
        if row.state == VersionState::SoftDeleted {
            return Err(SchemaError::VersionSoftDeleted {
                subject: subject.to_string(),
                version,
            });
        }
        row.state = VersionState::SoftDeleted;
        *entry = Arc::new(next.changed());
        Ok(version)
    }

    /// Erase every version of an already soft-deleted subject. The version
    /// counter is kept so numbers are never handed out twice.
    pub(crate) fn permanent_delete(&self, subject: &str, store: &SchemaStore) -> Result<Vec<VersionNumber>> {
        let mut entry = self.subjects.get_mut(subject).ok_or_else(|| subject_not_found(subject))?;
        if entry.rows.is_empty() {
            return Err(subject_not_found(subject));
        }
        if entry.has_live() {
            return Err(SchemaError::SubjectNotSoftDeleted {
                subject: subject.to_string(),
            });
        }

        let mut next = SubjectLog::clone(&entry);
        let purged: Vec<SubjectVersion> = next.rows.drain(..).collect();
        *entry = Arc::new(next.changed());

        let ids: Vec<SchemaId> = purged.iter().map(|row| row.schema_id).collect();
        store.release(&ids);
        Ok(purged.into_iter().map(|row| row.version).collect())
    }

    /// Erase one already soft-deleted version
    pub(crate) fn permanent_delete_version(
        &self,
        subject: &str,
        selector: VersionSelector,
        store: &SchemaStore,
    ) -> Result<VersionNumber> {
        let mut entry = self.subjects.get_mut(subject).ok_or_else(|| subject_not_found(subject))?;
        if entry.rows.is_empty() {
            return Err(subject_not_found(subject));
        }
        let row = match selector {
            VersionSelector::Latest => entry.rows.last(),
            VersionSelector::Number(n) => entry.find(n),
        }
        .cloned()
        .ok_or_else(|| version_not_found(subject, selector))?;
        if row.state == VersionState::Live {
            return Err(SchemaError::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version: row.version,
            });
        }

        let mut next = SubjectLog::clone(&entry);
        next.rows.retain(|r| r.version != row.version);
        *entry = Arc::new(next.changed());
        store.release(&[row.schema_id]);
        Ok(row.version)
    }

    /// Every subject's history, including purged subjects' version counters
    pub fn entries(&self) -> Vec<(String, Arc<SubjectLog>)> {
        let mut entries: Vec<_> = self
            .subjects
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Rebuild from persisted histories, re-establishing store references
    pub(crate) fn restore(
        histories: Vec<(String, VersionNumber, Vec<SubjectVersion>)>,
        store: &SchemaStore,
    ) -> Result<Self> {
        let registry = Self::new();
        for (subject, next_version, rows) in histories {
            let mut previous = 0;
            for row in &rows {
                if row.version <= previous || row.version >= next_version {
                    return Err(SchemaError::Snapshot(format!(
                        "subject '{}' has out-of-order version {}",
                        subject, row.version
                    )));
                }
                if store.get(row.schema_id).is_none() {
                    return Err(SchemaError::Snapshot(format!(
                        "subject '{}' version {} references unknown schema {}",
                        subject, row.version, row.schema_id
                    )));
                }
                store.retain(row.schema_id);
                previous = row.version;
            }
            let log = SubjectLog {
                revision: 1,
                next_version,
                rows,
            };
            registry.subjects.insert(subject, Arc::new(log));
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaFormat;

    fn record(n: usize) -> Schema {
        Schema::new(SchemaFormat::Avro, format!(r#"{{"type":"record","name":"r{}","fields":[]}}"#, n)).unwrap()
    }

    fn setup(versions: usize) -> (SubjectRegistry, SchemaStore) {
        let registry = SubjectRegistry::new();
        let store = SchemaStore::new();
        for n in 0..versions {
            let revision = registry.snapshot("s").map(|log| log.revision());
            assert!(matches!(
                registry.commit_append("s", revision, &record(n), &store),
                CommitOutcome::Committed { .. }
            ));
        }
        (registry, store)
    }

    #[test]
    fn test_versions_start_at_one() {
        let (registry, _) = setup(3);
        assert_eq!(registry.versions("s", false).unwrap(), vec![1, 2, 3]);
        assert_eq!(registry.get_version("s", VersionSelector::Latest).unwrap().version, 3);
        assert_eq!(registry.subjects(false), vec!["s".to_string()]);
    }

    #[test]
    fn test_stale_commit_is_rejected() {
        let (registry, store) = setup(1);
        let stale = Some(0);
        assert_eq!(registry.commit_append("s", stale, &record(0), &store), CommitOutcome::Stale);
        assert_eq!(registry.commit_append("s", None, &record(0), &store), CommitOutcome::Stale);
        assert_eq!(registry.commit_append("fresh", Some(3), &record(0), &store), CommitOutcome::Stale);
        assert_eq!(registry.versions("s", false).unwrap(), vec![1]);
        assert!(registry.snapshot("fresh").is_none());
    }

    #[test]
    fn test_stale_commit_allocates_no_id() {
        let (registry, store) = setup(1);
        let unseen = record(7);
        assert_eq!(registry.commit_append("s", Some(0), &unseen, &store), CommitOutcome::Stale);
        assert_eq!(store.find(&unseen), None);
        assert_eq!(store.next_id(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_subject() {
        let registry = SubjectRegistry::new();
        assert!(matches!(registry.versions("nope", true), Err(SchemaError::SubjectNotFound { .. })));
        assert!(matches!(
            registry.get_version("nope", VersionSelector::Number(1)),
            Err(SchemaError::SubjectNotFound { .. })
        ));
        assert!(matches!(registry.soft_delete("nope"), Err(SchemaError::SubjectNotFound { .. })));
    }

    #[test]
    fn test_missing_version() {
        let (registry, _) = setup(1);
        let err = registry.get_version("s", VersionSelector::Number(2)).unwrap_err();
        assert_eq!(err.to_string(), "Subject 's' Version 2 not found.");
    }

    #[test]
    fn test_soft_delete_subject() {
        let (registry, _) = setup(3);
        assert_eq!(registry.soft_delete("s").unwrap(), vec![1, 2, 3]);
        assert!(matches!(registry.versions("s", false), Err(SchemaError::SubjectNotFound { .. })));
        assert_eq!(registry.versions("s", true).unwrap(), vec![1, 2, 3]);
        assert!(registry.subjects(false).is_empty());
        assert_eq!(registry.subjects(true), vec!["s".to_string()]);
        assert!(matches!(registry.soft_delete("s"), Err(SchemaError::SubjectSoftDeleted { .. })));
    }

    #[test]
    fn test_soft_delete_version() {
        let (registry, _) = setup(3);
        assert_eq!(registry.soft_delete_version("s", VersionSelector::Number(2)).unwrap(), 2);
        assert_eq!(registry.versions("s", false).unwrap(), vec![1, 3]);
        assert_eq!(registry.versions("s", true).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            registry.get_version("s", VersionSelector::Number(2)),
            Err(SchemaError::VersionNotFound { .. })
        ));
        assert!(registry.get_version_including_deleted("s", VersionSelector::Number(2)).unwrap().is_deleted());
        assert!(matches!(
            registry.soft_delete_version("s", VersionSelector::Number(2)),
            Err(SchemaError::VersionSoftDeleted { version: 2, .. })
        ));
        assert!(matches!(
            registry.soft_delete_version("s", VersionSelector::Number(9)),
            Err(SchemaError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_latest_skips_soft_deleted() {
        let (registry, _) = setup(3);
        registry.soft_delete_version("s", VersionSelector::Latest).unwrap();
        assert_eq!(registry.get_version("s", VersionSelector::Latest).unwrap().version, 2);
    }

    #[test]
    fn test_permanent_delete_requires_soft_delete() {
        let (registry, store) = setup(2);
        assert!(matches!(
            registry.permanent_delete("s", &store),
            Err(SchemaError::SubjectNotSoftDeleted { .. })
        ));
        assert!(matches!(
            registry.permanent_delete_version("s", VersionSelector::Number(1), &store),
            Err(SchemaError::VersionNotSoftDeleted { version: 1, .. })
        ));

        registry.soft_delete("s").unwrap();
        assert_eq!(registry.permanent_delete("s", &store).unwrap(), vec![1, 2]);
        assert!(matches!(registry.versions("s", true), Err(SchemaError::SubjectNotFound { .. })));
        assert!(matches!(registry.permanent_delete("s", &store), Err(SchemaError::SubjectNotFound { .. })));
        assert!(store.lookup_by_id(1).is_err());
    }

    #[test]
    fn test_versions_are_not_reused_after_purge() {
        let (registry, store) = setup(2);
        registry.soft_delete("s").unwrap();
        registry.permanent_delete("s", &store).unwrap();

        let revision = registry.snapshot("s").map(|log| log.revision());
        assert_eq!(
            registry.commit_append("s", revision, &record(0), &store),
            CommitOutcome::Committed { id: 1, version: 3 }
        );
        assert_eq!(registry.versions("s", false).unwrap(), vec![3]);
    }

    #[test]
    fn test_permanent_delete_version() {
        let (registry, store) = setup(3);
        registry.soft_delete_version("s", VersionSelector::Number(2)).unwrap();
        assert_eq!(registry.permanent_delete_version("s", VersionSelector::Number(2), &store).unwrap(), 2);
        assert_eq!(registry.versions("s", true).unwrap(), vec![1, 3]);
        assert!(matches!(
            registry.permanent_delete_version("s", VersionSelector::Number(2), &store),
            Err(SchemaError::VersionNotFound { .. })
        ));
        assert!(store.lookup_by_id(2).is_err());
        assert!(store.lookup_by_id(3).is_ok());
    }

    #[test]
    fn test_referencing() {
        let (registry, store) = setup(1);
        assert_eq!(
            registry.commit_append("other", None, &record(0), &store),
            CommitOutcome::Committed { id: 1, version: 1 }
        );
        registry.soft_delete_version("s", VersionSelector::Number(1)).unwrap();
        assert_eq!(
            registry.referencing(1),
            vec![("other".to_string(), 1), ("s".to_string(), 1)]
        );
    }
}
