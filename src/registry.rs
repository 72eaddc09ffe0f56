//! Schema Registry
//!
//! The registration coordinator and the read/delete/config surface built on
//! top of the schema store, subject registry and config store.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityResult, VersionedSchema};
use crate::config::RegistryConfig;
use crate::config_store::ConfigStore;
use crate::error::{Result, SchemaError};
use crate::schema::{Schema, SchemaFormat};
use crate::snapshot::Snapshot;
use crate::store::{SchemaId, SchemaStore};
use crate::subject::{CommitOutcome, SubjectLog, SubjectRegistry};
use crate::version::{SubjectVersion, VersionNumber, VersionSelector};

/// Outcome of a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: SchemaId,
    pub version: VersionNumber,
}

/// A subject version together with its schema content
#[derive(Debug, Clone)]
pub struct SubjectSchema {
    pub subject: String,
    pub version: VersionNumber,
    pub id: SchemaId,
    pub schema: Arc<Schema>,
    pub deleted: bool,
}

/// The main schema registry
#[derive(Debug)]
pub struct SchemaRegistry {
    store: SchemaStore,
    subjects: SubjectRegistry,
    config: ConfigStore,
    settings: RegistryConfig,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// An empty in-memory registry with default settings
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(settings: RegistryConfig) -> Self {
        Self {
            store: SchemaStore::new(),
            subjects: SubjectRegistry::new(),
            config: ConfigStore::new(settings.registry.default_compatibility),
            settings,
        }
    }

    pub(crate) fn from_parts(
        store: SchemaStore,
        subjects: SubjectRegistry,
        config: ConfigStore,
        settings: RegistryConfig,
    ) -> Self {
        Self {
            store,
            subjects,
            config,
            settings,
        }
    }

    /// Open the snapshot at `path`, or start empty if it does not exist yet
    pub fn open(path: impl AsRef<Path>, settings: RegistryConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(Self::with_config(settings));
        }
        Snapshot::load(path)?.restore(settings)
    }

    /// Persist the full registry state to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        Snapshot::capture(self).save(path.as_ref())
    }

    pub fn settings(&self) -> &RegistryConfig {
        &self.settings
    }

    pub fn schema_store(&self) -> &SchemaStore {
        &self.store
    }

    pub fn subject_registry(&self) -> &SubjectRegistry {
        &self.subjects
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    /// Formats accepted for registration
    pub fn supported_formats(&self) -> Vec<SchemaFormat> {
        SchemaFormat::ALL
            .into_iter()
            .filter(|format| self.settings.is_enabled(*format))
            .collect()
    }

    fn parse_candidate(&self, format: SchemaFormat, raw: &str) -> Result<Schema> {
        if !self.settings.is_enabled(format) {
            return Err(SchemaError::UnsupportedFormat(format.to_string()));
        }
        Schema::new(format, raw)
    }

    /// Register `raw` under `subject`.
    ///
    /// Re-submitting the content of the latest live version returns that
    /// version unchanged. Otherwise the candidate is checked against the
    /// subject's history and appended with a conditional commit, which is
    /// also where its id gets allocated. A commit that loses a race re-reads
    /// the history and starts over.
    pub fn register(&self, subject: &str, format: SchemaFormat, raw: &str) -> Result<Registration> {
        let candidate = self.parse_candidate(format, raw)?;
        self.register_from(subject, &candidate, |subject| self.subjects.snapshot(subject))
    }

    /// The registration loop, reading the subject's history through `read`
    /// at the start of every attempt.
    pub(crate) fn register_from<F>(&self, subject: &str, candidate: &Schema, mut read: F) -> Result<Registration>
    where
        F: FnMut(&str) -> Option<Arc<SubjectLog>>,
    {
        let attempts = self.settings.registry.max_write_retries.max(1);

        for attempt in 1..=attempts {
            let log = read(subject);
            let revision = log.as_ref().map(|log| log.revision());

            if let Some(latest) = log.as_deref().and_then(SubjectLog::latest_live) {
                if self.store.find(candidate) == Some(latest.schema_id) {
                    debug!(subject, id = latest.schema_id, version = latest.version, "schema already registered");
                    return Ok(Registration {
                        id: latest.schema_id,
                        version: latest.version,
                    });
                }
            }

            let mode = self.config.effective(subject);
            let history = match &log {
                Some(log) => self.live_history(log)?,
                None => Vec::new(),
            };
            let verdict = CompatibilityChecker::new(mode).check(candidate.parsed(), &history);
            if !verdict.is_compatible {
                info!(subject, %mode, reason = %verdict.reason(), "rejected incompatible schema");
                return Err(SchemaError::IncompatibleSchema {
                    subject: subject.to_string(),
                    reason: verdict.reason(),
                });
            }

            match self.subjects.commit_append(subject, revision, candidate, &self.store) {
                CommitOutcome::Committed { id, version } => {
                    info!(subject, id, version, "registered schema");
                    return Ok(Registration { id, version });
                }
                CommitOutcome::Stale => {
                    warn!(subject, attempt, "subject history changed during registration, retrying");
                }
            }
        }

        warn!(subject, attempts, "giving up registration after repeated write conflicts");
        Err(SchemaError::Conflict {
            subject: subject.to_string(),
            attempts,
        })
    }

    fn live_history(&self, log: &SubjectLog) -> Result<Vec<VersionedSchema>> {
        log.live()
            .map(|row| {
                let schema = self
                    .store
                    .get(row.schema_id)
                    .ok_or(SchemaError::SchemaNotFound { id: row.schema_id })?;
                Ok(VersionedSchema {
                    version: row.version,
                    schema: schema.parsed().clone(),
                })
            })
            .collect()
    }

    /// Check `raw` against an existing version without registering it.
    ///
    /// An explicit version is compared on its own; "latest" compares against
    /// whatever the subject's mode would compare a registration against.
    pub fn check_compatibility(
        &self,
        subject: &str,
        selector: VersionSelector,
        format: SchemaFormat,
        raw: &str,
    ) -> Result<CompatibilityResult> {
        let candidate = self.parse_candidate(format, raw)?;
        let log = self
            .subjects
            .snapshot(subject)
            .filter(|log| log.has_live())
            .ok_or_else(|| SchemaError::SubjectNotFound {
                subject: subject.to_string(),
            })?;

        let history = match selector {
            VersionSelector::Latest => self.live_history(&log)?,
            VersionSelector::Number(_) => {
                let row = self.subjects.get_version(subject, selector)?;
                let schema = self
                    .store
                    .get(row.schema_id)
                    .ok_or(SchemaError::SchemaNotFound { id: row.schema_id })?;
                vec![VersionedSchema {
                    version: row.version,
                    schema: schema.parsed().clone(),
                }]
            }
        };

        let mode = self.config.effective(subject);
        Ok(CompatibilityChecker::new(mode).check(candidate.parsed(), &history))
    }

    /// Subjects with live versions (or any non-purged version)
    pub fn list_subjects(&self, include_deleted: bool) -> Vec<String> {
        self.subjects.subjects(include_deleted)
    }

    pub fn list_versions(&self, subject: &str, include_deleted: bool) -> Result<Vec<VersionNumber>> {
        self.subjects.versions(subject, include_deleted)
    }

    pub fn get_version(&self, subject: &str, selector: VersionSelector) -> Result<SubjectSchema> {
        let row = self.subjects.get_version(subject, selector)?;
        self.with_schema(row)
    }

    pub fn get_version_including_deleted(&self, subject: &str, selector: VersionSelector) -> Result<SubjectSchema> {
        let row = self.subjects.get_version_including_deleted(subject, selector)?;
        self.with_schema(row)
    }

    fn with_schema(&self, row: SubjectVersion) -> Result<SubjectSchema> {
        let schema = self
            .store
            .get(row.schema_id)
            .ok_or(SchemaError::SchemaNotFound { id: row.schema_id })?;
        Ok(SubjectSchema {
            deleted: row.is_deleted(),
            subject: row.subject,
            version: row.version,
            id: row.schema_id,
            schema,
        })
    }

    /// Schema content by global id
    pub fn get_schema(&self, id: SchemaId) -> Result<Arc<Schema>> {
        self.store.lookup_by_id(id)
    }

    /// Find the version of `subject` whose content matches `raw`
    pub fn lookup_schema(
        &self,
        subject: &str,
        format: SchemaFormat,
        raw: &str,
        include_deleted: bool,
    ) -> Result<SubjectSchema> {
        let candidate = Schema::new(format, raw)?;
        let log = self.subjects.snapshot(subject).ok_or_else(|| SchemaError::SubjectNotFound {
            subject: subject.to_string(),
        })?;
        let id = self.store.find(&candidate);
        let row = id.and_then(|id| {
            log.rows()
                .iter()
                .rev()
                .find(|row| row.schema_id == id && (include_deleted || !row.is_deleted()))
                .cloned()
        });
        match row {
            Some(row) => self.with_schema(row),
            None => Err(SchemaError::SchemaNotRegistered {
                subject: subject.to_string(),
            }),
        }
    }

    /// Subjects that reference `id` through a non-purged version
    pub fn subjects_for_id(&self, id: SchemaId) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = self.versions_for_id(id)?.into_iter().map(|(s, _)| s).collect();
        subjects.dedup();
        Ok(subjects)
    }

    pub fn versions_for_id(&self, id: SchemaId) -> Result<Vec<(String, VersionNumber)>> {
        self.store.lookup_by_id(id)?;
        Ok(self.subjects.referencing(id))
    }

    /// Soft-delete every live version of a subject
    pub fn delete_subject(&self, subject: &str) -> Result<Vec<VersionNumber>> {
        let versions = self.subjects.soft_delete(subject)?;
        info!(subject, ?versions, "soft deleted subject");
        Ok(versions)
    }

    /// Erase a subject that was soft-deleted first
    pub fn delete_subject_permanent(&self, subject: &str) -> Result<Vec<VersionNumber>> {
        let versions = self.subjects.permanent_delete(subject, &self.store)?;
        info!(subject, ?versions, "permanently deleted subject");
        Ok(versions)
    }

    pub fn delete_version(&self, subject: &str, selector: VersionSelector) -> Result<VersionNumber> {
        let version = self.subjects.soft_delete_version(subject, selector)?;
        info!(subject, version, "soft deleted version");
        Ok(version)
    }

    /// Erase a version that was soft-deleted first
    pub fn delete_version_permanent(&self, subject: &str, selector: VersionSelector) -> Result<VersionNumber> {
        let version = self.subjects.permanent_delete_version(subject, selector, &self.store)?;
        info!(subject, version, "permanently deleted version");
        Ok(version)
    }

    pub fn get_global_config(&self) -> CompatibilityMode {
        self.config.get_global()
    }

    pub fn set_global_config(&self, mode: CompatibilityMode) -> CompatibilityMode {
        self.config.set_global(mode);
        info!(%mode, "set global compatibility");
        mode
    }

    /// A subject's compatibility mode.
    ///
    /// With `default_to_global`, a registered subject without an override
    /// reports the global mode and an unknown subject is not found. Without
    /// it, only an explicit override is reported.
    pub fn get_subject_config(&self, subject: &str, default_to_global: bool) -> Result<CompatibilityMode> {
        if let Some(mode) = self.config.subject_override(subject) {
            return Ok(mode);
        }
        if !default_to_global {
            return Err(SchemaError::SubjectConfigNotFound {
                subject: subject.to_string(),
            });
        }
        if self.subjects.exists(subject) {
            Ok(self.config.get_global())
        } else {
            Err(SchemaError::SubjectNotFound {
                subject: subject.to_string(),
            })
        }
    }

    pub fn set_subject_config(&self, subject: &str, mode: CompatibilityMode) -> CompatibilityMode {
        self.config.set_subject(subject, mode);
        info!(subject, %mode, "set subject compatibility");
        mode
    }

    /// Remove a subject's override, returning the mode it had
    pub fn delete_subject_config(&self, subject: &str) -> Result<CompatibilityMode> {
        self.config
            .delete_subject(subject)
            .ok_or_else(|| SchemaError::SubjectConfigNotFound {
                subject: subject.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA1: &str = r#"{"type":"record","name":"myrecord","fields":[{"type":"string","name":"f1"}]}"#;
    const SCHEMA2: &str = r#"{"type":"record","name":"myrecord","fields":[{"type":"string","name":"f1"},{"type":"string","name":"f2","default":"foo"}]}"#;
    const SCHEMA3: &str = r#"{"type":"record","name":"myrecord","fields":[{"type":"string","name":"f1"},{"type":"string","name":"f2"}]}"#;

    #[test]
    fn test_register_and_reregister() {
        let registry = SchemaRegistry::new();
        let first = registry.register("t-key", SchemaFormat::Avro, SCHEMA1).unwrap();
        assert_eq!(first, Registration { id: 1, version: 1 });

        let again = registry.register("t-key", SchemaFormat::Avro, SCHEMA1).unwrap();
        assert_eq!(again, first);
        assert_eq!(registry.list_versions("t-key", false).unwrap(), vec![1]);

        let value = registry.register("t-value", SchemaFormat::Avro, SCHEMA1).unwrap();
        assert_eq!(value, Registration { id: 1, version: 1 });
    }

    #[test]
    fn test_incompatible_registration_mutates_nothing() {
        let registry = SchemaRegistry::new();
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        registry.set_subject_config("s", CompatibilityMode::Backward);

        let err = registry.register("s", SchemaFormat::Avro, SCHEMA3).unwrap_err();
        match &err {
            SchemaError::IncompatibleSchema { reason, .. } => assert!(reason.contains("f2"), "{}", reason),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.error_code(), 409);
        assert_eq!(registry.list_versions("s", false).unwrap(), vec![1]);
        assert_eq!(registry.schema_store().len(), 1);

        let ok = registry.register("s", SchemaFormat::Avro, SCHEMA2).unwrap();
        assert_eq!(ok, Registration { id: 2, version: 2 });
    }

    #[test]
    fn test_disabled_format_is_rejected() {
        let mut settings = RegistryConfig::default();
        settings.formats.enabled = vec![SchemaFormat::Avro];
        let registry = SchemaRegistry::with_config(settings);
        assert_eq!(registry.supported_formats(), vec![SchemaFormat::Avro]);
        let err = registry.register("s", SchemaFormat::Json, r#"{"type":"string"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_resubmission_after_latest_soft_delete_creates_new_version() {
        let registry = SchemaRegistry::new();
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        registry.register("s", SchemaFormat::Avro, SCHEMA2).unwrap();
        registry.delete_version("s", VersionSelector::Number(2)).unwrap();

        let again = registry.register("s", SchemaFormat::Avro, SCHEMA2).unwrap();
        assert_eq!(again, Registration { id: 2, version: 3 });
    }

    #[test]
    fn test_subject_config_fallback() {
        let registry = SchemaRegistry::new();
        registry.set_global_config(CompatibilityMode::Full);
        assert!(matches!(
            registry.get_subject_config("invalid_subject", true),
            Err(SchemaError::SubjectNotFound { .. })
        ));

        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        assert_eq!(registry.get_subject_config("s", true).unwrap(), CompatibilityMode::Full);
        assert!(matches!(
            registry.get_subject_config("s", false),
            Err(SchemaError::SubjectConfigNotFound { .. })
        ));

        registry.set_subject_config("s", CompatibilityMode::BackwardTransitive);
        assert_eq!(registry.get_subject_config("s", true).unwrap(), CompatibilityMode::BackwardTransitive);
        assert_eq!(registry.delete_subject_config("s").unwrap(), CompatibilityMode::BackwardTransitive);
        assert!(registry.delete_subject_config("s").is_err());
    }

    #[test]
    fn test_lookup_schema() {
        let registry = SchemaRegistry::new();
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        registry.register("s", SchemaFormat::Avro, SCHEMA2).unwrap();

        let found = registry.lookup_schema("s", SchemaFormat::Avro, SCHEMA1, false).unwrap();
        assert_eq!((found.id, found.version), (1, 1));

        registry.delete_version("s", VersionSelector::Number(1)).unwrap();
        assert!(registry.lookup_schema("s", SchemaFormat::Avro, SCHEMA1, false).is_err());
        assert!(registry.lookup_schema("s", SchemaFormat::Avro, SCHEMA1, true).unwrap().deleted);
        let err = registry.lookup_schema("s", SchemaFormat::Avro, SCHEMA3, false).unwrap_err();
        assert!(matches!(err, SchemaError::SchemaNotRegistered { .. }));
        assert_eq!(err.to_string(), "Schema not found under subject 's'");
        assert_eq!(err.error_code(), 40403);
    }

    fn retries(max_write_retries: u32) -> SchemaRegistry {
        let mut settings = RegistryConfig::default();
        settings.registry.max_write_retries = max_write_retries;
        SchemaRegistry::with_config(settings)
    }

    #[test]
    fn test_exhausted_retries_surface_conflict() {
        let registry = retries(1);
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        let candidate = Schema::new(SchemaFormat::Avro, SCHEMA2).unwrap();

        // A rival commit lands between every read and the commit that follows it.
        let err = registry
            .register_from("s", &candidate, |subject| {
                let log = registry.subject_registry().snapshot(subject);
                registry.delete_version(subject, VersionSelector::Latest).unwrap();
                registry.register(subject, SchemaFormat::Avro, SCHEMA1).unwrap();
                log
            })
            .unwrap_err();

        assert!(matches!(err, SchemaError::Conflict { attempts: 1, .. }));
        assert_eq!(err.error_code(), 50301);
        assert_eq!(err.http_status(), 503);
        assert_eq!(registry.list_versions("s", true).unwrap(), vec![1, 2]);
        assert_eq!(registry.schema_store().find(&candidate), None);
        assert_eq!(registry.schema_store().next_id(), 2);
    }

    #[test]
    fn test_lost_race_then_rejection_allocates_nothing() {
        let registry = retries(4);
        registry.set_global_config(CompatibilityMode::Backward);
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();

        // Compatible with version 1, but not with the rival that beats it.
        let candidate = Schema::new(SchemaFormat::Avro, SCHEMA2).unwrap();
        let rival = r#"{"type":"record","name":"myrecord","fields":[{"type":"string","name":"f1"},{"type":"int","name":"f2","default":0}]}"#;

        let mut reads = 0;
        let err = registry
            .register_from("s", &candidate, |subject| {
                let log = registry.subject_registry().snapshot(subject);
                reads += 1;
                if reads == 1 {
                    registry.register(subject, SchemaFormat::Avro, rival).unwrap();
                }
                log
            })
            .unwrap_err();

        assert!(matches!(err, SchemaError::IncompatibleSchema { .. }), "{:?}", err);
        assert_eq!(reads, 2);
        assert_eq!(registry.list_versions("s", false).unwrap(), vec![1, 2]);
        assert_eq!(registry.schema_store().find(&candidate), None);
        assert_eq!(registry.schema_store().next_id(), 3);
    }

    #[test]
    fn test_lost_race_is_retried() {
        let registry = retries(4);
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        let candidate = Schema::new(SchemaFormat::Avro, SCHEMA2).unwrap();

        let mut reads = 0;
        let registration = registry
            .register_from("s", &candidate, |subject| {
                let log = registry.subject_registry().snapshot(subject);
                reads += 1;
                if reads == 1 {
                    registry.register(subject, SchemaFormat::Avro, SCHEMA3).unwrap();
                }
                log
            })
            .unwrap();

        assert_eq!(registration, Registration { id: 3, version: 3 });
        assert_eq!(reads, 2);
    }

    #[test]
    fn test_check_compatibility_on_unknown_subject_and_version() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.check_compatibility("s", VersionSelector::Latest, SchemaFormat::Avro, SCHEMA1),
            Err(SchemaError::SubjectNotFound { .. })
        ));
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        assert!(matches!(
            registry.check_compatibility("s", VersionSelector::Number(4), SchemaFormat::Avro, SCHEMA2),
            Err(SchemaError::VersionNotFound { .. })
        ));
    }
}
