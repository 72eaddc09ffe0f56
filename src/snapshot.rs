//! Snapshot persistence
//!
//! The whole registry serialized as one JSON document. Schema content is
//! re-parsed and its checksum verified on load, so a hand-edited or truncated
//! snapshot fails loudly instead of producing a registry with bad ids.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::compatibility::CompatibilityMode;
use crate::config::RegistryConfig;
use crate::config_store::ConfigStore;
use crate::error::{Result, SchemaError};
use crate::registry::SchemaRegistry;
use crate::schema::{Schema, SchemaFormat};
use crate::store::{SchemaId, SchemaStore};
use crate::subject::SubjectRegistry;
use crate::version::{SubjectVersion, VersionNumber, VersionState};

/// Layout version of the snapshot document
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub next_schema_id: SchemaId,
    pub schemas: Vec<SchemaRecord>,
    pub subjects: Vec<SubjectRecord>,
    pub config: ConfigRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: SchemaId,
    #[serde(default)]
    pub format: SchemaFormat,
    pub schema: String,
    pub checksum: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub subject: String,
    pub next_version: VersionNumber,
    pub versions: Vec<VersionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: VersionNumber,
    pub schema_id: SchemaId,
    #[serde(default)]
    pub deleted: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub compatibility_level: CompatibilityMode,
    #[serde(default)]
    pub overrides: BTreeMap<String, CompatibilityMode>,
}

impl Snapshot {
    /// Capture the registry's current state
    pub fn capture(registry: &SchemaRegistry) -> Self {
        // Subjects first: schemas only ever grow, so every id a captured
        // version points at is guaranteed to be in the captured schema list.
        let subjects = registry
            .subject_registry()
            .entries()
            .into_iter()
            .map(|(subject, log)| SubjectRecord {
                subject,
                next_version: log.next_version(),
                versions: log
                    .rows()
                    .iter()
                    .map(|row| VersionRecord {
                        version: row.version,
                        schema_id: row.schema_id,
                        deleted: row.is_deleted(),
                        registered_at: row.registered_at,
                    })
                    .collect(),
            })
            .collect();

        let store = registry.schema_store();
        let schemas = store
            .entries()
            .into_iter()
            .map(|entry| SchemaRecord {
                id: entry.id,
                format: entry.schema.format(),
                schema: entry.schema.raw().to_string(),
                checksum: entry.schema.checksum().to_string(),
                registered_at: entry.registered_at,
            })
            .collect();

        let config = registry.config_store();
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            next_schema_id: store.next_id(),
            schemas,
            subjects,
            config: ConfigRecord {
                compatibility_level: config.get_global(),
                overrides: config.overrides().into_iter().collect(),
            },
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SchemaError::Snapshot(format!(
                "unsupported snapshot format version {}",
                snapshot.format_version
            )));
        }
        debug!(
            path = %path.display(),
            schemas = snapshot.schemas.len(),
            subjects = snapshot.subjects.len(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Write the snapshot next to `path` and move it into place
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, path)?;
        info!(path = %path.display(), schemas = self.schemas.len(), "saved snapshot");
        Ok(())
    }

    /// Rebuild a registry from this snapshot
    pub fn restore(self, settings: RegistryConfig) -> Result<SchemaRegistry> {
        let mut entries = Vec::with_capacity(self.schemas.len());
        for record in self.schemas {
            let schema = Schema::new(record.format, record.schema)
                .map_err(|e| SchemaError::Snapshot(format!("schema {}: {}", record.id, e)))?;
            if !Checksum::from(record.checksum).verify(schema.canonical()) {
                return Err(SchemaError::Snapshot(format!(
                    "checksum mismatch for schema {}",
                    record.id
                )));
            }
            entries.push((record.id, schema, record.registered_at));
        }
        let store = SchemaStore::restore(entries, self.next_schema_id)?;

        let histories = self
            .subjects
            .into_iter()
            .map(|record| {
                let rows = record
                    .versions
                    .into_iter()
                    .map(|version| SubjectVersion {
                        subject: record.subject.clone(),
                        version: version.version,
                        schema_id: version.schema_id,
                        state: if version.deleted {
                            VersionState::SoftDeleted
                        } else {
                            VersionState::Live
                        },
                        registered_at: version.registered_at,
                    })
                    .collect();
                (record.subject, record.next_version, rows)
            })
            .collect();
        let subjects = SubjectRegistry::restore(histories, &store)?;

        let config = ConfigStore::new(self.config.compatibility_level);
        for (subject, mode) in self.config.overrides {
            config.set_subject(&subject, mode);
        }

        Ok(SchemaRegistry::from_parts(store, subjects, config, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA1: &str = r#"{"type":"record","name":"myrecord","fields":[{"type":"string","name":"f1"}]}"#;

    fn populated() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry.register("s", SchemaFormat::Avro, SCHEMA1).unwrap();
        registry.register("j", SchemaFormat::Json, r#"{"type":"object"}"#).unwrap();
        registry.set_subject_config("s", CompatibilityMode::Full);
        registry
    }

    #[test]
    fn test_capture_and_restore() {
        let snapshot = Snapshot::capture(&populated());
        assert_eq!(snapshot.next_schema_id, 3);
        assert_eq!(snapshot.schemas.len(), 2);
        assert_eq!(snapshot.subjects.len(), 2);

        let restored = snapshot.restore(RegistryConfig::default()).unwrap();
        assert_eq!(restored.get_schema(1).unwrap().raw(), SCHEMA1);
        assert_eq!(restored.get_schema(2).unwrap().format(), SchemaFormat::Json);
        assert_eq!(restored.get_subject_config("s", false).unwrap(), CompatibilityMode::Full);
    }

    #[test]
    fn test_tampered_checksum_is_rejected() {
        let mut snapshot = Snapshot::capture(&populated());
        snapshot.schemas[0].checksum = "0".repeat(64);
        let err = snapshot.restore(RegistryConfig::default()).unwrap_err();
        assert!(matches!(err, SchemaError::Snapshot(_)));
    }

    #[test]
    fn test_dangling_schema_reference_is_rejected() {
        let mut snapshot = Snapshot::capture(&populated());
        snapshot.subjects[0].versions[0].schema_id = 42;
        assert!(matches!(
            snapshot.restore(RegistryConfig::default()),
            Err(SchemaError::Snapshot(_))
        ));
    }

    #[test]
    fn test_unknown_format_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut snapshot = Snapshot::capture(&populated());
        snapshot.format_version = 99;
        snapshot.save(&path).unwrap();
        assert!(matches!(Snapshot::load(&path), Err(SchemaError::Snapshot(_))));
    }
}
