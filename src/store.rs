//! Schema Store
//!
//! Content-addressed table from canonical schema content to a global id. Ids
//! are allocated from a monotonic counter and never reused. Deduplication and
//! allocation happen under the same write lock, so concurrent submissions of
//! identical content always agree on one id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Result, SchemaError};
use crate::schema::{ContentKey, Schema, SchemaFormat};

/// Global schema identifier
pub type SchemaId = u32;

/// A schema as held by the store
#[derive(Debug, Clone)]
pub struct StoredSchema {
    pub id: SchemaId,
    pub schema: Arc<Schema>,
    pub registered_at: DateTime<Utc>,
    /// Number of non-purged subject versions pointing at this id
    pub references: u32,
}

#[derive(Debug)]
struct SchemaTable {
    by_id: BTreeMap<SchemaId, StoredSchema>,
    by_content: HashMap<ContentKey, SchemaId>,
    next_id: SchemaId,
}

impl Default for SchemaTable {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_content: HashMap::new(),
            next_id: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct SchemaStore {
    table: RwLock<SchemaTable>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize `raw` and intern it
    pub fn intern(&self, format: SchemaFormat, raw: &str) -> Result<SchemaId> {
        let schema = Schema::new(format, raw)?;
        Ok(self.intern_schema(&schema))
    }

    /// Return the id for this content, allocating the next one if it is new.
    ///
    /// Existing content is returned untouched; the first submitted text stays
    /// the one echoed back by lookups.
    pub fn intern_schema(&self, schema: &Schema) -> SchemaId {
        let key = schema.content_key();
        if let Some(id) = self.table.read().by_content.get(&key) {
            return *id;
        }

        let mut table = self.table.write();
        // Another writer may have interned the same content in between.
        if let Some(id) = table.by_content.get(&key) {
            return *id;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.by_content.insert(key, id);
        table.by_id.insert(
            id,
            StoredSchema {
                id,
                schema: Arc::new(schema.clone()),
                registered_at: Utc::now(),
                references: 0,
            },
        );
        tracing::debug!(id, format = %schema.format(), "allocated schema id");
        id
    }

    /// Find the id already assigned to this content, if any
    pub fn find(&self, schema: &Schema) -> Option<SchemaId> {
        self.table.read().by_content.get(&schema.content_key()).copied()
    }

    /// Fetch a schema that is referenced by at least one non-purged version
    pub fn lookup_by_id(&self, id: SchemaId) -> Result<Arc<Schema>> {
        match self.table.read().by_id.get(&id) {
            Some(stored) if stored.references > 0 => Ok(stored.schema.clone()),
            _ => Err(SchemaError::SchemaNotFound { id }),
        }
    }

    /// Fetch a schema regardless of references
    pub(crate) fn get(&self, id: SchemaId) -> Option<Arc<Schema>> {
        self.table.read().by_id.get(&id).map(|stored| stored.schema.clone())
    }

    pub(crate) fn retain(&self, id: SchemaId) {
        if let Some(stored) = self.table.write().by_id.get_mut(&id) {
            stored.references += 1;
        }
    }

    pub(crate) fn release(&self, ids: &[SchemaId]) {
        let mut table = self.table.write();
        for id in ids {
            if let Some(stored) = table.by_id.get_mut(id) {
                stored.references = stored.references.saturating_sub(1);
            }
        }
    }

    /// The id the next new content will receive
    pub fn next_id(&self) -> SchemaId {
        self.table.read().next_id
    }

    pub fn len(&self) -> usize {
        self.table.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every interned schema in id order
    pub fn entries(&self) -> Vec<StoredSchema> {
        self.table.read().by_id.values().cloned().collect()
    }

    /// Rebuild a store from persisted entries. Reference counts start at zero
    /// and are restored by the caller from subject histories.
    pub(crate) fn restore(entries: Vec<(SchemaId, Schema, DateTime<Utc>)>, next_id: SchemaId) -> Result<Self> {
        let mut table = SchemaTable::default();
        for (id, schema, registered_at) in entries {
            if id == 0 || table.by_id.contains_key(&id) {
                return Err(SchemaError::Snapshot(format!("duplicate or invalid schema id {}", id)));
            }
            if table.by_content.insert(schema.content_key(), id).is_some() {
                return Err(SchemaError::Snapshot(format!("schema {} duplicates earlier content", id)));
            }
            table.by_id.insert(
                id,
                StoredSchema {
                    id,
                    schema: Arc::new(schema),
                    registered_at,
                    references: 0,
                },
            );
        }
        let highest = table.by_id.keys().next_back().copied().unwrap_or(0);
        table.next_id = next_id.max(highest + 1);
        Ok(Self {
            table: RwLock::new(table),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SCHEMA1: &str = r#"{"type":"record","name":"myrecord","fields":[{"type":"string","name":"f1"}]}"#;

    #[test]
    fn test_intern_is_idempotent() {
        let store = SchemaStore::new();
        let first = store.intern(SchemaFormat::Avro, SCHEMA1).unwrap();
        let again = store.intern(SchemaFormat::Avro, SCHEMA1).unwrap();
        let reformatted = store
            .intern(SchemaFormat::Avro, r#"{ "name": "myrecord", "type": "record", "fields": [{"name": "f1", "type": "string"}] }"#)
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(again, 1);
        assert_eq!(reformatted, 1);
        assert_eq!(store.next_id(), 2);
    }

    #[test]
    fn test_first_raw_text_is_kept() {
        let store = SchemaStore::new();
        let id = store.intern(SchemaFormat::Avro, SCHEMA1).unwrap();
        store.intern(SchemaFormat::Avro, &format!("  {}  ", SCHEMA1)).unwrap();
        store.retain(id);
        assert_eq!(store.lookup_by_id(id).unwrap().raw(), SCHEMA1);
    }

    #[test]
    fn test_unreferenced_ids_are_not_visible() {
        let store = SchemaStore::new();
        let id = store.intern(SchemaFormat::Avro, SCHEMA1).unwrap();
        assert!(matches!(store.lookup_by_id(id), Err(SchemaError::SchemaNotFound { id: 1 })));

        store.retain(id);
        assert!(store.lookup_by_id(id).is_ok());

        store.release(&[id]);
        assert!(store.lookup_by_id(id).is_err());
        // The id stays bound to its content.
        assert_eq!(store.intern(SchemaFormat::Avro, SCHEMA1).unwrap(), id);
        assert!(matches!(store.lookup_by_id(99), Err(SchemaError::SchemaNotFound { id: 99 })));
    }

    #[test]
    fn test_concurrent_identical_content_gets_one_id() {
        let store = Arc::new(SchemaStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.intern(SchemaFormat::Avro, SCHEMA1).unwrap())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_distinct_content_gets_distinct_ids() {
        let store = Arc::new(SchemaStore::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                thread::spawn(move || {
                    let raw = format!(r#"{{"type":"record","name":"r{}","fields":[]}}"#, n);
                    store.intern(SchemaFormat::Avro, &raw).unwrap()
                })
            })
            .collect();
        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }
}
