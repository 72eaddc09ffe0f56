//! Schema Registry
//!
//! An in-memory schema registry with compatibility enforcement for Avro and
//! JSON Schema documents.
//!
//! ## Features
//!
//! - **Content Addressing**: identical schemas share one global id, however
//!   they are formatted
//! - **Subject Histories**: append-only version lists with soft and permanent
//!   deletion
//! - **Compatibility Checking**: backward, forward and full modes, optionally
//!   transitive, enforced on every registration
//! - **Concurrent Writers**: registrations race through a conditional commit
//!   instead of a registry-wide lock
//! - **Snapshots**: the whole registry persists to a single JSON file
//!
//! ## Architecture
//!
//! ```text
//! SchemaRegistry
//! ├── SchemaStore      canonical content → id, reference counts
//! ├── SubjectRegistry  subject → Arc<SubjectLog>
//! ├── ConfigStore      global mode + per-subject overrides
//! └── CompatibilityChecker
//!     ├── avro         Avro schema resolution
//!     └── json_schema  JSON Schema structural resolution
//! ```

pub mod api;
pub mod avro;
pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod config_store;
pub mod error;
pub mod json_schema;
pub mod registry;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod subject;
pub mod version;

pub use checksum::Checksum;
pub use compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityResult};
pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::{Registration, SchemaRegistry, SubjectSchema};
pub use schema::{ParsedSchema, Schema, SchemaFormat};
pub use snapshot::Snapshot;
pub use store::{SchemaId, SchemaStore};
pub use version::{SubjectVersion, VersionNumber, VersionSelector};
