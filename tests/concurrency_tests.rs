//! Concurrency Tests
//!
//! Many writers against one registry, using std threads.

use std::collections::HashSet;
use std::thread;

use schema_registry::{RegistryConfig, SchemaError, SchemaFormat, SchemaRegistry, VersionSelector};

fn record(name: &str) -> String {
    format!(
        r#"{{"type":"record","name":"{}","fields":[{{"name":"f1","type":"string"}}]}}"#,
        name
    )
}

#[test]
fn test_distinct_subjects_get_distinct_ids() {
    const WORKERS: usize = 4;
    const SUBJECTS: usize = 16;
    let registry = SchemaRegistry::new();

    let results: Vec<Vec<schema_registry::Result<u32>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let registry = &registry;
                scope.spawn(move || {
                    (0..SUBJECTS)
                        .map(|n| {
                            let subject = format!("worker{}-subject{}", worker, n);
                            let raw = record(&format!("w{}_r{}", worker, n));
                            registry.register(&subject, SchemaFormat::Avro, &raw).map(|r| {
                                assert_eq!(r.version, 1);
                                r.id
                            })
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let ids: Vec<u32> = results.into_iter().flatten().map(|r| r.unwrap()).collect();
    let unique: HashSet<u32> = ids.iter().copied().collect();
    assert_eq!(ids.len(), WORKERS * SUBJECTS);
    assert_eq!(unique.len(), WORKERS * SUBJECTS);
    assert_eq!(unique, (1..=(WORKERS * SUBJECTS) as u32).collect());
    assert_eq!(registry.list_subjects(false).len(), WORKERS * SUBJECTS);
}

#[test]
fn test_identical_content_resolves_to_one_id() {
    let registry = SchemaRegistry::new();
    let raw = record("shared");

    let ids: Vec<u32> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = &registry;
                let raw = raw.as_str();
                scope.spawn(move || registry.register(&format!("s{}", n), SchemaFormat::Avro, raw).unwrap().id)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.iter().all(|id| *id == 1), "{:?}", ids);
    assert_eq!(registry.schema_store().len(), 1);
}

#[test]
fn test_same_subject_writers_never_share_a_version() {
    const WRITERS: usize = 8;
    let mut settings = RegistryConfig::default();
    settings.registry.max_write_retries = 64;
    let registry = SchemaRegistry::with_config(settings);

    let outcomes: Vec<schema_registry::Result<_>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|n| {
                let registry = &registry;
                scope.spawn(move || registry.register("hot", SchemaFormat::Avro, &record(&format!("r{}", n))))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut versions = HashSet::new();
    for outcome in outcomes {
        match outcome {
            Ok(registration) => assert!(versions.insert(registration.version)),
            Err(SchemaError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    let listed = registry.list_versions("hot", false).unwrap();
    assert_eq!(listed.len(), versions.len());
    assert_eq!(listed, (1..=listed.len() as u32).collect::<Vec<_>>());
    assert_eq!(versions, listed.into_iter().collect());
}

#[test]
fn test_readers_see_whole_appends() {
    const VERSIONS: usize = 32;
    let registry = SchemaRegistry::new();
    registry.register("s", SchemaFormat::Avro, &record("r0")).unwrap();

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for n in 1..VERSIONS {
                registry.register("s", SchemaFormat::Avro, &record(&format!("r{}", n))).unwrap();
            }
        });

        let reader = scope.spawn(|| {
            let mut last = 0;
            while last < VERSIONS {
                let versions = registry.list_versions("s", false).unwrap();
                assert_eq!(versions, (1..=versions.len() as u32).collect::<Vec<_>>());
                assert!(versions.len() >= last);
                let latest = registry.get_version("s", VersionSelector::Latest).unwrap();
                assert!(latest.version as usize >= versions.len());
                assert!(registry.get_schema(latest.id).is_ok());
                last = versions.len();
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
    });
}
