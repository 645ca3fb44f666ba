//! End-to-end migration tests
//!
//! Runs the full orchestrator against two in-memory registries.

use std::sync::atomic::Ordering;

use schema_registry_migrator::client::{Call, Operation};
use schema_registry_migrator::mode::Phase;
use schema_registry_migrator::{
    Compatibility, CompatibilitySetting, InMemoryRegistry, MigrationError, MigrationReport,
    MigrationSettings, Migrator, Mode, RegistryClient, RegistryError, SchemaType, SchemaVersion,
    UnitStatus,
};

/// Avro record with field `a` plus `extra` optional string fields
fn order_schema(extra: usize) -> String {
    let mut fields = vec![r#"{"name":"a","type":"int"}"#.to_string()];
    for i in 0..extra {
        fields.push(format!(r#"{{"name":"f{}","type":"string","default":""}}"#, i));
    }
    format!(r#"{{"type":"record","name":"Order","fields":[{}]}}"#, fields.join(","))
}

/// `a` changed to a string: incompatible with every `order_schema`
fn broken_order_schema() -> String {
    r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"string"}]}"#.to_string()
}

fn execute() -> MigrationSettings {
    MigrationSettings {
        enabled: true,
        dry_run: false,
        ..MigrationSettings::default()
    }
}

fn migrate(source: &InMemoryRegistry, destination: &InMemoryRegistry, settings: MigrationSettings) -> MigrationReport {
    Migrator::new(source, destination, settings).run().unwrap()
}

fn registered_schemas(registry: &InMemoryRegistry) -> Vec<String> {
    registry
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Register { schema, .. } => Some(schema),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Ordering and idempotence
// =============================================================================

#[test]
fn test_versions_registered_in_ascending_order() {
    let source = InMemoryRegistry::new("src");
    // Listed by the source as 2, 1, 3
    source.seed(SchemaVersion::new("orders", 2, 11, SchemaType::Avro, order_schema(1)));
    source.seed(SchemaVersion::new("orders", 1, 10, SchemaType::Avro, order_schema(0)));
    source.seed(SchemaVersion::new("orders", 3, 12, SchemaType::Avro, order_schema(2)));
    assert_eq!(source.list_versions("orders").unwrap(), vec![2, 1, 3]);

    let destination = InMemoryRegistry::new("dst");
    let report = migrate(&source, &destination, execute());

    assert_eq!(report.total_migrated(), 3);
    assert_eq!(
        registered_schemas(&destination),
        vec![order_schema(0), order_schema(1), order_schema(2)]
    );
}

#[test]
fn test_second_run_migrates_nothing() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str()), (11, order_schema(1).as_str())]);
    source.seed_subject("payments", &[(12, r#""string""#)]);
    let destination = InMemoryRegistry::new("dst");

    let first = migrate(&source, &destination, execute());
    assert_eq!(first.total_migrated(), 3);

    destination.clear_calls();
    let second = migrate(&source, &destination, execute());
    assert_eq!(second.total_migrated(), 0);
    assert_eq!(second.total_skipped(), 3);
    assert!(registered_schemas(&destination).is_empty());
    assert!(second.missing.is_empty());
}

// =============================================================================
// ID preservation
// =============================================================================

#[test]
fn test_empty_subject_keeps_source_ids() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str()), (11, order_schema(1).as_str())]);
    let destination = InMemoryRegistry::new("dst");

    let settings = MigrationSettings {
        preserve_ids: true,
        ..execute()
    };
    let report = migrate(&source, &destination, settings);

    let ids: Vec<(u32, u32)> = destination
        .versions_of("orders")
        .iter()
        .map(|v| (v.version, v.id))
        .collect();
    assert_eq!(ids, vec![(1, 10), (2, 11)]);
    assert_eq!(destination.get_mode("orders").unwrap(), Mode::ReadWrite);
    assert_eq!(destination.subject_mode("orders"), None);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_every_eligible_unit_keeps_its_id() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str()), (11, order_schema(1).as_str())]);
    source.seed_subject("payments", &[(20, r#""string""#)]);
    let destination = InMemoryRegistry::new("dst");
    // payments already has versions, so it is not eligible
    destination.seed_subject("payments", &[(3, r#""int""#)]);
    destination.set_compatibility("payments", Compatibility::None).unwrap();

    let settings = MigrationSettings {
        preserve_ids: true,
        ..execute()
    };
    let report = migrate(&source, &destination, settings);

    for unit in report.units.iter().filter(|u| u.subject() == "orders") {
        assert_eq!(unit.status, UnitStatus::Migrated);
        assert_eq!(unit.destination_id, Some(unit.schema.id));
    }
    let payments = report.units.iter().find(|u| u.subject() == "payments").unwrap();
    assert_eq!(payments.status, UnitStatus::Migrated);
    assert_ne!(payments.destination_id, Some(20));
}

// =============================================================================
// Modes
// =============================================================================

#[test]
fn test_read_only_subject_mode_is_restored() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str()), (11, order_schema(1).as_str())]);
    let destination = InMemoryRegistry::new("dst");
    destination.seed_subject("orders", &[(10, order_schema(0).as_str())]);
    destination.set_mode("orders", Mode::ReadOnly).unwrap();

    let report = migrate(&source, &destination, execute());

    assert_eq!(report.total_migrated(), 1);
    assert_eq!(destination.subject_mode("orders"), Some(Mode::ReadOnly));
    assert!(report.warnings.is_empty());
}

#[test]
fn test_failed_mode_restore_is_reported() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str())]);
    let destination = InMemoryRegistry::new("dst");
    destination.set_global_mode(Mode::ReadOnly).unwrap();
    // orders inherits READONLY, so the restore removes its override
    destination.fail_next(
        Operation::DeleteMode,
        Some("orders"),
        RegistryError::Transport("connection reset".to_string()),
    );

    let report = migrate(&source, &destination, execute());

    assert_eq!(report.total_migrated(), 1);
    assert_eq!(report.warnings.len(), 1);
    let warning = &report.warnings[0];
    assert_eq!(warning.scope, "orders");
    assert_eq!(warning.phase, Phase::Restore);
    assert!(report.has_problems());
    assert!(report.to_string().contains("Unrestored registry state (1)"));
}

// =============================================================================
// Collision gating
// =============================================================================

#[test]
fn test_collision_blocks_every_registration() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str())]);
    source.seed_subject("payments", &[(30, r#""string""#)]);
    let destination = InMemoryRegistry::new("dst");
    destination.seed_subject("legacy", &[(10, r#""bytes""#)]);

    let result = Migrator::new(&source, &destination, execute()).run();

    assert!(matches!(result, Err(MigrationError::Precondition { count: 1 })));
    assert!(registered_schemas(&destination).is_empty());
    assert!(destination.calls().iter().all(|c| !c.is_write()));
}

#[test]
fn test_collision_without_migration_is_only_reported() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str())]);
    let destination = InMemoryRegistry::new("dst");
    destination.seed_subject("legacy", &[(10, r#""bytes""#)]);

    let report = migrate(&source, &destination, MigrationSettings::default());
    assert_eq!(report.comparison.collisions.len(), 1);
    assert!(report.to_string().contains("id 10: source orders/v1 vs destination legacy/v1"));
}

// =============================================================================
// Compatibility retry
// =============================================================================

/// Source and destination agree on versions 1-8 and disagree on version 9
fn diverging_registries() -> (InMemoryRegistry, InMemoryRegistry) {
    let source = InMemoryRegistry::new("src");
    let destination = InMemoryRegistry::new("dst");
    for version in 1..=8u32 {
        let schema = order_schema(version as usize - 1);
        source.seed(SchemaVersion::new("orders", version, version, SchemaType::Avro, schema.clone()));
        destination.seed(SchemaVersion::new("orders", version, version, SchemaType::Avro, schema));
    }
    source.seed(SchemaVersion::new("orders", 9, 109, SchemaType::Avro, broken_order_schema()));
    destination.seed(SchemaVersion::new("orders", 9, 9, SchemaType::Avro, order_schema(8)));
    (source, destination)
}

#[test]
fn test_conflict_is_retried_and_explicit_compatibility_restored() {
    let (source, destination) = diverging_registries();
    destination.set_compatibility("orders", Compatibility::Full).unwrap();

    let settings = MigrationSettings {
        auto_compatibility: true,
        ..execute()
    };
    let report = migrate(&source, &destination, settings);

    assert_eq!(report.total_skipped(), 8);
    let v9 = report.units.iter().find(|u| u.version() == 9).unwrap();
    assert_eq!(v9.status, UnitStatus::RetriedMigrated);
    assert!(v9.diff.is_some());
    assert_eq!(
        destination.get_compatibility("orders").unwrap(),
        CompatibilitySetting::Explicit(Compatibility::Full)
    );
    assert!(destination
        .calls()
        .contains(&Call::SetCompatibility("orders".to_string(), Compatibility::None)));
    assert!(report.missing.is_empty());
}

#[test]
fn test_inherited_compatibility_restored_by_removing_override() {
    let (source, destination) = diverging_registries();

    let settings = MigrationSettings {
        auto_compatibility: true,
        ..execute()
    };
    let report = migrate(&source, &destination, settings);

    assert_eq!(report.count(UnitStatus::RetriedMigrated), 1);
    assert_eq!(destination.subject_compatibility("orders"), None);
    assert_eq!(
        destination.get_compatibility("orders").unwrap(),
        CompatibilitySetting::InheritsGlobal
    );
}

#[test]
fn test_conflict_without_auto_compatibility_fails() {
    let (source, destination) = diverging_registries();

    let report = migrate(&source, &destination, execute());

    let v9 = report.units.iter().find(|u| u.version() == 9).unwrap();
    assert_eq!(v9.status, UnitStatus::OtherFailure);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].diff.is_some());
    assert!(!destination.calls().iter().any(|c| matches!(c, Call::SetCompatibility(..))));
    assert_eq!(report.missing.len(), 1);
}

#[test]
fn test_later_versions_continue_past_a_conflict() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject(
        "orders",
        &[
            (10, order_schema(0).as_str()),
            (11, broken_order_schema().as_str()),
            (12, order_schema(1).as_str()),
        ],
    );
    let destination = InMemoryRegistry::new("dst");

    let settings = MigrationSettings {
        auto_compatibility: true,
        ..execute()
    };
    let report = migrate(&source, &destination, settings);

    let statuses: Vec<UnitStatus> = report.units.iter().map(|u| u.status).collect();
    assert_eq!(
        statuses,
        vec![UnitStatus::Migrated, UnitStatus::RetriedMigrated, UnitStatus::Migrated]
    );
    // Version 3 lands during the first pass, the retried version 2 after it
    assert_eq!(
        registered_schemas(&destination),
        vec![order_schema(0), order_schema(1), broken_order_schema()]
    );
    let latest = destination.versions_of("orders").last().map(|v| v.schema.clone());
    assert_eq!(latest, Some(broken_order_schema()));
}

// =============================================================================
// Dry run and cancellation
// =============================================================================

#[test]
fn test_dry_run_writes_nothing() {
    let (source, destination) = diverging_registries();
    source.seed_subject("payments", &[(40, r#""string""#)]);

    let settings = MigrationSettings {
        enabled: true,
        dry_run: true,
        preserve_ids: true,
        auto_compatibility: true,
        global_import_mode: true,
        mode_after_migration: Some(Mode::ReadOnly),
        ..MigrationSettings::default()
    };
    let report = migrate(&source, &destination, settings);

    assert!(destination.calls().iter().all(|c| !c.is_write()));
    assert_eq!(report.count(UnitStatus::NotStarted), 2);
    let details: Vec<&str> = report
        .units
        .iter()
        .filter_map(|u| u.detail.as_deref())
        .collect();
    assert_eq!(details, vec!["would be rejected as incompatible", "would register"]);
}

#[test]
fn test_cancelled_run_leaves_units_not_started() {
    let source = InMemoryRegistry::new("src");
    source.seed_subject("orders", &[(10, order_schema(0).as_str()), (11, order_schema(1).as_str())]);
    let destination = InMemoryRegistry::new("dst");

    let migrator = Migrator::new(&source, &destination, execute());
    migrator.abort_handle().store(true, Ordering::SeqCst);
    let report = migrator.run().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.count(UnitStatus::NotStarted), 2);
    assert!(registered_schemas(&destination).is_empty());
}
