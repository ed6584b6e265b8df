//! Integration tests for planning and the migration pipeline.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use ferry_core::{
    Cardinality, FailedRecordAction, MigrationError, PlanError, RecordId, ResolutionStrategy,
};

#[test]
fn test_migrates_every_station() {
    let ctx = TestContext::new().register(StationMigration::default());

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert!(report.is_complete());
    assert_eq!(ctx.stations.ids(), ids(1..=6));
    assert_eq!(ctx.station(1).unwrap().region_name, "North");
    assert_eq!(ctx.station(2).unwrap().region_name, "South");
    assert_eq!(ctx.station(5).unwrap().name, "Station 5");

    let outcome = report.outcome("stations").unwrap();
    assert_eq!(outcome.migrated_records, 6);
    assert_eq!(outcome.unresolved_failures, 0);
    assert!(ctx.service.progress().is_migration_completed("stations"));
}

#[test]
fn test_transform_failure_is_recorded_and_others_proceed() {
    let ctx = TestContext::new().register(StationMigration {
        fail_transform_for: [2].into_iter().collect(),
        ..Default::default()
    });

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert!(!report.is_complete());
    assert_eq!(ctx.stations.ids(), ids([1, 3, 4, 5, 6]));

    let failed = ctx.service.progress().failed_records("stations");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, RecordId::Int(2));
    assert_eq!(failed[0].description, "station 2 (Station 2)");
    assert_eq!(failed[0].cause, "cannot transform station 2");
    assert_eq!(failed[0].effect, "REPORT_AND_PROCEED");
    assert_eq!(failed[0].action, FailedRecordAction::Retry);

    let outcome = report.outcome("stations").unwrap();
    assert_eq!(outcome.unresolved_failures, 1);
    assert_eq!(outcome.outstanding_failures, 1);
    assert!(!ctx.service.progress().is_migration_completed("stations"));
}

#[test]
fn test_exactly_one_violations() {
    let ctx = TestContext::with_data(
        vec![legacy(1, "N"), legacy(2, "X"), legacy(3, "D")],
        vec![
            region(1, "N", "North"),
            region(2, "D", "Delta East"),
            region(3, "D", "Delta West"),
        ],
    )
    .register(StationMigration::default());

    ctx.service.run_without_previous_progress().unwrap();

    assert_eq!(ctx.stations.ids(), ids([1]));
    let failed = ctx.service.progress().failed_records("stations");
    assert_eq!(failed.len(), 2);
    assert_eq!(
        failed[0].cause,
        "cardinality violation in stations (match with regions): required EXACTLY_ONE, found 0"
    );
    assert_eq!(
        failed[1].cause,
        "cardinality violation in stations (match with regions): required EXACTLY_ONE, found 2"
    );
}

#[test]
fn test_zero_or_more_collects_every_match() {
    let ctx = TestContext::with_data(
        vec![legacy(1, "D"), legacy(2, "X")],
        vec![region(1, "D", "Delta East"), region(2, "D", "Delta West")],
    )
    .register(StationMigration {
        region_cardinality: Cardinality::ZeroOrMore,
        batch_size: 1,
        ..Default::default()
    });

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert!(report.is_complete());
    assert_eq!(ctx.station(1).unwrap().region_name, "Delta East");
    assert_eq!(ctx.station(2).unwrap().region_name, "");
}

#[test]
fn test_transient_match_failures_are_retried() {
    let ctx = TestContext::new().register(StationMigration::default());
    ctx.regions.fail_next_page_reads(1);

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert!(report.is_complete());
    assert_eq!(ctx.stations.len(), 6);
    assert!(ctx.service.progress().failed_records("stations").is_empty());
}

#[test]
fn test_bisection_isolates_failing_lookups() {
    let ctx = TestContext::with_data(
        (1..=8).map(|id| legacy(id, if id == 2 || id == 5 { "X" } else { "N" })),
        vec![region(1, "N", "North"), region(2, "X", "Unreachable")],
    )
    .register(StationMigration {
        batch_size: 10,
        ..Default::default()
    });
    ctx.regions
        .fail_page_reads_for(ctx.regions.filter_eq("code", "X"));

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert_eq!(ctx.stations.ids(), ids([1, 3, 4, 6, 7, 8]));
    assert_eq!(ctx.failed_ids("stations"), ids([2, 5]));
    assert_eq!(report.outcome("stations").unwrap().unresolved_failures, 2);
}

#[test]
fn test_unresolved_duplicate_is_a_record_failure() {
    let migration = StationMigration::default();
    let handled = migration.duplicates_handled.clone();
    let ctx = TestContext::new().register(migration);
    ctx.stations.insert(Station {
        id: 4,
        name: "Already there".into(),
        region_name: "South".into(),
    });

    ctx.service.run_without_previous_progress().unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.failed_ids("stations"), ids([4]));
    assert!(ctx.service.progress().failed_records("stations")[0]
        .cause
        .starts_with("unresolved duplicate in stations for record 4"));
    assert_eq!(ctx.station(4).unwrap().name, "Already there");
}

#[test]
fn test_resolved_duplicate_counts_as_migrated() {
    let migration = StationMigration {
        replace_duplicates: true,
        ..Default::default()
    };
    let handled = migration.duplicates_handled.clone();
    let ctx = TestContext::new().register(migration);
    ctx.stations.insert(Station {
        id: 4,
        name: "Already there".into(),
        region_name: "South".into(),
    });

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert!(report.is_complete());
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(ctx.service.progress().migrated_ids("stations").contains(&RecordId::Int(4)));
}

#[test]
fn test_failing_save_is_recorded() {
    let ctx = TestContext::new().register(StationMigration::default());
    ctx.stations.fail_saves_for([RecordId::Int(3)]);

    ctx.service.run_without_previous_progress().unwrap();

    assert_eq!(ctx.stations.ids(), ids([1, 2, 4, 5, 6]));
    assert_eq!(ctx.failed_ids("stations"), ids([3]));
}

#[test]
fn test_fatal_source_failure_stops_the_plan() {
    let ctx = TestContext::new()
        .register(StationMigration::default())
        .register_archive();
    ctx.legacy.fail_next_page_reads(usize::MAX);

    let error = ctx.service.run_without_previous_progress().unwrap_err();

    assert!(matches!(error, MigrationError::Fatal { ref migration, .. } if migration == "stations"));
    assert_eq!(ctx.service.progress().fatal_errors().len(), 1);
    assert!(ctx.stations.is_empty());
    assert!(ctx.archive.is_empty());

    let snapshot = ctx.service.progress().snapshot();
    assert!(snapshot.metadata.in_progress_migration_ids.is_empty());
    assert!(snapshot.metadata.completed_migration_ids.is_empty());
}

#[test]
fn test_finish_then_stop_halts_after_the_migration() {
    let ctx = TestContext::new()
        .register(StationMigration {
            resolution: fast_resolution(ResolutionStrategy::FinishMigrationThenStop),
            fail_transform_for: [2].into_iter().collect(),
            ..Default::default()
        })
        .register_archive();

    let report = ctx.service.run_without_previous_progress().unwrap();

    assert_eq!(report.halted_after.as_deref(), Some("stations"));
    assert!(report.outcome("region_archive").is_none());
    assert_eq!(ctx.stations.ids(), ids([1, 3, 4, 5, 6]));
    assert!(ctx.archive.is_empty());
}

#[test]
fn test_stop_immediately_is_fatal() {
    let ctx = TestContext::new()
        .register(StationMigration {
            resolution: fast_resolution(ResolutionStrategy::StopImmediately),
            fail_transform_for: [2].into_iter().collect(),
            ..Default::default()
        })
        .register_archive();

    let error = ctx.service.run_without_previous_progress().unwrap_err();

    match error {
        MigrationError::Fatal { migration, message } => {
            assert_eq!(migration, "stations");
            assert!(message.contains("record 2 failed"), "{}", message);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ctx.failed_ids("stations"), ids([2]));
    assert!(ctx.archive.is_empty());
}

#[test]
fn test_plan_orders_and_conflicts() {
    let ctx = TestContext::new()
        .register_archive()
        .register(StationMigration::default());
    assert_eq!(ctx.service.plan().unwrap(), vec!["stations", "region_archive"]);

    let report = ctx.service.run_without_previous_progress().unwrap();
    assert!(report.is_complete());
    assert_eq!(ctx.archive.len(), 2);

    let ctx = TestContext::new()
        .register(StationMigration::default())
        .register(StationMigration {
            id: "stations_again",
            ..Default::default()
        });
    assert!(matches!(ctx.service.plan(), Err(PlanError::Conflict { .. })));
    assert!(matches!(
        ctx.service.run_without_previous_progress(),
        Err(MigrationError::Plan(PlanError::Conflict { .. }))
    ));
    assert!(ctx.stations.is_empty());
}

#[test]
fn test_registration_errors() {
    let mut ctx = TestContext::new().register(StationMigration::default());

    assert_eq!(
        ctx.service.register_migration(StationMigration::default()),
        Err(PlanError::DuplicateMigration {
            migration: "stations".into()
        })
    );
    assert_eq!(ctx.service.migration_ids(), vec!["stations"]);

    assert!(matches!(
        ctx.service.run_with_record_id_in("unknown", &ids([1])),
        Err(MigrationError::Plan(PlanError::UnknownMigration { .. }))
    ));
}

#[test]
fn test_run_with_record_id_in() {
    let ctx = TestContext::new().register(StationMigration::default());

    let outcome = ctx
        .service
        .run_with_record_id_in("stations", &ids([1, 4]))
        .unwrap();

    assert_eq!(outcome.migrated_records, 2);
    assert_eq!(ctx.stations.ids(), ids([1, 4]));
}
