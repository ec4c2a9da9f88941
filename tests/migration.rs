// tests/migration.rs
//! Location-transparent migration between nodes of one runtime

mod common;

use common::{config, eventually, second_node, Counter, SlowServer};
use proxima_engine::body::BodyStatus;
use proxima_engine::utils::errors::MigrationError;
use proxima_engine::fault_tolerance::Never;
use proxima_engine::{ActiveError, ActiveRuntime, Argument, FtPolicy, Future, Location};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_old_reference_reaches_moved_object() {
    let rt = ActiveRuntime::new(config()).unwrap();
    let b = rt.add_node(second_node());
    let counter = rt.create::<Counter>(vec![json!(10)], rt.default_location()).unwrap();

    let moved = rt.migrate(&counter, &b).unwrap();
    assert_eq!(moved.location(), &b);
    assert_eq!(moved.id(), counter.id());
    assert_eq!(rt.location_of(counter.id()), Some(b.clone()));

    // Stale reference still points at the first node.
    assert_eq!(rt.call(&counter, "add", vec![json!(1)]), Ok(json!(11)));
    assert!(rt.transport_stats().forwarded >= 1);
    assert_eq!(rt.call(&moved, "get", vec![]), Ok(json!(11)));
}

#[test]
fn test_futures_created_before_migration_resolve() {
    let rt = ActiveRuntime::new(config()).unwrap();
    let b = rt.add_node(second_node());
    let counter = rt.create::<Counter>(vec![], rt.default_location()).unwrap();

    let before: Vec<Future> = (1..=20)
        .map(|_| rt.invoke(&counter, "add", vec![Argument::from(json!(1))]))
        .collect();
    rt.migrate(&counter, &b).unwrap();

    let values: Vec<_> = before
        .iter()
        .map(|f| f.wait_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(values, (1..=20).map(|n| json!(n)).collect::<Vec<_>>());
}

#[test]
fn test_migrate_back_and_forth_keeps_state() {
    let rt = ActiveRuntime::new(config()).unwrap();
    let a = rt.default_location().clone();
    let b = rt.add_node(second_node());
    let c = rt.add_node(Location::new("node-c", 7702));
    let counter = rt.create::<Counter>(vec![], &a).unwrap();

    for (step, to) in [&b, &c, &a, &b].into_iter().enumerate() {
        rt.send(&counter, "increment", vec![]).unwrap();
        let moved = rt.migrate(&counter, to).unwrap();
        assert_eq!(rt.call(&moved, "get", vec![]), Ok(json!(step as i64 + 1)));
    }
    assert_eq!(rt.snapshot_state(&counter).unwrap()["count"], json!(4));
}

#[test]
fn test_reference_survives_forwarder_expiry() {
    let mut config = config();
    config.migration.grace_period_ms = 1;
    let rt = ActiveRuntime::new(config).unwrap();
    let b = rt.add_node(second_node());
    let counter = rt.create::<Counter>(vec![json!(5)], rt.default_location()).unwrap();

    rt.migrate(&counter, &b).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    rt.sweep_forwarders();

    let origin = rt.node(rt.default_location()).unwrap();
    assert!(origin.forwarders().lookup(counter.id()).is_none());
    assert_eq!(rt.call(&counter, "get", vec![]), Ok(json!(5)));
}

#[test]
fn test_unreachable_destination_leaves_object_in_place() {
    let rt = ActiveRuntime::new(config()).unwrap();
    let b = rt.add_node(second_node());
    let counter = rt.create::<Counter>(vec![json!(3)], rt.default_location()).unwrap();

    rt.set_reachable(&b, false).unwrap();
    let result = rt.migrate(&counter, &b);
    assert!(matches!(
        result,
        Err(ActiveError::Migration(MigrationError::DestinationUnreachable(_)))
    ));

    assert_eq!(rt.location_of(counter.id()), Some(rt.default_location().clone()));
    assert!(eventually(Duration::from_secs(1), || rt.status(&counter) == Some(BodyStatus::Active)));
    assert_eq!(rt.call(&counter, "get", vec![]), Ok(json!(3)));
}

#[test]
fn test_migration_to_current_location_is_noop() {
    let rt = ActiveRuntime::new(config()).unwrap();
    let counter = rt.create::<Counter>(vec![], rt.default_location()).unwrap();

    let same = rt.migrate(&counter, rt.default_location()).unwrap();
    assert_eq!(same.location(), rt.default_location());
    assert_eq!(rt.transport_stats().transfers, 0);
}

#[test]
fn test_fault_tolerant_object_migrates_with_its_log() {
    let rt = ActiveRuntime::new(config()).unwrap();
    let b = rt.add_node(second_node());
    let counter = rt.create::<Counter>(vec![], rt.default_location()).unwrap();
    rt.enable_fault_tolerance(&counter, Default::default()).unwrap();

    rt.call(&counter, "add", vec![json!(2)]).unwrap();
    let moved = rt.migrate(&counter, &b).unwrap();
    rt.call(&moved, "add", vec![json!(3)]).unwrap();

    rt.crash(&moved).unwrap();
    let report = rt.recover(&moved).unwrap();
    assert_eq!(report.location, b);
    assert_eq!(rt.call(&moved, "get", vec![]), Ok(json!(5)));
}

#[test]
fn test_second_migration_is_refused_while_first_runs() {
    let rt = Arc::new(ActiveRuntime::new(config()).unwrap());
    let b = rt.add_node(second_node());
    let c = rt.add_node(Location::new("node-c", 7702));
    let counter = rt.create::<Counter>(vec![json!(1)], rt.default_location()).unwrap();

    let busy = rt.invoke(&counter, "sleep", vec![Argument::from(json!(300))]);
    std::thread::sleep(Duration::from_millis(20));
    let first = {
        let (rt, counter, b) = (rt.clone(), counter.clone(), b.clone());
        std::thread::spawn(move || rt.migrate(&counter, &b))
    };
    std::thread::sleep(Duration::from_millis(50));

    assert!(matches!(
        rt.migrate(&counter, &c),
        Err(ActiveError::Migration(MigrationError::InProgress(_)))
    ));
    assert!(first.join().unwrap().is_ok());
    assert!(busy.wait_timeout(Duration::from_secs(5)).is_ok());
    assert_eq!(rt.location_of(counter.id()), Some(b));
}

#[test]
fn test_migration_refused_during_checkpoint_write() {
    let server = Arc::new(SlowServer::default());
    let rt = Arc::new(
        ActiveRuntime::builder(config())
            .recovery_server(server.clone())
            .build()
            .unwrap(),
    );
    let b = rt.add_node(second_node());
    let counter = rt.create::<Counter>(vec![], rt.default_location()).unwrap();
    rt.enable_fault_tolerance(&counter, FtPolicy::default().with_trigger(Never))
        .unwrap();

    server.delay_stores(Duration::from_millis(300));
    let writing = {
        let (rt, counter) = (rt.clone(), counter.clone());
        std::thread::spawn(move || rt.checkpoint(&counter))
    };
    assert!(eventually(Duration::from_secs(1), || {
        rt.node(rt.default_location())
            .and_then(|n| n.body(counter.id()))
            .is_some_and(|h| h.checkpoint_in_flight())
    }));

    assert!(matches!(
        rt.migrate(&counter, &b),
        Err(ActiveError::Migration(MigrationError::CheckpointInProgress(_)))
    ));
    assert!(writing.join().unwrap().is_ok());
    assert_eq!(rt.location_of(counter.id()), Some(rt.default_location().clone()));
    assert!(rt.migrate(&counter, &b).is_ok());
}
