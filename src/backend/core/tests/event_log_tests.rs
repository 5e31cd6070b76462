//! Integration tests for the causal event log.
//!
//! Covers the log as a whole: concurrent appends, persistence round trips,
//! recovery from damaged files, feedback staleness across participants and
//! replay of task state.

use chronicle_core::events::{
    rebuild_all, rebuild_state, EventData, EventFactory, EventFilter, EventOrdering, EventStore,
    EventType, StalenessReason, TaskStatus,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn no_data() -> EventData {
    EventData::new()
}

fn data(pairs: &[(&str, &str)]) -> EventData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect()
}

// ============================================================================
// Append Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_from_tasks_are_gap_free() {
    let store = Arc::new(EventStore::new());

    let handles: Vec<_> = (0..10)
        .map(|worker| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut factory = EventFactory::new(format!("worker-{}", worker)).unwrap();
                let mut sequences = Vec::new();
                for _ in 0..30 {
                    let event = factory
                        .create(format!("task-{}", worker), EventType::CodeGenerated, no_data(), 1)
                        .unwrap();
                    sequences.push(store.append(event).unwrap().sequence_number());
                    tokio::task::yield_now().await;
                }
                sequences
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for handle in handles {
        for seq in handle.await.unwrap() {
            assert!(seen.insert(seq), "sequence {} assigned twice", seq);
        }
    }

    assert_eq!(seen, (1..=300).collect::<BTreeSet<u64>>());
    assert_eq!(store.last_sequence(), 300);

    let all = store.all_events();
    assert!(all.windows(2).all(|w| w[0].sequence_number() < w[1].sequence_number()));
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_save_then_load_reproduces_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");

    let store = EventStore::with_path(&path);
    let mut factory = EventFactory::new("generator").unwrap();
    let started = factory
        .create("auth-service", EventType::TaskStarted, data(&[("goal", "login")]), 0)
        .unwrap();
    let started = store.append(started).unwrap();
    let planning = factory
        .create_caused_by(&started, EventType::PlanningStarted, no_data(), 0)
        .unwrap();
    store.append(planning).unwrap();
    let code = factory
        .create("auth-service", EventType::CodeVersionCreated, no_data(), 1)
        .unwrap();
    store.append(code).unwrap();

    tokio_test::assert_ok!(store.save().await);

    let reloaded = EventStore::with_path(&path);
    let report = reloaded.load().await.unwrap();
    assert_eq!(report.loaded, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.max_sequence, 3);

    assert_eq!(reloaded.all_events(), store.all_events());

    let next = factory
        .create("auth-service", EventType::BugReport, no_data(), 1)
        .unwrap();
    assert_eq!(reloaded.append(next).unwrap().sequence_number(), 4);
}

#[tokio::test]
async fn test_load_skips_single_corrupt_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");

    let store = EventStore::with_path(&path);
    let mut factory = EventFactory::new("generator").unwrap();
    for _ in 0..10 {
        let event = factory
            .create("t1", EventType::CodeGenerated, no_data(), 1)
            .unwrap();
        store.append(event).unwrap();
    }
    store.save().await.unwrap();

    let raw = tokio::fs::read(&path).await.unwrap();
    let mut records: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    records[4]["event_type"] = serde_json::Value::from("NOT_A_REAL_TYPE");
    tokio::fs::write(&path, serde_json::to_vec(&records).unwrap())
        .await
        .unwrap();

    let reloaded = EventStore::with_path(&path);
    let report = reloaded.load().await.unwrap();
    assert_eq!(report.loaded, 9);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.max_sequence, 10);
    assert!(reloaded.all_events().iter().all(|e| e.sequence_number() != 5));
}

#[tokio::test]
async fn test_load_skips_repeated_sequence_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");

    let store = EventStore::with_path(&path);
    let mut factory = EventFactory::new("generator").unwrap();
    let mut saved = Vec::new();
    for _ in 0..3 {
        let event = factory
            .create("t1", EventType::CodeGenerated, no_data(), 1)
            .unwrap();
        saved.push(store.append(event).unwrap());
    }
    store.save().await.unwrap();

    let raw = tokio::fs::read(&path).await.unwrap();
    let mut records: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    records[2]["sequence_number"] = serde_json::Value::from(1u64);
    tokio::fs::write(&path, serde_json::to_vec(&records).unwrap())
        .await
        .unwrap();

    let reloaded = EventStore::with_path(&path);
    let report = reloaded.load().await.unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.max_sequence, 2);

    let events = reloaded.all_events();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence_number()).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(events[0].event_id(), saved[0].event_id());

    let next = reloaded
        .append(factory.create("t1", EventType::CodeGenerated, no_data(), 1).unwrap())
        .unwrap();
    assert_eq!(next.sequence_number(), 3);
}

#[tokio::test]
async fn test_load_skips_record_missing_clock_or_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");

    let store = EventStore::with_path(&path);
    let mut factory = EventFactory::new("generator").unwrap();
    for _ in 0..4 {
        let event = factory
            .create("t1", EventType::CodeGenerated, no_data(), 1)
            .unwrap();
        store.append(event).unwrap();
    }
    store.save().await.unwrap();

    let raw = tokio::fs::read(&path).await.unwrap();
    let mut records: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    records[1].as_object_mut().unwrap().remove("vector_clock");
    records[3].as_object_mut().unwrap().remove("code_version");
    tokio::fs::write(&path, serde_json::to_vec(&records).unwrap())
        .await
        .unwrap();

    let reloaded = EventStore::with_path(&path);
    let report = reloaded.load().await.unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped, 2);
    let sequences: Vec<u64> = reloaded.all_events().iter().map(|e| e.sequence_number()).collect();
    assert_eq!(sequences, vec![1, 3]);
}

#[tokio::test]
async fn test_load_rejects_garbage_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");
    tokio::fs::write(&path, b"not json at all").await.unwrap();

    let store = EventStore::with_path(&path);
    tokio_test::assert_err!(store.load().await);
    assert!(store.is_empty());
}

// ============================================================================
// Staleness Tests
// ============================================================================

#[test]
fn test_feedback_staleness_across_participants() {
    let store = EventStore::new();
    let mut generator = EventFactory::new("generator").unwrap();
    let mut tester = EventFactory::new("tester").unwrap();
    let mut late_tester = EventFactory::new("late-tester").unwrap();

    let code_v1 = store
        .append(generator.create("t1", EventType::CodeVersionCreated, no_data(), 1).unwrap())
        .unwrap();

    // Tester saw v1 before reporting.
    let report = store
        .append(
            tester
                .create_caused_by(&code_v1, EventType::BugReport, data(&[("detail", "crash")]), 1)
                .unwrap(),
        )
        .unwrap();
    assert!(EventOrdering::is_report_valid_for_current_code(&report, &code_v1).is_valid());

    // A report that never observed v1 is on a concurrent branch.
    let blind = store
        .append(late_tester.create("t1", EventType::BugReport, no_data(), 1).unwrap())
        .unwrap();
    assert_eq!(
        EventOrdering::is_report_valid_for_current_code(&blind, &code_v1).reason(),
        Some(StalenessReason::ConcurrentBranch)
    );

    // After v2 lands, the v1 report is stale by version.
    let code_v2 = store
        .append(
            generator
                .create_caused_by(&report, EventType::CodeVersionCreated, no_data(), 2)
                .unwrap(),
        )
        .unwrap();
    assert_eq!(
        EventOrdering::is_report_valid_for_current_code(&report, &code_v2).reason(),
        Some(StalenessReason::StaleVersion {
            report_version: 1,
            current_version: 2,
        })
    );

    let latest = store
        .latest_of_type("t1", &[EventType::CodeVersionCreated, EventType::CodeGenerated])
        .unwrap();
    assert_eq!(latest, code_v2);

    let all = store.all_events();
    let chain = EventOrdering::find_causal_chain(&code_v1, &all);
    assert_eq!(chain, vec![code_v1.clone(), report.clone(), code_v2.clone()]);
    assert!(!chain.contains(&blind));

    let concurrent = EventOrdering::find_concurrent_events(&blind, &all);
    assert_eq!(concurrent.len(), 3);
}

// ============================================================================
// Projection Tests
// ============================================================================

#[test]
fn test_projection_is_independent_of_input_order() {
    let store = EventStore::new();
    let mut factory = EventFactory::new("generator").unwrap();
    let steps = [
        (EventType::TaskStarted, data(&[])),
        (EventType::PlanningStarted, data(&[])),
        (EventType::ModuleStarted, data(&[("module", "parser")])),
        (EventType::ModuleComplete, data(&[("module", "parser")])),
        (EventType::CodeVersionCreated, data(&[])),
        (EventType::BugReport, data(&[])),
        (EventType::CorrectionApplied, data(&[])),
        (EventType::TaskComplete, data(&[])),
    ];
    for (event_type, payload) in steps {
        let event = factory.create("t1", event_type, payload, 3).unwrap();
        store.append(event).unwrap();
    }

    let in_order = store.get_events(&EventFilter::for_task("t1"));
    let mut shuffled = in_order.clone();
    shuffled.reverse();
    shuffled.swap(1, 5);

    let expected = rebuild_state(&in_order).unwrap();
    assert_eq!(rebuild_state(&shuffled).unwrap(), expected);
    assert_eq!(expected.status, TaskStatus::Completed);
    assert_eq!(expected.iteration, 1);
    assert_eq!(expected.code_version, 3);
    assert_eq!(expected.event_count, 8);
    assert_eq!(expected.last_sequence, 8);
}

#[test]
fn test_rebuild_all_separates_tasks() {
    let store = EventStore::new();
    let mut factory = EventFactory::new("generator").unwrap();
    for task in ["alpha", "beta"] {
        store
            .append(factory.create(task, EventType::TaskStarted, no_data(), 0).unwrap())
            .unwrap();
    }
    store
        .append(
            factory
                .create("beta", EventType::TaskFailed, data(&[("reason", "oom")]), 0)
                .unwrap(),
        )
        .unwrap();

    let states = rebuild_all(&store.all_events());
    assert_eq!(states.len(), 2);
    assert_eq!(states["alpha"].status, TaskStatus::Created);
    assert_eq!(states["beta"].status, TaskStatus::Failed);
}
