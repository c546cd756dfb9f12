// ABOUTME: End-to-end tests for the flashback engine against the in-memory database
// ABOUTME: Covers backfill paging, change windows, retries, interruption, drift and retention checks

use flashback_capture::error::CaptureError;
use flashback_capture::flashback::discovery::{discover_tables, DiscoveryOptions};
use flashback_capture::flashback::incremental::fetch_window;
use flashback_capture::flashback::retention::validate_flashback;
use flashback_capture::flashback::{
    snapshot, CaptureDaemon, CaptureState, ChangeOp, DaemonConfig, FlashbackDatabase,
    PhaseCoordinator, ResourceState, RowEvent, RowId, Scn, SessionState, SessionStatus,
    StepOutcome, Table, TableSession,
};
use flashback_capture::testing::{healthy_retention, MemoryDatabase, MemorySink};
use flashback_capture::utils::Backoff;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const BINDING: &str = "SALES_ORDERS";

/// `SALES.ORDERS` with `rows` rows, IDs 1..=rows.
fn orders_db(rows: usize) -> (Arc<MemoryDatabase>, Vec<RowId>) {
    let db = Arc::new(MemoryDatabase::new());
    db.create_table(
        "SALES",
        "ORDERS",
        &[("ID", "NUMBER"), ("STATUS", "VARCHAR2")],
        &["ID"],
    );
    let ids = (1..=rows)
        .map(|id| db.insert("SALES", "ORDERS", json!({"ID": id, "STATUS": "new"})))
        .collect();
    (db, ids)
}

async fn discover(db: &MemoryDatabase) -> Vec<Arc<Table>> {
    discover_tables(db, &DiscoveryOptions::default())
        .await
        .unwrap()
}

/// Snapshot the first discovered table and open a session on it.
async fn open_session(db: &Arc<MemoryDatabase>, chunk_size: usize) -> (TableSession, Scn) {
    let tables = discover(db).await;
    let snapshot = snapshot::initialize(db.as_ref(), &tables).await.unwrap();
    let (table, resource) = snapshot.bindings.into_iter().next().unwrap();
    (session(db, table, resource, chunk_size), snapshot.scn)
}

fn session(
    db: &Arc<MemoryDatabase>,
    table: Arc<Table>,
    resource: ResourceState,
    chunk_size: usize,
) -> TableSession {
    let coordinator = PhaseCoordinator::new();
    let scope = coordinator.register(&table.binding_name(), || {
        SessionState::new(resource, Backoff::new(Duration::from_millis(1), 3))
    });
    let db: Arc<dyn FlashbackDatabase> = db.clone();
    TableSession::new(db, table, scope, chunk_size)
}

fn row_ids(events: &[RowEvent]) -> Vec<RowId> {
    events.iter().map(|e| e.row_id.clone()).collect()
}

async fn finish_backfill(session: &TableSession, sink: &MemorySink) {
    loop {
        match session.fetch_page(sink).await.unwrap() {
            StepOutcome::Backfilled { complete: true, .. } => return,
            StepOutcome::Backfilled { .. } => continue,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_orders_backfill_then_changes() {
    let (db, ids) = orders_db(250);
    let sink = MemorySink::new();
    let (session, s0) = open_session(&db, 100).await;

    let initial = session.state().await;
    assert_eq!(initial.backfill.as_ref().unwrap().cutoff, ids[249]);
    assert_eq!(initial.inc.cursor, s0);

    // (None, R100]
    assert_eq!(
        session.fetch_page(&sink).await.unwrap(),
        StepOutcome::Backfilled {
            rows: 100,
            complete: false
        }
    );
    let state = session.state().await;
    assert_eq!(state.backfill.unwrap().next_page, Some(ids[99].clone()));

    // (R100, R200]
    assert_eq!(
        session.fetch_page(&sink).await.unwrap(),
        StepOutcome::Backfilled {
            rows: 100,
            complete: false
        }
    );

    // (R200, R250], cutoff reached
    assert_eq!(
        session.fetch_page(&sink).await.unwrap(),
        StepOutcome::Backfilled {
            rows: 50,
            complete: true
        }
    );

    let state = session.state().await;
    assert!(state.backfill.is_none());
    assert_eq!(state.inc.cursor, s0);
    assert_eq!(sink.state(BINDING).unwrap(), state);

    let backfilled = sink.committed_for(BINDING);
    assert_eq!(row_ids(&backfilled), ids);
    assert!(backfilled.iter().all(|e| e.scn == s0));
    assert!(backfilled.iter().all(|e| e.document["_meta"]["op"] == "c"));

    // Three changes between S0 and S1
    let added = db.insert("SALES", "ORDERS", json!({"ID": 251, "STATUS": "new"}));
    db.update("SALES", "ORDERS", &ids[9], json!({"STATUS": "paid"}));
    db.delete("SALES", "ORDERS", &ids[19]);
    let s1 = db.scn();

    assert_eq!(
        session.fetch_changes(&sink).await.unwrap(),
        StepOutcome::Changes {
            events: 3,
            cursor: s1
        }
    );
    assert_eq!(session.state().await.inc.cursor, s1);

    let committed = sink.committed_for(BINDING);
    let changes = &committed[250..];
    let ops: Vec<ChangeOp> = changes.iter().map(|e| e.op).collect();
    assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete]);
    assert_eq!(
        row_ids(changes),
        vec![added, ids[9].clone(), ids[19].clone()]
    );

    assert_eq!(changes[1].document["STATUS"], "paid");
    assert_eq!(changes[1].document["_meta"]["op"], "u");

    let deletion = &changes[2].document;
    assert_eq!(deletion.len(), 2, "deletion carries only the key and _meta");
    assert_eq!(deletion["ID"], 20);
    assert_eq!(deletion["_meta"]["op"], "d");
    assert_eq!(deletion["_meta"]["source"]["table"], "ORDERS");
}

#[tokio::test]
async fn test_backfill_emits_each_row_once_in_rowid_order() {
    for (rows, chunk) in [(1, 1), (7, 3), (99, 100), (100, 100), (101, 100), (64, 8)] {
        let (db, ids) = orders_db(rows);
        let sink = MemorySink::new();
        let (session, _) = open_session(&db, chunk).await;
        finish_backfill(&session, &sink).await;

        let emitted = row_ids(&sink.committed_for(BINDING));
        assert_eq!(emitted, ids, "rows={} chunk={}", rows, chunk);
        assert!(emitted
            .windows(2)
            .all(|w| w[0].as_str() < w[1].as_str()));
        let unique: HashSet<_> = emitted.iter().collect();
        assert_eq!(unique.len(), rows);
    }
}

#[tokio::test]
async fn test_backfill_pinned_at_snapshot() {
    let (db, ids) = orders_db(10);
    let sink = MemorySink::new();
    let (session, _) = open_session(&db, 4).await;

    // Changes after the snapshot are invisible to the backfill
    db.update("SALES", "ORDERS", &ids[8], json!({"STATUS": "shipped"}));
    db.delete("SALES", "ORDERS", &ids[9]);
    db.insert("SALES", "ORDERS", json!({"ID": 11, "STATUS": "new"}));

    finish_backfill(&session, &sink).await;
    let emitted = sink.committed_for(BINDING);
    assert_eq!(row_ids(&emitted), ids);
    assert_eq!(emitted[8].document["STATUS"], "new");

    // ...and are picked up by the first change window instead
    assert_eq!(
        session.fetch_changes(&sink).await.unwrap(),
        StepOutcome::Changes {
            events: 3,
            cursor: db.scn()
        }
    );
}

#[tokio::test]
async fn test_snapshot_boundary_is_idempotent() {
    let (db, _) = orders_db(5);
    let sink = MemorySink::new();
    let (session, s0) = open_session(&db, 10).await;
    finish_backfill(&session, &sink).await;

    let table = session.table().clone();
    let window = fetch_window(db.as_ref(), &table, s0, s0).await.unwrap();
    assert!(window.is_empty());
    assert_eq!(window.upper, s0);
    assert_eq!(db.versions_queries(), 0);

    // Nothing committed since the snapshot: empty window, cursor unchanged
    assert_eq!(
        session.fetch_changes(&sink).await.unwrap(),
        StepOutcome::Changes {
            events: 0,
            cursor: s0
        }
    );
    assert_eq!(db.versions_queries(), 0);
}

#[tokio::test]
async fn test_transient_read_failure_retries_same_chunk() {
    let (db, ids) = orders_db(250);
    let sink = MemorySink::new();
    let (session, _) = open_session(&db, 100).await;

    db.fail_next_reads(2, "ORA-03113: end-of-file on communication channel");
    assert_eq!(
        session.step(&sink).await.unwrap(),
        StepOutcome::Backfilled {
            rows: 100,
            complete: false
        }
    );
    assert_eq!(db.row_queries(), 3);
    assert_eq!(row_ids(&sink.committed_for(BINDING)), ids[..100].to_vec());
}

#[tokio::test]
async fn test_failure_mid_chunk_reproduces_identical_rows() {
    let (db, ids) = orders_db(250);
    let sink = MemorySink::new();
    let (session, _) = open_session(&db, 100).await;
    let before = session.state().await;

    sink.fail_emit_after(50);
    let err = session.fetch_page(&sink).await.unwrap_err();
    assert!(err.is_retryable());

    // Nothing committed, partial output discarded, state untouched
    assert!(sink.committed_for(BINDING).is_empty());
    assert!(sink.pending_for(BINDING).is_empty());
    assert_eq!(session.state().await, before);

    session.fetch_page(&sink).await.unwrap();
    assert_eq!(row_ids(&sink.committed_for(BINDING)), ids[..100].to_vec());
}

#[tokio::test]
async fn test_retries_exhausted_leaves_state_unchanged() {
    let (db, _) = orders_db(10);
    let sink = MemorySink::new();
    let (session, _) = open_session(&db, 5).await;
    let before = session.state().await;

    db.fail_next_reads(10, "ORA-12170: TNS:Connect timeout occurred");
    let err = session.step(&sink).await.unwrap_err();
    assert!(matches!(err, CaptureError::Transient(_)));
    // Initial attempt plus three retries
    assert_eq!(db.row_queries(), 4);
    assert_eq!(session.state().await, before);
    assert!(session.status().await.is_active());
}

#[tokio::test]
async fn test_interrupted_window_keeps_cursor() {
    let (db, ids) = orders_db(5);
    let sink = MemorySink::new();
    let (session, s0) = open_session(&db, 10).await;
    finish_backfill(&session, &sink).await;

    db.update("SALES", "ORDERS", &ids[0], json!({"STATUS": "paid"}));
    db.update("SALES", "ORDERS", &ids[1], json!({"STATUS": "paid"}));
    db.delete("SALES", "ORDERS", &ids[2]);
    let s1 = db.scn();

    // Emission fails after the upper marker was observed
    sink.fail_emit_after(2);
    assert!(session.fetch_changes(&sink).await.is_err());
    assert_eq!(session.state().await.inc.cursor, s0);
    assert_eq!(sink.state(BINDING).unwrap().inc.cursor, s0);

    // Checkpoint rejected after full emission
    sink.fail_next_checkpoints(1);
    assert!(session.fetch_changes(&sink).await.is_err());
    assert_eq!(session.state().await.inc.cursor, s0);

    // Re-invoking with the old cursor reproduces the whole window
    assert_eq!(
        session.fetch_changes(&sink).await.unwrap(),
        StepOutcome::Changes {
            events: 3,
            cursor: s1
        }
    );
    assert_eq!(sink.committed_for(BINDING).len(), 5 + 3);
}

#[tokio::test]
async fn test_versions_collapse_to_latest_per_row() {
    let (db, ids) = orders_db(3);
    let sink = MemorySink::new();
    let (session, _) = open_session(&db, 10).await;
    finish_backfill(&session, &sink).await;

    for status in ["paid", "packed", "shipped"] {
        db.update("SALES", "ORDERS", &ids[0], json!({"STATUS": status}));
    }
    let short_lived = db.insert("SALES", "ORDERS", json!({"ID": 4, "STATUS": "new"}));
    db.delete("SALES", "ORDERS", &short_lived);

    session.fetch_changes(&sink).await.unwrap();
    let changes = &sink.committed_for(BINDING)[3..];
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].row_id, ids[0]);
    assert_eq!(changes[0].document["STATUS"], "shipped");
    assert_eq!(changes[1].row_id, short_lived);
    assert_eq!(changes[1].op, ChangeOp::Delete);
}

#[tokio::test]
async fn test_unreported_operation_checks_existence() {
    let (db, ids) = orders_db(3);
    let sink = MemorySink::new();
    let (session, _) = open_session(&db, 10).await;
    finish_backfill(&session, &sink).await;
    db.hide_operations();

    db.update("SALES", "ORDERS", &ids[0], json!({"STATUS": "paid"}));
    db.delete("SALES", "ORDERS", &ids[1]);

    session.fetch_changes(&sink).await.unwrap();
    let changes = &sink.committed_for(BINDING)[3..];
    let ops: Vec<ChangeOp> = changes.iter().map(|e| e.op).collect();
    assert_eq!(ops, vec![ChangeOp::Update, ChangeOp::Delete]);
}

#[tokio::test]
async fn test_incremental_deferred_while_backfilling() {
    let (db, _) = orders_db(20);
    let sink = MemorySink::new();
    let (session, s0) = open_session(&db, 5).await;
    db.advance_scn(10);

    assert_eq!(
        session.fetch_changes(&sink).await.unwrap(),
        StepOutcome::Deferred
    );
    assert_eq!(db.versions_queries(), 0);
    assert_eq!(session.state().await.inc.cursor, s0);
    assert_eq!(sink.checkpoints(), 0);
}

#[tokio::test]
async fn test_empty_table_starts_incremental() {
    let (db, _) = orders_db(0);
    let sink = MemorySink::new();
    let (session, s0) = open_session(&db, 5).await;

    let state = session.state().await;
    assert!(state.backfill.is_none());
    assert_eq!(state.inc.cursor, s0);

    db.insert("SALES", "ORDERS", json!({"ID": 1, "STATUS": "new"}));
    assert_eq!(
        session.step(&sink).await.unwrap(),
        StepOutcome::Changes {
            events: 1,
            cursor: db.scn()
        }
    );
}

#[tokio::test]
async fn test_expired_undo_stops_session() {
    let (db, _) = orders_db(3);
    let sink = MemorySink::new();
    let (session, s0) = open_session(&db, 10).await;
    finish_backfill(&session, &sink).await;

    db.advance_scn(5);
    db.expire_undo_before(Scn(s0.value() + 1));

    let err = session.step(&sink).await.unwrap_err();
    assert!(matches!(err, CaptureError::Consistency { .. }));
    assert!(matches!(
        session.status().await,
        SessionStatus::Failed { .. }
    ));
    assert!(matches!(
        sink.state(BINDING).unwrap().status,
        SessionStatus::Failed { .. }
    ));
    assert_eq!(session.state().await.inc.cursor, s0);

    assert_eq!(session.step(&sink).await.unwrap(), StepOutcome::Inactive);
}

fn daemon_config() -> DaemonConfig {
    DaemonConfig {
        chunk_size: 100,
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_daemon_cycle_covers_all_tables() {
    let (db, _) = orders_db(150);
    db.create_table(
        "SALES",
        "AUDIT_LOG",
        &[("EVENT", "VARCHAR2"), ("AT", "DATE")],
        &[],
    );
    for i in 0..5 {
        db.insert(
            "SALES",
            "AUDIT_LOG",
            json!({"EVENT": format!("login {}", i), "AT": "2024-01-01T00:00:00Z"}),
        );
    }

    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());
    let sessions = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 2);

    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.tables_captured, 2);
    assert_eq!(stats.rows_backfilled, 155);
    assert_eq!(stats.changes_emitted, 0);

    // Keyless tables are keyed by ROWID
    let audit = sink.committed_for("SALES_AUDIT_LOG");
    let table = sessions
        .iter()
        .find(|s| s.binding() == "SALES_AUDIT_LOG")
        .unwrap()
        .table();
    assert_eq!(table.key_pointers(), vec!["/_meta/source/row_id".to_string()]);
    assert_eq!(
        audit[0].key(table),
        vec![json!(audit[0].row_id.as_str())]
    );
}

#[tokio::test]
async fn test_daemon_resumes_from_saved_state() {
    let (db, ids) = orders_db(250);
    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());
    let sessions = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap();

    // One page, then the process stops
    sessions[0].fetch_page(&sink).await.unwrap();
    let mut saved = CaptureState::new("memory");
    saved.update(BINDING, sink.state(BINDING).unwrap());
    let checkpoints = sink.checkpoints();

    db.update("SALES", "ORDERS", &ids[0], json!({"STATUS": "paid"}));

    let restarted = CaptureDaemon::new(db.clone(), daemon_config());
    let sessions = restarted.start(&saved, &sink).await.unwrap();
    // Existing bindings are not snapshotted again
    assert_eq!(sink.checkpoints(), checkpoints);

    let stats = restarted.run_cycle(&sessions, &sink).await;
    assert!(stats.is_success());
    assert_eq!(stats.rows_backfilled, 150);
    assert_eq!(stats.changes_emitted, 1);

    let committed = sink.committed_for(BINDING);
    assert_eq!(row_ids(&committed[..250]), ids);
    assert_eq!(committed[250].document["STATUS"], "paid");
}

#[tokio::test]
async fn test_schema_drift_pauses_until_rediscovered() {
    let (db, _) = orders_db(5);
    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());
    let sessions = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap();
    assert!(daemon.run_cycle(&sessions, &sink).await.is_success());

    db.drop_column("SALES", "ORDERS", "STATUS");
    db.insert("SALES", "ORDERS", json!({"ID": 6}));

    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert_eq!(stats.errors.len(), 1);
    assert!(matches!(
        sessions[0].status().await,
        SessionStatus::SoftFailed { .. }
    ));
    assert!(matches!(
        sink.state(BINDING).unwrap().status,
        SessionStatus::SoftFailed { .. }
    ));

    // Paused sessions are skipped, not retried
    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert!(stats.is_success());
    assert_eq!(stats.tables_inactive, 1);

    let sessions = daemon.rediscover(sessions, &sink).await;
    assert!(sessions[0].status().await.is_active());
    assert_eq!(sessions[0].table().columns.len(), 1);

    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.changes_emitted, 1);

    let last = sink.committed_for(BINDING).pop().unwrap();
    assert_eq!(last.document["ID"], 6);
    assert!(!last.document.contains_key("STATUS"));
}

#[tokio::test]
async fn test_unreadable_table_is_configuration_error() {
    let (db, _) = orders_db(1);
    db.set_unreadable("SALES", "ORDERS", true);
    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());

    let err = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Configuration(_)));
    let message = err.to_string();
    assert!(message.contains("SALES.ORDERS"));
    assert!(message.contains("CAPTURE"));
}

#[tokio::test]
async fn test_transient_readability_failure_stays_retryable() {
    let (db, _) = orders_db(1);
    db.fail_next_readability_checks(1, "ORA-03113: end-of-file on communication channel");

    let err = discover_tables(db.as_ref(), &DiscoveryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Transient(_)), "{:?}", err);
    assert!(err.is_retryable());

    assert_eq!(discover(&db).await.len(), 1);
}

#[tokio::test]
async fn test_changed_column_type_pauses_until_rediscovered() {
    let (db, _) = orders_db(3);
    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());
    let sessions = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap();
    assert!(daemon.run_cycle(&sessions, &sink).await.is_success());

    db.alter_column_type("SALES", "ORDERS", "STATUS", "NUMBER");
    db.insert("SALES", "ORDERS", json!({"ID": 4, "STATUS": 7}));

    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert_eq!(stats.errors.len(), 1);
    assert!(matches!(
        sessions[0].status().await,
        SessionStatus::SoftFailed { .. }
    ));

    let sessions = daemon.rediscover(sessions, &sink).await;
    assert!(sessions[0].status().await.is_active());
    assert_eq!(sessions[0].table().columns[1].data_type, "NUMBER");

    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    assert_eq!(stats.changes_emitted, 1);
    let last = sink.committed_for(BINDING).pop().unwrap();
    assert_eq!(last.document["STATUS"], 7);
}

#[tokio::test]
async fn test_rediscovery_checks_only_paused_tables() {
    let (db, _) = orders_db(2);
    db.create_table(
        "SALES",
        "CUSTOMERS",
        &[("CUSTOMER_ID", "NUMBER"), ("NAME", "VARCHAR2")],
        &["CUSTOMER_ID"],
    );
    db.insert("SALES", "CUSTOMERS", json!({"CUSTOMER_ID": 1, "NAME": "Acme"}));

    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());
    let sessions = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap();
    assert!(daemon.run_cycle(&sessions, &sink).await.is_success());

    db.drop_column("SALES", "ORDERS", "STATUS");
    db.insert("SALES", "ORDERS", json!({"ID": 3}));
    assert_eq!(daemon.run_cycle(&sessions, &sink).await.errors.len(), 1);

    async fn orders_status(sessions: &[TableSession]) -> SessionStatus {
        sessions
            .iter()
            .find(|s| s.binding() == BINDING)
            .unwrap()
            .status()
            .await
    }

    // The paused table itself is unreadable: it stays paused
    db.set_unreadable("SALES", "ORDERS", true);
    let sessions = daemon.rediscover(sessions, &sink).await;
    assert!(matches!(
        orders_status(&sessions).await,
        SessionStatus::SoftFailed { .. }
    ));

    // An unrelated table losing its grant does not block the resume
    db.set_unreadable("SALES", "ORDERS", false);
    db.set_unreadable("SALES", "CUSTOMERS", true);
    let sessions = daemon.rediscover(sessions, &sink).await;
    assert!(orders_status(&sessions).await.is_active());

    let stats = daemon.run_cycle(&sessions, &sink).await;
    assert!(stats.is_success(), "{:?}", stats.errors);
    let last = sink.committed_for(BINDING).pop().unwrap();
    assert_eq!(last.document["ID"], 3);
}

#[tokio::test]
async fn test_retention_below_floor_is_fatal() {
    let db = MemoryDatabase::new();
    let mut retention = healthy_retention();
    retention.undo_retention_seconds = 500_000;
    db.set_retention(retention);

    let err = validate_flashback(&db, false).await.unwrap_err();
    assert!(matches!(err, CaptureError::Configuration(_)));
    assert!(err.to_string().contains("500000 seconds"));

    let report = validate_flashback(&db, true).await.unwrap();
    assert!(report.passed());
    assert_eq!(report.warnings().count(), 1);
}

#[tokio::test]
async fn test_non_guaranteed_retention_only_warns() {
    let db = MemoryDatabase::new();
    let mut retention = healthy_retention();
    retention.undo_retention_seconds = 700_000;
    retention.retention_mode = "NOGUARANTEE".to_string();
    db.set_retention(retention);

    let report = validate_flashback(&db, false).await.unwrap();
    assert!(report.passed());
    let warnings: Vec<_> = report.warnings().map(|c| c.name).collect();
    assert_eq!(warnings, vec!["guarantee"]);
}

#[tokio::test]
async fn test_retention_checked_before_snapshot() {
    let (db, _) = orders_db(3);
    let mut retention = healthy_retention();
    retention.flashback_on = false;
    db.set_retention(retention);

    let sink = MemorySink::new();
    let daemon = CaptureDaemon::new(db.clone(), daemon_config());
    let err = daemon
        .start(&CaptureState::new("memory"), &sink)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Flashback must be enabled"));
    assert_eq!(sink.checkpoints(), 0);
}
