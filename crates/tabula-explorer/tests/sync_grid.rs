//! End-to-end synchronization behavior against a scripted backend.
//!
//! Every test drives the session through the public façade only and
//! resolves backend calls by hand, so the ordering of fetches, cancels, and
//! discards is fully deterministic. Paused tokio time makes the coalescing
//! and timeout windows instantaneous.

use std::time::Duration;
use tabula_comm::{ProfileReply, ProfileRequest, ScriptedBackend, ScriptedCall, ScriptedHandle};
use tabula_explorer::{
    CacheKey, EntryPhase, EntryStatus, ExplorerConfig, ExplorerError, KeyFilter, TableSession,
};
use tabula_model::{
    BackendCapabilities, BackendEvent, CellValue, ColumnChunk, ColumnDisplayType, ColumnSchema,
    DataChunk, FrequencyTable, Histogram, ProfileKind, ProfileResult, SummaryStats, SupportStatus,
    TableHandle, Viewport,
};

fn test_config() -> ExplorerConfig {
    ExplorerConfig {
        rows_per_block: 50,
        cols_per_block: 10,
        max_cached_blocks: 8,
        retain_margin_rows: 50,
        retain_margin_columns: 10,
        fetch_timeout: Duration::from_secs(30),
        coalesce_delay: Duration::from_millis(1),
    }
}

fn number_schema(columns: usize) -> Vec<ColumnSchema> {
    (0..columns)
        .map(|i| ColumnSchema::new(i, format!("col{i}"), "float64", ColumnDisplayType::Number))
        .collect()
}

fn chunk_for(call: &ScriptedCall) -> DataChunk {
    let ScriptedCall::GetDataValues { rows, columns, .. } = call else {
        panic!("expected a get_data_values call, got {call:?}");
    };
    DataChunk {
        row_start: rows.start,
        columns: columns
            .clone()
            .map(|c| ColumnChunk {
                column_index: c,
                values: rows
                    .clone()
                    .map(|r| CellValue::Value(format!("r{r}c{c}")))
                    .collect(),
            })
            .collect(),
    }
}

fn replies_for(requests: &[ProfileRequest]) -> Vec<ProfileReply> {
    requests
        .iter()
        .map(|req| ProfileReply {
            column_index: req.column_index,
            kind: req.kind,
            result: Ok(match req.kind {
                ProfileKind::NullCount => ProfileResult::NullCount(7),
                ProfileKind::SummaryStats => ProfileResult::SummaryStats(SummaryStats::default()),
                ProfileKind::Histogram => ProfileResult::Histogram(Histogram::default()),
                ProfileKind::FrequencyTable => {
                    ProfileResult::FrequencyTable(FrequencyTable::default())
                }
            }),
        })
        .collect()
}

/// Let spawned fetch tasks and coalescing timers run to quiescence.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn open_session(
    config: ExplorerConfig,
) -> (TableSession, ScriptedHandle, TableHandle) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let (backend, handle) = ScriptedBackend::new();
    let table = TableHandle::new();
    let session = TableSession::open(backend, table, config);
    (session, handle, table)
}

/// Answer the schema and capability fetches the session issues on open.
async fn resolve_startup(
    handle: &mut ScriptedHandle,
    schema: &[ColumnSchema],
    capabilities: &BackendCapabilities,
) {
    for _ in 0..2 {
        let pending = handle.next_call().await;
        match pending.call.method() {
            "get_schema" => pending.respond(&schema.to_vec()),
            "get_supported_features" => pending.respond(capabilities),
            other => panic!("unexpected startup call {other}"),
        }
    }
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn scrolling_away_cancels_and_discards_stale_block_fetch() {
    let (session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    settle().await;
    let first = handle.next_call().await;
    assert_eq!(
        first.call,
        ScriptedCall::GetDataValues {
            table: controller.table(),
            rows: 0..50,
            columns: 0..10,
        }
    );

    // Jump far past the retained margin while the fetch is still pending.
    controller
        .set_viewport(Viewport::new(500, 50, 0, 10))
        .unwrap();
    settle().await;
    let second = handle.next_call().await;
    assert_eq!(
        second.call,
        ScriptedCall::GetDataValues {
            table: controller.table(),
            rows: 500..550,
            columns: 0..10,
        }
    );

    // The straggler resolves anyway; its generation no longer matches.
    let stale_chunk = chunk_for(&first.call);
    first.respond(&stale_chunk);
    let chunk = chunk_for(&second.call);
    second.respond(&chunk);
    settle().await;

    let stats = controller.stats_snapshot();
    assert_eq!(stats.cancellations, 1);
    assert_eq!(stats.responses_discarded, 1);

    let visible = controller.cell_state(500, 0).unwrap();
    assert_eq!(visible.status, EntryStatus::Ready);
    assert_eq!(visible.value, Some(CellValue::Value("r500c0".into())));

    // The abandoned block holds no data; reading it starts over.
    let old = controller.cell_state(0, 0).unwrap();
    assert_eq!(old.value, None);
    assert_eq!(old.status, EntryStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn profile_response_after_data_change_is_discarded() {
    let (session, mut handle, table) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    settle().await;
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);
    settle().await;

    assert!(controller.toggle_expand_column(3).unwrap());
    settle().await;
    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected a profile batch, got {:?}", profiles.call);
    };
    assert_eq!(requests.len(), 3);
    let requests = requests.clone();

    // The table mutates underneath the in-flight batch.
    handle.emit(table, BackendEvent::DataChanged);
    settle().await;
    profiles.respond(&replies_for(&requests));
    settle().await;

    let stats = controller.stats_snapshot();
    assert_eq!(stats.responses_discarded, 3);

    // The key re-pends on its next read and the refetch applies normally.
    let snap = controller
        .column_profile_state(3, ProfileKind::NullCount)
        .unwrap();
    assert_eq!(snap.status, EntryStatus::Pending);
    assert_eq!(snap.value, None);
    settle().await;
    let refetch = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = refetch.call else {
        panic!("expected a profile refetch, got {:?}", refetch.call);
    };
    let requests = requests.clone();
    refetch.respond(&replies_for(&requests));
    settle().await;

    let snap = controller
        .column_profile_state(3, ProfileKind::NullCount)
        .unwrap();
    assert_eq!(snap.status, EntryStatus::Ready);
    assert_eq!(snap.value, Some(ProfileResult::NullCount(7)));
}

#[tokio::test(start_paused = true)]
async fn unsupported_profile_kinds_are_never_requested() {
    let mut capabilities = BackendCapabilities::uniform(SupportStatus::Supported);
    for cap in &mut capabilities.profiles {
        if cap.kind == ProfileKind::Histogram {
            cap.status = SupportStatus::Unsupported;
        }
    }

    let (session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(&mut handle, &number_schema(10), &capabilities).await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    settle().await;
    handle.next_call().await.respond(&DataChunk {
        row_start: 0,
        columns: Vec::new(),
    });

    controller.toggle_expand_column(2).unwrap();
    settle().await;
    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected a profile batch, got {:?}", profiles.call);
    };
    let kinds: Vec<ProfileKind> = requests.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ProfileKind::NullCount, ProfileKind::SummaryStats]);

    // An explicit read of the unsupported kind stays inert.
    let snap = controller
        .column_profile_state(2, ProfileKind::Histogram)
        .unwrap();
    assert_eq!(snap.status, EntryStatus::NotRequested);
    settle().await;
    assert_eq!(handle.calls_for("get_column_profiles"), 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_reads_share_one_in_flight_request() {
    let (session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    // Two cells of the same block, read back to back.
    controller.cell_state(0, 0).unwrap();
    controller.cell_state(49, 9).unwrap();
    // Two reads of the same profile key.
    controller
        .column_profile_state(1, ProfileKind::NullCount)
        .unwrap();
    controller
        .column_profile_state(1, ProfileKind::NullCount)
        .unwrap();
    settle().await;

    assert_eq!(handle.calls_for("get_data_values"), 1);
    assert_eq!(handle.calls_for("get_column_profiles"), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_value_shows_through_exactly_one_refetch() {
    let (session, mut handle, table) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    settle().await;
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);
    settle().await;

    handle.emit(table, BackendEvent::DataChanged);
    settle().await;

    // First read: old value still shown, refetch goes out.
    let snap = controller.cell_state(0, 0).unwrap();
    assert_eq!(snap.value, Some(CellValue::Value("r0c0".into())));
    assert_eq!(snap.status, EntryStatus::Pending);
    assert!(snap.stale);

    // Further reads attach to the pending refetch instead of piling on.
    controller.cell_state(1, 1).unwrap();
    controller.cell_state(2, 2).unwrap();
    settle().await;
    assert_eq!(handle.calls_for("get_data_values"), 2);

    let refetch = handle.next_call().await;
    let chunk = chunk_for(&refetch.call);
    refetch.respond(&chunk);
    settle().await;
    let snap = controller.cell_state(0, 0).unwrap();
    assert_eq!(snap.status, EntryStatus::Ready);
    assert!(!snap.stale);
}

#[tokio::test(start_paused = true)]
async fn schema_and_capabilities_survive_data_changes() {
    let (session, mut handle, table) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(4),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    // Row data mutated; the column set did not.
    handle.emit(table, BackendEvent::DataChanged);
    settle().await;

    let schema = controller.schema().unwrap();
    assert_eq!(schema.status, EntryStatus::Ready);
    assert!(!schema.stale);
    assert_eq!(schema.value.map(|s| s.len()), Some(4));
    let caps = controller.capabilities().unwrap();
    assert_eq!(caps.status, EntryStatus::Ready);
    assert!(!caps.stale);

    // Header reads keep hitting the cache; no refetch went out.
    settle().await;
    assert_eq!(handle.calls_for("get_schema"), 1);
    assert_eq!(handle.calls_for("get_supported_features"), 1);

    // An in-flight schema fetch is not discarded by a data change either.
    handle.emit(table, BackendEvent::SchemaChanged);
    settle().await;
    controller.schema().unwrap();
    settle().await;
    let refetch = handle.next_call().await;
    assert_eq!(refetch.call.method(), "get_schema");
    handle.emit(table, BackendEvent::DataChanged);
    settle().await;
    refetch.respond(&number_schema(4));
    settle().await;

    let schema = controller.schema().unwrap();
    assert_eq!(schema.status, EntryStatus::Ready);
    assert!(!schema.stale);
    assert_eq!(controller.stats_snapshot().responses_discarded, 0);
    assert_eq!(handle.calls_for("get_schema"), 2);
}

#[tokio::test(start_paused = true)]
async fn schema_change_discards_everything_at_once() {
    let (session, mut handle, table) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    controller.toggle_expand_column(0).unwrap();
    settle().await;
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);
    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected a profile batch, got {:?}", profiles.call);
    };
    let requests = requests.clone();
    profiles.respond(&replies_for(&requests));
    settle().await;

    let mut schema_rx = controller.subscribe(KeyFilter::Schema).unwrap();
    handle.emit(table, BackendEvent::SchemaChanged);
    settle().await;

    let mut invalidated = Vec::new();
    while let Ok(notice) = schema_rx.try_recv() {
        if notice.phase == EntryPhase::Invalidated {
            invalidated.push(notice.key);
        }
    }
    assert!(invalidated.contains(&CacheKey::Schema));
    assert!(invalidated.contains(&CacheKey::Capabilities));

    // No half-migrated state: profiles and cells start from scratch.
    let profile = controller
        .column_profile_state(0, ProfileKind::NullCount)
        .unwrap();
    assert_eq!(profile.status, EntryStatus::NotRequested);
    assert_eq!(profile.value, None);
    let cell = controller.cell_state(0, 0).unwrap();
    assert_eq!(cell.value, None);

    // The schema read kicks off the refetch cycle.
    let schema = controller.schema().unwrap();
    assert_eq!(schema.status, EntryStatus::Pending);
    assert_eq!(schema.value, None);
    settle().await;
    assert_eq!(handle.calls_for("get_schema"), 2);
}

#[tokio::test(start_paused = true)]
async fn busy_backend_defers_profiles_but_not_cells() {
    let (session, mut handle, table) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    handle.emit(table, BackendEvent::Busy(true));
    settle().await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    controller.toggle_expand_column(4).unwrap();
    settle().await;

    // Cell data is essential; it goes out even while busy.
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);
    // Profiles wait, surfaced as pending so nothing re-triggers them.
    assert_eq!(handle.calls_for("get_column_profiles"), 0);
    let snap = controller
        .column_profile_state(4, ProfileKind::NullCount)
        .unwrap();
    assert_eq!(snap.status, EntryStatus::Pending);

    handle.emit(table, BackendEvent::Busy(false));
    settle().await;
    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected the released profile batch, got {:?}", profiles.call);
    };
    assert!(requests.iter().all(|r| r.column_index == 4));
    assert_eq!(handle.calls_for("get_column_profiles"), 1);
}

#[tokio::test(start_paused = true)]
async fn unresolved_fetch_times_out_per_key() {
    let config = ExplorerConfig {
        fetch_timeout: Duration::from_secs(1),
        ..test_config()
    };
    let (session, mut handle, _) = open_session(config).await;
    let controller = session.controller();
    let mut schema_rx = controller.subscribe(KeyFilter::Schema).unwrap();

    // Never respond to the startup fetches.
    let _schema_call = handle.next_call().await;
    let _caps_call = handle.next_call().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut failed = Vec::new();
    while let Ok(notice) = schema_rx.try_recv() {
        if notice.phase == EntryPhase::Failed {
            failed.push(notice.key);
        }
    }
    assert!(failed.contains(&CacheKey::Schema));
    assert!(failed.contains(&CacheKey::Capabilities));
    assert_eq!(controller.stats_snapshot().timeouts, 2);

    // A timed-out key retries on its next read, not by itself.
    assert_eq!(handle.calls_for("get_schema"), 1);
    let snap = controller.schema().unwrap();
    assert_eq!(snap.status, EntryStatus::Pending);
    settle().await;
    assert_eq!(handle.calls_for("get_schema"), 2);
}

#[tokio::test(start_paused = true)]
async fn rapid_viewport_updates_coalesce_into_one_fetch_pass() {
    let config = ExplorerConfig {
        coalesce_delay: Duration::from_millis(5),
        ..test_config()
    };
    let (session, mut handle, _) = open_session(config).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    // A scroll gesture: four positions inside one coalescing window.
    controller.set_viewport(Viewport::new(100, 50, 0, 10)).unwrap();
    controller.set_viewport(Viewport::new(200, 50, 0, 10)).unwrap();
    controller.set_viewport(Viewport::new(300, 50, 0, 10)).unwrap();
    controller.set_viewport(Viewport::new(400, 50, 0, 10)).unwrap();
    settle().await;

    assert_eq!(controller.stats_snapshot().viewport_updates_coalesced, 3);
    assert_eq!(handle.calls_for("get_data_values"), 1);
    let block = handle.next_call().await;
    assert_eq!(
        block.call,
        ScriptedCall::GetDataValues {
            table: controller.table(),
            rows: 400..450,
            columns: 0..10,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn profile_batch_failures_stay_per_item() {
    let (session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    controller.toggle_expand_column(5).unwrap();
    settle().await;
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);

    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected a profile batch, got {:?}", profiles.call);
    };
    // One item fails, the others succeed.
    let mut replies = replies_for(requests);
    replies[1].result = Err("histogram overflow".to_string());
    let failed_kind = replies[1].kind;
    profiles.respond(&replies);
    settle().await;

    let ok = controller
        .column_profile_state(5, ProfileKind::NullCount)
        .unwrap();
    assert_eq!(ok.status, EntryStatus::Ready);

    let failed = controller.column_profile_state(5, failed_kind).unwrap();
    // The read of a failed key schedules its retry; the recorded failure is
    // what the previous attempt reported.
    assert_eq!(failed.status, EntryStatus::Pending);
    assert_eq!(failed.value, None);
    // Startup pair, the block, and the two successful profile items.
    assert_eq!(controller.stats_snapshot().responses_applied, 5);
}

#[tokio::test(start_paused = true)]
async fn narrow_notifications_reach_only_interested_columns() {
    let config = ExplorerConfig {
        cols_per_block: 2,
        retain_margin_columns: 2,
        ..test_config()
    };
    let (session, mut handle, _) = open_session(config).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    let mut col0 = controller.subscribe(KeyFilter::Column(0)).unwrap();
    let mut col5 = controller.subscribe(KeyFilter::Column(5)).unwrap();

    // Block (0, 0) covers columns 0..2 only.
    controller.cell_state(0, 0).unwrap();
    settle().await;
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);
    settle().await;

    let mut col0_notices = Vec::new();
    while let Ok(notice) = col0.try_recv() {
        col0_notices.push(notice);
    }
    assert_eq!(
        col0_notices.iter().map(|n| n.phase).collect::<Vec<_>>(),
        vec![EntryPhase::Pending, EntryPhase::Ready],
    );
    assert!(col5.try_recv().is_err(), "column 5 saw an unrelated block");

    // A profile for column 5 stays invisible to the column-0 subscriber.
    controller
        .column_profile_state(5, ProfileKind::NullCount)
        .unwrap();
    settle().await;
    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected a profile batch, got {:?}", profiles.call);
    };
    let requests = requests.clone();
    profiles.respond(&replies_for(&requests));
    settle().await;

    assert!(col0.try_recv().is_err());
    let notice = col5.try_recv().unwrap();
    assert_eq!(
        notice.key,
        CacheKey::Profile {
            column: 5,
            kind: ProfileKind::NullCount,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn closed_session_rejects_reads_and_discards_responses() {
    let (mut session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    let schema_call = handle.next_call().await;

    session.close();
    assert!(matches!(
        controller.cell_state(0, 0),
        Err(ExplorerError::SessionClosed)
    ));
    assert!(matches!(controller.schema(), Err(ExplorerError::SessionClosed)));

    // A response landing after close is dropped on the floor.
    schema_call.respond(&number_schema(2));
    settle().await;
    assert_eq!(controller.stats_snapshot().responses_applied, 0);
}

#[tokio::test(start_paused = true)]
async fn backend_error_surfaces_as_per_key_failure() {
    let (session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    let mut schema_rx = controller.subscribe(KeyFilter::Schema).unwrap();

    for _ in 0..2 {
        let pending = handle.next_call().await;
        match pending.call.method() {
            "get_schema" => pending.respond_err("kernel restarted"),
            "get_supported_features" => {
                pending.respond(&BackendCapabilities::uniform(SupportStatus::Supported))
            }
            other => panic!("unexpected startup call {other}"),
        }
    }
    settle().await;

    let failed: Vec<_> = std::iter::from_fn(|| schema_rx.try_recv().ok())
        .filter(|n| n.phase == EntryPhase::Failed)
        .map(|n| n.key)
        .collect();
    assert_eq!(failed, vec![CacheKey::Schema]);

    // The capability fetch was unaffected.
    let caps = controller.capabilities().unwrap();
    assert_eq!(caps.status, EntryStatus::Ready);
    assert!(caps
        .value
        .map(|c| c.profile_status(ProfileKind::NullCount).is_usable())
        .unwrap_or(false));
}

#[tokio::test(start_paused = true)]
async fn collapsing_a_column_cancels_its_in_flight_profiles() {
    let (session, mut handle, _) = open_session(test_config()).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    controller.set_viewport(Viewport::new(0, 50, 0, 10)).unwrap();
    settle().await;
    let block = handle.next_call().await;
    let chunk = chunk_for(&block.call);
    block.respond(&chunk);
    settle().await;

    assert!(controller.toggle_expand_column(2).unwrap());
    settle().await;
    let profiles = handle.next_call().await;
    let ScriptedCall::GetColumnProfiles { ref requests, .. } = profiles.call else {
        panic!("expected a profile batch, got {:?}", profiles.call);
    };
    assert_eq!(requests.len(), 3);
    let requests = requests.clone();

    // Collapse before the batch resolves; the replan drops every item.
    assert!(!controller.toggle_expand_column(2).unwrap());
    settle().await;
    let stats = controller.stats_snapshot();
    assert_eq!(stats.cancellations, 3);

    profiles.respond(&replies_for(&requests));
    settle().await;
    assert_eq!(controller.stats_snapshot().responses_discarded, 3);
    assert_eq!(handle.calls_for("get_column_profiles"), 1);

    // Nothing survived the collapse; an explicit read starts from scratch.
    let snap = controller
        .column_profile_state(2, ProfileKind::NullCount)
        .unwrap();
    assert_eq!(snap.status, EntryStatus::Pending);
    assert_eq!(snap.value, None);
}

#[tokio::test(start_paused = true)]
async fn evicted_block_fetch_is_cancelled_and_response_discarded() {
    let config = ExplorerConfig {
        max_cached_blocks: 1,
        ..test_config()
    };
    let (session, mut handle, _) = open_session(config).await;
    let controller = session.controller();
    resolve_startup(
        &mut handle,
        &number_schema(10),
        &BackendCapabilities::uniform(SupportStatus::Supported),
    )
    .await;

    // Two reads in distant blocks; the second evicts the first while its
    // fetch is still on the wire.
    controller.cell_state(0, 0).unwrap();
    controller.cell_state(500, 0).unwrap();
    settle().await;

    let first = handle.next_call().await;
    assert_eq!(
        first.call,
        ScriptedCall::GetDataValues {
            table: controller.table(),
            rows: 0..50,
            columns: 0..10,
        }
    );
    let second = handle.next_call().await;
    assert_eq!(
        second.call,
        ScriptedCall::GetDataValues {
            table: controller.table(),
            rows: 500..550,
            columns: 0..10,
        }
    );

    let stats = controller.stats_snapshot();
    assert_eq!(stats.blocks_evicted, 1);
    assert_eq!(stats.cancellations, 1);

    // The evicted block's response has nowhere to land.
    let evicted_chunk = chunk_for(&first.call);
    first.respond(&evicted_chunk);
    let chunk = chunk_for(&second.call);
    second.respond(&chunk);
    settle().await;

    let stats = controller.stats_snapshot();
    assert_eq!(stats.responses_discarded, 1);
    let snap = controller.cell_state(500, 0).unwrap();
    assert_eq!(snap.status, EntryStatus::Ready);
    assert_eq!(snap.value, Some(CellValue::Value("r500c0".into())));
}
