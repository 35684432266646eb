mod common;

use common::{FakeServer, ScriptedGps};
use safety_core::model::LOCATION_PING_ROUTE;
use safety_core::{
    CoreConfig, Dispatcher, LocationProvider, SafetyCore, SafetyError, SampleOutcome,
    SqliteKvStore, Zone, ZoneLookup,
};
use std::sync::Arc;
use tempfile::TempDir;

async fn start(
    db: &std::path::Path,
    server: &Arc<FakeServer>,
    gps: Arc<ScriptedGps>,
) -> SafetyCore<SqliteKvStore> {
    let storage = Arc::new(SqliteKvStore::open(db).expect("open sqlite store"));
    SafetyCore::start(
        CoreConfig::default(),
        storage,
        Arc::clone(server) as Arc<dyn Dispatcher>,
        Arc::clone(server) as Arc<dyn ZoneLookup>,
        gps as Arc<dyn LocationProvider>,
    )
    .await
    .expect("core starts")
}

#[tokio::test]
async fn offline_samples_survive_restart_and_replay_in_order() {
    let dir = TempDir::new().expect("temp dir");
    let db = dir.path().join("safety.db");
    let server = Arc::new(FakeServer::new(false));

    // 1. Offline session: every sample is queued with an unknown zone.
    {
        let gps = Arc::new(ScriptedGps::granted(vec![
            (28.6100, 77.2000),
            (28.6200, 77.2100),
            (28.6300, 77.2200),
        ]));
        let core = start(&db, &server, gps).await;
        core.location().start_tracking().await.expect("permission");

        for _ in 0..3 {
            let outcome = core.location().sample_once().await.expect("sample");
            assert!(matches!(
                outcome,
                SampleOutcome::Queued { sample, .. } if sample.zone == Zone::Unknown
            ));
        }
        assert_eq!(core.pending_count().await, 3);
    }

    // 2. Restart with connectivity back.
    server.set_online(true);
    let core = start(&db, &server, Arc::new(ScriptedGps::granted(vec![(1.0, 1.0)]))).await;
    assert_eq!(core.pending_count().await, 3);

    core.network().on_status_changed(false).await;
    let report = core
        .network()
        .on_status_changed(true)
        .await
        .expect("reconnect drains");
    assert_eq!(report.delivered(), 3);
    assert_eq!(core.pending_count().await, 0);

    let latitudes: Vec<f64> = server
        .bodies_for(LOCATION_PING_ROUTE)
        .iter()
        .map(|b| b["latitude"].as_f64().expect("latitude"))
        .collect();
    assert_eq!(latitudes, vec![28.61, 28.62, 28.63]);

    // 3. Nothing is replayed twice after another restart.
    drop(core);
    let core = start(&db, &server, Arc::new(ScriptedGps::granted(vec![(1.0, 1.0)]))).await;
    assert_eq!(core.pending_count().await, 0);
    assert_eq!(core.flush().await.delivered(), 0);
    assert_eq!(server.received().len(), 3);
}

#[tokio::test]
async fn restart_while_online_replays_backlog_before_new_samples() {
    let dir = TempDir::new().expect("temp dir");
    let db = dir.path().join("safety.db");
    let server = Arc::new(FakeServer::new(false));

    {
        let gps = Arc::new(ScriptedGps::granted(vec![(28.6100, 77.2000)]));
        let core = start(&db, &server, gps).await;
        core.location().start_tracking().await.expect("permission");
        core.location().sample_once().await.expect("sample");
        assert_eq!(core.pending_count().await, 1);
    }

    // The device boots with connectivity already up; the platform's first
    // report is "online" with no offline report before it.
    server.set_online(true);
    let gps = Arc::new(ScriptedGps::granted(vec![(28.7000, 77.3000)]));
    let core = start(&db, &server, gps).await;
    let report = core
        .network()
        .on_status_changed(true)
        .await
        .expect("first online report drains");
    assert_eq!(report.delivered(), 1);
    assert_eq!(core.pending_count().await, 0);

    core.location().start_tracking().await.expect("permission");
    core.location().sample_once().await.expect("sample");

    let latitudes: Vec<f64> = server
        .bodies_for(LOCATION_PING_ROUTE)
        .iter()
        .map(|b| b["latitude"].as_f64().expect("latitude"))
        .collect();
    assert_eq!(latitudes, vec![28.61, 28.70]);
}

#[tokio::test]
async fn online_samples_skip_the_queue() {
    let dir = TempDir::new().expect("temp dir");
    let server = Arc::new(FakeServer::new(true));
    server.set_zone(Some(Zone::Restricted));
    let gps = Arc::new(ScriptedGps::granted(vec![(28.6139, 77.2090)]));
    let core = start(&dir.path().join("safety.db"), &server, gps).await;

    core.location().start_tracking().await.expect("permission");
    let outcome = core.location().sample_once().await.expect("sample");

    assert!(matches!(outcome, SampleOutcome::Delivered(s) if s.zone == Zone::Restricted));
    assert_eq!(core.pending_count().await, 0);
    let bodies = server.bodies_for(LOCATION_PING_ROUTE);
    assert_eq!(bodies[0]["zoneType"], "restricted");
    assert!(bodies[0]["timestamp"].is_u64());
}

#[tokio::test]
async fn denied_permission_is_surfaced_once() {
    let dir = TempDir::new().expect("temp dir");
    let server = Arc::new(FakeServer::new(true));
    let core = start(
        &dir.path().join("safety.db"),
        &server,
        Arc::new(ScriptedGps::denied()),
    )
    .await;

    let err = core.location().start_tracking().await.unwrap_err();
    assert!(matches!(err, SafetyError::PermissionDenied));
    assert!(!err.is_retryable());
    assert!(server.received().is_empty());
}
