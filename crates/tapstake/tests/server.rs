//! Integration tests for the server builder, event fan-out and sweeper.
//!
//! The sweeper runs on real time with a short interval; room clocks are
//! still advanced by hand.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tapstake::prelude::*;
use tapstake::{ConfigError, spawn_sweeper};
use tapstake_tick::IntervalConfig;
use tokio::sync::oneshot;

// =========================================================================
// Helpers
// =========================================================================

fn fast_sweep() -> IntervalConfig {
    IntervalConfig {
        interval: Duration::from_millis(20),
        initial_jitter: Duration::ZERO,
        ..Default::default()
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        store: StoreConfig::in_memory(),
        sweep: fast_sweep(),
        ..Default::default()
    }
}

async fn server_with_clock(clock: Arc<ManualClock>) -> TapstakeServer {
    TapstakeServer::builder()
        .config(test_config())
        .clock(clock)
        .build()
        .await
        .unwrap()
}

async fn funded(manager: &RoomManager, stars: i64) -> UserId {
    let user = manager.ledger().open_account(false).await.unwrap();
    manager
        .ledger()
        .deposit(user, Stars::whole(stars), "test funding")
        .await
        .unwrap();
    user
}

/// Polls `check` until it holds, failing after two seconds.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polling = async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), polling)
        .await
        .expect("condition not reached in time");
}

/// The committed status, not the effective one.
async fn status_of(manager: &RoomManager, room: RoomId) -> RoomStatus {
    manager.room(room).await.unwrap().room.status
}

// =========================================================================
// Builder
// =========================================================================

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let mut config = test_config();
    config.rooms.public.capacity = 1;
    let err = TapstakeServer::builder()
        .config(config)
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, TapstakeError::Config(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn test_build_with_default_rooms() {
    let server = TapstakeServer::builder()
        .config(test_config())
        .build()
        .await
        .unwrap();
    assert_eq!(server.manager().config(), &RoomConfig::default());
}

#[tokio::test]
async fn test_build_opens_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        store: StoreConfig::file(dir.path().join("rooms.db")),
        ..test_config()
    };

    let server = TapstakeServer::builder()
        .config(config.clone())
        .build()
        .await
        .unwrap();
    let player = funded(server.manager(), 75).await;
    server.manager().store().close().await;
    drop(server);

    let reopened = TapstakeServer::builder().config(config).build().await.unwrap();
    assert_eq!(
        reopened.manager().ledger().balance(player).await.unwrap(),
        Stars::whole(75)
    );
    reopened.manager().ledger().reconcile_all().await.unwrap();
}

// =========================================================================
// Events
// =========================================================================

#[tokio::test]
async fn test_subscribers_see_committed_room_events() {
    let server = server_with_clock(Arc::new(ManualClock::starting_now())).await;
    let mut events = server.subscribe();
    let manager = server.manager();
    let player = funded(manager, 100).await;

    let joined = manager.join_or_create(player, Stars::whole(20)).await.unwrap();

    let created = events.recv().await.unwrap();
    assert_eq!(created.room_id, joined.room_id);
    assert_eq!(created.kind, RoomEventKind::Created);
    let seated = events.recv().await.unwrap();
    assert_eq!(seated.kind, RoomEventKind::ParticipantJoined { user_id: player });
    assert_eq!(seated.participant_count, 1);
}

// =========================================================================
// Sweeper
// =========================================================================

#[tokio::test]
async fn test_sweeper_expires_private_rooms() {
    let clock = Arc::new(ManualClock::starting_now());
    let server = server_with_clock(clock.clone()).await;
    let manager = server.manager();
    let organizer = funded(manager, 100).await;
    let created = manager
        .create_private_room(organizer, Stars::whole(30))
        .await
        .unwrap();

    let sweeper = server.spawn_sweeper();
    clock.advance(Duration::from_secs(301));
    eventually(|| async { status_of(manager, created.room_id).await == RoomStatus::Expired })
        .await;

    assert_eq!(
        manager.ledger().balance(organizer).await.unwrap(),
        Stars::whole(100)
    );
    sweeper.shutdown().await;
    manager.ledger().reconcile_all().await.unwrap();
}

#[tokio::test]
async fn test_sweeper_starts_rooms_after_countdown() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut config = test_config();
    config.rooms.public.capacity = 2;
    let server = TapstakeServer::builder()
        .config(config)
        .clock(clock.clone())
        .build()
        .await
        .unwrap();
    let manager = Arc::clone(server.manager());
    let a = funded(&manager, 50).await;
    let b = funded(&manager, 50).await;
    manager.join_or_create(a, Stars::whole(20)).await.unwrap();
    let room = manager.join_or_create(b, Stars::whole(20)).await.unwrap().room_id;

    let sweeper = spawn_sweeper(Arc::clone(&manager), fast_sweep());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(status_of(&manager, room).await, RoomStatus::Preparation);

    clock.advance(Duration::from_secs(10));
    eventually(|| async { status_of(&manager, room).await == RoomStatus::Active }).await;

    sweeper.shutdown().await;
}

#[tokio::test]
async fn test_sweeper_shutdown_stops_task() {
    let server = server_with_clock(Arc::new(ManualClock::starting_now())).await;
    let sweeper = server.spawn_sweeper();
    assert!(!sweeper.is_finished());
    sweeper.shutdown().await;
}

// =========================================================================
// Run loop
// =========================================================================

#[tokio::test]
async fn test_run_returns_after_shutdown_signal() {
    let clock = Arc::new(ManualClock::starting_now());
    let server = server_with_clock(clock.clone()).await;
    let manager = Arc::clone(server.manager());
    let organizer = funded(&manager, 100).await;
    manager
        .create_private_room(organizer, Stars::whole(40))
        .await
        .unwrap();
    clock.advance(Duration::from_secs(400));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run(async move {
        let _ = stop_rx.await;
    }));

    eventually(|| async {
        manager.ledger().balance(organizer).await.unwrap() == Stars::whole(100)
    })
    .await;

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}
