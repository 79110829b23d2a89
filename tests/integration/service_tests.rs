//! Tile service task driven through its handle.

use std::time::Duration;

use subsampling::config::{TileAnimationSpec, TransformKind};
use subsampling::tile::{RefreshStatus, TileService, TileState, ALPHA_OPAQUE};

use super::test_utils::{build_fixture, corner_visible_rect, test_config};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_refresh_through_handle_loads_tiles() {
    let fixture = build_fixture(test_config());
    let handle = TileService::spawn(fixture.manager);
    let mut receivers = handle.subscribe();

    let status = handle
        .refresh_tiles(3.0, corner_visible_rect(3.0), 0, TransformKind::empty(), "test")
        .await;
    assert_eq!(status, RefreshStatus::Refreshed);
    assert_eq!(*receivers.sample_size.borrow(), 2);

    let loaded = tokio::time::timeout(
        SETTLE_TIMEOUT,
        receivers
            .foreground_tiles
            .wait_for(|tiles| !tiles.is_empty() && tiles.iter().all(|t| t.state == TileState::Loaded)),
    )
    .await
    .is_ok();
    assert!(loaded, "foreground tiles did not load");
    assert_eq!(receivers.foreground_tiles.borrow().len(), 20);

    let stats = handle.stats().await.expect("service running");
    assert_eq!(stats.decoded, 20);
    assert_eq!(fixture.probe.decodes(), 20);
}

#[tokio::test]
async fn test_guard_statuses_pass_through() {
    let fixture = build_fixture(test_config());
    let handle = TileService::spawn(fixture.manager);
    let rect = corner_visible_rect(3.0);

    assert_eq!(
        handle
            .refresh_tiles(3.0, rect, 30, TransformKind::empty(), "test")
            .await,
        RefreshStatus::InvalidRotation
    );
    assert_eq!(
        handle
            .refresh_tiles(3.0, rect, 0, TransformKind::SCALE, "test")
            .await,
        RefreshStatus::Paused
    );
    assert_eq!(
        handle
            .refresh_tiles(1.0, rect, 0, TransformKind::empty(), "test")
            .await,
        RefreshStatus::NoSubsampling
    );
}

#[tokio::test]
async fn test_clean_keeps_service_running() {
    let fixture = build_fixture(test_config());
    let handle = TileService::spawn(fixture.manager);
    let receivers = handle.subscribe();

    handle
        .refresh_tiles(3.0, corner_visible_rect(3.0), 0, TransformKind::empty(), "test")
        .await;
    handle.clean("test").await;

    assert!(receivers.foreground_tiles.borrow().is_empty());
    assert_eq!(*receivers.sample_size.borrow(), 0);
    assert!(!handle.is_closed());
    assert_eq!(
        handle
            .refresh_tiles(3.0, corner_visible_rect(3.0), 0, TransformKind::empty(), "test")
            .await,
        RefreshStatus::Refreshed
    );
}

#[tokio::test]
async fn test_close_stops_service() {
    let fixture = build_fixture(test_config());
    let handle = TileService::spawn(fixture.manager);
    let receivers = handle.subscribe();

    handle
        .refresh_tiles(3.0, corner_visible_rect(3.0), 0, TransformKind::empty(), "test")
        .await;
    handle.close("test").await;

    assert!(!*receivers.ready.borrow());
    assert!(receivers.foreground_tiles.borrow().is_empty());
    assert_eq!(
        handle
            .refresh_tiles(3.0, corner_visible_rect(3.0), 0, TransformKind::empty(), "test")
            .await,
        RefreshStatus::Closed
    );
    assert!(handle.stats().await.is_none());
    assert!(fixture.probe.closed() >= 1);

    // Closing twice is harmless
    handle.close("test").await;
}

#[tokio::test]
async fn test_service_drives_fade_in() {
    let mut config = test_config();
    config.animation = TileAnimationSpec {
        enabled: true,
        duration: Duration::from_millis(50),
        interval: Duration::from_millis(5),
    };
    let fixture = build_fixture(config);
    let handle = TileService::spawn(fixture.manager);
    let mut receivers = handle.subscribe();

    handle
        .refresh_tiles(3.0, corner_visible_rect(3.0), 0, TransformKind::empty(), "test")
        .await;

    let opaque = tokio::time::timeout(
        SETTLE_TIMEOUT,
        receivers.foreground_tiles.wait_for(|tiles| {
            !tiles.is_empty()
                && tiles
                    .iter()
                    .all(|t| t.state == TileState::Loaded && t.alpha == ALPHA_OPAQUE)
        }),
    )
    .await
    .is_ok();
    assert!(opaque, "tiles never finished fading in");
}
