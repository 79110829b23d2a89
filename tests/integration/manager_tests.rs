//! Tile manager behavior over the reference 4096x8192 image.

use std::sync::Arc;
use std::time::Duration;

use subsampling::config::{TileAnimationSpec, TransformKind};
use subsampling::geometry::IntRect;
use subsampling::tile::{RefreshStatus, TileCache, TileImagePool, TileState, ALPHA_OPAQUE};

use super::test_utils::{
    build_fixture, build_fixture_shared, corner_visible_rect, count_state, test_config,
    wait_until,
};

fn refresh(fixture: &mut super::test_utils::Fixture, scale: f32) -> RefreshStatus {
    fixture.manager.refresh_tiles(
        scale,
        corner_visible_rect(scale),
        0,
        TransformKind::empty(),
        "test",
    )
}

// =============================================================================
// Grid Planning
// =============================================================================

#[tokio::test]
async fn test_reference_grid_size_map() {
    let fixture = build_fixture(test_config());
    let sizes = fixture.manager.tile_grid_size_map();

    let levels: Vec<u32> = sizes.keys().copied().collect();
    assert_eq!(levels, vec![1, 2, 4, 8]);
    assert_eq!((sizes[&1].x, sizes[&1].y), (8, 16));
    assert_eq!((sizes[&2].x, sizes[&2].y), (4, 8));
    assert_eq!((sizes[&4].x, sizes[&4].y), (2, 4));
    assert_eq!((sizes[&8].x, sizes[&8].y), (1, 2));
}

// =============================================================================
// Sample Size Selection
// =============================================================================

#[tokio::test]
async fn test_scale_one_loads_nothing() {
    let mut fixture = build_fixture(test_config());

    let status = refresh(&mut fixture, 1.0);

    assert_eq!(status, RefreshStatus::NoSubsampling);
    assert_eq!(status.code(), -3);
    assert_eq!(fixture.manager.sample_size(), 0);
    assert_eq!(fixture.manager.stats().decodes_dispatched, 0);
    assert!(fixture.manager.foreground_tiles().is_empty());
    assert!(fixture.manager.background_tiles().is_empty());
}

#[tokio::test]
async fn test_scale_three_loads_overlapping_tiles_only() {
    let mut fixture = build_fixture(test_config());

    let status = refresh(&mut fixture, 3.0);
    assert_eq!(status, RefreshStatus::Refreshed);
    assert_eq!(fixture.manager.sample_size(), 2);

    let load_rect = fixture.manager.image_load_rect();
    assert_eq!(load_rect, IntRect::new(0, 0, 3416, 4776));

    for grid in fixture.manager.grids() {
        for tile in &grid.tiles {
            let expected = if grid.sample_size == 2 && tile.src_rect.overlaps(&load_rect) {
                TileState::Loading
            } else {
                TileState::None
            };
            assert_eq!(tile.state(), expected, "{}", tile);
        }
    }
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loading), 20);

    fixture.manager.wait_for_idle().await;
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 20);
    assert_eq!(count_state(&fixture.manager, 2, TileState::None), 12);
    assert_eq!(fixture.probe.decodes(), 20);

    let foreground = fixture.manager.foreground_tiles();
    assert_eq!(foreground.len(), 20);
    for snapshot in &foreground {
        assert_eq!(snapshot.state, TileState::Loaded);
        assert_eq!(snapshot.alpha, ALPHA_OPAQUE);
        let image = snapshot.image.as_ref().expect("loaded tile has an image");
        assert_eq!((image.width(), image.height()), (512, 512));
    }
}

#[tokio::test]
async fn test_scale_twenty_four_selects_finest_level() {
    let mut fixture = build_fixture(test_config());

    let status = refresh(&mut fixture, 24.0);

    assert_eq!(status, RefreshStatus::Refreshed);
    assert_eq!(fixture.manager.sample_size(), 1);
    assert_eq!(count_state(&fixture.manager, 1, TileState::Loading), 25);

    fixture.manager.wait_for_idle().await;
    assert_eq!(count_state(&fixture.manager, 1, TileState::Loaded), 25);
    let counts = fixture.manager.state_counts();
    assert_eq!(counts.loaded, 25);
    assert_eq!(counts.loading, 0);
}

#[tokio::test]
async fn test_sample_size_is_observable() {
    let mut fixture = build_fixture(test_config());
    let receivers = fixture.manager.subscribe();

    refresh(&mut fixture, 3.0);
    assert_eq!(*receivers.sample_size.borrow(), 2);
    assert_eq!(
        *receivers.image_load_rect.borrow(),
        fixture.manager.image_load_rect()
    );

    refresh(&mut fixture, 24.0);
    assert_eq!(*receivers.sample_size.borrow(), 1);
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_repeated_refresh_is_idempotent() {
    let mut fixture = build_fixture(test_config());

    refresh(&mut fixture, 3.0);
    let after_first = fixture.manager.stats();
    refresh(&mut fixture, 3.0);
    assert_eq!(fixture.manager.stats(), after_first);

    fixture.manager.wait_for_idle().await;
    let settled = fixture.manager.stats();
    refresh(&mut fixture, 3.0);
    refresh(&mut fixture, 3.0);
    assert_eq!(fixture.manager.stats(), settled);
    assert_eq!(fixture.probe.decodes(), 20);
}

// =============================================================================
// Guards
// =============================================================================

#[tokio::test]
async fn test_rotation_must_be_multiple_of_ninety() {
    let mut fixture = build_fixture(test_config());
    let rect = corner_visible_rect(3.0);

    let status = fixture
        .manager
        .refresh_tiles(3.0, rect, 45, TransformKind::empty(), "test");
    assert_eq!(status, RefreshStatus::InvalidRotation);
    assert_eq!(status.code(), -1);
    assert_eq!(fixture.manager.stats().decodes_dispatched, 0);

    for rotation in [90, 180, -90, 270] {
        let status = fixture
            .manager
            .refresh_tiles(3.0, rect, rotation, TransformKind::empty(), "test");
        assert_eq!(status, RefreshStatus::Refreshed, "rotation {}", rotation);
    }
}

#[tokio::test]
async fn test_paused_transform_skips_refresh() {
    let mut fixture = build_fixture(test_config());
    let rect = corner_visible_rect(3.0);

    for transform in [TransformKind::SCALE, TransformKind::OFFSET, TransformKind::LOCATE] {
        let status = fixture.manager.refresh_tiles(3.0, rect, 0, transform, "test");
        assert_eq!(status, RefreshStatus::Paused);
        assert_eq!(status.code(), -2);
    }
    assert_eq!(fixture.manager.sample_size(), 0);
    assert_eq!(fixture.manager.stats().decodes_dispatched, 0);

    let status = fixture
        .manager
        .refresh_tiles(3.0, rect, 0, TransformKind::FLING | TransformKind::GESTURE, "test");
    assert_eq!(status, RefreshStatus::Refreshed);
}

#[tokio::test]
async fn test_empty_visible_rect_frees_everything() {
    let mut fixture = build_fixture(test_config());
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;

    let status = fixture
        .manager
        .refresh_tiles(3.0, IntRect::ZERO, 0, TransformKind::empty(), "test");

    assert_eq!(status, RefreshStatus::EmptyLoadRect);
    assert_eq!(status.code(), -4);
    assert_eq!(fixture.manager.state_counts().loaded, 0);
    assert_eq!(fixture.manager.image_load_rect(), IntRect::ZERO);
    assert!(fixture.manager.foreground_tiles().is_empty());
}

/// Uncached fixture whose pool can hold every reference tile.
fn uncached_fixture() -> super::test_utils::Fixture {
    let mut config = test_config();
    config.memory_cache = false;
    let pool = Arc::new(TileImagePool::with_limits(64, 64 * 1024 * 1024));
    build_fixture_shared(config, Arc::new(TileCache::new()), pool)
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_zoom_out_cancels_pending_loads() {
    let mut fixture = build_fixture(test_config());
    fixture.probe.set_delay(Duration::from_millis(100));

    refresh(&mut fixture, 3.0);
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loading), 20);

    let status = refresh(&mut fixture, 1.0);
    assert_eq!(status, RefreshStatus::NoSubsampling);
    for grid in fixture.manager.grids() {
        for tile in &grid.tiles {
            assert_eq!(tile.state(), TileState::None);
            assert!(!tile.has_job());
        }
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    fixture.manager.process_pending_completions();

    assert_eq!(fixture.manager.stats().decoded, 0);
    assert_eq!(fixture.manager.state_counts().loaded, 0);
    assert!(fixture.probe.decodes() <= 2);
}

#[tokio::test]
async fn test_canceled_decodes_recycle_their_buffers() {
    let mut fixture = uncached_fixture();
    fixture.probe.set_delay(Duration::from_millis(100));

    refresh(&mut fixture, 3.0);
    let probe = fixture.probe.clone();
    assert!(wait_until(|| probe.max_active() >= 1).await);

    // Cancel while decodes are running on blocking workers
    assert_eq!(refresh(&mut fixture, 1.0), RefreshStatus::NoSubsampling);
    tokio::time::sleep(Duration::from_millis(300)).await;
    fixture.manager.process_pending_completions();

    let decodes = fixture.probe.decodes();
    assert!(decodes >= 1);
    assert_eq!(fixture.manager.stats().decoded, 0);
    assert!(fixture.manager.stats().stale_results >= decodes as u64);
    assert_eq!(fixture.pool.pooled_count(), decodes);
}

#[tokio::test]
async fn test_stale_results_are_discarded() {
    let mut fixture = build_fixture(test_config());

    refresh(&mut fixture, 3.0);
    // Let every decode finish without applying the completions
    let probe = fixture.probe.clone();
    assert!(wait_until(|| probe.decodes() >= 20).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loading), 20);

    refresh(&mut fixture, 1.0);
    refresh(&mut fixture, 3.0);
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loading), 20);

    fixture.manager.process_pending_completions();
    assert_eq!(fixture.manager.stats().stale_results, 20);
    assert_eq!(fixture.manager.stats().decoded, 0);
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loading), 20);
    assert!(fixture.pool.pooled_count() > 0);

    fixture.manager.wait_for_idle().await;
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 20);
    assert_eq!(fixture.manager.stats().decoded, 20);
}

// =============================================================================
// Background Tiles
// =============================================================================

#[tokio::test]
async fn test_previous_level_stays_until_new_level_loads() {
    let mut fixture = build_fixture(test_config());
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;

    refresh(&mut fixture, 24.0);
    assert_eq!(fixture.manager.sample_size(), 1);

    // Level 2 tiles overlapping the new load rect are kept, the rest freed
    let load_rect = fixture.manager.image_load_rect();
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 9);
    let background = fixture.manager.background_tiles();
    assert_eq!(background.len(), 9);
    for snapshot in &background {
        assert_eq!(snapshot.sample_size, 2);
        assert_eq!(snapshot.state, TileState::Loaded);
        assert!(snapshot.src_rect.overlaps(&load_rect));
    }

    fixture.manager.wait_for_idle().await;
    assert_eq!(count_state(&fixture.manager, 1, TileState::Loaded), 25);
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 0);
    assert!(fixture.manager.background_tiles().is_empty());
}

#[tokio::test]
async fn test_background_tiles_disabled() {
    let mut config = test_config();
    config.background_tiles = false;
    let mut fixture = build_fixture(config);
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;

    refresh(&mut fixture, 24.0);

    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 0);
    assert!(fixture.manager.background_tiles().is_empty());
}

#[tokio::test]
async fn test_levels_outside_transition_are_freed() {
    let mut fixture = build_fixture(test_config());
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    refresh(&mut fixture, 24.0);
    fixture.manager.wait_for_idle().await;

    // Jumping from level 1 to level 4 keeps levels 1..=4 only
    refresh(&mut fixture, 1.5);
    assert_eq!(fixture.manager.sample_size(), 4);
    for grid in fixture.manager.grids() {
        if grid.sample_size == 8 {
            assert!(grid.tiles.iter().all(|t| t.state() == TileState::None));
        }
    }
    assert!(fixture
        .manager
        .background_tiles()
        .iter()
        .all(|t| t.sample_size == 1));
}

// =============================================================================
// Memory Cache
// =============================================================================

#[tokio::test]
async fn test_cached_tiles_reload_without_decoding() {
    let mut fixture = build_fixture(test_config());
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    assert_eq!(fixture.cache.len(), 20);

    refresh(&mut fixture, 1.0);
    assert_eq!(fixture.manager.state_counts().loaded, 0);
    assert_eq!(fixture.cache.len(), 20);

    refresh(&mut fixture, 3.0);
    let stats = fixture.manager.stats();
    assert_eq!(stats.cache_hits, 20);
    assert_eq!(stats.decodes_dispatched, 20);
    assert_eq!(fixture.probe.decodes(), 20);

    // Attached synchronously, without a fade
    let foreground = fixture.manager.foreground_tiles();
    assert_eq!(foreground.len(), 20);
    for snapshot in &foreground {
        assert_eq!(snapshot.state, TileState::Loaded);
        assert_eq!(snapshot.alpha, ALPHA_OPAQUE);
        assert!(snapshot.image.as_ref().is_some_and(|i| i.from_cache()));
    }
}

#[tokio::test]
async fn test_cache_is_shared_between_managers() {
    let first = build_fixture(test_config());
    let mut second = build_fixture_shared(test_config(), first.cache.clone(), first.pool.clone());
    let mut first = first;

    refresh(&mut first, 3.0);
    first.manager.wait_for_idle().await;
    first.manager.close("test");

    refresh(&mut second, 3.0);
    assert_eq!(second.manager.stats().cache_hits, 20);
    assert_eq!(second.probe.decodes(), 0);
}

#[tokio::test]
async fn test_memory_cache_disabled_always_decodes() {
    let mut config = test_config();
    config.memory_cache = false;
    let mut fixture = build_fixture(config);

    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    refresh(&mut fixture, 1.0);
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;

    assert_eq!(fixture.manager.stats().cache_hits, 0);
    assert_eq!(fixture.probe.decodes(), 40);
    assert!(fixture.cache.is_empty());
}

#[tokio::test]
async fn test_freed_tiles_return_buffers_to_pool() {
    let mut fixture = uncached_fixture();

    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 20);
    assert_eq!(fixture.pool.pooled_count(), 0);

    // The published snapshots still shared every bitmap until this refresh
    assert_eq!(refresh(&mut fixture, 1.0), RefreshStatus::NoSubsampling);
    assert_eq!(fixture.manager.stats().freed, 20);
    assert!(fixture.manager.subscribe().foreground_tiles.borrow().is_empty());
    assert_eq!(fixture.pool.pooled_count(), 20);
}

#[tokio::test]
async fn test_buffer_held_by_observer_recycles_on_release() {
    let mut fixture = uncached_fixture();

    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    let held = fixture.manager.subscribe().foreground_tiles.borrow().clone();
    assert_eq!(held.len(), 20);

    refresh(&mut fixture, 1.0);
    assert_eq!(fixture.pool.pooled_count(), 0);

    drop(held);
    assert_eq!(fixture.pool.pooled_count(), 20);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_failed_decode_marks_tile_error() {
    let mut fixture = build_fixture(test_config());
    let broken = IntRect::new(0, 0, 1024, 1024);
    fixture.probe.fail_rect(broken);

    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;

    assert_eq!(count_state(&fixture.manager, 2, TileState::Error), 1);
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 19);
    assert_eq!(fixture.manager.stats().failed, 1);
    let failed = fixture
        .manager
        .foreground_tiles()
        .into_iter()
        .find(|t| t.src_rect == broken)
        .expect("broken tile in foreground");
    assert_eq!(failed.state, TileState::Error);
    assert!(failed.image.is_none());

    // Not retried while it stays in the error state
    let dispatched = fixture.manager.stats().decodes_dispatched;
    refresh(&mut fixture, 3.0);
    fixture
        .manager
        .refresh_tiles(3.0, IntRect::new(0, 0, 170, 340), 0, TransformKind::empty(), "test");
    assert_eq!(fixture.manager.stats().decodes_dispatched, dispatched);

    // Freed tiles are retried on the next load
    fixture.probe.clear_failures();
    refresh(&mut fixture, 1.0);
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    assert_eq!(count_state(&fixture.manager, 2, TileState::Error), 0);
    assert_eq!(count_state(&fixture.manager, 2, TileState::Loaded), 20);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decode_parallelism_is_bounded() {
    let mut fixture = build_fixture(test_config());
    fixture.probe.set_delay(Duration::from_millis(10));

    refresh(&mut fixture, 24.0);
    fixture.manager.wait_for_idle().await;

    assert_eq!(fixture.probe.decodes(), 25);
    assert!(fixture.probe.max_active() >= 1);
    assert!(fixture.probe.max_active() <= 2, "max active {}", fixture.probe.max_active());
    assert!(fixture.probe.created() <= 2);
}

// =============================================================================
// Animation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_new_tiles_fade_in() {
    let mut config = test_config();
    config.animation = TileAnimationSpec::default();
    let mut fixture = build_fixture(config);

    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;
    assert!(fixture.manager.is_animating());
    assert!(fixture
        .manager
        .foreground_tiles()
        .iter()
        .all(|t| t.alpha < ALPHA_OPAQUE));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(fixture.manager.tick(tokio::time::Instant::now()));
    let alpha = fixture.manager.foreground_tiles()[0].alpha;
    assert!(alpha > 0 && alpha < ALPHA_OPAQUE, "alpha {}", alpha);

    tokio::time::advance(Duration::from_millis(150)).await;
    assert!(!fixture.manager.tick(tokio::time::Instant::now()));
    assert!(!fixture.manager.is_animating());
    assert!(fixture
        .manager
        .foreground_tiles()
        .iter()
        .all(|t| t.alpha == ALPHA_OPAQUE));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_clean_is_idempotent() {
    let mut fixture = build_fixture(test_config());
    refresh(&mut fixture, 3.0);
    fixture.manager.wait_for_idle().await;

    fixture.manager.clean("test");
    let after_first = fixture.manager.stats();
    fixture.manager.clean("test");

    assert_eq!(fixture.manager.stats(), after_first);
    assert_eq!(fixture.manager.state_counts().loaded, 0);
    assert_eq!(fixture.manager.sample_size(), 0);
    assert!(fixture.manager.foreground_tiles().is_empty());
    assert!(!fixture.manager.is_animating());

    // Usable again after cleaning
    assert_eq!(refresh(&mut fixture, 3.0), RefreshStatus::Refreshed);
    assert_eq!(fixture.manager.stats().cache_hits, 20);
}

#[tokio::test]
async fn test_close_stops_refreshes() {
    let mut fixture = build_fixture(test_config());
    let receivers = fixture.manager.subscribe();
    refresh(&mut fixture, 3.0);

    fixture.manager.close("test");

    assert!(fixture.manager.is_closed());
    assert!(!*receivers.ready.borrow());
    assert_eq!(fixture.manager.state_counts().loading, 0);
    assert_eq!(refresh(&mut fixture, 3.0), RefreshStatus::Closed);
    assert_eq!(refresh(&mut fixture, 3.0).code(), -5);
    assert!(fixture.probe.closed() >= 1);
}
