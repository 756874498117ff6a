use std::rc::Rc;
use std::time::Duration;

use autoplay_guard::dom::{InputKind, NodeRef, SitePreferences};
use autoplay_guard::{EngineConfig, EngineController, MemoryFlagStore, Page};
use url::Url;

fn video_page(url: &str) -> (Page, NodeRef) {
    let page = Page::new(Url::parse(url).unwrap());
    let video = page.document.create_element("video");
    page.document.body().unwrap().append_child(&video);
    (page, video)
}

fn install(page: &Page, enabled: bool) -> Rc<EngineController> {
    let flags = Rc::new(MemoryFlagStore::with_value("globalEnabled", enabled));
    EngineController::install(page, EngineConfig::default(), flags)
}

#[tokio::test(start_paused = true)]
async fn writes_site_preferences_on_recognized_host() {
    let (page, _video) = video_page("https://www.youtube.com/watch?v=abc");
    let engine = install(&page, true);

    assert!(engine.hint().applies());
    assert_eq!(
        page.local_storage.get_item("yt-player-autoplay").as_deref(),
        Some("false")
    );
    assert_eq!(
        page.local_storage
            .get_item("yt.autonav::autonav_disabled")
            .as_deref(),
        Some("true")
    );
}

#[tokio::test(start_paused = true)]
async fn other_hosts_get_no_nudges() {
    let (page, _video) = video_page("https://example.com/");
    let engine = install(&page, true);

    assert!(!engine.hint().applies());
    assert!(page.local_storage.is_empty());
    assert_eq!(page.document.dispatch_event("yt-navigate-finish"), 0);
}

#[tokio::test(start_paused = true)]
async fn settled_navigation_stops_primary_player() {
    let (page, video) = video_page("https://www.youtube.com/");
    let engine = install(&page, true);

    // A real click starts the first video.
    page.document.dispatch_input(InputKind::MouseDown);
    video.play().unwrap();
    assert!(!video.paused());

    // Long after the gesture, the site swaps in the next video in place.
    page.event_loop.advance(Duration::from_secs(30)).await;
    assert!(!video.paused());
    page.document.dispatch_event("yt-navigate-finish");
    page.event_loop.advance(Duration::ZERO).await;

    assert!(video.paused());
    assert!(engine.policy().suppression_count() >= 1);
}

#[tokio::test(start_paused = true)]
async fn settled_navigation_respects_active_gesture() {
    let (page, video) = video_page("https://youtu.be/abc");
    let _engine = install(&page, true);

    page.event_loop.advance(Duration::from_secs(1)).await;
    page.document.dispatch_input(InputKind::TouchStart);
    video.play().unwrap();
    page.document.dispatch_event("yt-navigate-finish");
    page.event_loop.advance(Duration::ZERO).await;

    assert!(!video.paused());
}

#[tokio::test(start_paused = true)]
async fn delayed_load_check_catches_missed_playback() {
    let (page, video) = video_page("https://m.youtube.com/");
    let engine = install(&page, true);

    // Something started the player without going through the interceptor.
    engine.registry().unwire(&video);
    video.play().unwrap();
    assert!(!video.paused());

    page.event_loop.advance(Duration::from_millis(799)).await;
    assert!(!video.paused());
    page.event_loop.advance(Duration::from_millis(1)).await;
    assert!(video.paused());
}

#[tokio::test(start_paused = true)]
async fn rejected_preference_writes_do_not_affect_engine() {
    let (page, video) = video_page("https://www.youtube.com/");
    page.local_storage.set_denied(true);
    let engine = install(&page, true);

    assert!(engine.is_enabled());
    assert!(engine.watcher().is_observing());
    assert!(engine.registry().is_wired(&video));

    video.play().unwrap();
    assert!(video.paused());
}

#[tokio::test(start_paused = true)]
async fn settle_signal_is_ignored_while_disabled() {
    let (page, video) = video_page("https://www.youtube.com/");
    let flags = Rc::new(MemoryFlagStore::with_value("globalEnabled", true));
    let engine = EngineController::install(&page, EngineConfig::default(), flags);
    engine.set_enabled(false);

    video.play().unwrap();
    page.document.dispatch_event("yt-navigate-finish");
    page.event_loop.advance(Duration::from_secs(1)).await;

    assert!(!video.paused());
}

#[tokio::test(start_paused = true)]
async fn settle_listener_is_installed_once_across_toggles() {
    let (page, _video) = video_page("https://www.youtube.com/");
    let engine = install(&page, true);
    engine.set_enabled(false);
    engine.set_enabled(true);
    engine.set_enabled(false);
    engine.set_enabled(true);

    assert_eq!(page.document.dispatch_event("yt-navigate-finish"), 1);
}
