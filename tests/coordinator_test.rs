use std::rc::Rc;

use autoplay_guard::dom::NodeRef;
use autoplay_guard::{
    Badge, EngineConfig, EngineController, FlagStore, MemoryFlagStore, Page, SqliteFlagStore,
    ToggleCoordinator,
};
use tempfile::TempDir;
use url::Url;

const KEY: &str = "globalEnabled";

fn playing_page(url: &str) -> (Page, NodeRef) {
    let page = Page::new(Url::parse(url).unwrap());
    let video = page.document.create_element("video");
    page.document.body().unwrap().append_child(&video);
    video.play().unwrap();
    (page, video)
}

#[tokio::test(start_paused = true)]
async fn toggle_on_enables_every_engine_and_pauses_web_pages() {
    let flags = Rc::new(MemoryFlagStore::with_value(KEY, false));
    let coordinator = ToggleCoordinator::new(flags.clone(), KEY);

    let (news, news_video) = playing_page("https://news.example/");
    let (blog, blog_video) = playing_page("http://blog.example/");
    let (local, local_video) = playing_page("file:///tmp/page.html");

    let news_engine = EngineController::install(&news, EngineConfig::default(), flags.clone());
    let blog_engine = EngineController::install(&blog, EngineConfig::default(), flags.clone());
    let news_id = coordinator.open_context(&news).unwrap();
    let blog_id = coordinator.open_context(&blog).unwrap();
    let local_id = coordinator.open_context(&local).unwrap();
    assert_eq!(coordinator.badge(news_id), Some(Badge::Off));

    assert!(coordinator.toggle().unwrap());

    assert!(news_engine.is_enabled());
    assert!(blog_engine.is_enabled());
    assert!(news_engine.watcher().is_observing());
    assert!(news_video.paused());
    assert!(blog_video.paused());
    assert!(!local_video.paused(), "non-web pages are not paused");
    for id in [news_id, blog_id, local_id] {
        assert_eq!(coordinator.badge(id), Some(Badge::On));
    }
    assert_eq!(Badge::On.text(), "ON");
}

#[tokio::test(start_paused = true)]
async fn toggle_off_stops_watchers_and_clears_badges() {
    let flags = Rc::new(MemoryFlagStore::with_value(KEY, true));
    let coordinator = ToggleCoordinator::new(flags.clone(), KEY);
    let (page, video) = playing_page("https://example.com/");
    let engine = EngineController::install(&page, EngineConfig::default(), flags.clone());
    let id = coordinator.open_context(&page).unwrap();
    assert_eq!(coordinator.badge(id), Some(Badge::On));
    assert!(video.paused(), "install sweep stops playback without a gesture");

    assert!(!coordinator.toggle().unwrap());

    assert!(!engine.is_enabled());
    assert!(!engine.watcher().is_observing());
    assert_eq!(coordinator.badge(id), Some(Badge::Off));
    assert_eq!(Badge::Off.text(), "");

    video.play().unwrap();
    assert!(!video.paused());
}

#[tokio::test(start_paused = true)]
async fn refresh_badge_follows_external_writes() {
    let flags = Rc::new(MemoryFlagStore::new());
    let coordinator = ToggleCoordinator::new(flags.clone(), KEY);
    let (page, _video) = playing_page("https://example.com/");
    let id = coordinator.open_context(&page).unwrap();
    assert_eq!(coordinator.badge(id), Some(Badge::Off));

    flags.store(KEY, true).unwrap();
    assert_eq!(coordinator.badge(id), Some(Badge::Off));
    assert_eq!(coordinator.refresh_badge(id).unwrap(), Some(Badge::On));

    assert!(coordinator.close_context(id));
    assert_eq!(coordinator.refresh_badge(id).unwrap(), None);
}

#[test]
fn toggle_persists_through_sqlite() {
    let dir = TempDir::new().unwrap();
    {
        let store = Rc::new(SqliteFlagStore::new_with_path(dir.path()).unwrap());
        let coordinator = ToggleCoordinator::new(store, KEY);
        assert!(!coordinator.is_enabled().unwrap());
        assert!(coordinator.toggle().unwrap());
    }
    let store = SqliteFlagStore::new_with_path(dir.path()).unwrap();
    assert_eq!(store.load(KEY).unwrap(), Some(true));
}
