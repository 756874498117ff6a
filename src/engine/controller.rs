use std::rc::Rc;

use tracing::{debug, info, warn};

use super::{
    ElementRegistry, EngineState, MutationBatcher, NavigationHint, PermissionWindow,
    SuppressionPolicy, TreeWatcher, WireOutcome,
};
use crate::config::EngineConfig;
use crate::dom::Document;
use crate::host::Page;
use crate::storage::FlagStore;

/// What a call to [`EngineController::set_enabled`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Disabled → Enabled: swept, watcher started, hints applied.
    Enabled,
    /// Enabled → Disabled: watcher stopped.
    Disabled,
    /// Enabled → Enabled: swept again.
    Resweep,
    /// Disabled → Disabled.
    Unchanged,
}

/// Owns one page's engine: its enablement, the components it drives, and the
/// subscription to the persisted flag.
pub struct EngineController {
    config: EngineConfig,
    state: Rc<EngineState>,
    window: Rc<PermissionWindow>,
    policy: Rc<SuppressionPolicy>,
    registry: Rc<ElementRegistry>,
    batcher: Rc<MutationBatcher>,
    watcher: TreeWatcher,
    hint: Rc<NavigationHint>,
    document: Rc<Document>,
}

impl EngineController {
    /// Build the engine for `page` in the Disabled state, with gesture
    /// tracking already listening.
    pub fn new(page: &Page, config: EngineConfig) -> Rc<Self> {
        let scheduler = page.scheduler();
        let state = Rc::new(EngineState::default());
        let window = PermissionWindow::new(
            config.gesture_window(),
            config.window_mode,
            Rc::clone(&scheduler),
        );
        window.listen(&*page.document, &config.gesture_events);

        let policy = Rc::new(SuppressionPolicy::new(
            Rc::clone(&state),
            Rc::clone(&window),
        ));
        let registry = Rc::new(ElementRegistry::new(Rc::clone(&policy)));
        let batcher = MutationBatcher::new(Rc::clone(&scheduler), Rc::clone(&registry));
        let watcher = TreeWatcher::new(
            page.document.clone(),
            Rc::clone(&batcher),
            config.watched_attributes.clone(),
        );
        let hint = NavigationHint::new(
            config.navigation.clone(),
            page.location.clone(),
            Rc::clone(&page.document),
            scheduler,
            page.preferences(),
            Rc::clone(&policy),
        );

        Rc::new(Self {
            config,
            state,
            window,
            policy,
            registry,
            batcher,
            watcher,
            hint,
            document: Rc::clone(&page.document),
        })
    }

    /// Build the engine, apply the persisted flag and follow its changes.
    /// A flag that cannot be read counts as off.
    pub fn install(page: &Page, config: EngineConfig, flags: Rc<dyn FlagStore>) -> Rc<Self> {
        let controller = Self::new(page, config);
        let key = controller.config.flag_key.clone();

        let weak = Rc::downgrade(&controller);
        flags.subscribe(
            &key,
            Rc::new(move |enabled| {
                if let Some(controller) = weak.upgrade() {
                    controller.set_enabled(enabled);
                }
            }),
        );

        let enabled = match flags.load(&key) {
            Ok(value) => value.unwrap_or(false),
            Err(err) => {
                warn!(target: "engine", %key, error = %err, "failed to read enable flag; staying off");
                false
            }
        };
        controller.set_enabled(enabled);
        info!(target: "engine", location = %page.location, enabled, "engine installed");
        controller
    }

    pub fn set_enabled(&self, enabled: bool) -> Transition {
        let was_enabled = self.state.is_enabled();
        self.state.set_enabled(enabled);

        let transition = match (was_enabled, enabled) {
            (false, true) => {
                self.sweep();
                self.watcher.start();
                self.hint.apply();
                Transition::Enabled
            }
            (true, false) => {
                self.watcher.stop();
                Transition::Disabled
            }
            (true, true) => {
                self.sweep();
                Transition::Resweep
            }
            (false, false) => Transition::Unchanged,
        };
        debug!(target: "engine", ?transition, "applied enable state");
        transition
    }

    /// Wire every media element currently in the tree; returns how many were
    /// newly wired.
    pub fn sweep(&self) -> usize {
        self.registry.prune();
        let mut wired = 0usize;
        for media in self.document.query_media() {
            if self.registry.wire(&media) == WireOutcome::Wired {
                wired += 1;
            }
        }
        debug!(target: "engine", wired, "swept document");
        wired
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn window(&self) -> &Rc<PermissionWindow> {
        &self.window
    }

    pub fn policy(&self) -> &Rc<SuppressionPolicy> {
        &self.policy
    }

    pub fn registry(&self) -> &Rc<ElementRegistry> {
        &self.registry
    }

    pub fn batcher(&self) -> &Rc<MutationBatcher> {
        &self.batcher
    }

    pub fn watcher(&self) -> &TreeWatcher {
        &self.watcher
    }

    pub fn hint(&self) -> &Rc<NavigationHint> {
        &self.hint
    }
}
