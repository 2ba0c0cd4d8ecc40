use std::cell::Cell;
use std::rc::Rc;

use crate::storage::{SharedStorage, StorageChange, Subscription};

pub const ACTIVE_TAB_KEY: &str = "nexus.auth.active_tab";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabActivity {
    Active,
    /// The tab is hidden (minimized, behind another tab).
    Background,
    /// Another tab claimed the active slot after this one.
    Superseded,
}

impl TabActivity {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Tracks whether this tab is the one the user is currently working in.
///
/// The most recently claimed tab wins; every other tab is superseded until it
/// becomes visible again and re-claims.
pub struct ActiveTabTracker {
    tab_id: String,
    shared: Option<Rc<dyn SharedStorage>>,
    activity: Rc<Cell<TabActivity>>,
}

impl ActiveTabTracker {
    pub fn new(tab_id: impl Into<String>, shared: Option<Rc<dyn SharedStorage>>) -> Self {
        Self {
            tab_id: tab_id.into(),
            shared,
            activity: Rc::new(Cell::new(TabActivity::Active)),
        }
    }

    pub fn activity(&self) -> TabActivity {
        self.activity.get()
    }

    pub fn claim(&self) {
        self.activity.set(TabActivity::Active);
        let Some(shared) = self.shared.as_ref() else {
            return;
        };
        if let Err(error) = shared.set_item(ACTIVE_TAB_KEY, &self.tab_id) {
            tracing::warn!(
                target: "nexus.storage",
                tab_id = %self.tab_id,
                error = %error,
                "failed to claim active tab slot",
            );
        }
    }

    pub fn set_visible(&self, visible: bool) {
        if visible {
            self.claim();
        } else {
            self.activity.set(TabActivity::Background);
        }
    }

    /// Marks this tab superseded whenever another tab claims the slot.
    pub fn watch(&self) -> Subscription {
        let Some(shared) = self.shared.as_ref() else {
            return Subscription::inert();
        };
        let tab_id = self.tab_id.clone();
        let activity = Rc::clone(&self.activity);
        let listener = Rc::new(move |change: &StorageChange| {
            if change.key != ACTIVE_TAB_KEY {
                return;
            }
            match change.new_value.as_deref() {
                Some(claimant) if claimant != tab_id => {
                    tracing::debug!(
                        target: "nexus.session",
                        tab_id = %tab_id,
                        claimant = %claimant,
                        "active tab superseded",
                    );
                    activity.set(TabActivity::Superseded);
                }
                _ => {}
            }
        });
        match shared.watch(listener) {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::warn!(
                    target: "nexus.storage",
                    error = %error,
                    "failed to watch active tab slot",
                );
                Subscription::inert()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SharedMemoryOrigin;

    #[test]
    fn later_claim_supersedes_earlier_tab() {
        let origin = SharedMemoryOrigin::new();
        let first = ActiveTabTracker::new("tab-a", Some(Rc::new(origin.open_tab())));
        let second = ActiveTabTracker::new("tab-b", Some(Rc::new(origin.open_tab())));
        let _first_watch = first.watch();
        let _second_watch = second.watch();

        first.claim();
        second.claim();
        assert_eq!(first.activity(), TabActivity::Superseded);
        assert_eq!(second.activity(), TabActivity::Active);

        first.set_visible(true);
        assert_eq!(first.activity(), TabActivity::Active);
        assert_eq!(second.activity(), TabActivity::Superseded);
    }

    #[test]
    fn hidden_tab_is_background() {
        let tracker = ActiveTabTracker::new("tab-a", None);
        tracker.claim();
        tracker.set_visible(false);
        assert_eq!(tracker.activity(), TabActivity::Background);
        assert!(!tracker.activity().is_active());
    }

    #[test]
    fn without_shared_storage_tab_stays_active() {
        let tracker = ActiveTabTracker::new("tab-a", None);
        assert!(tracker.watch().is_inert());
        tracker.claim();
        assert_eq!(tracker.activity(), TabActivity::Active);
    }
}
