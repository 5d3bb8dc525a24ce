// Challenge view cache and reconciliation.
//
// The store holds one ordered list of challenge snapshots per named view
// (the tabs the UI renders: all / my-challenges / created). Two mutation
// sources feed it — locally-initiated optimistic toggles and remotely pushed
// confirmations — and every operation keeps all views carrying the same
// challenge id consistent in a single pass. The store is only mutated by the
// application event loop, never by the connection layer.

use std::collections::HashMap;

use tracing::debug;

use crate::challenge::Challenge;

/// The fixed set of views the UI renders over the challenge collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewId {
    /// Every challenge on the platform.
    All,
    /// Challenges the user participates in.
    Joined,
    /// Challenges the user created.
    Created,
}

impl ViewId {
    pub const ALL_VIEWS: [ViewId; 3] = [ViewId::All, ViewId::Joined, ViewId::Created];

    /// The view identifier as the platform API names it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewId::All => "all",
            ViewId::Joined => "my-challenges",
            ViewId::Created => "created",
        }
    }
}

#[derive(Debug, Default)]
struct View {
    entries: Vec<Challenge>,
    /// Whether the cached entries may no longer reflect server truth.
    /// Stale views are refetched on next activation instead of served.
    stale: bool,
    /// Whether this view has ever been populated from the server.
    loaded: bool,
}

/// In-memory cache of challenge entities across all views.
#[derive(Debug)]
pub struct ChallengeStore {
    views: HashMap<ViewId, View>,
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeStore {
    pub fn new() -> Self {
        let views = ViewId::ALL_VIEWS
            .into_iter()
            .map(|id| (id, View::default()))
            .collect();
        ChallengeStore { views }
    }

    /// Replace a view's contents with a fresh server snapshot and clear its
    /// staleness flag.
    pub fn populate(&mut self, view: ViewId, entries: Vec<Challenge>) {
        let v = self.views.entry(view).or_default();
        v.entries = entries;
        v.stale = false;
        v.loaded = true;
    }

    /// The cached entries for a view, in server order.
    pub fn entries(&self, view: ViewId) -> &[Challenge] {
        self.views
            .get(&view)
            .map(|v| v.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the view needs a refetch before being served. A view that has
    /// never been loaded counts as stale.
    pub fn is_stale(&self, view: ViewId) -> bool {
        self.views
            .get(&view)
            .map(|v| v.stale || !v.loaded)
            .unwrap_or(true)
    }

    /// Mark a view's cache as stale so the next activation refetches it.
    /// Used after membership-changing operations (join/leave) and after a
    /// failed optimistic confirmation.
    pub fn invalidate(&mut self, view: ViewId) {
        let v = self.views.entry(view).or_default();
        if !v.stale {
            debug!(view = view.as_str(), "view invalidated");
        }
        v.stale = true;
    }

    /// Apply a confirmed remote update to every view containing the id.
    ///
    /// Each matching entry is partially merged in place ([`Challenge::
    /// merge_update`]), preserving its position within the view and any
    /// fields the update omits. Returns `true` if at least one view was
    /// touched.
    pub fn apply_remote_update(&mut self, challenge_id: i64, incoming: &Challenge) -> bool {
        let mut touched = false;
        for (id, view) in &mut self.views {
            if let Some(entry) = view.entries.iter_mut().find(|c| c.id == challenge_id) {
                entry.merge_update(incoming);
                touched = true;
                debug!(
                    challenge_id,
                    view = id.as_str(),
                    "applied remote update to cached entry"
                );
            }
        }
        touched
    }

    /// Flip the cached `is_active` flag for a toggle challenge in every view
    /// before the confirming round-trip completes. Returns `true` if at
    /// least one entry was flipped.
    ///
    /// If the confirmation later fails, callers invalidate and refetch the
    /// affected view rather than computing an inverse of this edit.
    pub fn apply_optimistic_toggle(&mut self, challenge_id: i64) -> bool {
        let mut touched = false;
        for view in self.views.values_mut() {
            if let Some(entry) = view.entries.iter_mut().find(|c| c.id == challenge_id) {
                if let Some(details) = entry.toggle_details.as_mut() {
                    details.is_active = !details.is_active;
                    touched = true;
                }
            }
        }
        touched
    }
}
