//! Scroll and focus coordination for chat windows.
//!
//! The presentation surface reports each window's scroll metrics; the
//! coordinator answers with [`ScrollToBottom`] commands. A reader scrolled up
//! into older messages is left alone when new ones arrive.

use std::collections::HashMap;

use crate::session::{PeerIdentity, SessionRegistry};

/// Default distance from the bottom, in pixels, that still counts as "at the
/// bottom".
pub const DEFAULT_SCROLL_THRESHOLD_PX: f64 = 50.0;

/// Scroll geometry of one chat window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    /// Pixels scrolled from the top.
    pub scroll_top: f64,
    /// Total content height.
    pub scroll_height: f64,
    /// Visible height.
    pub client_height: f64,
}

impl ViewportMetrics {
    /// Pixels between the visible bottom edge and the end of the content.
    #[must_use]
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

/// Instruction for the presentation surface: scroll this peer's window to
/// the bottom once the new content is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollToBottom(pub PeerIdentity);

/// Tracks viewports and decides when to auto-scroll.
#[derive(Debug)]
pub struct ScrollFocusCoordinator {
    threshold_px: f64,
    viewports: HashMap<PeerIdentity, ViewportMetrics>,
}

impl Default for ScrollFocusCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_THRESHOLD_PX)
    }
}

impl ScrollFocusCoordinator {
    /// Create a coordinator with the given bottom threshold.
    #[must_use]
    pub fn new(threshold_px: f64) -> Self {
        Self {
            threshold_px,
            viewports: HashMap::new(),
        }
    }

    /// Record the latest scroll metrics of a window, as measured before any
    /// pending update is rendered.
    ///
    /// Reports for peers without a session are ignored, so the map never
    /// holds more entries than the registry has sessions.
    pub fn report_viewport(
        &mut self,
        peer: &PeerIdentity,
        metrics: ViewportMetrics,
        registry: &SessionRegistry,
    ) -> bool {
        if !registry.contains(peer) {
            return false;
        }
        self.viewports.insert(peer.clone(), metrics);
        true
    }

    /// Drop state for a closed window.
    pub fn forget(&mut self, peer: &PeerIdentity) {
        self.viewports.remove(peer);
    }

    /// Call after every append to `peer`'s session.
    ///
    /// Scrolls only the active, expanded window, and only when the viewer
    /// was near the bottom. A window that never reported metrics counts as
    /// at the bottom.
    #[must_use]
    pub fn on_messages_changed(
        &self,
        peer: &PeerIdentity,
        registry: &SessionRegistry,
    ) -> Option<ScrollToBottom> {
        if registry.active_peer() != Some(peer) {
            return None;
        }
        let session = registry.get(peer)?;
        if session.is_minimized() {
            return None;
        }
        let near_bottom = self
            .viewports
            .get(peer)
            .is_none_or(|m| m.distance_from_bottom() <= self.threshold_px);
        near_bottom.then(|| ScrollToBottom(peer.clone()))
    }

    /// Call after `peer` became the active window. Always scrolls an
    /// expanded window to the bottom once.
    #[must_use]
    pub fn on_active_peer_changed(
        &self,
        peer: &PeerIdentity,
        registry: &SessionRegistry,
    ) -> Option<ScrollToBottom> {
        let session = registry.get(peer)?;
        (!session.is_minimized()).then(|| ScrollToBottom(peer.clone()))
    }
}
