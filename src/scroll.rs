//! Scroll-boundary bubbling: decides whether a wheel event inside the guest
//! should continue scrolling the surrounding host page.

use serde::{Deserialize, Serialize};

/// Overflow policy of a scrollable ancestor, as sampled by the injected
/// forwarder script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    Auto,
    Scroll,
    Hidden,
    Visible,
    /// Any other computed value the forwarder reports (`clip`, `overlay`,
    /// vendor-specific ones). Must not poison the whole sample.
    #[serde(other)]
    Other,
}

impl Overflow {
    /// Only auto/scroll elements can consume wheel deltas; hidden, visible,
    /// and unrecognized values are skipped.
    fn scrollable(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Whether a vertical delta would actually move content here, i.e. the
    /// element is not already at the boundary in the scroll direction.
    fn absorbs(&self, delta_y: f64) -> bool {
        if delta_y < 0.0 {
            self.scroll_top > 0.0
        } else if delta_y > 0.0 {
            self.scroll_top + self.client_height < self.scroll_height
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollAncestor {
    pub overflow: Overflow,
    #[serde(flatten)]
    pub metrics: ScrollMetrics,
}

/// One wheel event plus the scrollable-ancestor chain of its target, from
/// innermost to outermost. The guest's own root container is excluded; it is
/// never scroll-relevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelSample {
    #[serde(default)]
    pub delta_x: f64,
    #[serde(default)]
    pub delta_y: f64,
    #[serde(default)]
    pub ancestors: Vec<ScrollAncestor>,
    pub document: ScrollMetrics,
}

/// True only when every scrollable level, the document included, is already
/// at its boundary in the wheel direction — at which point the host re-emits
/// the event on its own container so the page keeps scrolling seamlessly.
pub fn should_bubble(sample: &WheelSample) -> bool {
    for ancestor in &sample.ancestors {
        if !ancestor.overflow.scrollable() {
            continue;
        }
        if ancestor.metrics.absorbs(sample.delta_y) {
            return false;
        }
    }
    !sample.document.absorbs(sample.delta_y)
}
