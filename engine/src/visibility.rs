//! # Impression tracking
//!
//! A product card counts as seen the first time at least a quarter of it is
//! on screen. Each card is reported once per mount, no matter how many
//! times it scrolls back into view.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// A trackable product card, keyed by its stable product id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub product_id: String,
    pub title: String,
}

/// One visibility sample for a region: how much of it is currently shown.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityEvent {
    pub product_id: String,
    pub visible_ratio: f32,
}

/// Where visibility samples come from. Platforms without an observation
/// primitive return `None` from [`subscribe`](VisibilitySource::subscribe)
/// and impression tracking silently degrades to a no-op.
pub trait VisibilitySource {
    fn subscribe(&mut self) -> Option<UnboundedReceiver<VisibilityEvent>>;
}

/// The degraded source for hosts without visibility observation.
pub struct NoVisibility;

impl VisibilitySource for NoVisibility {
    fn subscribe(&mut self) -> Option<UnboundedReceiver<VisibilityEvent>> {
        None
    }
}

/// Host-driven source: the embedding layer pushes samples through the
/// sender half as its own observation machinery reports them.
pub struct ChannelVisibility {
    rx: Option<UnboundedReceiver<VisibilityEvent>>,
}

impl ChannelVisibility {
    pub fn new() -> (UnboundedSender<VisibilityEvent>, Self) {
        let (tx, rx) = unbounded_channel();
        (tx, Self { rx: Some(rx) })
    }
}

impl VisibilitySource for ChannelVisibility {
    fn subscribe(&mut self) -> Option<UnboundedReceiver<VisibilityEvent>> {
        self.rx.take()
    }
}

/// An emitted first-sight record, ready to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Impression {
    pub product_id: String,
    pub title: String,
}

/// Deduplicating observer over the currently attached regions.
///
/// The seen set outlives any one `attach` call: re-attaching a product that
/// was already reported never reports it again. Only dropping the tracker
/// (a remount) resets it.
pub struct ImpressionTracker {
    threshold: f32,
    attached: HashMap<String, String>,
    seen: HashSet<String>,
}

impl ImpressionTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            attached: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Replace the observed set. Stale regions stop being observed; new
    /// ones start; the seen set is untouched.
    pub fn attach(&mut self, regions: &[Region]) {
        self.attached = regions
            .iter()
            .map(|r| (r.product_id.clone(), r.title.clone()))
            .collect();
    }

    pub fn attached_len(&self) -> usize {
        self.attached.len()
    }

    /// Feed one visibility sample. Yields an impression only on the first
    /// threshold crossing of an attached, not-yet-seen product.
    pub fn observe(&mut self, event: &VisibilityEvent) -> Option<Impression> {
        if event.visible_ratio < self.threshold {
            return None;
        }
        let title = self.attached.get(&event.product_id)?;
        if !self.seen.insert(event.product_id.clone()) {
            return None;
        }
        Some(Impression {
            product_id: event.product_id.clone(),
            title: title.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str) -> Region {
        Region {
            product_id: id.to_string(),
            title: format!("title {id}"),
        }
    }

    fn shown(id: &str, ratio: f32) -> VisibilityEvent {
        VisibilityEvent {
            product_id: id.to_string(),
            visible_ratio: ratio,
        }
    }

    #[test]
    fn first_crossing_emits_once() {
        let mut tracker = ImpressionTracker::new(0.25);
        tracker.attach(&[region("1")]);

        assert!(tracker.observe(&shown("1", 0.5)).is_some());
        assert!(tracker.observe(&shown("1", 0.9)).is_none());
        assert!(tracker.observe(&shown("1", 0.3)).is_none());
    }

    #[test]
    fn below_threshold_is_not_seen() {
        let mut tracker = ImpressionTracker::new(0.25);
        tracker.attach(&[region("1")]);

        assert!(tracker.observe(&shown("1", 0.1)).is_none());
        // The later full crossing still counts as the first sight.
        assert!(tracker.observe(&shown("1", 0.25)).is_some());
    }

    #[test]
    fn unattached_regions_are_ignored() {
        let mut tracker = ImpressionTracker::new(0.25);
        tracker.attach(&[region("1")]);

        assert!(tracker.observe(&shown("2", 1.0)).is_none());
    }

    #[test]
    fn reattach_drops_stale_and_keeps_seen() {
        let mut tracker = ImpressionTracker::new(0.25);
        tracker.attach(&[region("1"), region("2")]);
        assert!(tracker.observe(&shown("1", 0.5)).is_some());

        tracker.attach(&[region("1"), region("3")]);
        assert_eq!(tracker.attached_len(), 2);

        // "2" is stale, "1" was already reported, "3" is fresh.
        assert!(tracker.observe(&shown("2", 0.5)).is_none());
        assert!(tracker.observe(&shown("1", 0.5)).is_none());
        assert!(tracker.observe(&shown("3", 0.5)).is_some());
    }

    #[test]
    fn no_visibility_source_degrades_to_none() {
        assert!(NoVisibility.subscribe().is_none());
    }
}
