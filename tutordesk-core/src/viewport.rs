//! Scroll-position correction after timeline mutations
//!
//! Anchoring is two-phase: a plan is taken from the viewport *before* the
//! store changes, and resolved against the viewport measured *after* layout.
//! The cause of the mutation is passed explicitly; it is never inferred from
//! what changed in the list.

use config::Settings;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ViewportMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    pub fn distance_from_bottom(&self) -> f64 {
        (self.max_scroll_top() - self.scroll_top).max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationReason {
    InitialLoad,
    UserSent,
    PrependOlder,
    PollMerge,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnchorPlan {
    /// Show the newest message, re-applied for `frames` frames
    ScrollToBottom { frames: u32 },
    /// Keep the content under the viewport in place after a prepend
    PreserveOffset { scroll_top: f64, scroll_height: f64 },
    /// Leave the viewport alone
    Stay,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScrollCommand {
    ToBottom { frames: u32 },
    To(f64),
}

impl AnchorPlan {
    pub fn resolve(&self, after: &ViewportMetrics) -> Option<ScrollCommand> {
        match *self {
            AnchorPlan::ScrollToBottom { frames } => Some(ScrollCommand::ToBottom { frames }),
            AnchorPlan::PreserveOffset {
                scroll_top,
                scroll_height,
            } => {
                let grown = after.scroll_height - scroll_height;
                let target = (scroll_top + grown).clamp(0.0, after.max_scroll_top());
                Some(ScrollCommand::To(target))
            }
            AnchorPlan::Stay => None,
        }
    }
}

/// A scroll command being applied across animation frames.
///
/// Bottom targets are recomputed on every frame so late layout growth
/// (images decoding, fonts loading) still ends at the newest message.
#[derive(Clone, Debug)]
pub struct PendingScroll {
    command: ScrollCommand,
    remaining: u32,
}

impl PendingScroll {
    pub fn new(command: ScrollCommand) -> Self {
        let remaining = match command {
            ScrollCommand::ToBottom { frames } => frames.max(1),
            ScrollCommand::To(_) => 1,
        };
        Self { command, remaining }
    }

    /// Scroll position to apply on this frame, or None once exhausted.
    pub fn on_frame(&mut self, metrics: &ViewportMetrics) -> Option<f64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(match self.command {
            ScrollCommand::ToBottom { .. } => metrics.max_scroll_top(),
            ScrollCommand::To(top) => top,
        })
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Clone, Debug)]
pub struct ViewportAnchor {
    bottom_threshold_px: f64,
    top_threshold_px: f64,
    bottom_retry_frames: u32,
}

impl ViewportAnchor {
    pub fn new(bottom_threshold_px: f64, top_threshold_px: f64, bottom_retry_frames: u32) -> Self {
        Self {
            bottom_threshold_px,
            top_threshold_px,
            bottom_retry_frames: bottom_retry_frames.max(1),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.bottom_threshold_px,
            settings.top_threshold_px,
            settings.bottom_retry_frames,
        )
    }

    pub fn is_near_bottom(&self, metrics: &ViewportMetrics) -> bool {
        metrics.distance_from_bottom() <= self.bottom_threshold_px
    }

    pub fn is_near_top(&self, metrics: &ViewportMetrics) -> bool {
        metrics.scroll_top <= self.top_threshold_px
    }

    /// Decide the correction for a mutation, from the viewport as it was
    /// before the mutation. `before` is None when nothing has been rendered yet.
    pub fn plan(&self, reason: MutationReason, before: Option<&ViewportMetrics>) -> AnchorPlan {
        match reason {
            MutationReason::InitialLoad | MutationReason::UserSent => AnchorPlan::ScrollToBottom {
                frames: self.bottom_retry_frames,
            },
            MutationReason::PrependOlder => match before {
                Some(m) => AnchorPlan::PreserveOffset {
                    scroll_top: m.scroll_top,
                    scroll_height: m.scroll_height,
                },
                None => AnchorPlan::Stay,
            },
            MutationReason::PollMerge => {
                // Live-following only if the reader was at the bottom edge.
                if before.is_none_or(|m| self.is_near_bottom(m)) {
                    AnchorPlan::ScrollToBottom { frames: 1 }
                } else {
                    AnchorPlan::Stay
                }
            }
        }
    }
}

impl Default for ViewportAnchor {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> ViewportAnchor {
        ViewportAnchor::new(80.0, 120.0, 3)
    }

    #[test]
    fn test_initial_load_scrolls_to_bottom_with_retries() {
        let plan = anchor().plan(MutationReason::InitialLoad, None);
        assert_eq!(plan, AnchorPlan::ScrollToBottom { frames: 3 });
    }

    #[test]
    fn test_user_sent_scrolls_to_bottom_even_when_reading_history() {
        let reading = ViewportMetrics::new(0.0, 5000.0, 600.0);
        let plan = anchor().plan(MutationReason::UserSent, Some(&reading));
        assert!(matches!(plan, AnchorPlan::ScrollToBottom { .. }));
    }

    #[test]
    fn test_prepend_preserves_visible_content() {
        let message_height = 48.0;
        let inserted = 10.0;
        let before = ViewportMetrics::new(30.0, 2000.0, 600.0);
        let after = ViewportMetrics::new(30.0, 2000.0 + inserted * message_height, 600.0);

        let plan = anchor().plan(MutationReason::PrependOlder, Some(&before));
        let command = plan.resolve(&after).unwrap();

        assert_eq!(command, ScrollCommand::To(30.0 + inserted * message_height));
    }

    #[test]
    fn test_poll_merge_follows_when_at_bottom() {
        let at_bottom = ViewportMetrics::new(1350.0, 2000.0, 600.0);
        let plan = anchor().plan(MutationReason::PollMerge, Some(&at_bottom));
        assert_eq!(plan, AnchorPlan::ScrollToBottom { frames: 1 });
    }

    #[test]
    fn test_poll_merge_never_moves_reader_of_history() {
        let reading = ViewportMetrics::new(400.0, 2000.0, 600.0);
        let plan = anchor().plan(MutationReason::PollMerge, Some(&reading));

        assert_eq!(plan, AnchorPlan::Stay);
        let after = ViewportMetrics::new(400.0, 2600.0, 600.0);
        assert_eq!(plan.resolve(&after), None);
    }

    #[test]
    fn test_near_top_threshold() {
        let a = anchor();
        assert!(a.is_near_top(&ViewportMetrics::new(100.0, 2000.0, 600.0)));
        assert!(!a.is_near_top(&ViewportMetrics::new(121.0, 2000.0, 600.0)));
    }

    #[test]
    fn test_pending_scroll_tracks_late_layout_growth() {
        let mut pending = PendingScroll::new(ScrollCommand::ToBottom { frames: 3 });

        assert_eq!(pending.on_frame(&ViewportMetrics::new(0.0, 1000.0, 600.0)), Some(400.0));
        // An image finished loading between frames.
        assert_eq!(pending.on_frame(&ViewportMetrics::new(400.0, 1300.0, 600.0)), Some(700.0));
        assert_eq!(pending.on_frame(&ViewportMetrics::new(700.0, 1300.0, 600.0)), Some(700.0));
        assert!(pending.is_done());
        assert_eq!(pending.on_frame(&ViewportMetrics::new(700.0, 1300.0, 600.0)), None);
    }
}
