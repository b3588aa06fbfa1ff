//! Session lifecycle states and per-visit outcomes

use std::fmt;

/// Where a session controller is in its per-attempt lifecycle
///
/// ```text
/// Idle → Preparing → ActivityScan ⇄ ElementVisit
///                         ↓  ↑
///                    BackNavigating
///                         ↓
///                  Exhausted | Failed → Idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No application under test
    #[default]
    Idle,
    /// Installing and launching
    Preparing,
    /// Recording the foreground activity and discovering its elements
    ActivityScan,
    /// Acting on one node
    ElementVisit,
    /// Waiting for a back press to change the foreground activity
    BackNavigating,
    /// Back at the root with nothing left to visit
    Exhausted,
    /// An attempt-fatal error ended exploration
    Failed,
}

impl SessionState {
    /// True between a successful prepare and the end of exploration
    pub fn is_exploring(&self) -> bool {
        matches!(
            self,
            SessionState::ActivityScan | SessionState::ElementVisit | SessionState::BackNavigating
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Exhausted | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::ActivityScan => "activity-scan",
            SessionState::ElementVisit => "element-visit",
            SessionState::BackNavigating => "back-navigating",
            SessionState::Exhausted => "exhausted",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What one visit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Action performed, still on the node's activity
    Stayed,
    /// Action performed and the foreground activity is now a different one
    ActivityChanged,
    /// The widget is gone from the screen; its node was removed
    Stale,
    /// The widget offers no usable interaction; its node was removed
    Removed,
    /// The id is not in this device's graph
    Unknown,
    /// The node belongs to an activity that is not in the foreground;
    /// nothing was done and the node is kept
    OffScreen,
}

impl VisitOutcome {
    pub fn changed_activity(&self) -> bool {
        matches!(self, VisitOutcome::ActivityChanged)
    }
}
