//! Event versioning gate.
//!
//! Compares an event as seen in the current poll against the last ledger
//! entry for its id. The comparison is equality on both `status` and
//! `updated`: any difference is a new version, including a timestamp that
//! moved backwards.

use aftershock_types::{Event, EventVersion, StatusLogEntry, Transition};

/// Outcome of the versioning gate for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecision {
    /// Transition to take.
    pub transition: Transition,
    /// The last recorded version, when the event was seen before.
    pub previous: Option<EventVersion>,
}

impl VersionDecision {
    /// The version being superseded, only when the transition is
    /// [`Transition::Updated`].
    pub fn superseded(&self) -> Option<&EventVersion> {
        match self.transition {
            Transition::Updated => self.previous.as_ref(),
            Transition::New | Transition::Unchanged => None,
        }
    }
}

/// Classify `event` against its last ledger entry.
pub fn decide(event: &Event, last: Option<&StatusLogEntry>) -> VersionDecision {
    let Some(last) = last else {
        return VersionDecision {
            transition: Transition::New,
            previous: None,
        };
    };

    let previous = last.version();
    let transition = if previous == event.version() {
        Transition::Unchanged
    } else {
        Transition::Updated
    };

    VersionDecision {
        transition,
        previous: Some(previous),
    }
}
