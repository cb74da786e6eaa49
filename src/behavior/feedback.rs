use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use homeward_navigation::{FailureReason, FinderMode};
use tracing::info;

/// Why a person could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachCause {
    /// Odometry drifted too much.
    Distance,
    /// The person is outside the allowed area.
    Area,
}

/// A message shown on the tablet, spoken, or posted as a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    DefiningHome,
    DefineHomeSuccess,
    CantDefineHome(FinderMode),
    AtHome,
    GoHome,
    GoEngage,
    CantGoHome(FailureReason),
    CantReachHuman(ReachCause),
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cue::DefiningHome => f.write_str("Defining my home."),
            Cue::DefineHomeSuccess => f.write_str("This is my home now."),
            Cue::CantDefineHome(FinderMode::Slam) => {
                f.write_str("I could not map this place, so I cannot define my home.")
            }
            Cue::CantDefineHome(FinderMode::Pod) => {
                f.write_str("I cannot see my charging station, so I cannot define my home.")
            }
            Cue::CantDefineHome(FinderMode::Marker) => {
                f.write_str("I cannot see my markers, so I cannot define my home.")
            }
            Cue::AtHome => f.write_str("I am home."),
            Cue::GoHome => f.write_str("Going home."),
            Cue::GoEngage => f.write_str("Coming to see you."),
            Cue::CantGoHome(FailureReason::NoTarget) => {
                f.write_str("I cannot find my way home. Could you help me?")
            }
            Cue::CantGoHome(_) => f.write_str("Something is blocking my way home."),
            Cue::CantReachHuman(ReachCause::Distance) => {
                f.write_str("I have moved too much, I need to go home first.")
            }
            Cue::CantReachHuman(ReachCause::Area) => {
                f.write_str("I am not allowed to go that far from home.")
            }
        }
    }
}

/// Tablet, speech and notification output.
pub trait Feedback: Send + Sync {
    fn display(&self, cue: Cue);
    fn say(&self, cue: Cue);
    /// Post a persistent notification; returns its id.
    fn notify(&self, cue: Cue) -> u64;
    fn remove_notification(&self, id: u64);
}

/// Feedback written to the log.
#[derive(Debug, Default)]
pub struct LogFeedback {
    next_id: AtomicU64,
}

impl Feedback for LogFeedback {
    fn display(&self, cue: Cue) {
        info!(target: "homeward::tablet", ?cue, "{cue}");
    }

    fn say(&self, cue: Cue) {
        info!(target: "homeward::speech", "\"{cue}\"");
    }

    fn notify(&self, cue: Cue) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(target: "homeward::notification", id, "{cue}");
        id
    }

    fn remove_notification(&self, id: u64) {
        info!(target: "homeward::notification", id, "Notification removed");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_cues_follow_reason() {
        let no_target = Cue::CantGoHome(FailureReason::NoTarget).to_string();
        let obstacle = Cue::CantGoHome(FailureReason::Obstacle).to_string();
        assert_ne!(no_target, obstacle);
        assert_eq!(Cue::CantGoHome(FailureReason::Unknown).to_string(), obstacle);
    }

    #[test]
    fn test_log_feedback_ids_are_unique() {
        let feedback = LogFeedback::default();
        let a = feedback.notify(Cue::AtHome);
        let b = feedback.notify(Cue::AtHome);
        assert_ne!(a, b);
    }
}
