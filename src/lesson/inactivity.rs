//! Inactivity thresholds that prompt the tutor.

use crate::config::InactivityConfig;

/// Which inactivity prompt is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityPrompt {
    /// First threshold: a gentle check-in.
    CheckIn,
    /// Second threshold: offer a hint or a micro-goal.
    Hint,
}

/// Tracks which thresholds have already fired since the last reset.
///
/// A threshold is due once the inactivity counter reaches it and stays due
/// until [`InactivityMonitor::mark_fired`] is called, so a prompt that could
/// not be delivered (the tutor was busy) is retried on a later tick. The
/// latches clear when the counter drops below the threshold again.
#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    check_in_secs: u64,
    hint_secs: u64,
    check_in_fired: bool,
    hint_fired: bool,
}

impl InactivityMonitor {
    pub fn new(config: &InactivityConfig) -> Self {
        Self {
            check_in_secs: config.check_in_secs,
            hint_secs: config.hint_secs,
            check_in_fired: false,
            hint_fired: false,
        }
    }

    /// Returns the prompt due at `inactive_for_sec`, if any. The later
    /// threshold wins when both are due.
    pub fn observe(&mut self, inactive_for_sec: u64) -> Option<InactivityPrompt> {
        if inactive_for_sec < self.check_in_secs {
            self.check_in_fired = false;
        }
        if inactive_for_sec < self.hint_secs {
            self.hint_fired = false;
        }

        if inactive_for_sec >= self.hint_secs && !self.hint_fired {
            Some(InactivityPrompt::Hint)
        } else if inactive_for_sec >= self.check_in_secs
            && !self.check_in_fired
            && inactive_for_sec < self.hint_secs
        {
            Some(InactivityPrompt::CheckIn)
        } else {
            None
        }
    }

    /// Records that `prompt` was delivered. Delivering the hint also retires
    /// the check-in.
    pub fn mark_fired(&mut self, prompt: InactivityPrompt) {
        match prompt {
            InactivityPrompt::CheckIn => self.check_in_fired = true,
            InactivityPrompt::Hint => {
                self.check_in_fired = true;
                self.hint_fired = true;
            }
        }
    }

    /// System message sent to the tutor for `prompt`.
    pub fn prompt_text(&self, prompt: InactivityPrompt) -> String {
        match prompt {
            InactivityPrompt::CheckIn => format!(
                "System: User has been inactive for {} seconds. Gently check in.",
                self.check_in_secs
            ),
            InactivityPrompt::Hint => format!(
                "System: User has been inactive for {}. Offer a hint or a micro-goal.",
                describe_secs(self.hint_secs)
            ),
        }
    }
}

fn describe_secs(secs: u64) -> String {
    match secs {
        60 => "1 minute".to_owned(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}
