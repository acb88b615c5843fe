//! Request/response contract between the confirmation page and the dispatcher

use std::fmt;
use std::str::FromStr;

/// Usage text for the dispatcher command line
pub const USAGE: &str = "Usage: snapshot-restore action <restore|reboot>\n\n\
    Actions:\n  \
    restore  Restore the booted snapshot (asks for authentication)\n  \
    reboot   Restart the system";

/// Named actions the page can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Restore,
    Reboot,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::Restore, Action::Reboot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Restore => "restore",
            Action::Reboot => "reboot",
        }
    }

    /// Exact, case-sensitive name match
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown action '{}'", s))
    }
}

/// Result of dispatching an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success(String),
    Failure(String),
    /// The requested name is not an [`Action`]
    InvalidAction(String),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success(_))
    }

    /// Process exit code for the dispatcher
    pub fn exit_code(&self) -> i32 {
        match self {
            ActionOutcome::Success(_) => 0,
            ActionOutcome::Failure(_) | ActionOutcome::InvalidAction(_) => 1,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ActionOutcome::Success(msg) | ActionOutcome::Failure(msg) => msg.clone(),
            ActionOutcome::InvalidAction(name) => format!("Unknown action '{}'", name),
        }
    }
}
