//! Safety status values and the automatic escalation table.
//!
//! Stored documents carry the status as free text ("I'm Safe", "Evacuated",
//! ...). Inside the crate it is always a [`SafetyStatus`], and escalation only
//! ever looks at its [`StatusKind`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EscalationConfig;

/// Reason written when a member is moved to "Not Yet Responded".
pub const NOT_YET_RESPONDED_REASON: &str = "Auto: 2h inactivity";

/// Reason written when a member is moved to "Unknown".
pub const UNKNOWN_REASON: &str = "Auto: 8h inactivity + no location";

/// A manual response chosen by a member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Response {
    /// "I'm Safe".
    Safe,
    /// "Needs Help".
    NeedsHelp,
    /// "Evacuated".
    Evacuated,
    /// Any other label the app offered.
    Other(String),
}

impl Response {
    /// The label stored in documents.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Safe => "I'm Safe",
            Self::NeedsHelp => "Needs Help",
            Self::Evacuated => "Evacuated",
            Self::Other(label) => label,
        }
    }
}

/// A member's safety status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SafetyStatus {
    /// The member answered manually.
    Responded(Response),
    /// No manual answer within the first escalation window.
    NotYetResponded,
    /// No manual answer and no location for the whole cascade.
    Unknown,
}

/// The three states escalation reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Any manual response.
    Responded,
    /// "Not Yet Responded".
    NotYetResponded,
    /// "Unknown".
    Unknown,
}

impl SafetyStatus {
    /// "I'm Safe".
    #[must_use]
    pub fn safe() -> Self {
        Self::Responded(Response::Safe)
    }

    /// Parse stored or user-entered text.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. Text
    /// that names none of the known states is kept as a custom response.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "not yet responded" => Self::NotYetResponded,
            "unknown" => Self::Unknown,
            "i'm safe" | "im safe" | "safe" => Self::Responded(Response::Safe),
            "needs help" | "need help" => Self::Responded(Response::NeedsHelp),
            "evacuated" => Self::Responded(Response::Evacuated),
            _ => Self::Responded(Response::Other(trimmed.to_string())),
        }
    }

    /// The escalation-relevant kind of this status.
    #[must_use]
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Responded(_) => StatusKind::Responded,
            Self::NotYetResponded => StatusKind::NotYetResponded,
            Self::Unknown => StatusKind::Unknown,
        }
    }
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Responded(response) => f.write_str(response.label()),
            Self::NotYetResponded => f.write_str("Not Yet Responded"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

impl From<String> for SafetyStatus {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<SafetyStatus> for String {
    fn from(status: SafetyStatus) -> Self {
        status.to_string()
    }
}

/// One step of the automatic cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    /// Responded → Not Yet Responded.
    ToNotYetResponded,
    /// Not Yet Responded → Unknown.
    ToUnknown,
}

impl EscalationStage {
    /// The stage that starts from `kind`, if any.
    ///
    /// Only a responded member starts a cascade. The `ToUnknown` stage is
    /// entered by the cascade itself, never from a snapshot.
    #[must_use]
    pub fn starting_from(kind: StatusKind) -> Option<Self> {
        match kind {
            StatusKind::Responded => Some(Self::ToNotYetResponded),
            StatusKind::NotYetResponded | StatusKind::Unknown => None,
        }
    }

    /// The kind a member must still have for this stage to apply.
    #[must_use]
    pub fn required_kind(self) -> StatusKind {
        match self {
            Self::ToNotYetResponded => StatusKind::Responded,
            Self::ToUnknown => StatusKind::NotYetResponded,
        }
    }

    /// The status written when this stage fires.
    #[must_use]
    pub fn target(self) -> SafetyStatus {
        match self {
            Self::ToNotYetResponded => SafetyStatus::NotYetResponded,
            Self::ToUnknown => SafetyStatus::Unknown,
        }
    }

    /// The reason written alongside [`Self::target`].
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::ToNotYetResponded => NOT_YET_RESPONDED_REASON,
            Self::ToUnknown => UNKNOWN_REASON,
        }
    }

    /// The stage armed after this one fires successfully.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::ToNotYetResponded => Some(Self::ToUnknown),
            Self::ToUnknown => None,
        }
    }

    /// Time from the last manual update until this stage fires.
    #[must_use]
    pub fn offset(self, config: &EscalationConfig) -> chrono::Duration {
        match self {
            Self::ToNotYetResponded => config.not_yet_responded_after(),
            Self::ToUnknown => config.not_yet_responded_after() + config.unknown_after(),
        }
    }
}

impl fmt::Display for EscalationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToNotYetResponded => write!(f, "to_not_yet_responded"),
            Self::ToUnknown => write!(f, "to_unknown"),
        }
    }
}
