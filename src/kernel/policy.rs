//! Send policy and the pure eligibility decision behind each upload check.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default minimum spacing between uploads in `ask` mode.
pub const UPLOAD_INTERVAL_DAYS: i64 = 7;

pub fn default_upload_interval() -> Duration {
    Duration::days(UPLOAD_INTERVAL_DAYS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    #[default]
    Ask,
    Always,
    Never,
}

/// One-time answer remembered from a previous prompt ("do not ask again").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserResponse {
    Yes,
    No,
    Cancel,
    #[default]
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendPolicy {
    pub mode: SendMode,
    pub last_sent: Option<DateTime<Utc>>,
    pub user_response: UserResponse,
}

/// Answers the host can give to a pending prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    SendOnce,
    DontSendOnce,
    Always,
    Never,
    /// Dismissed without deciding; ask again at the next eligible check.
    AskLater,
}

impl UserChoice {
    pub fn sends(self) -> bool {
        matches!(self, UserChoice::SendOnce | UserChoice::Always)
    }

    /// Sticky mode this choice installs, if any.
    pub fn sticky_mode(self) -> Option<SendMode> {
        match self {
            UserChoice::Always => Some(SendMode::Always),
            UserChoice::Never => Some(SendMode::Never),
            _ => None,
        }
    }

    /// One-time response stored when the user asked not to be asked again.
    pub fn remembered_response(self) -> Option<UserResponse> {
        match self {
            UserChoice::SendOnce => Some(UserResponse::Yes),
            UserChoice::DontSendOnce => Some(UserResponse::No),
            UserChoice::AskLater => Some(UserResponse::Cancel),
            UserChoice::Always | UserChoice::Never => None,
        }
    }
}

impl std::str::FromStr for UserChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send-once" | "yes" => Ok(UserChoice::SendOnce),
            "dont-send-once" | "no" => Ok(UserChoice::DontSendOnce),
            "always" => Ok(UserChoice::Always),
            "never" => Ok(UserChoice::Never),
            "ask-later" | "cancel" => Ok(UserChoice::AskLater),
            other => Err(format!("unknown choice '{other}'")),
        }
    }
}

/// Why a check ended without contacting anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PolicyNever,
    NotDue,
    RememberedNo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    Upload,
    Prompt,
    Skip(SkipReason),
}

/// Whole days since the last confirmed upload, `None` if there never was one.
pub fn days_since_last_sent(policy: &SendPolicy, now: DateTime<Utc>) -> Option<i64> {
    policy.last_sent.map(|sent| (now - sent).num_days())
}

/// Interval gate of `ask` mode.
pub fn is_due(policy: &SendPolicy, interval: Duration, now: DateTime<Utc>) -> bool {
    match policy.last_sent {
        None => true,
        Some(sent) => now - sent >= interval,
    }
}

/// True when a check right now would put a choice in front of the user.
pub fn should_prompt_for_upload(policy: &SendPolicy, interval: Duration, now: DateTime<Utc>) -> bool {
    decide(policy, false, interval, now) == UploadDecision::Prompt
}

/// Eligibility gate, evaluated in order:
/// forced → upload; `never` → skip; `always` → upload; otherwise the
/// interval decides, then any remembered one-time answer.
pub fn decide(
    policy: &SendPolicy,
    force: bool,
    interval: Duration,
    now: DateTime<Utc>,
) -> UploadDecision {
    if force {
        return UploadDecision::Upload;
    }
    match policy.mode {
        SendMode::Never => return UploadDecision::Skip(SkipReason::PolicyNever),
        SendMode::Always => return UploadDecision::Upload,
        SendMode::Ask => {}
    }
    if !is_due(policy, interval, now) {
        return UploadDecision::Skip(SkipReason::NotDue);
    }
    match policy.user_response {
        UserResponse::Yes => UploadDecision::Upload,
        UserResponse::No => UploadDecision::Skip(SkipReason::RememberedNo),
        UserResponse::Cancel | UserResponse::Unset => UploadDecision::Prompt,
    }
}

/// Next moment a check in `ask` mode stops being a no-op.
pub fn next_due(policy: &SendPolicy, interval: Duration) -> Option<DateTime<Utc>> {
    policy.last_sent.map(|sent| sent + interval)
}
