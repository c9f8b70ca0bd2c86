use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub Uuid);

impl MissionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Stale,
}

impl MissionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stale => "stale",
        }
    }

    #[must_use]
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "stale" => Self::Stale,
            _ => Self::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Active,
    InProgress,
    Review,
    Done,
    Blocked,
    Someday,
    Assigned,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Someday => "someday",
            Self::Assigned => "assigned",
        }
    }

    #[must_use]
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "in_progress" => Self::InProgress,
            "review" => Self::Review,
            "done" => Self::Done,
            "blocked" => Self::Blocked,
            "someday" => Self::Someday,
            "assigned" => Self::Assigned,
            _ => Self::Todo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Online,
    Idle,
    Busy,
    Offline,
}

impl AgentState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    #[must_use]
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "online" => Self::Online,
            "busy" => Self::Busy,
            "offline" => Self::Offline,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    #[must_use]
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// One council review attached to a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub agent: String,
    pub verdict: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Fallback assignee when a proposal carries no domain or an unknown one.
pub const DEFAULT_AGENT: &str = "ed";

/// Static domain-to-agent routing table. Each entry pairs a proposal domain
/// with the agent that owns missions in that domain.
pub const AGENT_ROSTER: [(&str, &str); 6] = [
    ("engineering", "ed"),
    ("product", "light"),
    ("commerce", "toji"),
    ("influence", "power"),
    ("operations", "major"),
    ("coordination", "pip"),
];

#[must_use]
pub fn route_domain(domain: Option<&str>) -> &'static str {
    let Some(domain) = domain else {
        return DEFAULT_AGENT;
    };
    AGENT_ROSTER
        .iter()
        .find(|(d, _)| *d == domain)
        .map_or(DEFAULT_AGENT, |(_, agent)| agent)
}

/// Derive task priority from proposal risk. Lower number means higher
/// priority; unknown or absent risk falls through to the lowest tier.
#[must_use]
pub fn priority_for_risk(risk: Option<&str>) -> i64 {
    match risk {
        Some("high") => 1,
        Some("medium") => 2,
        _ => 3,
    }
}

#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_id_is_unique() {
        let a = ProposalId::new();
        let b = ProposalId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn routing_covers_every_domain() {
        for (domain, agent) in AGENT_ROSTER {
            assert_eq!(route_domain(Some(domain)), agent);
        }
    }

    #[test]
    fn routing_falls_back_to_default_agent() {
        assert_eq!(route_domain(None), DEFAULT_AGENT);
        assert_eq!(route_domain(Some("astrology")), DEFAULT_AGENT);
        assert_eq!(route_domain(Some("")), DEFAULT_AGENT);
    }

    #[test]
    fn priority_tracks_risk_level() {
        assert_eq!(priority_for_risk(Some("high")), 1);
        assert_eq!(priority_for_risk(Some("medium")), 2);
        assert_eq!(priority_for_risk(Some("low")), 3);
        assert_eq!(priority_for_risk(None), 3);
        assert_eq!(priority_for_risk(Some("weird")), 3);
    }

    #[test]
    fn status_round_trips_through_db_strings() {
        for status in [MissionStatus::Queued, MissionStatus::Running, MissionStatus::Completed, MissionStatus::Failed, MissionStatus::Stale] {
            assert_eq!(MissionStatus::from_str(status.as_str()), status);
        }
        for status in [ProposalStatus::Pending, ProposalStatus::Approved, ProposalStatus::Rejected] {
            assert_eq!(ProposalStatus::from_str(status.as_str()), status);
        }
    }
}
