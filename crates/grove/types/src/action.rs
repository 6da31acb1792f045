//! Action ledger rows: one append-only row per lifecycle step.
//!
//! Rows are structurally tagged. A row carrying `decision` is a decision, a
//! row carrying `tool` is a creation, a bare `status` row is a transition;
//! the codec classifies in that order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::default_schema_version;
use crate::stamp::now_stamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDecision {
    Approved,
    Denied,
}

/// Lifecycle states an action can fold to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Denied,
    Running,
    Completed,
    Failed,
    Expired,
}

impl ActionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Denied
                | ActionStatus::Expired
                | ActionStatus::Completed
                | ActionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Denied => "denied",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Expired => "expired",
        }
    }
}

/// Creation row: the full request, folded state starts at pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default = "default_schema_version")]
    pub v: i64,
    pub action_id: String,
    #[serde(default = "now_stamp")]
    pub ts: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_agent_profile")]
    pub agent_profile: String,
    pub tool: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub command_preview: String,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default = "pending_status")]
    pub status: ActionStatus,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub ttl_seconds: u64,
    /// Second-precision local timestamp; empty means the action never expires.
    #[serde(default)]
    pub expires_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_agent_profile() -> String {
    "default".to_string()
}

fn pending_status() -> ActionStatus {
    ActionStatus::Pending
}

/// Decision row: approve or deny a pending action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRow {
    #[serde(default = "default_schema_version")]
    pub v: i64,
    pub action_id: String,
    #[serde(default = "now_stamp")]
    pub ts: String,
    #[serde(default)]
    pub user: String,
    pub decision: ActionDecision,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status transition row, optionally carrying an execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    #[serde(default = "default_schema_version")]
    pub v: i64,
    pub action_id: String,
    #[serde(default = "now_stamp")]
    pub ts: String,
    #[serde(default)]
    pub user: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any valid ledger row.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRow {
    Create(Box<ActionRequest>),
    Decision(DecisionRow),
    Status(StatusRow),
}

impl ActionRow {
    pub fn action_id(&self) -> &str {
        match self {
            ActionRow::Create(row) => &row.action_id,
            ActionRow::Decision(row) => &row.action_id,
            ActionRow::Status(row) => &row.action_id,
        }
    }

    pub fn ts(&self) -> &str {
        match self {
            ActionRow::Create(row) => &row.ts,
            ActionRow::Decision(row) => &row.ts,
            ActionRow::Status(row) => &row.ts,
        }
    }
}
