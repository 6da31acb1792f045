//! Append-only action ledger.
//!
//! Every lifecycle step of a proposed action is one appended row; nothing
//! is ever updated in place. The current state of an action is the fold of
//! all rows carrying its id, in file order:
//!
//! - the first creation row establishes the request and state `pending`
//! - a decision row moves it to `approved` or `denied` (denied is terminal)
//! - status rows move it through `running` to `completed`, `failed` or
//!   `expired`, attaching the result payload when one is carried
//! - terminal states accept no further transitions
//!
//! Rows observed before their creation row (a peer's interleaved appends)
//! are held provisionally and applied in arrival order once the creation
//! row shows up. The file itself doubles as the audit trail, so it is never
//! rewritten; pruning only trims the in-memory view.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use grove_fabric::{FabricError, LockedAppender, LogCursor, LogReader};
use grove_types::stamp::{format_stamp, local_now, now_stamp};
use grove_types::{
    codec, ActionDecision, ActionRequest, ActionRow, ActionStatus, RiskLevel, StatusRow,
    SCHEMA_VERSION,
};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("action {id} is already terminal ({status:?})")]
    AlreadyTerminal { id: String, status: ActionStatus },

    #[error("action {0} expired before a decision was recorded")]
    Expired(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("ledger encode error: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Encode(err.to_string())
    }
}

/// Caller-supplied fields of a new action request.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub user: String,
    pub agent_profile: String,
    pub tool: String,
    pub summary: String,
    pub command_preview: String,
    pub risk_level: RiskLevel,
    pub request_id: String,
    pub room: String,
    pub inputs: serde_json::Map<String, Value>,
    /// Zero means the action never expires.
    pub ttl_seconds: u64,
}

impl NewAction {
    pub fn new(user: impl Into<String>, tool: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent_profile: "default".to_string(),
            tool: tool.into(),
            summary: summary.into(),
            command_preview: String::new(),
            risk_level: RiskLevel::default(),
            request_id: String::new(),
            room: String::new(),
            inputs: serde_json::Map::new(),
            ttl_seconds: 0,
        }
    }
}

/// Folded state of one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionState {
    pub request: ActionRequest,
    pub status: ActionStatus,
    pub result: Option<Value>,
    pub decided_by: Option<String>,
    pub updated_ts: String,
}

impl ActionState {
    pub fn id(&self) -> &str {
        &self.request.action_id
    }

    /// True once the TTL deadline has passed. An empty deadline never
    /// expires; an unparseable one counts as already expired.
    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        let raw = self.request.expires_at.trim();
        if raw.is_empty() {
            return false;
        }
        match grove_types::stamp::parse_stamp(raw) {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }
}

/// Per-status totals over a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub total: usize,
    pub by_status: HashMap<ActionStatus, usize>,
    pub provisional_rows: usize,
}

/// In-memory fold of a ledger file.
#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    states: HashMap<String, ActionState>,
    order: Vec<String>,
    provisional: HashMap<String, Vec<ActionRow>>,
}

impl LedgerView {
    /// Applies one row. Rows for ids without a creation row yet are
    /// buffered, not discarded: on a shared log a peer's decision can land
    /// in our read window before its creation row does.
    pub fn apply(&mut self, row: ActionRow) {
        if !matches!(row, ActionRow::Create(_)) && !self.states.contains_key(row.action_id()) {
            self.provisional
                .entry(row.action_id().to_string())
                .or_default()
                .push(row);
            return;
        }
        match row {
            ActionRow::Create(request) => {
                let id = request.action_id.clone();
                if self.states.contains_key(&id) {
                    debug!(action_id = %id, "Duplicate creation row ignored");
                    return;
                }
                let updated_ts = request.ts.clone();
                self.states.insert(
                    id.clone(),
                    ActionState {
                        request: *request,
                        status: ActionStatus::Pending,
                        result: None,
                        decided_by: None,
                        updated_ts,
                    },
                );
                self.order.push(id.clone());
                if let Some(buffered) = self.provisional.remove(&id) {
                    for row in buffered {
                        self.apply(row);
                    }
                }
            }
            ActionRow::Decision(decision) => {
                if let Some(state) = self.states.get_mut(&decision.action_id) {
                    if state.status.is_terminal() {
                        return;
                    }
                    state.status = match decision.decision {
                        ActionDecision::Approved => ActionStatus::Approved,
                        ActionDecision::Denied => ActionStatus::Denied,
                    };
                    state.decided_by = Some(decision.user);
                    state.updated_ts = decision.ts;
                }
            }
            ActionRow::Status(update) => {
                if let Some(state) = self.states.get_mut(&update.action_id) {
                    if state.status.is_terminal() {
                        // A duplicate terminal row may still carry the result
                        // payload the first one lacked.
                        if state.result.is_none() && update.status == state.status {
                            state.result = update.result;
                        }
                        return;
                    }
                    state.status = update.status;
                    if update.result.is_some() {
                        state.result = update.result;
                    }
                    state.updated_ts = update.ts;
                }
            }
        }
    }

    pub fn get(&self, action_id: &str) -> Option<&ActionState> {
        self.states.get(action_id)
    }

    /// States in creation order.
    pub fn states(&self) -> impl Iterator<Item = &ActionState> {
        self.order.iter().filter_map(|id| self.states.get(id))
    }

    /// Ids whose folded state is not yet terminal, in creation order.
    pub fn list_pending(&self) -> Vec<String> {
        self.states()
            .filter(|state| !state.status.is_terminal())
            .map(|state| state.id().to_string())
            .collect()
    }

    /// Drops terminal actions from this view only; the backing file keeps
    /// its full history. Returns how many were dropped.
    pub fn prune_terminal(&mut self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| !state.status.is_terminal());
        self.order.retain(|id| self.states.contains_key(id));
        before - self.states.len()
    }

    pub fn stats(&self) -> LedgerStats {
        let mut by_status: HashMap<ActionStatus, usize> = HashMap::new();
        for state in self.states.values() {
            *by_status.entry(state.status).or_insert(0) += 1;
        }
        LedgerStats {
            total: self.states.len(),
            by_status,
            provisional_rows: self.provisional.values().map(Vec::len).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// The ledger: appends rows, folds them back into states on demand.
pub struct ActionLedger {
    path: PathBuf,
    appender: LockedAppender,
}

impl ActionLedger {
    pub fn new(path: impl Into<PathBuf>, appender: LockedAppender) -> Self {
        Self {
            path: path.into(),
            appender,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a creation row and returns the stored request. TTLs become
    /// an absolute deadline stamped into the row, so every reader applies
    /// the same expiry.
    pub async fn create(&self, action: NewAction) -> Result<ActionRequest, LedgerError> {
        let expires_at = if action.ttl_seconds > 0 {
            format_stamp(local_now() + chrono::Duration::seconds(action.ttl_seconds as i64))
        } else {
            String::new()
        };
        let request = ActionRequest {
            v: SCHEMA_VERSION,
            action_id: next_action_id(),
            ts: now_stamp(),
            user: action.user,
            agent_profile: action.agent_profile,
            tool: action.tool,
            summary: action.summary,
            command_preview: action.command_preview,
            risk_level: action.risk_level,
            status: ActionStatus::Pending,
            request_id: action.request_id,
            room: action.room,
            inputs: action.inputs,
            ttl_seconds: action.ttl_seconds,
            expires_at,
            extra: serde_json::Map::new(),
        };
        self.append(&ActionRow::Create(Box::new(request.clone())))
            .await?;
        info!(
            action_id = %request.action_id,
            tool = %request.tool,
            "Recorded action request"
        );
        Ok(request)
    }

    /// Records an approval or denial. Only pending actions can be decided;
    /// an overdue one gets an expired row appended instead and the call
    /// fails with [`LedgerError::Expired`].
    pub async fn decide(
        &self,
        action_id: &str,
        decision: ActionDecision,
        actor: &str,
    ) -> Result<(), LedgerError> {
        let view = self.fold().await?;
        let state = view
            .get(action_id)
            .ok_or_else(|| LedgerError::UnknownAction(action_id.to_string()))?;
        if state.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal {
                id: action_id.to_string(),
                status: state.status,
            });
        }
        if state.is_overdue(local_now()) {
            self.append_status(action_id, ActionStatus::Expired, None, actor)
                .await?;
            return Err(LedgerError::Expired(action_id.to_string()));
        }
        if state.status != ActionStatus::Pending {
            return Err(LedgerError::InvalidStateTransition(format!(
                "cannot decide action {action_id} in status {:?}",
                state.status
            )));
        }
        self.append(&ActionRow::Decision(grove_types::DecisionRow {
            v: SCHEMA_VERSION,
            action_id: action_id.to_string(),
            ts: now_stamp(),
            user: actor.to_string(),
            decision,
            extra: serde_json::Map::new(),
        }))
        .await?;
        info!(action_id, decision = ?decision, "Recorded action decision");
        Ok(())
    }

    /// Records a status transition, optionally with a result payload.
    ///
    /// `running` requires an approved action; `completed` and `failed`
    /// require a running one; `expired` only that the action is not
    /// already terminal.
    pub async fn update_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<Value>,
        actor: &str,
    ) -> Result<(), LedgerError> {
        let view = self.fold().await?;
        let state = view
            .get(action_id)
            .ok_or_else(|| LedgerError::UnknownAction(action_id.to_string()))?;
        if state.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal {
                id: action_id.to_string(),
                status: state.status,
            });
        }
        let allowed = match status {
            ActionStatus::Running => state.status == ActionStatus::Approved,
            ActionStatus::Completed | ActionStatus::Failed => {
                state.status == ActionStatus::Running
            }
            ActionStatus::Expired => true,
            _ => false,
        };
        if !allowed {
            return Err(LedgerError::InvalidStateTransition(format!(
                "cannot move action {action_id} from {:?} to {:?}",
                state.status, status
            )));
        }
        self.append_status(action_id, status, result, actor).await?;
        info!(action_id, status = status.as_str(), "Recorded action status");
        Ok(())
    }

    /// Appends expired rows for every non-terminal action whose deadline
    /// has passed, returning the ids expired here.
    pub async fn expire_overdue(&self) -> Result<Vec<String>, LedgerError> {
        let view = self.fold().await?;
        let now = local_now();
        let mut expired = Vec::new();
        for state in view.states() {
            if !state.status.is_terminal() && state.is_overdue(now) {
                self.append_status(state.id(), ActionStatus::Expired, None, "")
                    .await?;
                expired.push(state.id().to_string());
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue actions");
        }
        Ok(expired)
    }

    pub async fn get(&self, action_id: &str) -> Result<Option<ActionState>, LedgerError> {
        Ok(self.fold().await?.get(action_id).cloned())
    }

    pub async fn list_pending(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.fold().await?.list_pending())
    }

    /// Reads the whole file and folds it. Rows the codec rejects are
    /// skipped; a missing file is an empty ledger.
    pub async fn fold(&self) -> Result<LedgerView, LedgerError> {
        let reader = LogReader::open(&self.path);
        let mut cursor = LogCursor::default();
        let mut view = LedgerView::default();
        for line in reader.read_new(&mut cursor)? {
            if let Some(row) = codec::decode_action(&line) {
                view.apply(row);
            }
        }
        Ok(view)
    }

    async fn append_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<Value>,
        actor: &str,
    ) -> Result<(), LedgerError> {
        self.append(&ActionRow::Status(StatusRow {
            v: SCHEMA_VERSION,
            action_id: action_id.to_string(),
            ts: now_stamp(),
            user: actor.to_string(),
            status,
            result,
            output_preview: None,
            exit_code: None,
            duration_ms: None,
            extra: serde_json::Map::new(),
        }))
        .await
    }

    async fn append(&self, row: &ActionRow) -> Result<(), LedgerError> {
        let line = codec::encode_action(row)?;
        self.appender.append_line(&self.path, &line).await?;
        Ok(())
    }
}

fn next_action_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..8].to_string()
}
