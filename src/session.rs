//! # Session/Execution Tracker (UI model)
//!
//! A parallel observer subscribed to the event bus, maintaining two
//! insertion-ordered mappings under a single monitor: open sessions and
//! their statements/executions.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::metrics::MetricsCollector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Started,
    Compiled,
    Failed,
    Finished,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub start: i64,
    pub ip: String,
    pub user: String,
    pub finish_timestamp: Option<i64>,
    pub total_execution: u64,
}

#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub statement: String,
    pub session_id: String,
    pub start: i64,
    pub user: String,
    pub finish_timestamp: Option<i64>,
    pub execute_plan: Option<String>,
    pub detail: Option<String>,
    pub state: ExecutionState,
    pub job_ids: Vec<i64>,
    pub group_id: Option<String>,
}

struct Tracked {
    sessions: IndexMap<String, SessionInfo>,
    executions: IndexMap<String, ExecutionInfo>,
}

/// Retention bounds for the trimming policy (insertion-order FIFO, per the
/// resolved open question in the design notes).
pub struct TrackerLimits {
    pub session_limit: usize,
    pub execution_limit: usize,
}

impl Default for TrackerLimits {
    fn default() -> Self {
        Self {
            session_limit: 1000,
            execution_limit: 1000,
        }
    }
}

pub struct SessionTracker {
    state: Mutex<Tracked>,
    limits: TrackerLimits,
    metrics: Arc<MetricsCollector>,
}

impl SessionTracker {
    pub fn new(limits: TrackerLimits, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            state: Mutex::new(Tracked {
                sessions: IndexMap::new(),
                executions: IndexMap::new(),
            }),
            limits,
            metrics,
        }
    }

    pub fn on_session_created(&self, info: SessionInfo) {
        let mut state = self.state.lock();
        state.sessions.insert(info.session_id.clone(), info);
        self.metrics.inc_online_session_num();
        trim_sessions(&mut state.sessions, self.limits.session_limit);
    }

    pub fn on_session_closed(&self, session_id: &str, finish: i64) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.finish_timestamp = Some(finish);
            self.metrics.dec_online_session_num();
        }
        trim_sessions(&mut state.sessions, self.limits.session_limit);
    }

    pub fn on_statement_start(&self, info: ExecutionInfo) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(&info.session_id) {
            session.total_execution += 1;
        }
        state.executions.insert(info.statement.clone(), info);
        self.metrics.inc_total_running();
        trim_executions(&mut state.executions, self.limits.execution_limit);
    }

    pub fn on_statement_parsed(&self, statement_id: &str, plan: String) {
        let mut state = self.state.lock();
        if let Some(execution) = state.executions.get_mut(statement_id) {
            execution.execute_plan = Some(plan);
            execution.state = ExecutionState::Compiled;
        }
    }

    pub fn on_statement_error(&self, statement_id: &str, finish: i64, detail: String) {
        let mut state = self.state.lock();
        if let Some(execution) = state.executions.get_mut(statement_id) {
            execution.finish_timestamp = Some(finish);
            execution.detail = Some(detail);
            execution.state = ExecutionState::Failed;
            self.metrics.dec_total_running();
        }
        trim_executions(&mut state.executions, self.limits.execution_limit);
    }

    pub fn on_statement_finish(&self, statement_id: &str, finish: i64) {
        let mut state = self.state.lock();
        if let Some(execution) = state.executions.get_mut(statement_id) {
            execution.finish_timestamp = Some(finish);
            execution.state = ExecutionState::Finished;
            self.metrics.dec_total_running();
        }
        trim_executions(&mut state.executions, self.limits.execution_limit);
    }

    /// For every execution whose `group_id` matches the job's group
    /// property, append `job_id`.
    pub fn on_job_start(&self, job_id: i64, group_id: &str) {
        let mut state = self.state.lock();
        for execution in state.executions.values_mut() {
            if execution.group_id.as_deref() == Some(group_id) {
                execution.job_ids.push(job_id);
            }
        }
    }

    pub fn online_session_num(&self) -> i64 {
        self.metrics.online_session_num()
    }

    pub fn total_running(&self) -> i64 {
        self.metrics.total_running()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn execution_count(&self) -> usize {
        self.state.lock().executions.len()
    }
}

fn trim_sessions(sessions: &mut IndexMap<String, SessionInfo>, limit: usize) {
    if sessions.len() <= limit {
        return;
    }
    let quota = std::cmp::max(limit / 10, 1);
    let mut removed = 0;
    let finished_keys: Vec<String> = sessions
        .iter()
        .filter(|(_, s)| s.finish_timestamp.is_some())
        .take(quota)
        .map(|(k, _)| k.clone())
        .collect();
    for key in finished_keys {
        sessions.shift_remove(&key);
        removed += 1;
        if removed >= quota {
            break;
        }
    }
}

fn trim_executions(executions: &mut IndexMap<String, ExecutionInfo>, limit: usize) {
    if executions.len() <= limit {
        return;
    }
    let quota = std::cmp::max(limit / 10, 1);
    let finished_keys: Vec<String> = executions
        .iter()
        .filter(|(_, e)| matches!(e.state, ExecutionState::Finished | ExecutionState::Failed))
        .take(quota)
        .map(|(k, _)| k.clone())
        .collect();
    for key in finished_keys {
        executions.shift_remove(&key);
    }
}
