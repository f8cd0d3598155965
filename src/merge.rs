//! # Provider-side Merge Utilities
//!
//! Pure functions used at query time by the reader-side history provider to
//! reconcile multiple entity views of the same application into an ordered
//! attempt list, and to reconcile that list with a live resource-manager
//! report. No I/O, no shared state: safe to property-test directly.

use std::collections::HashMap;

/// One execution attempt of an application, as reconstructed from timeline
/// entities.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptInfo {
    pub attempt_id: Option<String>,
    pub completed: bool,
    pub last_updated: i64,
    pub finish_time: i64,
}

/// An application's full attempt history, keyed by application id.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationHistoryInfo {
    pub app_id: String,
    pub attempts: Vec<AttemptInfo>,
}

/// Terminal states a live YARN/resource-manager report may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YarnAppState {
    Running,
    Finished,
    Failed,
    Killed,
}

impl YarnAppState {
    pub fn is_terminal(self) -> bool {
        matches!(self, YarnAppState::Finished | YarnAppState::Failed | YarnAppState::Killed)
    }
}

#[derive(Debug, Clone)]
pub struct YarnReport {
    pub state: YarnAppState,
    pub finish_time: i64,
}

/// `mostRecentAttempt(a, b)`: prefer the completed one; else the one with
/// the larger `lastUpdated`; ties go to `b`.
pub fn most_recent_attempt(a: &AttemptInfo, b: &AttemptInfo) -> AttemptInfo {
    if a.completed && !b.completed {
        return a.clone();
    }
    if b.completed && !a.completed {
        return b.clone();
    }
    if a.last_updated > b.last_updated {
        a.clone()
    } else {
        b.clone()
    }
}

/// Build a map keyed by `attemptId` (`None` is a valid key), insert `old`,
/// then for each of `latest` merge via `most_recent_attempt` or insert.
/// Result is sorted newest-first by `lastUpdated`.
pub fn merge_attempt_info_lists(old: &[AttemptInfo], latest: &[AttemptInfo]) -> Vec<AttemptInfo> {
    let mut by_attempt: HashMap<Option<String>, AttemptInfo> = HashMap::new();
    for attempt in old {
        by_attempt.insert(attempt.attempt_id.clone(), attempt.clone());
    }
    for attempt in latest {
        by_attempt
            .entry(attempt.attempt_id.clone())
            .and_modify(|existing| *existing = most_recent_attempt(existing, attempt))
            .or_insert_with(|| attempt.clone());
    }
    sort_attempts(by_attempt.into_values().collect())
}

/// Sort attempts newest-first by `lastUpdated`, breaking ties on
/// `attemptId` so the ordering is total and independent of insertion or
/// hash-map iteration order.
pub fn sort_attempts(mut attempts: Vec<AttemptInfo>) -> Vec<AttemptInfo> {
    attempts.sort_by(|a, b| b.last_updated.cmp(&a.last_updated).then_with(|| a.attempt_id.cmp(&b.attempt_id)));
    attempts
}

/// `combineResults(original, latest)`: map-merge by application id; on
/// collision, merge attempts via `merge_attempt_info_lists`.
pub fn combine_results(
    original: &[ApplicationHistoryInfo],
    latest: &[ApplicationHistoryInfo],
) -> Vec<ApplicationHistoryInfo> {
    let mut by_app_id: HashMap<String, ApplicationHistoryInfo> = HashMap::new();
    for app in original {
        by_app_id.insert(app.app_id.clone(), app.clone());
    }
    for app in latest {
        by_app_id
            .entry(app.app_id.clone())
            .and_modify(|existing| {
                existing.attempts = merge_attempt_info_lists(&existing.attempts, &app.attempts);
            })
            .or_insert_with(|| app.clone());
    }
    let mut result: Vec<ApplicationHistoryInfo> = by_app_id.into_values().collect();
    result.sort_by(|a, b| a.app_id.cmp(&b.app_id));
    result
}

/// For each incomplete app, if the live report is terminal mark complete
/// using the report's finish time; if live, leave incomplete; if absent,
/// mark complete at `lastUpdated` only if `now - lastUpdated > livenessWindow`,
/// else leave unchanged.
pub fn complete_apps_from_yarn(
    apps: &[ApplicationHistoryInfo],
    reports_by_id: &HashMap<String, YarnReport>,
    now: i64,
    liveness_window: i64,
) -> Vec<ApplicationHistoryInfo> {
    apps.iter()
        .map(|app| {
            let attempts = app
                .attempts
                .iter()
                .map(|attempt| complete_attempt_from_yarn(attempt, reports_by_id.get(&app.app_id), now, liveness_window))
                .collect();
            ApplicationHistoryInfo {
                app_id: app.app_id.clone(),
                attempts,
            }
        })
        .collect()
}

fn complete_attempt_from_yarn(
    attempt: &AttemptInfo,
    report: Option<&YarnReport>,
    now: i64,
    liveness_window: i64,
) -> AttemptInfo {
    if attempt.completed {
        return attempt.clone();
    }
    match report {
        Some(report) if report.state.is_terminal() => AttemptInfo {
            completed: true,
            finish_time: report.finish_time,
            ..attempt.clone()
        },
        Some(_) => attempt.clone(),
        None => {
            if now - attempt.last_updated > liveness_window {
                AttemptInfo {
                    completed: true,
                    finish_time: attempt.last_updated,
                    ..attempt.clone()
                }
            } else {
                attempt.clone()
            }
        }
    }
}
