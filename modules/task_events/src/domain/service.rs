use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use modkit::ManagedService;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::model::{ActivityKind, ProjectStats, TaskActivity, TaskEvent, TaskStats};

/// In-memory task activity counters plus a bounded history.
pub struct TaskStatsService {
    max_recent: usize,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    created: u64,
    completed: u64,
    projects: BTreeMap<String, ProjectStats>,
    recent: VecDeque<TaskActivity>,
}

impl TaskStatsService {
    pub fn new(max_recent: usize) -> Self {
        Self {
            max_recent,
            state: Mutex::new(State::default()),
        }
    }

    pub fn record(&self, kind: ActivityKind, task: &TaskEvent) -> TaskActivity {
        let activity = TaskActivity {
            kind,
            task_id: task.id.clone(),
            title: task.title.clone(),
            project: task.project.clone(),
            at: Utc::now(),
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let project = task
            .project
            .as_ref()
            .map(|p| state.projects.entry(p.clone()).or_default());
        match kind {
            ActivityKind::Created => {
                if let Some(p) = project {
                    p.created += 1;
                }
                state.created += 1;
            }
            ActivityKind::Completed => {
                if let Some(p) = project {
                    p.completed += 1;
                }
                state.completed += 1;
            }
        }

        if self.max_recent > 0 {
            if state.recent.len() == self.max_recent {
                state.recent.pop_front();
            }
            state.recent.push_back(activity.clone());
        }
        debug!(task_id = %task.id, ?kind, "Task activity recorded");
        activity
    }

    pub fn stats(&self) -> TaskStats {
        let state = self.state.lock();
        TaskStats {
            created: state.created,
            completed: state.completed,
            open: state.created.saturating_sub(state.completed),
            projects: state.projects.clone(),
        }
    }

    /// Newest first, at most `limit` entries (all retained when `None`).
    pub fn recent(&self, limit: Option<usize>) -> Vec<TaskActivity> {
        let state = self.state.lock();
        let take = limit.unwrap_or(state.recent.len());
        state.recent.iter().rev().take(take).cloned().collect()
    }

    pub fn max_recent(&self) -> usize {
        self.max_recent
    }
}

#[async_trait]
impl ManagedService for TaskStatsService {
    async fn health_check(&self) -> anyhow::Result<Value> {
        let stats = self.stats();
        Ok(json!({
            "created": stats.created,
            "completed": stats.completed,
            "open": stats.open,
        }))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let stats = self.stats();
        info!(
            created = stats.created,
            completed = stats.completed,
            "Task stats service shutting down"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::TaskId;

    fn task(id: u64, project: Option<&str>) -> TaskEvent {
        TaskEvent {
            id: TaskId::Number(id),
            title: Some(format!("task {id}")),
            project: project.map(String::from),
            assignee: None,
        }
    }

    #[test]
    fn counts_per_project_and_open_tasks() {
        let svc = TaskStatsService::new(10);
        svc.record(ActivityKind::Created, &task(1, Some("apollo")));
        svc.record(ActivityKind::Created, &task(2, Some("apollo")));
        svc.record(ActivityKind::Created, &task(3, None));
        svc.record(ActivityKind::Completed, &task(1, Some("apollo")));

        let stats = svc.stats();
        assert_eq!(stats.created, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.open, 2);
        assert_eq!(
            stats.projects["apollo"],
            ProjectStats {
                created: 2,
                completed: 1
            }
        );
        assert_eq!(stats.projects.len(), 1);
    }

    #[test]
    fn completions_without_creations_do_not_underflow() {
        let svc = TaskStatsService::new(10);
        svc.record(ActivityKind::Completed, &task(7, None));
        assert_eq!(svc.stats().open, 0);
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let svc = TaskStatsService::new(2);
        for id in 1..=3 {
            svc.record(ActivityKind::Created, &task(id, None));
        }

        let ids: Vec<_> = svc.recent(None).into_iter().map(|a| a.task_id).collect();
        assert_eq!(ids, [TaskId::Number(3), TaskId::Number(2)]);
        assert_eq!(svc.recent(Some(1)).len(), 1);
    }

    #[test]
    fn zero_history_keeps_nothing() {
        let svc = TaskStatsService::new(0);
        svc.record(ActivityKind::Created, &task(1, None));
        assert!(svc.recent(None).is_empty());
        assert_eq!(svc.stats().created, 1);
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let svc = TaskStatsService::new(5);
        svc.record(ActivityKind::Created, &task(1, None));
        let health = svc.health_check().await.unwrap();
        assert_eq!(health, json!({ "created": 1, "completed": 0, "open": 1 }));
    }
}
