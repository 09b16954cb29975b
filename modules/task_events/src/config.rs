use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEventsConfig {
    /// Publish `notification:requested` for every completed task.
    #[serde(default = "default_notify_on_complete")]
    pub notify_on_complete: bool,
    /// How many activity entries `/recent` can return.
    #[serde(default = "default_max_recent")]
    pub max_recent: usize,
}

impl Default for TaskEventsConfig {
    fn default() -> Self {
        Self {
            notify_on_complete: default_notify_on_complete(),
            max_recent: default_max_recent(),
        }
    }
}

fn default_notify_on_complete() -> bool {
    true
}

fn default_max_recent() -> usize {
    50
}
