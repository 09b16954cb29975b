use serde::{Deserialize, Serialize};

use crate::domain::model::TaskActivity;

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecentActivityDto {
    pub capacity: usize,
    pub items: Vec<TaskActivity>,
}
