use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Cancelled,
    Completed,
}

/// 重处理任务快照 (对外返回)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub status: JobStatus,
    pub since: Option<DateTime<Utc>>,
    pub total: usize,
    pub processed: usize,
    pub checkpoint: Option<RecordId>, // 最后处理完成的记录
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
