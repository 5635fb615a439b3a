use crate::models::{GroupId, GroupStatus, RecordId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DedupError>;

/// 查重核心错误类型
#[derive(Error, Debug)]
pub enum DedupError {
    /// 记录格式错误/信息不全，进入匹配前即被拒绝
    #[error("Validation error: {0}")]
    Validation(String),

    /// 权重/阈值配置非法，启动时致命
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Group {0} not found")]
    GroupNotFound(GroupId),

    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    #[error("Reprocess job {0} not found")]
    JobNotFound(i64),

    #[error("Group {group_id} is {status}, only pending groups can be resolved")]
    InvalidTransition { group_id: GroupId, status: GroupStatus },

    #[error("Record {record_id} is not a member of group {group_id}")]
    UnknownMember { group_id: GroupId, record_id: RecordId },

    #[error("Group {group_id} was already resolved differently: {existing}")]
    ConflictingResolution { group_id: GroupId, existing: String },

    /// 内部不变量被破坏（例如一条记录同时属于两个 pending 分组）
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DedupError {
    /// 稳定的错误码，供审核端区分“已被他人处理”等情况
    pub fn code(&self) -> &'static str {
        match self {
            DedupError::Validation(_) => "validation_error",
            DedupError::Configuration(_) => "configuration_error",
            DedupError::GroupNotFound(_) => "group_not_found",
            DedupError::RecordNotFound(_) => "record_not_found",
            DedupError::JobNotFound(_) => "job_not_found",
            DedupError::InvalidTransition { .. } => "invalid_transition",
            DedupError::UnknownMember { .. } => "unknown_member",
            DedupError::ConflictingResolution { .. } => "conflicting_resolution",
            DedupError::Consistency(_) => "consistency_error",
            DedupError::Io(_) => "io_error",
            DedupError::Csv(_) => "csv_error",
        }
    }
}

impl From<config::ConfigError> for DedupError {
    fn from(e: config::ConfigError) -> Self {
        DedupError::Configuration(e.to_string())
    }
}
