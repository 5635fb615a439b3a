use super::{GroupId, GroupStatus, RecordId, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分组变更事件，至少一次投递；订阅方按 (group_id, version) 去重
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupEvent {
    GroupFormed {
        group_id: GroupId,
        version: u64,
        members: Vec<RecordId>,
        risk_tier: RiskTier,
    },
    GroupUpdated {
        group_id: GroupId,
        version: u64,
        members: Vec<RecordId>,
        risk_tier: RiskTier,
    },
    GroupResolved {
        group_id: GroupId,
        version: u64,
        status: GroupStatus,
        survivor: Option<RecordId>,
    },
    GroupDissolved {
        group_id: GroupId,
        version: u64,
        absorbed_into: Option<GroupId>,
    },
}

impl GroupEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            GroupEvent::GroupFormed { group_id, .. }
            | GroupEvent::GroupUpdated { group_id, .. }
            | GroupEvent::GroupResolved { group_id, .. }
            | GroupEvent::GroupDissolved { group_id, .. } => *group_id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            GroupEvent::GroupFormed { version, .. }
            | GroupEvent::GroupUpdated { version, .. }
            | GroupEvent::GroupResolved { version, .. }
            | GroupEvent::GroupDissolved { version, .. } => *version,
        }
    }
}

/// 人工处置动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Disposition {
    Merge { survivor: RecordId },
    Ignore,
}

impl Disposition {
    pub fn target_status(&self) -> GroupStatus {
        match self {
            Disposition::Merge { .. } => GroupStatus::Merged,
            Disposition::Ignore => GroupStatus::Ignored,
        }
    }

    pub fn survivor(&self) -> Option<RecordId> {
        match self {
            Disposition::Merge { survivor } => Some(*survivor),
            Disposition::Ignore => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Replayed, // 幂等重试
    Conflict,
    Rejected,
}

/// 审计日志条目：每次处置尝试都会记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub group_id: GroupId,
    pub disposition: Disposition,
    pub resolver_id: String,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}
