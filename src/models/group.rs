use super::{MatchField, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type GroupId = i64;

/// 分组状态：pending -> merged | ignored 为人工处置；dissolved 为成员不足或被并入其他分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    Merged,
    Ignored,
    Dissolved,
}

impl GroupStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, GroupStatus::Pending)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupStatus::Pending => "pending",
            GroupStatus::Merged => "merged",
            GroupStatus::Ignored => "ignored",
            GroupStatus::Dissolved => "dissolved",
        };
        f.write_str(s)
    }
}

/// 风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    High,
    Medium,
    Low,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTier::High => "high",
            RiskTier::Medium => "medium",
            RiskTier::Low => "low",
        };
        f.write_str(s)
    }
}

/// 处置信息 (非 pending 时存在)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolver_id: String,
    pub resolved_at: DateTime<Utc>,
    pub survivor: Option<RecordId>, // merged 时保留的记录
}

/// 重复分组 - 人工审核的持久单元，永不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: GroupId,
    pub members: BTreeSet<RecordId>,
    pub risk_score: f64, // 组内任意边的最大评分
    pub risk_tier: RiskTier,
    pub matched_fields: BTreeSet<MatchField>,
    pub status: GroupStatus,
    pub resolution: Option<Resolution>,
    pub linked_groups: BTreeSet<GroupId>, // 关联的已冻结分组
    pub absorbed_into: Option<GroupId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DuplicateGroup {
    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            id: self.id,
            member_count: self.members.len(),
            risk_score: self.risk_score,
            risk_tier: self.risk_tier,
            status: self.status,
            matched_fields: self.matched_fields.iter().copied().collect(),
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// 分组列表摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub member_count: usize,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub status: GroupStatus,
    pub matched_fields: Vec<MatchField>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// 列表过滤条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFilter {
    pub status: Option<GroupStatus>,
    pub risk_tier: Option<RiskTier>,
}

impl GroupFilter {
    pub fn matches(&self, group: &DuplicateGroup) -> bool {
        self.status.map_or(true, |s| s == group.status)
            && self.risk_tier.map_or(true, |t| t == group.risk_tier)
    }
}

/// 分页结果，next_cursor 为下一页起点 (不含)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPage {
    pub groups: Vec<GroupSummary>,
    pub next_cursor: Option<GroupId>,
}
