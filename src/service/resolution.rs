use crate::error::{DedupError, Result};
use crate::models::{AuditEntry, AuditOutcome, Disposition, DuplicateGroup, GroupId, GroupStatus};
use crate::service::cluster::ClusterIndex;
use chrono::{DateTime, Utc};

/// 处置结果
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Applied(DuplicateGroup),
    Replayed(DuplicateGroup), // 相同处置的重试，不产生新事件
}

impl ResolutionOutcome {
    pub fn group(&self) -> &DuplicateGroup {
        match self {
            ResolutionOutcome::Applied(g) | ResolutionOutcome::Replayed(g) => g,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, ResolutionOutcome::Replayed(_))
    }
}

enum Decision {
    Apply,
    Replay,
    Reject(DedupError),
}

/// 对 pending 分组做状态比较并设置 (调用方持有聚类锁)
fn decide(group: &DuplicateGroup, disposition: Disposition) -> Decision {
    match group.status {
        GroupStatus::Pending => match disposition.survivor() {
            Some(s) if !group.members.contains(&s) => Decision::Reject(DedupError::UnknownMember {
                group_id: group.id,
                record_id: s,
            }),
            _ => Decision::Apply,
        },
        GroupStatus::Dissolved => Decision::Reject(DedupError::InvalidTransition {
            group_id: group.id,
            status: group.status,
        }),
        status => {
            let survivor = group.resolution.as_ref().and_then(|r| r.survivor);
            if status == disposition.target_status() && survivor == disposition.survivor() {
                Decision::Replay
            } else {
                let by = group
                    .resolution
                    .as_ref()
                    .map(|r| r.resolver_id.as_str())
                    .unwrap_or("unknown");
                let existing = match survivor {
                    Some(s) => format!("{} (survivor {}) by {}", status, s, by),
                    None => format!("{} by {}", status, by),
                };
                Decision::Reject(DedupError::ConflictingResolution {
                    group_id: group.id,
                    existing,
                })
            }
        }
    }
}

/// 处置分组：每个分组恰好一次生效；每次尝试都写审计日志
pub fn resolve(
    index: &mut ClusterIndex,
    group_id: GroupId,
    disposition: Disposition,
    resolver_id: &str,
    now: DateTime<Utc>,
) -> Result<ResolutionOutcome> {
    let group = index.group(group_id).ok_or(DedupError::GroupNotFound(group_id))?;
    let decision = decide(group, disposition);
    let replayed = matches!(decision, Decision::Replay).then(|| group.clone());

    let audit = |outcome: AuditOutcome, detail: Option<String>| AuditEntry {
        group_id,
        disposition,
        resolver_id: resolver_id.to_string(),
        outcome,
        detail,
        at: now,
    };

    match decision {
        Decision::Apply => {
            let group = index.apply_resolution(group_id, disposition, resolver_id, now)?;
            index.push_audit(audit(AuditOutcome::Applied, None));
            tracing::info!(
                "[Resolution] 分组 {} -> {} (处理人: {}, 保留: {:?})",
                group_id,
                group.status,
                resolver_id,
                disposition.survivor()
            );
            Ok(ResolutionOutcome::Applied(group))
        }
        Decision::Replay => {
            index.push_audit(audit(AuditOutcome::Replayed, None));
            tracing::debug!("[Resolution] 分组 {} 重复处置，按幂等返回", group_id);
            let group = replayed.ok_or(DedupError::GroupNotFound(group_id))?;
            Ok(ResolutionOutcome::Replayed(group))
        }
        Decision::Reject(err) => {
            let outcome = match err {
                DedupError::ConflictingResolution { .. } => AuditOutcome::Conflict,
                _ => AuditOutcome::Rejected,
            };
            index.push_audit(audit(outcome, Some(err.to_string())));
            tracing::warn!("[Resolution] 分组 {} 处置被拒绝: {}", group_id, err);
            Err(err)
        }
    }
}
